//! Filing Resolver: where a reconciled payment order lives in the repository.
//!
//! Walks `payer root → fiscal year → project → supplier → counterparty →
//! financial documents`. Each link that cannot be found fails with its own
//! cause so a broken folder convention is reviewable from the ledger note.
//! Only the counterparty and financial-documents links are ever created under
//! the default policy; a failure leaves the tree untouched.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::{PayerCatalog, ProjectId, TaxpayerId};

#[derive(Error, Debug)]
pub enum FilingError {
    #[error("Payer {payer:?} has no repository root")]
    PayerRootMissing { payer: String },

    #[error("Repository root {root} is not reachable")]
    PayerRootUnreachable { root: PathBuf },

    #[error("Fiscal year folder {year} not found under {root}")]
    FiscalYearFolderMissing { year: i32, root: PathBuf },

    #[error("Project folder for {project_id} not found under {searched}")]
    ProjectFolderMissing { project_id: String, searched: PathBuf },

    #[error("Supplier folder not found in {project_folder}")]
    SupplierFolderMissing { project_folder: PathBuf },

    #[error("A different file already exists at {path}")]
    DestinationConflict { path: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FilingError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// What to do when no project folder exists for the task's project id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingProjectPolicy {
    #[default]
    Fail,
    /// Create `<year>/<project id>/<supplier folder>` and carry on.
    Create,
}

/// What happens to the source document once it is filed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceDisposition {
    #[default]
    Move,
    Copy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilingPolicy {
    pub on_missing_project: MissingProjectPolicy,
    pub on_success: SourceDisposition,
    /// How many directory levels below the year folder a project may sit.
    pub search_depth: usize,
    pub supplier_term: String,
    pub supplier_folder_name: String,
    pub financial_term: String,
    pub financial_folder_name: String,
}

impl Default for FilingPolicy {
    fn default() -> Self {
        Self {
            on_missing_project: MissingProjectPolicy::Fail,
            on_success: SourceDisposition::Move,
            search_depth: 3,
            supplier_term: "поставщик".into(),
            supplier_folder_name: "3. Поставщик".into(),
            financial_term: "фин".into(),
            financial_folder_name: "Финансовые документы".into(),
        }
    }
}

/// Inputs of one resolution, taken from the matched task and the order.
#[derive(Debug, Clone, Copy)]
pub struct FilingRequest<'a> {
    pub payer: &'a str,
    pub project_id: &'a ProjectId,
    /// Display name used when a new counterparty folder has to be created.
    pub counterparty: &'a str,
    pub taxpayer_id: &'a TaxpayerId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilingLocation {
    pub folder: PathBuf,
    /// Directories created while resolving, outermost first.
    pub created: Vec<PathBuf>,
}

/// Where the document ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub path: PathBuf,
    /// The destination already held an identical file.
    pub already_present: bool,
}

pub struct FilingResolver {
    catalog: Arc<PayerCatalog>,
    policy: FilingPolicy,
}

impl FilingResolver {
    pub fn new(catalog: Arc<PayerCatalog>, policy: FilingPolicy) -> Self {
        Self { catalog, policy }
    }

    pub fn resolve(&self, request: &FilingRequest<'_>) -> Result<FilingLocation, FilingError> {
        let mut created = Vec::new();

        // Step 1: payer root
        let root = self
            .catalog
            .repository_root(request.payer)
            .ok_or_else(|| FilingError::PayerRootMissing {
                payer: request.payer.to_string(),
            })?;
        if !root.is_dir() {
            return Err(FilingError::PayerRootUnreachable {
                root: root.to_path_buf(),
            });
        }

        // Step 2: fiscal year
        let year = request.project_id.fiscal_year();
        let year_folder = find_child_containing(root, &year.to_string())?.ok_or_else(|| {
            FilingError::FiscalYearFolderMissing {
                year,
                root: root.to_path_buf(),
            }
        })?;

        // Step 3: project folder, bounded search
        let project_folder = match search_bounded(
            &year_folder,
            &request.project_id.as_str().to_lowercase(),
            self.policy.search_depth,
        )? {
            Some(found) => found,
            None => match self.policy.on_missing_project {
                MissingProjectPolicy::Fail => {
                    return Err(FilingError::ProjectFolderMissing {
                        project_id: request.project_id.to_string(),
                        searched: year_folder,
                    })
                }
                MissingProjectPolicy::Create => {
                    let project = year_folder.join(request.project_id.as_str());
                    tracing::info!(folder = %project.display(), "Creating missing project folder");
                    ensure_dir(&project, &mut created)?;
                    ensure_dir(&project.join(&self.policy.supplier_folder_name), &mut created)?;
                    project
                }
            },
        };
        tracing::debug!(folder = %project_folder.display(), "Project folder resolved");

        // Step 4: supplier folder
        let supplier_term = self.policy.supplier_term.to_lowercase();
        let supplier_folder =
            match search_bounded(&project_folder, &supplier_term, self.policy.search_depth)? {
                Some(found) => found,
                None if self.policy.on_missing_project == MissingProjectPolicy::Create => {
                    let supplier = project_folder.join(&self.policy.supplier_folder_name);
                    ensure_dir(&supplier, &mut created)?;
                    supplier
                }
                None => return Err(FilingError::SupplierFolderMissing { project_folder }),
            };

        // Step 5: counterparty and financial documents
        let folder = match find_child_containing(&supplier_folder, request.taxpayer_id.as_str())? {
            Some(counterparty_folder) => {
                let financial_term = self.policy.financial_term.to_lowercase();
                match find_child_containing(&counterparty_folder, &financial_term)? {
                    Some(existing) => existing,
                    None => {
                        let financial =
                            counterparty_folder.join(&self.policy.financial_folder_name);
                        ensure_dir(&financial, &mut created)?;
                        financial
                    }
                }
            }
            None => {
                let counterparty_folder = supplier_folder.join(counterparty_folder_name(
                    request.counterparty,
                    request.taxpayer_id,
                ));
                ensure_dir(&counterparty_folder, &mut created)?;
                let financial = counterparty_folder.join(&self.policy.financial_folder_name);
                ensure_dir(&financial, &mut created)?;
                financial
            }
        };

        if !created.is_empty() {
            tracing::info!(created = created.len(), folder = %folder.display(), "Created filing folders");
        }
        Ok(FilingLocation { folder, created })
    }

    /// Put `source` into `location` according to the configured disposition.
    ///
    /// An identical file already at the destination counts as filed. A
    /// different one is a conflict and the source stays where it is.
    pub fn place(&self, source: &Path, location: &FilingLocation) -> Result<Placement, FilingError> {
        let file_name = source
            .file_name()
            .ok_or_else(|| FilingError::io(source, io::ErrorKind::InvalidInput.into()))?;
        let destination = location.folder.join(file_name);

        if destination.exists() {
            let same = content_digest(source).map_err(|e| FilingError::io(source, e))?
                == content_digest(&destination).map_err(|e| FilingError::io(&destination, e))?;
            if !same {
                return Err(FilingError::DestinationConflict { path: destination });
            }
            if self.policy.on_success == SourceDisposition::Move {
                std::fs::remove_file(source).map_err(|e| FilingError::io(source, e))?;
            }
            tracing::info!(destination = %destination.display(), "Identical document already filed");
            return Ok(Placement {
                path: destination,
                already_present: true,
            });
        }

        match self.policy.on_success {
            SourceDisposition::Move => move_file(source, &destination)?,
            SourceDisposition::Copy => {
                std::fs::copy(source, &destination)
                    .map_err(|e| FilingError::io(&destination, e))?;
            }
        }
        tracing::info!(
            destination = %destination.display(),
            disposition = ?self.policy.on_success,
            "Document filed"
        );
        Ok(Placement {
            path: destination,
            already_present: false,
        })
    }
}

/// `"{counterparty without quotes}, {taxpayer id}"`, safe as a path segment.
pub fn counterparty_folder_name(counterparty: &str, taxpayer_id: &TaxpayerId) -> String {
    let cleaned: String = counterparty
        .chars()
        .filter(|c| {
            !matches!(
                c,
                '"' | '\'' | '«' | '»' | '“' | '”' | '/' | '\\' | ':' | '*' | '?' | '<' | '>' | '|' | '\0'
            )
        })
        .collect();
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    if cleaned.is_empty() {
        taxpayer_id.to_string()
    } else {
        format!("{cleaned}, {taxpayer_id}")
    }
}

/// Immediate subdirectories of `dir`, sorted by name.
fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>, FilingError> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| FilingError::io(dir, e))? {
        let path = entry.map_err(|e| FilingError::io(dir, e))?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn name_contains(path: &Path, needle_lower: &str) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase().contains(needle_lower))
        .unwrap_or(false)
}

fn find_child_containing(dir: &Path, needle_lower: &str) -> Result<Option<PathBuf>, FilingError> {
    Ok(sorted_subdirs(dir)?
        .into_iter()
        .find(|p| name_contains(p, needle_lower)))
}

/// Breadth-first search up to `depth` levels below `root`; shallowest hit
/// wins, ties broken by name.
fn search_bounded(
    root: &Path,
    needle_lower: &str,
    depth: usize,
) -> Result<Option<PathBuf>, FilingError> {
    let mut level = vec![root.to_path_buf()];
    for _ in 0..depth {
        let mut next = Vec::new();
        for dir in &level {
            for child in sorted_subdirs(dir)? {
                if name_contains(&child, needle_lower) {
                    return Ok(Some(child));
                }
                next.push(child);
            }
        }
        if next.is_empty() {
            break;
        }
        level = next;
    }
    Ok(None)
}

fn ensure_dir(path: &Path, created: &mut Vec<PathBuf>) -> Result<(), FilingError> {
    if path.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(path).map_err(|e| FilingError::io(path, e))?;
    created.push(path.to_path_buf());
    Ok(())
}

fn move_file(source: &Path, destination: &Path) -> Result<(), FilingError> {
    if std::fs::rename(source, destination).is_ok() {
        return Ok(());
    }
    // Network shares are usually another device: copy, then drop the source.
    std::fs::copy(source, destination).map_err(|e| FilingError::io(destination, e))?;
    std::fs::remove_file(source).map_err(|e| FilingError::io(source, e))?;
    Ok(())
}

fn content_digest(path: &Path) -> io::Result<[u8; 32]> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().into())
}
