//! Document discovery under the source root and local staging copies.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Document source {path} is unreachable: {source}")]
    SourceUnreachable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to stage {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A payment order file found on the document source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub source_path: PathBuf,
    /// Name of the numeric-prefixed folder the file sits in.
    pub project_folder: String,
    pub modified: DateTime<Local>,
    pub days_old: i64,
}

impl SourceDocument {
    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

pub struct DocumentSource {
    root: PathBuf,
    max_age_days: Option<u32>,
}

impl DocumentSource {
    /// Fails when the root is not a readable directory.
    pub fn open(root: impl Into<PathBuf>, max_age_days: Option<u32>) -> Result<Self, DiscoveryError> {
        let root = root.into();
        std::fs::read_dir(&root).map_err(|e| DiscoveryError::SourceUnreachable {
            path: root.clone(),
            source: e,
        })?;
        Ok(Self { root, max_age_days })
    }

    /// PDF files directly inside numeric-prefixed subdirectories, sorted by
    /// path. Files older than the staleness window are left out.
    pub fn discover(&self, now: DateTime<Local>) -> Result<Vec<SourceDocument>, DiscoveryError> {
        let unreachable_err = |e| DiscoveryError::SourceUnreachable {
            path: self.root.clone(),
            source: e,
        };

        let mut folders = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(unreachable_err)? {
            let path = entry.map_err(unreachable_err)?.path();
            let numeric = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.chars().next())
                .is_some_and(|c| c.is_ascii_digit());
            if numeric && path.is_dir() {
                folders.push(path);
            }
        }
        folders.sort();

        let mut documents = Vec::new();
        let mut stale = 0usize;
        for folder in folders {
            let project_folder = folder
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let entries = match std::fs::read_dir(&folder) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(folder = %folder.display(), error = %e, "Skipping unreadable project folder");
                    continue;
                }
            };

            let mut files: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_pdf(p))
                .collect();
            files.sort();

            for source_path in files {
                let modified = match std::fs::metadata(&source_path).and_then(|m| m.modified()) {
                    Ok(time) => DateTime::<Local>::from(time),
                    Err(e) => {
                        tracing::warn!(document = %source_path.display(), error = %e, "No modification time, skipping");
                        continue;
                    }
                };
                let days_old = (now - modified).num_days();
                if self.max_age_days.is_some_and(|max| days_old > i64::from(max)) {
                    stale += 1;
                    continue;
                }
                documents.push(SourceDocument {
                    source_path,
                    project_folder: project_folder.clone(),
                    modified,
                    days_old,
                });
            }
        }

        tracing::info!(
            root = %self.root.display(),
            found = documents.len(),
            stale,
            "Document discovery complete"
        );
        Ok(documents)
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Local working copies under `files/YYYY-MM/DD-MM-YYYY/<project folder>/`.
pub struct Staging {
    dir: PathBuf,
}

impl Staging {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn day_dir(&self, now: DateTime<Local>) -> PathBuf {
        self.dir
            .join(now.format("%Y-%m").to_string())
            .join(now.format("%d-%m-%Y").to_string())
    }

    /// Copy the document into today's staging folder, keeping its
    /// modification time so extraction sees the original age.
    pub fn stage(&self, document: &SourceDocument, now: DateTime<Local>) -> Result<PathBuf, DiscoveryError> {
        let folder = self.day_dir(now).join(&document.project_folder);
        let target = folder.join(document.file_name());
        let staging_err = |e| DiscoveryError::Staging {
            path: document.source_path.clone(),
            source: e,
        };

        std::fs::create_dir_all(&folder).map_err(staging_err)?;
        std::fs::copy(&document.source_path, &target).map_err(staging_err)?;

        let modified = File::open(&document.source_path)
            .and_then(|f| f.metadata())
            .and_then(|m| m.modified());
        if let Ok(time) = modified {
            if let Err(e) = OpenOptions::new()
                .write(true)
                .open(&target)
                .and_then(|f| f.set_modified(time))
            {
                tracing::debug!(staged = %target.display(), error = %e, "Could not carry modification time");
            }
        }

        tracing::debug!(
            document = %document.source_path.display(),
            staged = %target.display(),
            "Document staged"
        );
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::{Duration, SystemTime};

    fn touch(path: &Path, age_days: u64) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"%PDF-1.4").unwrap();
        let time = SystemTime::now() - Duration::from_secs(age_days * 86_400 + 60);
        OpenOptions::new()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn open_fails_on_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let result = DocumentSource::open(dir.path().join("absent"), None);
        assert!(matches!(result, Err(DiscoveryError::SourceUnreachable { .. })));
    }

    #[test]
    fn only_pdfs_in_numeric_folders_are_found() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("10 Проект/b.pdf"), 0);
        touch(&root.join("10 Проект/a.PDF"), 0);
        touch(&root.join("10 Проект/notes.txt"), 0);
        touch(&root.join("10 Проект/nested/deep.pdf"), 0);
        touch(&root.join("Архив/old.pdf"), 0);
        touch(&root.join("top.pdf"), 0);
        touch(&root.join("2 Другой/c.pdf"), 0);

        let source = DocumentSource::open(root, None).unwrap();
        let docs = source.discover(Local::now()).unwrap();
        let names: Vec<(String, String)> = docs
            .iter()
            .map(|d| (d.project_folder.clone(), d.file_name()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("10 Проект".to_string(), "a.PDF".to_string()),
                ("10 Проект".to_string(), "b.pdf".to_string()),
                ("2 Другой".to_string(), "c.pdf".to_string()),
            ]
        );
    }

    #[test]
    fn staleness_window_skips_old_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("1/fresh.pdf"), 1);
        touch(&dir.path().join("1/old.pdf"), 30);

        let all = DocumentSource::open(dir.path(), None)
            .unwrap()
            .discover(Local::now())
            .unwrap();
        assert_eq!(all.len(), 2);

        let recent = DocumentSource::open(dir.path(), Some(7))
            .unwrap()
            .discover(Local::now())
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].file_name(), "fresh.pdf");
        assert_eq!(recent[0].days_old, 1);
    }

    #[test]
    fn staging_copies_into_dated_project_folder() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("net");
        touch(&root.join("10 Проект/order.pdf"), 3);
        let doc = DocumentSource::open(&root, None)
            .unwrap()
            .discover(Local::now())
            .unwrap()
            .remove(0);

        let staging = Staging::new(dir.path().join("files"));
        let now = Local::now();
        let staged = staging.stage(&doc, now).unwrap();

        assert_eq!(
            staged,
            staging.day_dir(now).join("10 Проект").join("order.pdf")
        );
        assert!(doc.source_path.exists());
        assert_eq!(std::fs::read(&staged).unwrap(), b"%PDF-1.4");
        let staged_age = (now - DateTime::<Local>::from(
            std::fs::metadata(&staged).unwrap().modified().unwrap(),
        ))
        .num_days();
        assert_eq!(staged_age, 3);
    }

    #[test]
    fn day_dir_is_month_then_day() {
        let staging = Staging::new("/data/files");
        let now = Local.with_ymd_and_hms(2024, 5, 3, 10, 0, 0).unwrap();
        assert_eq!(
            staging.day_dir(now),
            PathBuf::from("/data/files/2024-05/03-05-2024")
        );
    }
}
