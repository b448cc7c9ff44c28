use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Minimum bigram similarity for a fuzzy payer match.
const PAYER_SIMILARITY_CUTOFF: f64 = 0.6;

/// One legal entity that pays through the workflow tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayerProfile {
    /// Catalog item id of the payer in the workflow tool.
    pub internal_id: u64,
    /// Root of the payer's project repository. Empty when the payer has no
    /// managed repository.
    #[serde(default)]
    pub repository_root: PathBuf,
    /// Accountant responsible for reviewing this payer's documents.
    #[serde(default)]
    pub curator: Option<String>,
}

impl PayerProfile {
    pub fn new(internal_id: u64, repository_root: impl Into<PathBuf>) -> Self {
        Self {
            internal_id,
            repository_root: repository_root.into(),
            curator: None,
        }
    }

    pub fn with_curator(mut self, curator: &str) -> Self {
        self.curator = Some(curator.to_string());
        self
    }
}

/// Legal-entity name → payer profile. Injected into the matcher and the
/// filing resolver instead of living in a global table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayerCatalog {
    payers: BTreeMap<String, PayerProfile>,
}

impl PayerCatalog {
    pub fn insert(&mut self, name: &str, profile: PayerProfile) {
        self.payers.insert(name.to_string(), profile);
    }

    pub fn get(&self, name: &str) -> Option<&PayerProfile> {
        self.payers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.payers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.payers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payers.is_empty()
    }

    /// Repository root for a payer; `None` for unknown payers and empty roots.
    pub fn repository_root(&self, name: &str) -> Option<&Path> {
        self.get(name)
            .map(|p| p.repository_root.as_path())
            .filter(|root| !root.as_os_str().is_empty())
    }

    pub fn curator(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|p| p.curator.as_deref())
    }

    /// Map a payer name as printed on a bank document to its catalog key.
    ///
    /// Exact match after normalization first, then the most similar name by
    /// character-bigram overlap if it clears the cutoff.
    pub fn resolve_name(&self, raw: &str) -> Option<&str> {
        let wanted = normalize_payer(raw);
        if wanted.is_empty() {
            return None;
        }

        let mut best: Option<(&str, f64)> = None;
        for name in self.payers.keys() {
            let candidate = normalize_payer(name);
            if candidate == wanted {
                return Some(name.as_str());
            }
            let score = strsim::sorensen_dice(&wanted, &candidate);
            if score >= PAYER_SIMILARITY_CUTOFF && best.map_or(true, |(_, s)| score > s) {
                best = Some((name.as_str(), score));
            }
        }

        match best {
            Some((name, score)) => {
                tracing::debug!(raw, matched = name, score, "Payer resolved by similarity");
                Some(name)
            }
            None => None,
        }
    }
}

/// Drop quotes, the legal-form prefix and punctuation noise that differ
/// between bank printouts and the catalog.
fn normalize_payer(name: &str) -> String {
    let stripped: String = name
        .replace("ТОО", " ")
        .chars()
        .filter(|c| !matches!(c, '"' | '«' | '»' | '\'' | '.'))
        .collect();
    WHITESPACE
        .replace_all(stripped.trim(), " ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PayerCatalog {
        let mut catalog = PayerCatalog::default();
        catalog.insert(
            "ТОО \"AVC Group\"",
            PayerProfile::new(109941218, "/srv/avcg").with_curator("Бухгалтерия 02"),
        );
        catalog.insert("ТОО \"Refoil\"", PayerProfile::new(163661023, "/srv/refoil"));
        catalog.insert("Прочие", PayerProfile::new(121893841, ""));
        catalog
    }

    #[test]
    fn empty_root_reads_as_missing() {
        let c = catalog();
        assert_eq!(c.repository_root("Прочие"), None);
        assert_eq!(c.repository_root("Нет такого"), None);
        assert_eq!(
            c.repository_root("ТОО \"Refoil\""),
            Some(Path::new("/srv/refoil"))
        );
    }

    #[test]
    fn resolves_exact_after_normalization() {
        let c = catalog();
        assert_eq!(c.resolve_name("ТОО  «AVC Group»"), Some("ТОО \"AVC Group\""));
        assert_eq!(c.resolve_name("refoil"), Some("ТОО \"Refoil\""));
    }

    #[test]
    fn resolves_close_spelling() {
        let c = catalog();
        assert_eq!(c.resolve_name("AVC Grup"), Some("ТОО \"AVC Group\""));
    }

    #[test]
    fn unrelated_name_does_not_resolve() {
        let c = catalog();
        assert_eq!(c.resolve_name("Совсем другая компания"), None);
        assert_eq!(c.resolve_name("\"\""), None);
    }

    #[test]
    fn curator_lookup() {
        let c = catalog();
        assert_eq!(c.curator("ТОО \"AVC Group\""), Some("Бухгалтерия 02"));
        assert_eq!(c.curator("ТОО \"Refoil\""), None);
    }

    #[test]
    fn deserializes_from_config_map() {
        let json = r#"{"ТОО \"Refoil\"": {"internal_id": 5, "repository_root": ""}}"#;
        let c: PayerCatalog = serde_json::from_str(json).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c.repository_root("ТОО \"Refoil\""), None);
    }

    #[test]
    fn closest_of_several_candidates_wins() {
        let mut c = catalog();
        c.insert("ТОО \"AVC Trade\"", PayerProfile::new(7, "/srv/avct"));
        assert_eq!(c.resolve_name("AVC Groop"), Some("ТОО \"AVC Group\""));
        assert_eq!(c.resolve_name("AVC Trad"), Some("ТОО \"AVC Trade\""));
    }
}
