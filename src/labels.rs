//! Label tables for both pipeline stages.
//!
//! The coarse table is one label per line, indexed from 0. The fine-grained
//! vocabulary is split over three files:
//!
//! - an ordinal table, one code per line; line `N` (1-based) is score index `N`
//! - a code-to-name table, `"<code>\t<name>"` per line
//! - a whitelist of codes, one per line
//!
//! Only whitelisted codes keep a name. Tables are built once at startup and
//! shared read-only afterwards.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// On-disk locations of the label tables.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelPaths {
    pub coarse: Option<PathBuf>,
    pub codes: Option<PathBuf>,
    pub code_names: Option<PathBuf>,
    pub whitelist: Option<PathBuf>,
}

/// Fine-grained vocabulary: classifier score index to human-readable name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BreedVocabulary {
    index_to_code: HashMap<usize, String>,
    code_to_name: HashMap<String, String>,
}

impl BreedVocabulary {
    /// Build from the raw text of the three fine-grained tables.
    pub fn parse(codes: &str, code_names: &str, whitelist: &str) -> Self {
        let index_to_code = codes
            .lines()
            .enumerate()
            .map(|(line, code)| (line + 1, code.trim().to_string()))
            .filter(|(_, code)| !code.is_empty())
            .collect();

        let allowed: HashSet<&str> = whitelist
            .lines()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .collect();

        let mut code_to_name = HashMap::new();
        for line in code_names.lines() {
            let mut fields = line.split('\t');
            let (Some(code), Some(name)) = (fields.next(), fields.next()) else {
                continue;
            };
            let code = code.trim();
            if allowed.contains(code) {
                code_to_name.insert(code.to_string(), name.trim().to_string());
            }
        }

        Self {
            index_to_code,
            code_to_name,
        }
    }

    /// Name for a classifier score index, if the index maps to a whitelisted code.
    pub fn name_for_index(&self, index: usize) -> Option<&str> {
        let code = self.index_to_code.get(&index)?;
        self.code_to_name.get(code).map(String::as_str)
    }

    pub fn code_for_index(&self, index: usize) -> Option<&str> {
        self.index_to_code.get(&index).map(String::as_str)
    }

    /// Number of codes that resolve to a name.
    pub fn named_len(&self) -> usize {
        self.code_to_name.len()
    }

    /// Highest ordinal in the code table; a classifier emits `max_index + 1` scores.
    pub fn max_index(&self) -> usize {
        self.index_to_code.keys().copied().max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.code_to_name.is_empty()
    }
}

/// Both label sets, immutable once built.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelTables {
    coarse: Vec<String>,
    breeds: BreedVocabulary,
}

impl LabelTables {
    pub fn new(coarse: Vec<String>, breeds: BreedVocabulary) -> Self {
        Self { coarse, breeds }
    }

    /// Parse coarse labels, one per line. Blank lines keep their index.
    pub fn parse_coarse(text: &str) -> Vec<String> {
        text.lines().map(|line| line.trim().to_string()).collect()
    }

    /// Load every configured table. Any I/O failure is an error.
    pub fn load(paths: &LabelPaths) -> Result<Self> {
        let coarse = read_optional(paths.coarse.as_deref())?;
        let codes = read_optional(paths.codes.as_deref())?;
        let code_names = read_optional(paths.code_names.as_deref())?;
        let whitelist = read_optional(paths.whitelist.as_deref())?;
        Ok(Self::new(
            Self::parse_coarse(&coarse),
            BreedVocabulary::parse(&codes, &code_names, &whitelist),
        ))
    }

    /// Load tables, logging I/O failures and substituting empty tables.
    ///
    /// Detections still flow with empty tables; they are just unlabeled.
    pub fn load_lenient(paths: &LabelPaths) -> Self {
        let coarse = read_lenient(paths.coarse.as_deref());
        let codes = read_lenient(paths.codes.as_deref());
        let code_names = read_lenient(paths.code_names.as_deref());
        let whitelist = read_lenient(paths.whitelist.as_deref());
        let tables = Self::new(
            Self::parse_coarse(&coarse),
            BreedVocabulary::parse(&codes, &code_names, &whitelist),
        );
        log::info!(
            "labels: {} coarse, {} named breeds",
            tables.coarse.len(),
            tables.breeds.named_len()
        );
        tables
    }

    pub fn coarse(&self) -> &[String] {
        &self.coarse
    }

    pub fn breeds(&self) -> &BreedVocabulary {
        &self.breeds
    }
}

fn read_optional(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read label table {}", path.display())),
        None => Ok(String::new()),
    }
}

fn read_lenient(path: Option<&Path>) -> String {
    match read_optional(path) {
        Ok(text) => text,
        Err(e) => {
            log::error!("{:#}", e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CODES: &str = "n02085620\nn02085782\nn01440764\n";
    const NAMES: &str = "n02085620\tChihuahua\nn02085782\tJapanese spaniel\n\
n01440764\ttench\nbroken-line\n";
    const WHITELIST: &str = "  n02085620 \nn02085782\n";

    #[test]
    fn score_index_is_one_based_line_number() {
        let vocab = BreedVocabulary::parse(CODES, NAMES, WHITELIST);
        assert_eq!(vocab.name_for_index(0), None);
        assert_eq!(vocab.name_for_index(1), Some("Chihuahua"));
        assert_eq!(vocab.name_for_index(2), Some("Japanese spaniel"));
        assert_eq!(vocab.code_for_index(3), Some("n01440764"));
        assert_eq!(vocab.max_index(), 3);
    }

    #[test]
    fn codes_outside_whitelist_have_no_name() {
        let vocab = BreedVocabulary::parse(CODES, NAMES, WHITELIST);
        assert_eq!(vocab.name_for_index(3), None);
        assert_eq!(vocab.named_len(), 2);
    }

    #[test]
    fn strict_load_fails_on_missing_file() {
        let paths = LabelPaths {
            coarse: Some(PathBuf::from("/nonexistent/labels.txt")),
            ..LabelPaths::default()
        };
        assert!(LabelTables::load(&paths).is_err());
    }

    #[test]
    fn lenient_load_yields_empty_tables_on_missing_file() {
        let paths = LabelPaths {
            coarse: Some(PathBuf::from("/nonexistent/labels.txt")),
            codes: Some(PathBuf::from("/nonexistent/codes.txt")),
            ..LabelPaths::default()
        };
        let tables = LabelTables::load_lenient(&paths);
        assert!(tables.coarse().is_empty());
        assert!(tables.breeds().is_empty());
    }

    #[test]
    fn loads_tables_from_disk() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let write = |name: &str, body: &str| -> Result<PathBuf> {
            let path = dir.path().join(name);
            std::fs::File::create(&path)?.write_all(body.as_bytes())?;
            Ok(path)
        };
        let paths = LabelPaths {
            coarse: Some(write("coco.txt", "person\nbicycle\ncar\n")?),
            codes: Some(write("codes.txt", CODES)?),
            code_names: Some(write("names.txt", NAMES)?),
            whitelist: Some(write("dogs.txt", WHITELIST)?),
        };

        let tables = LabelTables::load(&paths)?;
        assert_eq!(tables.coarse(), &["person", "bicycle", "car"]);
        assert_eq!(tables.breeds().name_for_index(1), Some("Chihuahua"));
        Ok(())
    }
}
