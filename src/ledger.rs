//! Ledger — the set of message IDs already recorded downstream.
//!
//! Persisted as a JSON array of strings, human-inspectable. A missing or
//! corrupt file is an empty ledger, never an error: the sheet-side
//! duplicate check re-derives anything lost. IDs are only ever added.

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;

/// In-memory ledger backed by one JSON file.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    ids: HashSet<String>,
}

impl Ledger {
    /// Load the ledger from disk. Missing file or unparseable content
    /// yields an empty ledger.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let ids = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<String>>(&content) {
                Ok(list) => list.into_iter().collect(),
                Err(e) => {
                    log::warn!(
                        "Ledger at {} is unreadable ({}); starting empty",
                        path.display(),
                        e
                    );
                    HashSet::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                log::warn!(
                    "Could not read ledger at {} ({}); starting empty",
                    path.display(),
                    e
                );
                HashSet::new()
            }
        };
        Self { path, ids }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Record an ID. Returns false if it was already present.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Persist the full set, overwriting the backing file. Writes to a
    /// temp file in the same directory, then renames over the target so
    /// a crash mid-write can't truncate the ledger.
    pub fn save(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut list: Vec<&String> = self.ids.iter().collect();
        list.sort();
        let content = serde_json::to_string_pretty(&list)?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
