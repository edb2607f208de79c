//! Patterns already known not to simplify
//!
//! The blacklist is a flat file with one pattern per line. It is read once
//! at startup and appended to as searches are exhausted, so later runs skip
//! the same patterns.

use crate::error::Result;
use crate::ir::Expr;
use crate::parser::parse_file;
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct Blacklist {
    path: Option<PathBuf>,
    entries: BTreeSet<Expr>,
}

impl Blacklist {
    /// A blacklist that lives only in memory
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Read the entries in `path`, creating the file if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        // Fail early if the file cannot be appended to later
        OpenOptions::new().create(true).append(true).open(path)?;
        let entries: BTreeSet<Expr> = parse_file(path)?.into_iter().collect();
        info!(path = %path.display(), entries = entries.len(), "loaded blacklist");
        Ok(Self {
            path: Some(path.to_path_buf()),
            entries,
        })
    }

    pub fn contains(&self, pattern: &Expr) -> bool {
        self.entries.contains(pattern)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a pattern, appending it to the file if it is new
    pub fn record(&mut self, pattern: &Expr) -> Result<()> {
        if !self.entries.insert(pattern.clone()) {
            return Ok(());
        }
        debug!(pattern = %pattern, "blacklisted");
        if let Some(path) = &self.path {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{}", pattern)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expr;

    #[test]
    fn test_record_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blacklist.txt");

        let mut blacklist = Blacklist::load(&path).unwrap();
        assert!(blacklist.is_empty());
        let pattern = parse_expr("min(x, y) + z").unwrap();
        blacklist.record(&pattern).unwrap();
        blacklist.record(&pattern).unwrap();
        assert!(blacklist.contains(&pattern));

        let reloaded = Blacklist::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains(&pattern));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "min(x, y) + z\n");
    }

    #[test]
    fn test_in_memory_blacklist() {
        let mut blacklist = Blacklist::in_memory();
        let pattern = parse_expr("x*y").unwrap();
        assert!(!blacklist.contains(&pattern));
        blacklist.record(&pattern).unwrap();
        assert!(blacklist.contains(&pattern));
    }
}
