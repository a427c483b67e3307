//! Correction protection list: a process-wide
//! set of strings that every correction engine must leave untouched. Guarded
//! by a reader-writer lock so correction engines can read concurrently while
//! a settings UI writes exclusively.

use std::collections::HashSet;
use std::path::Path;
use std::sync::RwLock;

use redb::TableDefinition;

use crate::error::{Result, VoxCoreError};

const TABLE: TableDefinition<&str, ()> = TableDefinition::new("protection_words");
pub const PERSISTENCE_KEY: &str = "CorrectionProtectionWords";

/// In-memory reader-writer-locked protection list.
pub struct ProtectionList {
    words: RwLock<HashSet<String>>,
}

impl Default for ProtectionList {
    fn default() -> Self {
        Self {
            words: RwLock::new(HashSet::new()),
        }
    }
}

impl ProtectionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_words(words: impl IntoIterator<Item = String>) -> Self {
        Self {
            words: RwLock::new(words.into_iter().collect()),
        }
    }

    pub fn add(&self, word: impl Into<String>) {
        self.words.write().expect("protection list lock poisoned").insert(word.into());
    }

    pub fn remove(&self, word: &str) {
        self.words.write().expect("protection list lock poisoned").remove(word);
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.read().expect("protection list lock poisoned").contains(word)
    }

    pub fn all_words(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .words
            .read()
            .expect("protection list lock poisoned")
            .iter()
            .cloned()
            .collect();
        out.sort();
        out
    }
}

/// `redb`-backed variant for process-wide durability across restarts: a
/// single table opened once, read/written under its own transactions rather
/// than holding the whole set resident.
pub struct PersistedProtectionList {
    db: redb::Database,
}

impl PersistedProtectionList {
    pub fn open(path: &Path) -> Result<Self> {
        let db = redb::Database::create(path)
            .map_err(|e| VoxCoreError::Storage(format!("{}: {e}", path.display())))?;
        let write_txn = db
            .begin_write()
            .map_err(|e| VoxCoreError::Storage(e.to_string()))?;
        {
            let table = write_txn
                .open_table(TABLE)
                .map_err(|e| VoxCoreError::Storage(e.to_string()))?;
            drop(table);
        }
        write_txn
            .commit()
            .map_err(|e| VoxCoreError::Storage(e.to_string()))?;
        Ok(Self { db })
    }

    pub fn add(&self, word: &str) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| VoxCoreError::Storage(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(TABLE)
                .map_err(|e| VoxCoreError::Storage(e.to_string()))?;
            table
                .insert(word, ())
                .map_err(|e| VoxCoreError::Storage(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| VoxCoreError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn remove(&self, word: &str) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| VoxCoreError::Storage(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(TABLE)
                .map_err(|e| VoxCoreError::Storage(e.to_string()))?;
            table
                .remove(word)
                .map_err(|e| VoxCoreError::Storage(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| VoxCoreError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn contains(&self, word: &str) -> Result<bool> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| VoxCoreError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(TABLE)
            .map_err(|e| VoxCoreError::Storage(e.to_string()))?;
        Ok(table
            .get(word)
            .map_err(|e| VoxCoreError::Storage(e.to_string()))?
            .is_some())
    }

    pub fn all_words(&self) -> Result<Vec<String>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| VoxCoreError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(TABLE)
            .map_err(|e| VoxCoreError::Storage(e.to_string()))?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(|e| VoxCoreError::Storage(e.to_string()))? {
            let (key, _) = entry.map_err(|e| VoxCoreError::Storage(e.to_string()))?;
            out.push(key.value().to_string());
        }
        out.sort();
        Ok(out)
    }

    /// Loads the whole table into an in-memory [`ProtectionList`] for the
    /// correction engines to borrow from during a session.
    pub fn load_into_memory(&self) -> Result<ProtectionList> {
        Ok(ProtectionList::from_words(self.all_words()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_list_add_remove_contains() {
        let list = ProtectionList::new();
        list.add("硬輸入");
        assert!(list.contains("硬輸入"));
        list.remove("硬輸入");
        assert!(!list.contains("硬輸入"));
    }

    #[test]
    fn all_words_is_sorted() {
        let list = ProtectionList::from_words(["b".to_string(), "a".to_string()]);
        assert_eq!(list.all_words(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn persisted_list_round_trips() {
        let path = std::env::temp_dir().join(format!("voxcore_protection_test_{}.redb", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let db = PersistedProtectionList::open(&path).unwrap();
        db.add("好好好").unwrap();
        assert!(db.contains("好好好").unwrap());
        db.remove("好好好").unwrap();
        assert!(!db.contains("好好好").unwrap());
        let _ = std::fs::remove_file(&path);
    }
}
