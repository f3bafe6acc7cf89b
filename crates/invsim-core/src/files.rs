//! Virtual per-device file store.
//!
//! A flat name → content map. It holds the `invconf` bootstrap file and the
//! device-local log, and is persisted as the `filesystem` block of a
//! `.computer` file.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the bootstrap configuration file.
pub const BOOTSTRAP_FILE: &str = "invconf";

/// Flat in-memory file store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileStore {
    files: BTreeMap<String, String>,
}

impl FileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new file. Fails if the name is taken.
    pub fn add(&mut self, name: impl Into<String>, content: impl Into<String>) -> CoreResult<()> {
        let name = name.into();
        if self.files.contains_key(&name) {
            return Err(CoreError::FileExists(name));
        }
        self.files.insert(name, content.into());
        Ok(())
    }

    /// Creates or replaces a file.
    pub fn put(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.files.insert(name.into(), content.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    /// Appends to a file, creating it empty first if missing.
    pub fn append(&mut self, name: &str, content: &str) {
        self.files
            .entry(name.to_string())
            .or_default()
            .push_str(content);
    }

    pub fn delete(&mut self, name: &str) -> CoreResult<String> {
        self.files
            .remove(name)
            .ok_or_else(|| CoreError::FileNotFound(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_rejects_existing() {
        let mut fs = FileStore::new();
        fs.add("invconf", "{}").unwrap();
        assert!(matches!(fs.add("invconf", "{}"), Err(CoreError::FileExists(_))));
    }

    #[test]
    fn test_append_creates_missing() {
        let mut fs = FileStore::new();
        fs.append("log", "\nInfo|  booted");
        fs.append("log", "\nInfo|  ticked");
        assert_eq!(fs.get("log"), Some("\nInfo|  booted\nInfo|  ticked"));
    }

    #[test]
    fn test_delete() {
        let mut fs = FileStore::new();
        fs.put("a", "1");
        assert_eq!(fs.delete("a").unwrap(), "1");
        assert!(!fs.exists("a"));
        assert!(matches!(fs.delete("a"), Err(CoreError::FileNotFound(_))));
    }
}
