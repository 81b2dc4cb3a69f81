//! File-backed assistant store
//!
//! One JSON file per storage key under the store directory. Writes land in a
//! temporary sibling first and are renamed into place.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{storage_key, AssistantStore, StoreError};
use crate::session::{Assistant, Identity};

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", escape_key(key)))
    }
}

impl AssistantStore for FileStore {
    fn load(&self, identity: &Identity) -> Result<Vec<Assistant>, StoreError> {
        let key = storage_key(identity);
        let path = self.path_for(&key);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(%key, "no stored assistants");
                return Ok(Vec::new());
            }
            Err(source) => return Err(StoreError::Io { key, source }),
        };

        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt { key, source })
    }

    fn save(&self, identity: &Identity, assistants: &[Assistant]) -> Result<(), StoreError> {
        let key = storage_key(identity);
        let path = self.path_for(&key);
        let tmp = path.with_extension("json.tmp");

        let bytes = serde_json::to_vec(assistants)
            .map_err(|source| StoreError::Corrupt { key: key.clone(), source })?;

        fs::write(&tmp, bytes)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|source| StoreError::Io { key: key.clone(), source })?;

        debug!(%key, count = assistants.len(), "assistants saved");
        Ok(())
    }
}

/// Map a storage key onto a file name. Bytes outside `[A-Za-z0-9_-]` are
/// percent-escaped, keeping the mapping injective.
fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helper() -> Assistant {
        Assistant { id: "a1".into(), name: "Helper".into() }
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let id = Identity::parse("0xABC").unwrap();
        assert!(store.load(&id).unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let id = Identity::parse("0xABC").unwrap();

        let list = vec![
            helper(),
            Assistant { id: "a2".into(), name: "Helper".into() },
        ];
        store.save(&id, &list).unwrap();

        assert_eq!(store.load(&id).unwrap(), list);
        assert!(dir.path().join("assistants_0xABC.json").exists());
    }

    #[test]
    fn test_identities_do_not_share_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let first = Identity::parse("0xABC").unwrap();
        let second = Identity::parse("0xDEF").unwrap();

        store.save(&first, &[helper()]).unwrap();
        assert!(store.load(&second).unwrap().is_empty());
    }

    #[test]
    fn test_escape_key_blocks_path_traversal() {
        assert_eq!(escape_key("assistants_../x"), "assistants_%2E%2E%2Fx");
        assert_ne!(escape_key("a/b"), escape_key("a%2Fb"));
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let id = Identity::parse("0xABC").unwrap();
        fs::write(dir.path().join("assistants_0xABC.json"), b"not json").unwrap();

        assert!(matches!(store.load(&id), Err(StoreError::Corrupt { .. })));
    }
}
