//! Per-identity persistence of the assistant list
//!
//! Each identity's assistants are stored as one JSON array under the key
//! `assistants_<identity>`, so identities sharing a machine never see each
//! other's lists.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use thiserror::Error;

use crate::session::{Assistant, Identity};

/// Errors raised by an assistant store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stored value for {key} is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Key-value persistence of assistants, namespaced by identity
pub trait AssistantStore: Send + Sync {
    /// Load the assistants stored for `identity`, empty if nothing is stored
    fn load(&self, identity: &Identity) -> Result<Vec<Assistant>, StoreError>;

    /// Replace the assistants stored for `identity`
    fn save(&self, identity: &Identity, assistants: &[Assistant]) -> Result<(), StoreError>;
}

/// Storage key for an identity's assistant list
pub fn storage_key(identity: &Identity) -> String {
    format!("assistants_{}", identity.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_is_namespaced() {
        let id = Identity::parse("0xABC").unwrap();
        assert_eq!(storage_key(&id), "assistants_0xABC");
    }

    #[test]
    fn test_storage_key_distinguishes_identities() {
        let a = Identity::parse("0xAAA").unwrap();
        let b = Identity::parse("0xBBB").unwrap();
        assert_ne!(storage_key(&a), storage_key(&b));
    }
}
