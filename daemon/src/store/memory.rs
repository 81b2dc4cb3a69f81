//! In-process assistant store
//!
//! Used when the data directory cannot be opened; lists survive only until
//! the daemon exits.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{storage_key, AssistantStore, StoreError};
use crate::session::{Assistant, Identity};

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<Assistant>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AssistantStore for MemoryStore {
    fn load(&self, identity: &Identity) -> Result<Vec<Assistant>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(&storage_key(identity)).cloned().unwrap_or_default())
    }

    fn save(&self, identity: &Identity, assistants: &[Assistant]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(storage_key(identity), assistants.to_vec());
        Ok(())
    }
}
