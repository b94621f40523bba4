use crate::capabilities::{CapabilityError, Storage};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Keeps every key in process memory. Used when no database is
/// configured; everything is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    keys: Mutex<BTreeMap<String, BTreeSet<String>>>,
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn add_field(&self, key: &str, field: &str) -> Result<(), CapabilityError> {
        let added = self
            .keys
            .lock()
            .entry(key.to_owned())
            .or_default()
            .insert(field.to_owned());
        trace!(key, field, added, "Added field");
        Ok(())
    }

    async fn remove_field(&self, key: &str, field: &str) -> Result<(), CapabilityError> {
        let mut keys = self.keys.lock();
        if let Some(fields) = keys.get_mut(key) {
            fields.remove(field);
            if fields.is_empty() {
                keys.remove(key);
            }
        }
        Ok(())
    }

    async fn fields(&self, key: &str) -> Result<Vec<String>, CapabilityError> {
        let keys = self.keys.lock();
        Ok(keys
            .get(key)
            .map(|fields| fields.iter().cloned().collect())
            .unwrap_or_default())
    }
}
