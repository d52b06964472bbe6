//! JSON file backing for per-user automation records.
//!
//! The whole map is read on load and rewritten on save; a missing file is an
//! empty store.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use ddd_export_core::contract::{AutomationStore, UserAutomationRecord};
use ddd_export_core::error::StoreError;
use tracing::{debug, info};

pub const DEFAULT_STORE_PATH: &str = "users.json";

pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AutomationStore for JsonFileStore {
    fn load(&self) -> Result<BTreeMap<String, UserAutomationRecord>, StoreError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No automation store yet, starting empty");
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        let records: BTreeMap<String, UserAutomationRecord> = serde_json::from_str(&content)?;
        debug!(path = %self.path.display(), count = records.len(), "Loaded automation store");
        Ok(records)
    }

    fn save(&self, records: &BTreeMap<String, UserAutomationRecord>) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(records)?;
        fs::write(&self.path, content)?;
        info!(path = %self.path.display(), count = records.len(), "Saved automation store");
        Ok(())
    }
}

/// Read-modify-write one user's record. Last writer wins.
pub fn upsert_record<S: AutomationStore + ?Sized>(
    store: &S,
    user_id: &str,
    record: UserAutomationRecord,
) -> Result<(), StoreError> {
    let mut records = store.load()?;
    records.insert(user_id.to_string(), record);
    store.save(&records)
}

/// Records whose automation is switched on.
pub fn enabled_records<S: AutomationStore + ?Sized>(
    store: &S,
) -> Result<Vec<(String, UserAutomationRecord)>, StoreError> {
    Ok(store
        .load()?
        .into_iter()
        .filter(|(_, r)| r.enabled)
        .collect())
}
