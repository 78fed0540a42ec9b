//! Session storage from the mozLz4 session store.
//!
//! Per-tab `storage` maps live in `sessionstore.jsonlz4` and the rotating
//! backups under `sessionstore-backups/`. The JSON shape walked here is
//! `windows[].tabs[].storage` plus `windows[]._closedTabs[].state.storage`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::codecs;
use crate::error::{FoxtrailError, Result};
use crate::keysearch::{self, KeySearch};

const SESSION_STORE_NAME: &str = "sessionstore.jsonlz4";
const BACKUPS_FOLDER_NAME: &str = "sessionstore-backups";

/// One session storage key/value pair.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStorageRecord {
    pub host: String,
    pub key: String,
    pub value: String,
    /// True when recovered from a window's closed-tabs list.
    pub is_closed_tab: bool,
    /// The session store file the record came from.
    pub origin_file: PathBuf,
}

/// Session storage records from the session store and all of its backups,
/// loaded eagerly and indexed by host and key.
#[derive(Debug, Default)]
pub struct SessionStorage {
    host_lookup: HashMap<String, HashMap<String, Vec<SessionStorageRecord>>>,
}

impl SessionStorage {
    pub fn open(profile_path: &Path) -> Result<Self> {
        let mut storage = Self::default();

        let session_store = profile_path.join(SESSION_STORE_NAME);
        if session_store.is_file() {
            storage.load_file(&session_store)?;
        }

        let backups = profile_path.join(BACKUPS_FOLDER_NAME);
        if backups.is_dir() {
            for entry in std::fs::read_dir(&backups)? {
                let entry = entry?;
                let path = entry.path();
                let suffix = path.extension().and_then(|e| e.to_str()).unwrap_or("");
                if suffix.contains("jsonlz4") || suffix == "baklz4" {
                    storage.load_file(&path)?;
                }
            }
        }

        Ok(storage)
    }

    /// The hosts present across all loaded files.
    pub fn iter_hosts(&self) -> impl Iterator<Item = &str> {
        self.host_lookup.keys().map(String::as_str)
    }

    pub fn contains_host(&self, host: &str) -> bool {
        self.host_lookup.contains_key(host)
    }

    pub fn contains_host_key(&self, host: &str, key: &str) -> bool {
        self.host_lookup
            .get(host)
            .map(|keys| keys.contains_key(key))
            .unwrap_or(false)
    }

    /// Iterate records filtered by host and key.
    pub fn iter_records(
        &self,
        host: Option<&KeySearch>,
        key: Option<&KeySearch>,
        raise_on_no_result: bool,
    ) -> Result<Vec<SessionStorageRecord>> {
        let hosts: Vec<&String> = match host {
            None => self.host_lookup.keys().collect(),
            Some(search) => self
                .host_lookup
                .keys()
                .filter(|h| search.hits(h))
                .collect(),
        };
        if hosts.is_empty() && raise_on_no_result {
            return Err(FoxtrailError::NotFound(keysearch::describe(host)));
        }

        let mut records = Vec::new();
        for host_hit in hosts {
            for (record_key, host_records) in &self.host_lookup[host_hit] {
                if key.map(|search| search.hits(record_key)).unwrap_or(true) {
                    records.extend(host_records.iter().cloned());
                }
            }
        }

        if records.is_empty() && raise_on_no_result {
            return Err(FoxtrailError::NotFound(format!(
                "host: {}, key: {}",
                keysearch::describe(host),
                keysearch::describe(key)
            )));
        }
        Ok(records)
    }

    pub fn iter_all_records(&self) -> Vec<SessionStorageRecord> {
        self.iter_records(None, None, false)
            .expect("unfiltered iteration cannot fail")
    }

    // ── Internal ───────────────────────────────────────────────────

    fn load_file(&mut self, path: &Path) -> Result<()> {
        let document = codecs::load_jsonlz4(path)?;
        let windows = document
            .get("windows")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                FoxtrailError::InvalidFormat(format!(
                    "session store has no windows array: {}",
                    path.display()
                ))
            })?;

        for window in windows {
            let tabs = window.get("tabs").and_then(Value::as_array);
            for tab in tabs.into_iter().flatten() {
                self.collect_tab_storage(tab, false, path);
            }
            let closed_tabs = window.get("_closedTabs").and_then(Value::as_array);
            for closed in closed_tabs.into_iter().flatten() {
                if let Some(state) = closed.get("state") {
                    self.collect_tab_storage(state, true, path);
                }
            }
        }
        Ok(())
    }

    fn collect_tab_storage(&mut self, tab: &Value, is_closed: bool, origin_file: &Path) {
        let Some(storage) = tab.get("storage").and_then(Value::as_object) else {
            return;
        };
        for (host, entries) in storage {
            let Some(entries) = entries.as_object() else {
                continue;
            };
            for (key, value) in entries {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let record = SessionStorageRecord {
                    host: host.clone(),
                    key: key.clone(),
                    value,
                    is_closed_tab: is_closed,
                    origin_file: origin_file.to_path_buf(),
                };
                self.host_lookup
                    .entry(host.clone())
                    .or_default()
                    .entry(key.clone())
                    .or_default()
                    .push(record);
            }
        }
    }
}
