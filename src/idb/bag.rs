//! Origin-keyed access to every IndexedDB folder in a profile.
//!
//! `storage/default/<origin-folder>/` holds one folder per origin; the
//! `.metadata-v2` sidecar names the origin, `idb/` holds its databases.
//! Folders are opened lazily — an IndexedDB folder carries set-up cost, so
//! nothing is touched until an origin is actually requested.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{FoxtrailError, Result};
use crate::idb::database::IndexedDbFolder;
use crate::storage::metadata::StorageMetadataV2;

/// Maps origins to their `idb/` folders under `storage/default/`.
#[derive(Debug)]
pub struct IndexedDbBag {
    origin_to_path: HashMap<String, PathBuf>,
    open_folders: HashMap<String, IndexedDbFolder>,
}

impl IndexedDbBag {
    /// Scan a `storage/default` folder for origins carrying IndexedDB data.
    pub fn open(storage_default: &Path) -> Result<Self> {
        let mut origin_to_path = HashMap::new();
        for entry in std::fs::read_dir(storage_default)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let idb_path = entry.path().join("idb");
            if !idb_path.is_dir() {
                continue;
            }

            let metadata_path = entry.path().join(".metadata-v2");
            if !metadata_path.is_file() {
                return Err(FoxtrailError::InvalidFormat(format!(
                    ".metadata-v2 file missing from {}",
                    entry.path().display()
                )));
            }
            let metadata = StorageMetadataV2::from_file(&metadata_path)?;
            origin_to_path.insert(metadata.origin, idb_path);
        }

        Ok(Self { origin_to_path, open_folders: HashMap::new() })
    }

    /// The origins that have IndexedDB folders.
    pub fn iter_origins(&self) -> impl Iterator<Item = &str> {
        self.origin_to_path.keys().map(String::as_str)
    }

    pub fn contains_origin(&self, origin: &str) -> bool {
        self.origin_to_path.contains_key(origin)
    }

    /// The IndexedDB folder for an origin, opened on first use.
    pub fn get_idb(&mut self, origin: &str) -> Result<&IndexedDbFolder> {
        if !self.origin_to_path.contains_key(origin) {
            return Err(FoxtrailError::NotFound(format!(
                "no IndexedDB data for origin {origin}"
            )));
        }
        if !self.open_folders.contains_key(origin) {
            let folder = IndexedDbFolder::open(&self.origin_to_path[origin])?;
            self.open_folders.insert(origin.to_string(), folder);
        }
        Ok(&self.open_folders[origin])
    }
}
