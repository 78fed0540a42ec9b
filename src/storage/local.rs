//! Local storage.
//!
//! Each origin keeps a `ls/data.sqlite` under its `storage/default/`
//! folder; the `.metadata-v2` sidecar supplies the origin key. Values are
//! optionally Snappy-compressed and stored UTF-16-BE or UTF-8 per the
//! row's conversion type.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use serde::Serialize;

use crate::codecs;
use crate::error::{FoxtrailError, Result};
use crate::keysearch::{self, KeySearch};
use crate::storage::metadata::StorageMetadataV2;

const LS_QUERY: &str = "SELECT rowid, key, utf16_length, conversion_type, \
     compression_type, last_access_time, value FROM data";

/// localstorage/LSValue.h conversion types. The on-disk default is
/// UTF-16-BE even though the upstream enum calls it `NONE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConversionType {
    Utf16 = 0,
    Utf8 = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompressionType {
    Uncompressed = 0,
    Snappy = 1,
}

/// One local storage entry.
#[derive(Debug, Clone, Serialize)]
pub struct LocalStorageRecord {
    /// Origin the record belongs to.
    pub storage_key: String,
    /// Script-visible key.
    pub script_key: String,
    pub value: String,
    pub database_path: PathBuf,
    pub sqlite_rowid: i64,
    /// The value column before decompression/decoding.
    pub raw_value: Vec<u8>,
    pub conversion_type: ConversionType,
    pub compression_type: CompressionType,
}

/// All of a profile's local storage, keyed by origin.
///
/// The underlying databases open lazily the first time their origin is
/// touched by a query.
#[derive(Debug)]
pub struct LocalStorage {
    origin_to_db: HashMap<String, PathBuf>,
    origin_metadata: HashMap<String, StorageMetadataV2>,
    connections: HashMap<String, Connection>,
}

impl LocalStorage {
    /// Scan a `storage/default` folder for origins with local storage.
    pub fn open(storage_default: &Path) -> Result<Self> {
        if !storage_default.is_dir() {
            return Err(FoxtrailError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!(
                    "storage folder does not exist or is not a directory: {}",
                    storage_default.display()
                ),
            )));
        }

        let mut origin_to_db = HashMap::new();
        let mut origin_metadata = HashMap::new();
        for entry in std::fs::read_dir(storage_default)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let ls_db = entry.path().join("ls").join("data.sqlite");
            if !ls_db.is_file() {
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
            origin_to_db.insert(metadata.origin.clone(), ls_db);
            origin_metadata.insert(metadata.origin.clone(), metadata);
        }

        Ok(Self { origin_to_db, origin_metadata, connections: HashMap::new() })
    }

    /// The origins (storage keys) present.
    pub fn iter_storage_keys(&self) -> impl Iterator<Item = &str> {
        self.origin_to_db.keys().map(String::as_str)
    }

    pub fn contains_storage_key(&self, storage_key: &str) -> bool {
        self.origin_to_db.contains_key(storage_key)
    }

    pub fn metadata_for(&self, storage_key: &str) -> Option<&StorageMetadataV2> {
        self.origin_metadata.get(storage_key)
    }

    /// Iterate records filtered by origin and script key.
    ///
    /// With `raise_on_no_result`, an empty result set becomes `NotFound`.
    pub fn iter_records(
        &mut self,
        storage_key: Option<&KeySearch>,
        script_key: Option<&KeySearch>,
        raise_on_no_result: bool,
    ) -> Result<Vec<LocalStorageRecord>> {
        let hosts = self.matching_hosts(storage_key);
        if hosts.is_empty() && raise_on_no_result {
            return Err(FoxtrailError::NotFound(keysearch::describe(storage_key)));
        }

        let mut records = Vec::new();
        for host in hosts {
            let db_path = self.origin_to_db[&host].clone();
            let conn = self.connection_for(&host)?;

            let mut stmt = conn.prepare(LS_QUERY)?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Vec<u8>>(6)?,
                ))
            })?;

            for row in rows {
                let (rowid, key, conversion_raw, compression_raw, raw_value) = row?;
                if let Some(search) = script_key {
                    if !search.hits(&key) {
                        continue;
                    }
                }
                records.push(decode_record(
                    &host,
                    &db_path,
                    rowid,
                    key,
                    conversion_raw,
                    compression_raw,
                    raw_value,
                )?);
            }
        }

        if records.is_empty() && raise_on_no_result {
            return Err(FoxtrailError::NotFound(format!(
                "storage_key: {}, script_key: {}",
                keysearch::describe(storage_key),
                keysearch::describe(script_key)
            )));
        }
        Ok(records)
    }

    pub fn iter_all_records(&mut self) -> Result<Vec<LocalStorageRecord>> {
        self.iter_records(None, None, false)
    }

    // ── Internal ───────────────────────────────────────────────────

    fn matching_hosts(&self, storage_key: Option<&KeySearch>) -> Vec<String> {
        match storage_key {
            None => self.origin_to_db.keys().cloned().collect(),
            Some(search) => self
                .origin_to_db
                .keys()
                .filter(|host| search.hits(host))
                .cloned()
                .collect(),
        }
    }

    fn connection_for(&mut self, host: &str) -> Result<&Connection> {
        if !self.connections.contains_key(host) {
            let conn = Connection::open_with_flags(
                &self.origin_to_db[host],
                OpenFlags::SQLITE_OPEN_READ_ONLY
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            self.connections.insert(host.to_string(), conn);
        }
        Ok(&self.connections[host])
    }
}

fn decode_record(
    host: &str,
    db_path: &Path,
    rowid: i64,
    key: String,
    conversion_raw: i64,
    compression_raw: i64,
    raw_value: Vec<u8>,
) -> Result<LocalStorageRecord> {
    let conversion_type = match conversion_raw {
        0 => ConversionType::Utf16,
        1 => ConversionType::Utf8,
        other => {
            return Err(FoxtrailError::InvalidFormat(format!(
                "unexpected conversion type: {other}"
            )))
        }
    };
    let compression_type = match compression_raw {
        0 => CompressionType::Uncompressed,
        1 => CompressionType::Snappy,
        other => {
            return Err(FoxtrailError::InvalidFormat(format!(
                "unexpected compression type: {other}"
            )))
        }
    };

    let decompressed = match compression_type {
        CompressionType::Snappy => codecs::snappy_decompress(&raw_value)?,
        CompressionType::Uncompressed => raw_value.clone(),
    };

    let value = if decompressed.is_empty() {
        String::new()
    } else {
        match conversion_type {
            ConversionType::Utf16 => decode_utf16_be(&decompressed)?,
            ConversionType::Utf8 => String::from_utf8(decompressed).map_err(|e| {
                FoxtrailError::InvalidFormat(format!("invalid UTF-8 value: {e}"))
            })?,
        }
    };

    Ok(LocalStorageRecord {
        storage_key: host.to_string(),
        script_key: key,
        value,
        database_path: db_path.to_path_buf(),
        sqlite_rowid: rowid,
        raw_value,
        conversion_type,
        compression_type,
    })
}

fn decode_utf16_be(raw: &[u8]) -> Result<String> {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|e| FoxtrailError::InvalidFormat(format!("invalid UTF-16 value: {e}")))
}
