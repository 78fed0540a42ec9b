//! The SQLite-backed IndexedDB record pipeline.
//!
//! Each `*.sqlite` under an origin's `idb/` folder is one database. Record
//! values in `object_data.data` are either an inline Snappy-compressed
//! structured clone blob, or an integer addressing an external file in the
//! sibling `<dbname>.files/` directory (optionally framed-Snappy
//! compressed, flag in bit 32).

use std::collections::HashMap;
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};

use crate::codecs;
use crate::error::{FoxtrailError, Result};
use crate::idb::clone::{self, CloneDocument};
use crate::idb::key::IdbKeyValue;
use crate::timestamps;

const METADATA_QUERY: &str = "SELECT name, origin, version, last_vacuum_time, \
     last_analyze_time, last_vacuum_size FROM database";

const OBJECT_STORE_QUERY: &str = "SELECT id, auto_increment, name, key_path FROM object_store";

const RECORDS_QUERY: &str =
    "SELECT key, data, file_ids FROM object_data WHERE object_store_id = ?1";

// ── Metadata ───────────────────────────────────────────────────────

/// The single row of the `database` table.
#[derive(Debug, Clone)]
pub struct DatabaseInfo {
    pub name: String,
    pub origin: String,
    pub version: i64,
    pub last_vacuum_time: DateTime<Utc>,
    pub last_analyze_time: DateTime<Utc>,
    pub last_vacuum_size: i64,
}

/// One row of the `object_store` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStoreMetadata {
    pub id: i64,
    pub auto_increment: bool,
    pub name: String,
    pub key_path: Option<String>,
}

/// Object store lookup by id or name.
#[derive(Debug, Clone, Copy)]
pub enum StoreSelector<'a> {
    Id(i64),
    Name(&'a str),
}

// ── Records ────────────────────────────────────────────────────────

/// One decoded object-store record.
#[derive(Debug)]
pub struct IdbRecord {
    pub database_name: String,
    pub database_origin: String,
    /// The database file the record came from.
    pub origin_file: PathBuf,
    pub object_store: ObjectStoreMetadata,
    pub key: IdbKeyValue,
    pub value: CloneDocument,
    /// Whitespace-split `file_ids` column; Blob/File descriptors in the
    /// value index into this list.
    pub file_ids: Vec<String>,
    /// Set when the value itself was held externally.
    pub external_value_path: Option<PathBuf>,
}

impl IdbRecord {
    /// The `file_ids` entry a Blob/File descriptor with this index names.
    pub fn file_id_for_index(&self, index: u32) -> Result<&str> {
        self.file_ids
            .get(index as usize)
            .map(String::as_str)
            .ok_or_else(|| {
                FoxtrailError::InvalidFormat(format!(
                    "blob index {index} is too large for this record ({} file ids)",
                    self.file_ids.len()
                ))
            })
    }
}

// ── Database ───────────────────────────────────────────────────────

/// A single IndexedDB SQLite database, opened read-only.
#[derive(Debug)]
pub struct IndexedDbDatabase {
    path: PathBuf,
    conn: Connection,
    info: DatabaseInfo,
    object_stores: Vec<ObjectStoreMetadata>,
}

impl IndexedDbDatabase {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(FoxtrailError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("database file not found: {}", path.display()),
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let info = conn.query_row(METADATA_QUERY, [], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;
        let info = DatabaseInfo {
            name: info.0,
            origin: info.1,
            version: info.2,
            last_vacuum_time: timestamps::from_unix_micros(info.3)?,
            last_analyze_time: timestamps::from_unix_micros(info.4)?,
            last_vacuum_size: info.5,
        };

        let mut object_stores = Vec::new();
        {
            let mut stmt = conn.prepare(OBJECT_STORE_QUERY)?;
            let rows = stmt.query_map([], |row| {
                Ok(ObjectStoreMetadata {
                    id: row.get(0)?,
                    auto_increment: row.get::<_, i64>(1)? != 0,
                    name: row.get(2)?,
                    key_path: row.get(3)?,
                })
            })?;
            for row in rows {
                object_stores.push(row?);
            }
        }

        Ok(Self { path: path.to_path_buf(), conn, info, object_stores })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &DatabaseInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn origin(&self) -> &str {
        &self.info.origin
    }

    pub fn object_stores(&self) -> &[ObjectStoreMetadata] {
        &self.object_stores
    }

    pub fn find_store(&self, selector: StoreSelector<'_>) -> Option<&ObjectStoreMetadata> {
        self.object_stores.iter().find(|s| match selector {
            StoreSelector::Id(id) => s.id == id,
            StoreSelector::Name(name) => s.name == name,
        })
    }

    /// Decode every record of one object store.
    ///
    /// `external_files` maps file ids to paths in this database's
    /// `.files/` sidecar (empty when there is none).
    pub fn iter_records(
        &self,
        store: &ObjectStoreMetadata,
        external_files: &HashMap<String, PathBuf>,
    ) -> Result<Vec<IdbRecord>> {
        let mut stmt = self.conn.prepare(RECORDS_QUERY)?;
        let rows = stmt.query_map([store.id], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, rusqlite::types::Value>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (raw_key, data, file_ids) = row?;
            let key = IdbKeyValue::from_bytes(&raw_key)?;
            let file_ids: Vec<String> = file_ids
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect();

            let (value, external_value_path) =
                self.decode_record_value(&key, data, &file_ids, external_files)?;

            records.push(IdbRecord {
                database_name: self.info.name.clone(),
                database_origin: self.info.origin.clone(),
                origin_file: self.path.clone(),
                object_store: store.clone(),
                key,
                value,
                file_ids,
                external_value_path,
            });
        }
        Ok(records)
    }

    fn decode_record_value(
        &self,
        key: &IdbKeyValue,
        data: rusqlite::types::Value,
        file_ids: &[String],
        external_files: &HashMap<String, PathBuf>,
    ) -> Result<(CloneDocument, Option<PathBuf>)> {
        match data {
            rusqlite::types::Value::Blob(compressed) => {
                let decompressed = codecs::snappy_decompress(&compressed)?;
                Ok((clone::decode(Cursor::new(decompressed))?, None))
            }
            rusqlite::types::Value::Integer(packed) => {
                // 32-bit file index plus a compressed flag in bit 32
                // (dom/indexedDB/ActorsParent.cpp, ObjectStoreAddOrPutRequestOp)
                let file_index = (packed & 0xffff_ffff) as usize;
                let compressed = packed & 0x1_0000_0000 != 0;

                let file_id = file_ids.get(file_index).ok_or_else(|| {
                    FoxtrailError::InvalidFormat(format!(
                        "external file index too large for record with key {:02x?}",
                        key.raw_key()
                    ))
                })?;
                if !file_id.starts_with('.') {
                    return Err(FoxtrailError::InvalidFormat(format!(
                        "external record data file id does not start with '.' \
                         in record with key {:02x?}",
                        key.raw_key()
                    )));
                }
                let ext_id = file_id.trim_start_matches('.');
                let path = external_files.get(ext_id).ok_or_else(|| {
                    FoxtrailError::NotFound(format!(
                        "external data file {ext_id} for database {}",
                        self.info.name
                    ))
                })?;

                let document = if compressed {
                    let decompressed = codecs::snappy_decompress_framed(File::open(path)?)?;
                    clone::decode(Cursor::new(decompressed))?
                } else {
                    clone::decode(File::open(path)?)?
                };
                Ok((document, Some(path.clone())))
            }
            other => Err(FoxtrailError::InvalidFormat(format!(
                "unexpected object_data.data column type: {other:?}"
            ))),
        }
    }
}

// ── Folder ─────────────────────────────────────────────────────────

/// One origin's `idb/` folder: its databases plus the pre-indexed
/// external-file sidecars.
#[derive(Debug)]
pub struct IndexedDbFolder {
    path: PathBuf,
    databases: Vec<IndexedDbDatabase>,
    /// db path -> (file id -> external file path)
    external_files: HashMap<PathBuf, HashMap<String, PathBuf>>,
}

impl IndexedDbFolder {
    pub fn open(idb_folder: &Path) -> Result<Self> {
        let mut databases = Vec::new();
        for entry in std::fs::read_dir(idb_folder)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("sqlite")
                && entry.file_type()?.is_file()
            {
                databases.push(IndexedDbDatabase::open(&path)?);
            }
        }

        let mut external_files = HashMap::new();
        for db in &databases {
            let mut lookup = HashMap::new();
            let files_folder = db.path().with_extension("files");
            if files_folder.is_dir() {
                for entry in std::fs::read_dir(&files_folder)? {
                    let entry = entry?;
                    if entry.file_type()?.is_file() {
                        lookup.insert(
                            entry.file_name().to_string_lossy().to_string(),
                            entry.path(),
                        );
                    }
                }
            }
            external_files.insert(db.path().to_path_buf(), lookup);
        }

        Ok(Self { path: idb_folder.to_path_buf(), databases, external_files })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn databases(&self) -> &[IndexedDbDatabase] {
        &self.databases
    }

    /// Decode every record of one object store of one database.
    pub fn iter_records(
        &self,
        database: &IndexedDbDatabase,
        store: &ObjectStoreMetadata,
    ) -> Result<Vec<IdbRecord>> {
        database.iter_records(store, self.externals_for(database))
    }

    /// Path of an external data file, if present.
    pub fn external_data_path(&self, database: &IndexedDbDatabase, ext_id: &str) -> Option<&Path> {
        self.externals_for(database).get(ext_id).map(PathBuf::as_path)
    }

    /// Open the external data behind a Blob/File descriptor of a record.
    pub fn open_blob_data(&self, record: &IdbRecord, index: u32) -> Result<File> {
        let file_id = record.file_id_for_index(index)?;
        let lookup = self
            .external_files
            .get(&record.origin_file)
            .ok_or_else(|| {
                FoxtrailError::NotFound(format!(
                    "database {} does not belong to this folder",
                    record.origin_file.display()
                ))
            })?;
        let path = lookup.get(file_id).ok_or_else(|| {
            FoxtrailError::NotFound(format!("external data file {file_id}"))
        })?;
        Ok(File::open(path)?)
    }

    fn externals_for(&self, database: &IndexedDbDatabase) -> &HashMap<String, PathBuf> {
        static EMPTY: std::sync::OnceLock<HashMap<String, PathBuf>> = std::sync::OnceLock::new();
        self.external_files
            .get(database.path())
            .unwrap_or_else(|| EMPTY.get_or_init(HashMap::new))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::idb::clone::JsValue;
    use crate::idb::key::IdbKey;
    use tempfile::TempDir;

    fn folder_with_one_db(dir: &TempDir) -> (PathBuf, Connection) {
        let idb_dir = dir.path().join("idb");
        std::fs::create_dir(&idb_dir).unwrap();
        let db_path = idb_dir.join("1234abcd.sqlite");
        let conn = create_idb_database(&db_path, "notes", "https://example.com", "entries");
        (idb_dir, conn)
    }

    #[test]
    fn database_metadata_and_stores() {
        let dir = TempDir::new().unwrap();
        let (idb_dir, conn) = folder_with_one_db(&dir);
        drop(conn);

        let folder = IndexedDbFolder::open(&idb_dir).unwrap();
        assert_eq!(folder.databases().len(), 1);

        let db = &folder.databases()[0];
        assert_eq!(db.name(), "notes");
        assert_eq!(db.origin(), "https://example.com");
        assert_eq!(db.info().version, 4);
        assert_eq!(db.info().last_vacuum_time.timestamp(), 1_600_000_000);

        let stores = db.object_stores();
        assert_eq!(stores.len(), 1);
        assert_eq!(stores[0].name, "entries");
        assert!(stores[0].auto_increment);
        assert_eq!(stores[0].key_path.as_deref(), Some("id"));

        assert!(db.find_store(StoreSelector::Id(1)).is_some());
        assert!(db.find_store(StoreSelector::Name("entries")).is_some());
        assert!(db.find_store(StoreSelector::Name("missing")).is_none());
    }

    #[test]
    fn inline_record_roundtrip() {
        let dir = TempDir::new().unwrap();
        let (idb_dir, conn) = folder_with_one_db(&dir);
        insert_inline_record(&conn, &encoded_string_key("k1"), &clone_stream_with_string("hello"));
        drop(conn);

        let folder = IndexedDbFolder::open(&idb_dir).unwrap();
        let db = &folder.databases()[0];
        let store = db.find_store(StoreSelector::Name("entries")).unwrap();
        let records = folder.iter_records(db, store).unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.key.value(), &IdbKey::String("k1".to_string()));
        assert_eq!(record.value.root, JsValue::String("hello".to_string()));
        assert_eq!(record.database_name, "notes");
        assert_eq!(record.database_origin, "https://example.com");
        assert!(record.external_value_path.is_none());
        assert!(record.file_ids.is_empty());
    }

    #[test]
    fn external_record_uncompressed() {
        let dir = TempDir::new().unwrap();
        let (idb_dir, conn) = folder_with_one_db(&dir);
        let files_dir = idb_dir.join("1234abcd.files");
        insert_external_record(
            &conn,
            &files_dir,
            &encoded_string_key("k2"),
            &clone_stream_with_string("external plain"),
            "42",
            false,
        );
        drop(conn);

        let folder = IndexedDbFolder::open(&idb_dir).unwrap();
        let db = &folder.databases()[0];
        let store = db.find_store(StoreSelector::Id(1)).unwrap();
        let records = folder.iter_records(db, store).unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.value.root, JsValue::String("external plain".to_string()));
        assert_eq!(
            record.external_value_path.as_deref(),
            Some(files_dir.join("42").as_path())
        );
        assert_eq!(record.file_ids, vec![".42".to_string()]);
    }

    #[test]
    fn external_record_framed_snappy() {
        let dir = TempDir::new().unwrap();
        let (idb_dir, conn) = folder_with_one_db(&dir);
        let files_dir = idb_dir.join("1234abcd.files");
        insert_external_record(
            &conn,
            &files_dir,
            &encoded_string_key("k3"),
            &clone_stream_with_string("external framed"),
            "7",
            true,
        );
        drop(conn);

        let folder = IndexedDbFolder::open(&idb_dir).unwrap();
        let db = &folder.databases()[0];
        let store = db.find_store(StoreSelector::Id(1)).unwrap();
        let records = folder.iter_records(db, store).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].value.root,
            JsValue::String("external framed".to_string())
        );
    }

    #[test]
    fn external_file_id_must_start_with_dot() {
        let dir = TempDir::new().unwrap();
        let (idb_dir, conn) = folder_with_one_db(&dir);
        conn.execute(
            "INSERT INTO object_data VALUES (1, ?1, 0, 'no-dot')",
            rusqlite::params![encoded_string_key("bad")],
        )
        .unwrap();
        drop(conn);

        let folder = IndexedDbFolder::open(&idb_dir).unwrap();
        let db = &folder.databases()[0];
        let store = db.find_store(StoreSelector::Id(1)).unwrap();
        assert!(folder.iter_records(db, store).is_err());
    }

    #[test]
    fn external_file_index_out_of_range_fails() {
        let dir = TempDir::new().unwrap();
        let (idb_dir, conn) = folder_with_one_db(&dir);
        // file index 5, but file_ids has a single entry
        conn.execute(
            "INSERT INTO object_data VALUES (1, ?1, 5, '.1')",
            rusqlite::params![encoded_string_key("bad")],
        )
        .unwrap();
        drop(conn);

        let folder = IndexedDbFolder::open(&idb_dir).unwrap();
        let db = &folder.databases()[0];
        let store = db.find_store(StoreSelector::Id(1)).unwrap();
        assert!(folder.iter_records(db, store).is_err());
    }

    #[test]
    fn blob_file_lookup_by_record_index() {
        let dir = TempDir::new().unwrap();
        let (idb_dir, conn) = folder_with_one_db(&dir);
        let files_dir = idb_dir.join("1234abcd.files");
        std::fs::create_dir_all(&files_dir).unwrap();
        std::fs::write(files_dir.join("9"), b"blob bytes").unwrap();

        // inline value whose blob descriptor would use file_ids[0] = "9"
        insert_inline_record(&conn, &encoded_string_key("k"), &clone_stream_with_string("v"));
        conn.execute("UPDATE object_data SET file_ids = '9'", []).unwrap();
        drop(conn);

        let folder = IndexedDbFolder::open(&idb_dir).unwrap();
        let db = &folder.databases()[0];
        let store = db.find_store(StoreSelector::Id(1)).unwrap();
        let records = folder.iter_records(db, store).unwrap();
        let record = &records[0];

        assert_eq!(record.file_id_for_index(0).unwrap(), "9");
        assert!(record.file_id_for_index(3).is_err());

        use std::io::Read;
        let mut contents = String::new();
        folder
            .open_blob_data(record, 0)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "blob bytes");
    }
}
