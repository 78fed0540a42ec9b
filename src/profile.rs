//! The profile-folder façade.
//!
//! `ProfileFolder` ties the artifact readers together over one profile
//! directory plus its cache directory. Everything except the cache wrapper
//! is constructed lazily on first access; all SQLite handles are owned
//! here and released when the façade drops.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::cache::{CacheDirectory, CacheFile, CacheFileMetadata, CacheKey};
use crate::codecs;
use crate::error::{FoxtrailError, Result};
use crate::idb::{IdbRecord, IndexedDbBag, IndexedDbFolder};
use crate::keysearch::{HeaderSearch, KeySearch};
use crate::places::{DownloadRecord, HistoryRecord, PlacesDatabase};
use crate::storage::{LocalStorage, LocalStorageRecord, SessionStorage, SessionStorageRecord};

const PLACES_DB_NAME: &str = "places.sqlite";
const STORAGE_FOLDER_NAME: &str = "storage";
const DEFAULT_FOLDER_NAME: &str = "default";

// ── Cache Results ──────────────────────────────────────────────────

/// A cache entry as served to callers: entry file plus the body after
/// `Content-Encoding` decompression (gzip, brotli and deflate).
#[derive(Debug)]
pub struct CacheResult {
    file: CacheFile,
    data: Vec<u8>,
    was_compressed: bool,
}

impl CacheResult {
    fn new(file: CacheFile, decompress: bool) -> Result<Self> {
        let (data, was_compressed) = if decompress {
            codecs::decode_content_encoding(
                file.get_header_attribute("content-encoding"),
                file.data(),
            )?
        } else {
            (file.data().to_vec(), false)
        };
        Ok(Self { file, data, was_compressed })
    }

    pub fn key(&self) -> &CacheKey {
        &self.file.metadata().key
    }

    pub fn metadata(&self) -> &CacheFileMetadata {
        self.file.metadata()
    }

    /// When the cached response was last fetched.
    pub fn request_time(&self) -> DateTime<Utc> {
        self.file.metadata().last_fetched
    }

    /// The body, decompressed when requested and applicable.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The body exactly as cached on disk.
    pub fn raw_data(&self) -> &[u8] {
        self.file.data()
    }

    pub fn was_compressed(&self) -> bool {
        self.was_compressed
    }

    pub fn data_location(&self) -> &Path {
        self.file.path()
    }

    pub fn has_header_attribute(&self, attribute: &str) -> bool {
        self.file.has_header_attribute(attribute)
    }

    pub fn get_header_attribute(&self, attribute: &str) -> Option<&str> {
        self.file.get_header_attribute(attribute)
    }

    pub fn header_attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.file.header_attributes()
    }
}

// ── Façade ─────────────────────────────────────────────────────────

/// Uniform access to one Firefox profile snapshot.
#[derive(Debug)]
pub struct ProfileFolder {
    profile_folder: PathBuf,
    cache: CacheDirectory,
    places: Option<PlacesDatabase>,
    local_storage: Option<LocalStorage>,
    session_storage: Option<SessionStorage>,
    indexeddb: Option<IndexedDbBag>,
}

impl ProfileFolder {
    /// Open a profile directory and its separate cache directory. Both
    /// must exist; the artifact stores inside them are opened on demand.
    pub fn open(profile_path: &Path, cache_path: &Path) -> Result<Self> {
        if !profile_path.is_dir() {
            return Err(FoxtrailError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!(
                    "profile folder does not exist or is not a directory: {}",
                    profile_path.display()
                ),
            )));
        }
        let cache = CacheDirectory::open(cache_path)?;
        Ok(Self {
            profile_folder: profile_path.to_path_buf(),
            cache,
            places: None,
            local_storage: None,
            session_storage: None,
            indexeddb: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.profile_folder
    }

    // ── History & Downloads ────────────────────────────────────────

    /// Iterate history records, optionally filtered by URL and a UTC
    /// visit-time window.
    pub fn iter_history(
        &mut self,
        url: Option<&KeySearch>,
        earliest: Option<&DateTime<Utc>>,
        latest: Option<&DateTime<Utc>>,
    ) -> Result<Vec<HistoryRecord>> {
        self.places()?.iter_history_records(url, earliest, latest)
    }

    /// Iterate downloads, optionally filtered by the downloaded URL and by
    /// the URL of the tab the download started from (its parent visit).
    pub fn iter_downloads(
        &mut self,
        download_url: Option<&KeySearch>,
        tab_url: Option<&KeySearch>,
    ) -> Result<Vec<DownloadRecord>> {
        let places = self.places()?;
        let mut downloads = Vec::new();
        for download in places.iter_downloads()? {
            if let Some(search) = download_url {
                if !search.hits(download.visit.url.as_deref().unwrap_or_default()) {
                    continue;
                }
            }
            if let Some(search) = tab_url {
                let parent = places.get_parent_of(&download.visit)?;
                let hit = parent
                    .as_ref()
                    .and_then(|p| p.url.as_deref())
                    .map(|u| search.hits(u))
                    .unwrap_or(false);
                if !hit {
                    continue;
                }
            }
            downloads.push(download);
        }
        Ok(downloads)
    }

    /// The history reader itself, for visit navigation.
    pub fn history(&mut self) -> Result<&PlacesDatabase> {
        self.places()
    }

    // ── Cache ──────────────────────────────────────────────────────

    /// Iterate cache entries, filtered by URL and header predicates.
    ///
    /// With `decompress`, bodies are run through their `Content-Encoding`.
    pub fn iter_cache(
        &mut self,
        url: Option<&KeySearch>,
        header_filters: &[(String, HeaderSearch)],
        decompress: bool,
    ) -> Result<Vec<CacheResult>> {
        let mut results = Vec::new();
        for file in self.cache.iter_cache(url, header_filters)? {
            results.push(CacheResult::new(file?, decompress)?);
        }
        Ok(results)
    }

    /// Iterate cache entry metadata without reading bodies.
    pub fn iter_cache_metadata(
        &mut self,
        url: Option<&KeySearch>,
    ) -> Result<Vec<CacheFileMetadata>> {
        self.cache.iter_metadata(url)
    }

    pub fn cache(&mut self) -> &mut CacheDirectory {
        &mut self.cache
    }

    // ── Local Storage ──────────────────────────────────────────────

    pub fn iter_local_storage_hosts(&mut self) -> Result<Vec<String>> {
        let storage = self.local_storage()?;
        Ok(storage.iter_storage_keys().map(str::to_string).collect())
    }

    pub fn iter_local_storage(
        &mut self,
        storage_key: Option<&KeySearch>,
        script_key: Option<&KeySearch>,
        raise_on_no_result: bool,
    ) -> Result<Vec<LocalStorageRecord>> {
        self.local_storage()?
            .iter_records(storage_key, script_key, raise_on_no_result)
    }

    pub fn local_storage(&mut self) -> Result<&mut LocalStorage> {
        if self.local_storage.is_none() {
            let path = self.storage_default_path();
            self.local_storage = Some(LocalStorage::open(&path)?);
        }
        Ok(self.local_storage.as_mut().expect("just initialized"))
    }

    // ── Session Storage ────────────────────────────────────────────

    pub fn iter_session_storage_hosts(&mut self) -> Result<Vec<String>> {
        let storage = self.session_storage()?;
        Ok(storage.iter_hosts().map(str::to_string).collect())
    }

    pub fn iter_session_storage(
        &mut self,
        host: Option<&KeySearch>,
        key: Option<&KeySearch>,
        raise_on_no_result: bool,
    ) -> Result<Vec<SessionStorageRecord>> {
        self.session_storage()?
            .iter_records(host, key, raise_on_no_result)
    }

    pub fn session_storage(&mut self) -> Result<&SessionStorage> {
        if self.session_storage.is_none() {
            self.session_storage = Some(SessionStorage::open(&self.profile_folder)?);
        }
        Ok(self.session_storage.as_ref().expect("just initialized"))
    }

    // ── IndexedDB ──────────────────────────────────────────────────

    pub fn iter_indexeddb_hosts(&mut self) -> Result<Vec<String>> {
        let bag = self.indexeddb()?;
        Ok(bag.iter_origins().map(str::to_string).collect())
    }

    /// The IndexedDB folder for one origin (a value returned by
    /// [`Self::iter_indexeddb_hosts`]), opened on demand.
    pub fn get_indexeddb(&mut self, origin: &str) -> Result<&IndexedDbFolder> {
        self.indexeddb()?.get_idb(origin)
    }

    /// Iterate IndexedDB records across origins, databases and object
    /// stores, each optionally filtered.
    ///
    /// A broad origin filter opens every matching origin's databases; the
    /// first open of an origin carries set-up cost.
    pub fn iter_indexeddb_records(
        &mut self,
        host: Option<&KeySearch>,
        database_name: Option<&KeySearch>,
        object_store_name: Option<&KeySearch>,
        raise_on_no_result: bool,
    ) -> Result<Vec<IdbRecord>> {
        let bag = self.indexeddb()?;
        let origins: Vec<String> = bag
            .iter_origins()
            .filter(|o| host.map(|s| s.hits(o)).unwrap_or(true))
            .map(str::to_string)
            .collect();

        let mut records = Vec::new();
        for origin in &origins {
            let folder = bag.get_idb(origin)?;
            for database in folder.databases() {
                if let Some(search) = database_name {
                    if !search.hits(database.name()) {
                        continue;
                    }
                }
                for store in database.object_stores() {
                    if let Some(search) = object_store_name {
                        if !search.hits(&store.name) {
                            continue;
                        }
                    }
                    records.extend(folder.iter_records(database, store)?);
                }
            }
        }

        if records.is_empty() && raise_on_no_result {
            return Err(FoxtrailError::NotFound(format!(
                "host: {}, database: {}, object store: {}",
                crate::keysearch::describe(host),
                crate::keysearch::describe(database_name),
                crate::keysearch::describe(object_store_name)
            )));
        }
        Ok(records)
    }

    // ── Internal ───────────────────────────────────────────────────

    fn places(&mut self) -> Result<&PlacesDatabase> {
        if self.places.is_none() {
            let path = self.profile_folder.join(PLACES_DB_NAME);
            self.places = Some(PlacesDatabase::open(&path)?);
        }
        Ok(self.places.as_ref().expect("just initialized"))
    }

    fn indexeddb(&mut self) -> Result<&mut IndexedDbBag> {
        if self.indexeddb.is_none() {
            let path = self.storage_default_path();
            self.indexeddb = Some(IndexedDbBag::open(&path)?);
        }
        Ok(self.indexeddb.as_mut().expect("just initialized"))
    }

    fn storage_default_path(&self) -> PathBuf {
        self.profile_folder
            .join(STORAGE_FOLDER_NAME)
            .join(DEFAULT_FOLDER_NAME)
    }
}
