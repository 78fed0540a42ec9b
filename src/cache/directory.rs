//! Cache directory enumeration and filtered iteration.
//!
//! Cache keys are unique on the whole key, but with origin partitioning the
//! same URL can appear under several keys. A URL-to-keys lookup is built
//! lazily on the first filtered query so that URL searches do not re-read
//! every entry file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::entry::{CacheFile, CacheFileMetadata};
use crate::cache::key::CacheKey;
use crate::error::{FoxtrailError, Result};
use crate::keysearch::{HeaderSearch, KeySearch};

const ENTRIES_FOLDER_NAME: &str = "entries";

/// Read-only view over a cache folder (`index` + `entries/`).
#[derive(Debug)]
pub struct CacheDirectory {
    cache_folder: PathBuf,
    /// Skip entries whose metadata fails to decode instead of failing the
    /// whole iteration.
    skip_corrupt: bool,
    precached: Option<HashMap<CacheKey, (PathBuf, CacheFileMetadata)>>,
    url_lookup: Option<HashMap<String, Vec<CacheKey>>>,
}

impl CacheDirectory {
    pub fn open(cache_folder: &Path) -> Result<Self> {
        if !cache_folder.is_dir() {
            return Err(FoxtrailError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!(
                    "cache folder does not exist or is not a directory: {}",
                    cache_folder.display()
                ),
            )));
        }
        Ok(Self {
            cache_folder: cache_folder.to_path_buf(),
            skip_corrupt: false,
            precached: None,
            url_lookup: None,
        })
    }

    /// Tolerate corrupt entries: log and skip instead of failing.
    pub fn with_skip_corrupt(mut self, skip_corrupt: bool) -> Self {
        self.skip_corrupt = skip_corrupt;
        self
    }

    pub fn path(&self) -> &Path {
        &self.cache_folder
    }

    /// Stream the metadata of entries, optionally narrowed by URL.
    pub fn iter_metadata(&mut self, url: Option<&KeySearch>) -> Result<Vec<CacheFileMetadata>> {
        self.ensure_precache()?;
        let precached = self.precached.as_ref().expect("precache just built");
        let url_lookup = self.url_lookup.as_ref().expect("precache just built");

        match url {
            None => Ok(precached.values().map(|(_, m)| m.clone()).collect()),
            Some(search) => {
                let mut out = Vec::new();
                for key in matching_keys(url_lookup, search) {
                    let (_, metadata) = &precached[&key];
                    out.push(metadata.clone());
                }
                Ok(out)
            }
        }
    }

    /// Stream full cache entries, optionally narrowed by URL and by header
    /// field predicates.
    ///
    /// With no URL filter the entries folder is scanned directly; with one,
    /// the precached URL lookup supplies the candidate files.
    pub fn iter_cache<'a>(
        &mut self,
        url: Option<&KeySearch>,
        header_filters: &'a [(String, HeaderSearch)],
    ) -> Result<impl Iterator<Item = Result<CacheFile>> + 'a> {
        let paths = match url {
            None => self.entry_paths()?,
            Some(search) => {
                self.ensure_precache()?;
                let precached = self.precached.as_ref().expect("precache just built");
                let url_lookup = self.url_lookup.as_ref().expect("precache just built");
                matching_keys(url_lookup, search)
                    .into_iter()
                    .map(|key| precached[&key].0.clone())
                    .collect()
            }
        };

        let skip_corrupt = self.skip_corrupt;
        let mut pending = paths.into_iter();
        let mut failed = false;
        Ok(std::iter::from_fn(move || {
            if failed {
                return None;
            }
            for path in pending.by_ref() {
                match CacheFile::from_file(&path) {
                    Ok(file) => {
                        if matches_header_filters(&file, header_filters) {
                            return Some(Ok(file));
                        }
                    }
                    Err(err) if skip_corrupt => {
                        tracing::warn!(path = %path.display(), error = %err, "skipping corrupt cache entry");
                    }
                    Err(err) => {
                        failed = true;
                        return Some(Err(err));
                    }
                }
            }
            None
        }))
    }

    /// The URLs present in the cache (one per distinct entry URL).
    pub fn iter_urls(&mut self) -> Result<Vec<String>> {
        self.ensure_precache()?;
        Ok(self
            .url_lookup
            .as_ref()
            .expect("precache just built")
            .keys()
            .cloned()
            .collect())
    }

    // ── Internal ───────────────────────────────────────────────────

    fn entry_paths(&self) -> Result<Vec<PathBuf>> {
        let entries_dir = self.cache_folder.join(ENTRIES_FOLDER_NAME);
        let mut paths = Vec::new();
        for entry in fs::read_dir(&entries_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                paths.push(entry.path());
            }
        }
        Ok(paths)
    }

    fn ensure_precache(&mut self) -> Result<()> {
        if self.precached.is_some() {
            return Ok(());
        }

        let mut precached = HashMap::new();
        for path in self.entry_paths()? {
            let metadata = match CacheFile::read_metadata(&path) {
                Ok(m) => m,
                Err(err) if self.skip_corrupt => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping corrupt cache entry");
                    continue;
                }
                Err(err) => return Err(err),
            };
            let key = metadata.key.clone();
            if precached.insert(key, (path.clone(), metadata)).is_some() {
                return Err(FoxtrailError::InvalidFormat(format!(
                    "duplicate cache key in {}",
                    path.display()
                )));
            }
        }

        let mut url_lookup: HashMap<String, Vec<CacheKey>> = HashMap::new();
        for key in precached.keys() {
            if let Some(url) = key.url() {
                url_lookup.entry(url.to_string()).or_default().push(key.clone());
            }
        }

        self.precached = Some(precached);
        self.url_lookup = Some(url_lookup);
        Ok(())
    }
}

/// Resolve a URL search to the cache keys it selects.
fn matching_keys(url_lookup: &HashMap<String, Vec<CacheKey>>, search: &KeySearch) -> Vec<CacheKey> {
    match search {
        KeySearch::Exact(url) => url_lookup.get(url).cloned().unwrap_or_default(),
        KeySearch::AnyOf(urls) => urls
            .iter()
            .filter_map(|u| url_lookup.get(u))
            .flatten()
            .cloned()
            .collect(),
        _ => url_lookup
            .iter()
            .filter(|(url, _)| search.hits(url))
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect(),
    }
}

fn matches_header_filters(file: &CacheFile, filters: &[(String, HeaderSearch)]) -> bool {
    filters
        .iter()
        .all(|(name, filter)| filter.hits(file.get_header_attribute(name)))
}
