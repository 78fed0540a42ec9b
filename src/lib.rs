//! foxtrail — forensic reader for Mozilla Firefox profile artifacts.
//!
//! Given a profile directory and its separate cache directory (both
//! read-only snapshots on disk), this crate exposes a uniform query
//! surface over five artifact classes: URL history and downloads, the
//! HTTP disk cache (v2 entry format), local storage, session storage and
//! IndexedDB object stores. It is a pure deserialization and aggregation
//! engine: no network, no mutation of source files.
//!
//! The usual entry point is [`ProfileFolder`]:
//!
//! ```no_run
//! use foxtrail::{KeySearch, ProfileFolder};
//!
//! # fn main() -> foxtrail::Result<()> {
//! let mut profile = ProfileFolder::open(
//!     "/evidence/profile".as_ref(),
//!     "/evidence/cache2".as_ref(),
//! )?;
//!
//! for visit in profile.iter_history(Some(&KeySearch::from("https://example.com/")), None, None)? {
//!     println!("{} {:?}", visit.visit_time, visit.url);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The lower layers are public too: [`cache`] for the disk cache,
//! [`idb`] for IndexedDB keys and structured clone streams, [`storage`]
//! for local/session storage and [`places`] for the history database.

pub mod binary_reader;
pub mod cache;
pub mod codecs;
pub mod error;
pub mod http;
pub mod idb;
pub mod keysearch;
pub mod places;
pub mod profile;
pub mod storage;
pub mod timestamps;

pub use binary_reader::{BinaryReader, Endian};
pub use cache::{CacheDirectory, CacheFile, CacheFileMetadata, CacheIndexFile, CacheKey};
pub use error::{FoxtrailError, Result};
pub use http::HttpResponseHead;
pub use idb::{CloneDocument, IdbKey, IdbKeyValue, IdbRecord, IndexedDbBag, JsValue};
pub use keysearch::{HeaderSearch, KeySearch};
pub use places::{DownloadRecord, HistoryRecord, PlacesDatabase};
pub use profile::{CacheResult, ProfileFolder};
pub use storage::{LocalStorage, LocalStorageRecord, SessionStorage, SessionStorageRecord};
