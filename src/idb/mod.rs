//! Firefox IndexedDB: key decoding, structured clone values and the
//! SQLite-backed record pipeline.
//!
//! Records live in per-origin `idb/*.sqlite` databases. Keys use a
//! sort-preserving tagged encoding; values are Snappy-compressed structured
//! clone streams, stored inline or in an external `<dbname>.files/` sidecar.

pub mod bag;
pub mod clone;
pub mod database;
pub mod key;

pub use bag::IndexedDbBag;
pub use clone::{CloneDocument, JsValue, StructuredCloneReader};
pub use database::{
    DatabaseInfo, IdbRecord, IndexedDbDatabase, IndexedDbFolder, ObjectStoreMetadata, StoreSelector,
};
pub use key::{IdbKey, IdbKeyValue};
