//! Per-origin storage artifacts: `.metadata-v2` sidecars, local storage
//! databases and the mozLz4 session store.

pub mod local;
pub mod metadata;
pub mod session;

pub use local::{CompressionType, ConversionType, LocalStorage, LocalStorageRecord};
pub use metadata::StorageMetadataV2;
pub use session::{SessionStorage, SessionStorageRecord};
