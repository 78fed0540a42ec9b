//! Structured clone deserialization.
//!
//! IndexedDB persists JavaScript values in the binary stream emitted by
//! SpiderMonkey's structured-clone writer: little-endian 8-byte
//! `(data, tag)` pairs, 8-byte aligned, with a flattened-object table
//! resolving back-references to previously decoded objects.

pub mod reader;
pub mod tags;
pub mod value;

pub use reader::{decode, StructuredCloneReader};
pub use tags::ScalarType;
pub use value::{
    BlobDescriptor, CloneDocument, CryptoKey, FileDescriptor, JsValue, KeyAlgorithm, TypedArray,
};
