//! The decoded JavaScript value universe.

use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use serde::Serialize;

/// A value decoded from a structured clone stream.
///
/// `Undefined` is a nullary variant rather than an absence: sparse array
/// gaps and explicitly-undefined properties decode to it. `BackRef` is a
/// handle into the flattened-object table of the owning [`CloneDocument`];
/// shared objects and cycles in the source graph stay shared instead of
/// being expanded into repeated subtrees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum JsValue {
    Null,
    Undefined,
    Bool(bool),
    Int(i32),
    Double(f64),
    String(String),
    Date(DateTime<Utc>),
    /// Pattern only; this reader never evaluates regular expressions.
    RegExp(String),
    BigInt(BigInt),
    /// Dense array; gaps in the source are filled with `Undefined`.
    Array(Vec<JsValue>),
    /// String-keyed object in insertion order.
    Object(Vec<(String, JsValue)>),
    Map(Vec<(JsValue, JsValue)>),
    Set(Vec<JsValue>),
    ArrayBuffer(Vec<u8>),
    TypedArray(TypedArray),
    /// Index into the flattened-object table.
    BackRef(u32),
    Blob(BlobDescriptor),
    File(FileDescriptor),
    CryptoKey(CryptoKey),
}

/// A materialized typed array.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TypedArray {
    Int8(Vec<i8>),
    Uint8(Vec<u8>),
    Int16(Vec<i16>),
    Uint16(Vec<u16>),
    Int32(Vec<i32>),
    Uint32(Vec<u32>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Uint8Clamped(Vec<u8>),
    BigInt64(Vec<i64>),
    BigUint64(Vec<u64>),
}

impl TypedArray {
    pub fn len(&self) -> usize {
        match self {
            TypedArray::Int8(v) => v.len(),
            TypedArray::Uint8(v) | TypedArray::Uint8Clamped(v) => v.len(),
            TypedArray::Int16(v) => v.len(),
            TypedArray::Uint16(v) => v.len(),
            TypedArray::Int32(v) => v.len(),
            TypedArray::Uint32(v) => v.len(),
            TypedArray::Float32(v) => v.len(),
            TypedArray::Float64(v) => v.len(),
            TypedArray::BigInt64(v) => v.len(),
            TypedArray::BigUint64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A Blob persisted out-of-line: `index` selects the entry in the owning
/// record's `file_ids` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobDescriptor {
    pub index: u32,
    pub size: u64,
    pub mime_type: String,
}

/// A File persisted out-of-line, with its script-visible name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileDescriptor {
    pub index: u32,
    pub size: u64,
    pub mime_type: String,
    pub name: String,
    /// Absent for the obsolete without-lastModified form.
    pub last_modified: Option<DateTime<Utc>>,
}

/// A WebCrypto key. Key material is carried verbatim; nothing is validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CryptoKey {
    pub attributes: u32,
    pub symmetric_key: Vec<u8>,
    pub private_key: Vec<u8>,
    pub public_key: Vec<u8>,
    pub algorithm_name: String,
    pub algorithm: KeyAlgorithm,
}

/// Algorithm-specific parameters of a [`CryptoKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum KeyAlgorithm {
    Aes { length: u32 },
    Kdf,
    Hmac { length: u32, hash: String },
    Rsa { modulus_length: u32, public_exponent: Vec<u8>, hash: String },
    Ec { named_curve: String },
    Ed,
}

/// One fully decoded structured clone stream: the root value, the
/// flattened-object table that `BackRef` handles index into, and the scope
/// word from the header pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloneDocument {
    pub scope: u32,
    pub root: JsValue,
    pub objects: Vec<JsValue>,
}

impl CloneDocument {
    /// Follow a `BackRef` handle to the value it names; other values are
    /// returned unchanged.
    ///
    /// Decode-time validation guarantees every handle is in range.
    pub fn resolve<'a>(&'a self, value: &'a JsValue) -> &'a JsValue {
        match value {
            JsValue::BackRef(index) => &self.objects[*index as usize],
            other => other,
        }
    }
}
