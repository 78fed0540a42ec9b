//! Structured clone tag and scalar-type constants.
//!
//! Tag values follow SpiderMonkey's assignment order starting at
//! `NULL = 0xFFFF0000` (js/src/vm/StructuredClone.cpp); DOM tags start at
//! `DOM_BASE = 0xFFFF8000` (dom/base/StructuredCloneTags.h). Only a subset
//! is ever written to disk by IndexedDB, and only that subset is decoded,
//! but the constants for the in-between slots are kept so unknown-tag
//! errors stay readable against the upstream tables.

/// Tags below this value are raw doubles packed into the pair itself.
pub const FLOAT_MAX: u32 = 0xFFF0_0000;
/// The mandatory first pair of every stream; its data field is the scope.
pub const HEADER: u32 = 0xFFF1_0000;

pub const NULL: u32 = 0xFFFF_0000;
pub const UNDEFINED: u32 = NULL + 1;
pub const BOOLEAN: u32 = NULL + 2;
pub const INT32: u32 = NULL + 3;
pub const STRING: u32 = NULL + 4;
pub const DATE_OBJECT: u32 = NULL + 5;
pub const REGEXP_OBJECT: u32 = NULL + 6;
pub const ARRAY_OBJECT: u32 = NULL + 7;
pub const OBJECT_OBJECT: u32 = NULL + 8;
/// Old array buffer form kept for backwards compatibility.
pub const ARRAY_BUFFER_OBJECT_V2: u32 = NULL + 9;
pub const BOOLEAN_OBJECT: u32 = NULL + 10;
pub const STRING_OBJECT: u32 = NULL + 11;
pub const NUMBER_OBJECT: u32 = NULL + 12;
pub const BACK_REFERENCE_OBJECT: u32 = NULL + 13;
/// Old typed array form kept for backwards compatibility.
pub const TYPED_ARRAY_OBJECT_V2: u32 = NULL + 16;
pub const MAP_OBJECT: u32 = NULL + 17;
pub const SET_OBJECT: u32 = NULL + 18;
pub const END_OF_KEYS: u32 = NULL + 19;
pub const BIGINT: u32 = NULL + 29;
pub const BIGINT_OBJECT: u32 = NULL + 30;
pub const ARRAY_BUFFER_OBJECT: u32 = NULL + 31;
pub const TYPED_ARRAY_OBJECT: u32 = NULL + 32;

pub const DOM_BASE: u32 = 0xFFFF_8000;
pub const DOM_BLOB: u32 = DOM_BASE + 1;
/// Obsolete file form still found in old IndexedDB databases.
pub const DOM_FILE_WITHOUT_LASTMODIFIEDDATE: u32 = DOM_BASE + 2;
pub const DOM_FILELIST: u32 = DOM_BASE + 3;
pub const DOM_MUTABLEFILE: u32 = DOM_BASE + 4;
pub const DOM_FILE: u32 = DOM_BASE + 5;
pub const DOM_CRYPTOKEY: u32 = DOM_BASE + 10;

// ── Scalar Types ───────────────────────────────────────────────────

/// Element type of a typed array (js/public/ScalarType.h ordering).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
    /// uint8_t storage with clamped assignment; raw bytes on decode.
    Uint8Clamped,
    BigInt64,
    BigUint64,
    /// Recognized but never materialized (DataView and friends).
    MaxTypedArrayViewType,
    Int64,
    Simd128,
}

impl ScalarType {
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0 => Some(Self::Int8),
            1 => Some(Self::Uint8),
            2 => Some(Self::Int16),
            3 => Some(Self::Uint16),
            4 => Some(Self::Int32),
            5 => Some(Self::Uint32),
            6 => Some(Self::Float32),
            7 => Some(Self::Float64),
            8 => Some(Self::Uint8Clamped),
            9 => Some(Self::BigInt64),
            10 => Some(Self::BigUint64),
            11 => Some(Self::MaxTypedArrayViewType),
            12 => Some(Self::Int64),
            13 => Some(Self::Simd128),
            _ => None,
        }
    }

    /// Element width in bytes, `None` for the non-materializable types.
    pub fn element_size(self) -> Option<usize> {
        match self {
            Self::Int8 | Self::Uint8 | Self::Uint8Clamped => Some(1),
            Self::Int16 | Self::Uint16 => Some(2),
            Self::Int32 | Self::Uint32 | Self::Float32 => Some(4),
            Self::Float64 | Self::BigInt64 | Self::BigUint64 => Some(8),
            Self::MaxTypedArrayViewType | Self::Int64 | Self::Simd128 => None,
        }
    }
}
