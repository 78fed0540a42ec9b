//! The `.metadata-v2` origin sidecar.
//!
//! Big-endian fixed layout (dom/quota's directory metadata): u64
//! unix-microseconds timestamp, persisted flag, 8 reserved bytes, then
//! three 32-bit-length-prefixed UTF-8 strings (suffix, group, origin) and
//! the is-app flag.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::binary_reader::{BinaryReader, Endian};
use crate::error::Result;
use crate::timestamps;

/// Decoded `.metadata-v2` contents; `origin` attributes storage to a site.
#[derive(Debug, Clone, Serialize)]
pub struct StorageMetadataV2 {
    pub timestamp: DateTime<Utc>,
    pub persisted: bool,
    pub suffix: String,
    pub group: String,
    pub origin: String,
    pub is_app: bool,
}

impl StorageMetadataV2 {
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut reader = BinaryReader::new(File::open(path)?);
        Self::from_reader(&mut reader)
    }

    pub fn from_reader<R: Read + Seek>(reader: &mut BinaryReader<R>) -> Result<Self> {
        let timestamp = timestamps::from_unix_micros(reader.read_i64(Endian::Big)?)?;
        let persisted = reader.read_raw(1)?[0] != 0;
        let _reserved = reader.read_raw(8)?;
        let suffix = read_length_prefixed_string(reader)?;
        let group = read_length_prefixed_string(reader)?;
        let origin = read_length_prefixed_string(reader)?;
        let is_app = reader.read_raw(1)?[0] != 0;

        Ok(Self { timestamp, persisted, suffix, group, origin, is_app })
    }
}

/// 32-bit BE length, then that many UTF-8 bytes (nsBinaryStream cstrings).
fn read_length_prefixed_string<R: Read + Seek>(reader: &mut BinaryReader<R>) -> Result<String> {
    let length = reader.read_u32(Endian::Big)?;
    reader.read_utf8(length as usize)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    /// Write a minimal `.metadata-v2` file naming `origin`.
    pub fn write_metadata_v2(path: &Path, origin: &str) {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1_600_000_000_000_000u64.to_be_bytes());
        bytes.push(1); // persisted
        bytes.extend_from_slice(&[0u8; 8]); // reserved
        for s in ["", origin, origin] {
            bytes.extend_from_slice(&(s.len() as u32).to_be_bytes());
            bytes.extend_from_slice(s.as_bytes());
        }
        bytes.push(0); // is_app
        std::fs::write(path, bytes).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FoxtrailError;

    fn sample_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1_600_000_000_123_456u64.to_be_bytes());
        bytes.push(1);
        bytes.extend_from_slice(&[0u8; 8]);
        for s in ["^userContextId=1", "https://example.com", "https://example.com^userContextId=1"]
        {
            bytes.extend_from_slice(&(s.len() as u32).to_be_bytes());
            bytes.extend_from_slice(s.as_bytes());
        }
        bytes.push(0);
        bytes
    }

    #[test]
    fn full_decode() {
        let meta =
            StorageMetadataV2::from_reader(&mut BinaryReader::from_bytes(sample_bytes())).unwrap();
        assert_eq!(timestamps::to_unix_micros(&meta.timestamp), 1_600_000_000_123_456);
        assert!(meta.persisted);
        assert_eq!(meta.suffix, "^userContextId=1");
        assert_eq!(meta.group, "https://example.com");
        assert_eq!(meta.origin, "https://example.com^userContextId=1");
        assert!(!meta.is_app);
    }

    #[test]
    fn truncated_string_fails() {
        let mut bytes = sample_bytes();
        bytes.truncate(30);
        assert!(matches!(
            StorageMetadataV2::from_reader(&mut BinaryReader::from_bytes(bytes)),
            Err(FoxtrailError::ShortRead { .. })
        ));
    }

    #[test]
    fn empty_strings_are_valid() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u64.to_be_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&[0u8; 8]);
        for _ in 0..3 {
            bytes.extend_from_slice(&0u32.to_be_bytes());
        }
        bytes.push(0);

        let meta =
            StorageMetadataV2::from_reader(&mut BinaryReader::from_bytes(bytes)).unwrap();
        assert_eq!(meta.origin, "");
        assert!(!meta.persisted);
    }
}
