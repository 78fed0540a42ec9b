//! Cache entry files.
//!
//! An entry file is the cached body followed by a metadata block and a
//! trailing big-endian u32 holding the metadata offset, which doubles as
//! the body length:
//!
//! ```text
//! [data: offset bytes][metadata ...][offset: u32 BE]
//! ```
//!
//! The metadata block starts with per-chunk hashes (one u16 per 256 KiB
//! chunk of the body), then the fixed header, the NUL-terminated key, and
//! the NUL-delimited element pairs.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::binary_reader::{BinaryReader, Endian};
use crate::cache::key::CacheKey;
use crate::error::{FoxtrailError, Result};
use crate::http::HttpResponseHead;

/// Body chunk size used for the chunk-hash count.
pub const CHUNK_SIZE: u64 = 256 * 1024;

const SUPPORTED_METADATA_VERSION: u32 = 3;

// ── Metadata ───────────────────────────────────────────────────────

/// The decoded metadata block of one entry file.
#[derive(Debug, Clone)]
pub struct CacheFileMetadata {
    pub metadata_hash: u32,
    pub chunk_hashes: Vec<u16>,
    pub version: u32,
    pub fetch_count: u32,
    pub last_fetched: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub frecency: f32,
    pub expiration: DateTime<Utc>,
    pub key_size: u32,
    /// Only bit 0 is defined (pinned).
    pub flags: u32,
    pub key: CacheKey,
    /// Metadata offset within the entry file; also the body length.
    pub offset: u32,
    elements: Vec<(String, String)>,
}

impl CacheFileMetadata {
    pub fn from_reader<R: Read + Seek>(
        reader: &mut BinaryReader<R>,
        chunk_count: u64,
    ) -> Result<Self> {
        let metadata_hash = reader.read_u32(Endian::Big)?;
        let mut chunk_hashes = Vec::with_capacity(chunk_count as usize);
        for _ in 0..chunk_count {
            chunk_hashes.push(reader.read_u16(Endian::Big)?);
        }

        let version = reader.read_u32(Endian::Big)?;
        if version != SUPPORTED_METADATA_VERSION {
            return Err(FoxtrailError::BadVersion {
                expected: SUPPORTED_METADATA_VERSION,
                got: version,
            });
        }

        let fetch_count = reader.read_u32(Endian::Big)?;
        let last_fetched = reader.read_datetime_be()?;
        let last_modified = reader.read_datetime_be()?;
        let frecency = reader.read_f32(Endian::Big)?;
        let expiration = reader.read_datetime_be()?;
        let key_size = reader.read_u32(Endian::Big)?;
        let flags = reader.read_u32(Endian::Big)?;

        // key_size excludes the NUL terminator, which we verify
        let key_raw = reader.read_utf8(key_size as usize + 1)?;
        let key_str = key_raw.strip_suffix('\0').ok_or_else(|| {
            FoxtrailError::MalformedMetadata("key does not end with \\0".to_string())
        })?;
        let key = CacheKey::parse(key_str)?;

        let elements_raw = reader.read_until_end()?;
        if elements_raw.len() < 4 {
            return Err(FoxtrailError::MalformedMetadata(
                "metadata ends before the offset trailer".to_string(),
            ));
        }
        let (elements_raw, trailer) = elements_raw.split_at(elements_raw.len() - 4);
        let offset = u32::from_be_bytes(trailer.try_into().expect("split_at gave 4 bytes"));

        let elements = parse_elements(elements_raw)?;

        Ok(Self {
            metadata_hash,
            chunk_hashes,
            version,
            fetch_count,
            last_fetched,
            last_modified,
            frecency,
            expiration,
            key_size,
            flags,
            key,
            offset,
            elements,
        })
    }

    pub fn is_pinned(&self) -> bool {
        self.flags & 0x1 != 0
    }

    /// Look up an element by case-insensitive name.
    pub fn element(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.elements
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The element pairs in document order (names case-folded).
    pub fn elements(&self) -> impl Iterator<Item = (&str, &str)> {
        self.elements.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// Split the NUL-delimited `name\0value\0` element pairs.
fn parse_elements(raw: &[u8]) -> Result<Vec<(String, String)>> {
    let stripped = raw.strip_suffix(&[0u8]).ok_or_else(|| {
        FoxtrailError::MalformedMetadata("missing final delimiting 0x00".to_string())
    })?;

    let parts: Vec<&[u8]> = stripped.split(|&b| b == 0).collect();
    if parts.len() % 2 != 0 {
        return Err(FoxtrailError::MalformedMetadata(
            "odd number of elements".to_string(),
        ));
    }

    let mut elements = Vec::with_capacity(parts.len() / 2);
    for pair in parts.chunks_exact(2) {
        let name = element_string(pair[0])?.to_ascii_lowercase();
        let value = element_string(pair[1])?;
        elements.push((name, value));
    }
    Ok(elements)
}

fn element_string(raw: &[u8]) -> Result<String> {
    String::from_utf8(raw.to_vec())
        .map_err(|_| FoxtrailError::MalformedMetadata("element is not valid UTF-8".to_string()))
}

// ── Entry File ─────────────────────────────────────────────────────

/// One entry file: body bytes plus decoded metadata and header overlay.
#[derive(Debug, Clone)]
pub struct CacheFile {
    path: PathBuf,
    metadata: CacheFileMetadata,
    data: Vec<u8>,
    header: HttpResponseHead,
}

impl CacheFile {
    /// Read a full entry file: metadata and body.
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut reader = BinaryReader::new(File::open(path)?);
        let (metadata, offset) = read_metadata_block(&mut reader)?;
        reader.seek(SeekFrom::Start(0))?;
        let data = reader.read_raw(offset as usize)?;

        let header = header_overlay(&metadata);
        Ok(Self {
            path: path.to_path_buf(),
            metadata,
            data,
            header,
        })
    }

    /// Read only the metadata block, skipping the body.
    pub fn read_metadata(path: &Path) -> Result<CacheFileMetadata> {
        let mut reader = BinaryReader::new(File::open(path)?);
        let (metadata, _) = read_metadata_block(&mut reader)?;
        Ok(metadata)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn metadata(&self) -> &CacheFileMetadata {
        &self.metadata
    }

    /// The HTTP header overlay: `original-response-headers` if present,
    /// else `response-head`, else empty.
    pub fn header(&self) -> &HttpResponseHead {
        &self.header
    }

    pub fn has_header_attribute(&self, attribute: &str) -> bool {
        self.header.contains(attribute)
    }

    pub fn get_header_attribute(&self, attribute: &str) -> Option<&str> {
        self.header.get(attribute)
    }

    pub fn header_attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header.iter()
    }
}

fn header_overlay(metadata: &CacheFileMetadata) -> HttpResponseHead {
    metadata
        .element("original-response-headers")
        .or_else(|| metadata.element("response-head"))
        .map(HttpResponseHead::parse)
        .unwrap_or_default()
}

/// Common tail-first read: trailing offset, then the metadata block.
fn read_metadata_block<R: Read + Seek>(
    reader: &mut BinaryReader<R>,
) -> Result<(CacheFileMetadata, u32)> {
    reader.seek(SeekFrom::End(-4))?;
    let offset = reader.read_u32(Endian::Big)?;
    reader.seek(SeekFrom::Start(u64::from(offset)))?;
    let chunk_count = u64::from(offset).div_ceil(CHUNK_SIZE);
    let metadata = CacheFileMetadata::from_reader(reader, chunk_count)?;
    Ok((metadata, offset))
}
