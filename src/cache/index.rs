//! The cache `index` file.
//!
//! Big-endian throughout: a fixed 16-byte header followed by 41-byte
//! records until fewer than 41 bytes remain (the trailing hash, if any, is
//! ignored).
//!
//! ```text
//! Header            Record (41 bytes)
//! 0  4  version     0   20  sha1 of the key
//! 4  4  last write  20  4   frecency (f32)
//! 8  4  is dirty    24  8   origin attributes hash (i64)
//! 12 4  kb written  32  2   on-start time
//!                   34  2   on-stop time
//!                   36  1   content type
//!                   37  4   flags / file size
//! ```

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::binary_reader::{BinaryReader, Endian};
use crate::error::{FoxtrailError, Result};

/// Fixed record length in the index file.
pub const INDEX_RECORD_SIZE: usize = 41;

// ── Content Type ───────────────────────────────────────────────────

/// Content classification stored per index record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum CacheContentType {
    Unknown = 0,
    Other = 1,
    Javascript = 2,
    Image = 3,
    Media = 4,
    Stylesheet = 5,
    Wasm = 6,
}

impl CacheContentType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unknown),
            1 => Some(Self::Other),
            2 => Some(Self::Javascript),
            3 => Some(Self::Image),
            4 => Some(Self::Media),
            5 => Some(Self::Stylesheet),
            6 => Some(Self::Wasm),
            _ => None,
        }
    }
}

// ── Header ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CacheIndexHeader {
    pub version: u32,
    pub last_write: DateTime<Utc>,
    pub is_dirty: u32,
    pub kb_written: u32,
}

impl CacheIndexHeader {
    pub fn from_reader<R: Read + Seek>(reader: &mut BinaryReader<R>) -> Result<Self> {
        Ok(Self {
            version: reader.read_u32(Endian::Big)?,
            last_write: reader.read_datetime_be()?,
            is_dirty: reader.read_u32(Endian::Big)?,
            kb_written: reader.read_u32(Endian::Big)?,
        })
    }
}

// ── Record ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CacheIndexRecord {
    /// SHA-1 of the cache key, lowercase hex — names the entry file.
    pub sha1_hash: String,
    /// The frecency bytes read as a big-endian f32 (how Firefox's other
    /// databases store frecency).
    pub frecency: f32,
    /// The same four bytes untouched, for callers preferring the u32
    /// reading of the upstream declaration.
    pub frecency_raw: u32,
    pub origin_attrs_hash: i64,
    pub on_start_time: u16,
    pub on_stop_time: u16,
    pub content_type: CacheContentType,
    pub flags: u32,
}

impl CacheIndexRecord {
    pub fn from_reader<R: Read + Seek>(reader: &mut BinaryReader<R>) -> Result<Self> {
        let sha1 = reader.read_raw(20)?;
        let frecency_raw = reader.read_u32(Endian::Big)?;
        let origin_attrs_hash = reader.read_i64(Endian::Big)?;
        let on_start_time = reader.read_u16(Endian::Big)?;
        let on_stop_time = reader.read_u16(Endian::Big)?;
        let content_type_raw = reader.read_raw(1)?[0];
        let content_type = CacheContentType::from_u8(content_type_raw).ok_or_else(|| {
            FoxtrailError::InvalidFormat(format!(
                "unknown cache content type: {content_type_raw}"
            ))
        })?;
        let flags = reader.read_u32(Endian::Big)?;

        Ok(Self {
            sha1_hash: hex(&sha1),
            frecency: f32::from_bits(frecency_raw),
            frecency_raw,
            origin_attrs_hash,
            on_start_time,
            on_stop_time,
            content_type,
            flags,
        })
    }

    /// Low 24 bits of the flags word.
    pub fn file_size_kb(&self) -> u32 {
        self.flags & 0x00ff_ffff
    }

    pub fn is_initialized(&self) -> bool {
        self.flags & 0x8000_0000 != 0
    }

    pub fn is_anonymous(&self) -> bool {
        self.flags & 0x4000_0000 != 0
    }

    pub fn is_removed(&self) -> bool {
        self.flags & 0x2000_0000 != 0
    }

    pub fn is_dirty(&self) -> bool {
        self.flags & 0x1000_0000 != 0
    }

    pub fn is_fresh(&self) -> bool {
        self.flags & 0x0800_0000 != 0
    }

    pub fn is_pinned(&self) -> bool {
        self.flags & 0x0400_0000 != 0
    }

    pub fn has_alt_data(&self) -> bool {
        self.flags & 0x0200_0000 != 0
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ── Index File ─────────────────────────────────────────────────────

/// The whole `index` file: header plus ordered records.
#[derive(Debug, Clone)]
pub struct CacheIndexFile {
    header: CacheIndexHeader,
    records: Vec<CacheIndexRecord>,
}

impl CacheIndexFile {
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut reader = BinaryReader::new(File::open(path)?);
        Self::from_reader(&mut reader)
    }

    pub fn from_reader<R: Read + Seek>(reader: &mut BinaryReader<R>) -> Result<Self> {
        let header = CacheIndexHeader::from_reader(reader)?;
        let mut records = Vec::new();
        while reader.can_read(INDEX_RECORD_SIZE)? {
            records.push(CacheIndexRecord::from_reader(reader)?);
        }
        Ok(Self { header, records })
    }

    pub fn header(&self) -> &CacheIndexHeader {
        &self.header
    }

    pub fn records(&self) -> &[CacheIndexRecord] {
        &self.records
    }
}
