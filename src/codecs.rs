//! Bulk codecs used by the storage formats.
//!
//! IndexedDB and local storage values are Snappy-compressed (block format
//! inline, framed format for external files), the session store uses the
//! mozLz4 envelope around an LZ4 block, and cached HTTP bodies may carry a
//! `Content-Encoding` of gzip, brotli or deflate.

use std::io::Read;
use std::path::Path;

use crate::error::{FoxtrailError, Result};

/// mozLz4 file magic (`sessionstore.jsonlz4` and friends).
pub const MOZLZ4_MAGIC: &[u8; 8] = b"mozLz40\0";

/// Decompress a raw Snappy block.
pub fn snappy_decompress(data: &[u8]) -> Result<Vec<u8>> {
    Ok(snap::raw::Decoder::new().decompress_vec(data)?)
}

/// Decompress a framed Snappy stream (external IndexedDB data files).
pub fn snappy_decompress_framed<R: Read>(reader: R) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    snap::read::FrameDecoder::new(reader).read_to_end(&mut out)?;
    Ok(out)
}

/// Decompress a mozLz4 envelope: magic, u32 LE decompressed length, LZ4
/// block payload.
pub fn mozlz4_decompress(compressed: &[u8]) -> Result<Vec<u8>> {
    if compressed.len() < MOZLZ4_MAGIC.len() + 4 {
        return Err(FoxtrailError::InvalidFormat(
            "data not long enough to contain a mozLz4 header".to_string(),
        ));
    }
    if &compressed[..MOZLZ4_MAGIC.len()] != MOZLZ4_MAGIC {
        return Err(FoxtrailError::BadMagic(format!(
            "expected mozLz4 magic {:02x?}, got {:02x?}",
            MOZLZ4_MAGIC,
            &compressed[..MOZLZ4_MAGIC.len()]
        )));
    }

    let length_offset = MOZLZ4_MAGIC.len();
    let decompressed_length = u32::from_le_bytes(
        compressed[length_offset..length_offset + 4]
            .try_into()
            .expect("slice is 4 bytes"),
    ) as usize;

    Ok(lz4_flex::block::decompress(
        &compressed[length_offset + 4..],
        decompressed_length,
    )?)
}

/// Load a `*.jsonlz4` file and parse the payload as JSON.
pub fn load_jsonlz4(path: &Path) -> Result<serde_json::Value> {
    let compressed = std::fs::read(path)?;
    let decompressed = mozlz4_decompress(&compressed)?;
    Ok(serde_json::from_slice(&decompressed)?)
}

/// Decompress an HTTP body per its `Content-Encoding` value.
///
/// Returns `(body, was_compressed)`; unknown or absent encodings pass the
/// bytes through untouched.
pub fn decode_content_encoding(encoding: Option<&str>, data: &[u8]) -> Result<(Vec<u8>, bool)> {
    match encoding.map(str::trim) {
        Some("gzip") => {
            let mut out = Vec::new();
            flate2::read::GzDecoder::new(data).read_to_end(&mut out)?;
            Ok((out, true))
        }
        Some("br") => {
            let mut out = Vec::new();
            brotli::Decompressor::new(data, 4096).read_to_end(&mut out)?;
            Ok((out, true))
        }
        Some("deflate") => {
            // raw deflate stream, no zlib header
            let mut out = Vec::new();
            flate2::read::DeflateDecoder::new(data).read_to_end(&mut out)?;
            Ok((out, true))
        }
        _ => Ok((data.to_vec(), false)),
    }
}
