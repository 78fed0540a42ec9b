//! Typed reads over a seekable byte stream.
//!
//! Every binary artifact in a profile goes through this reader: the cache
//! index and entry files read big-endian, structured clone streams read
//! little-endian, so endianness is chosen per call.

use std::io::{Read, Seek, SeekFrom};

use chrono::{DateTime, Utc};

use crate::error::{FoxtrailError, Result};
use crate::timestamps;

/// Byte order for a single typed read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

/// Wraps a seekable stream and provides checked typed reads.
///
/// Owns the underlying stream; dropping the reader releases it.
#[derive(Debug)]
pub struct BinaryReader<R> {
    inner: R,
}

impl BinaryReader<std::io::Cursor<Vec<u8>>> {
    /// Build a reader over an in-memory buffer.
    pub fn from_bytes(buffer: Vec<u8>) -> Self {
        BinaryReader::new(std::io::Cursor::new(buffer))
    }
}

impl<R: Read + Seek> BinaryReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn tell(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.inner.seek(pos)?)
    }

    /// Read exactly `count` bytes; `ShortRead` if the stream runs out.
    pub fn read_raw(&mut self, count: usize) -> Result<Vec<u8>> {
        let start = self.tell()?;
        let mut buf = vec![0u8; count];
        let got = self.fill(&mut buf)?;
        if got != count {
            return Err(FoxtrailError::ShortRead { offset: start, wanted: count, got });
        }
        Ok(buf)
    }

    /// Read everything from the current position to the end of the stream.
    pub fn read_until_end(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.inner.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Peek: true if `count` more bytes can be read. Position is restored.
    pub fn can_read(&mut self, count: usize) -> Result<bool> {
        let start = self.tell()?;
        let mut buf = vec![0u8; count];
        let got = self.fill(&mut buf)?;
        self.seek(SeekFrom::Start(start))?;
        Ok(got == count)
    }

    pub fn read_utf8(&mut self, count: usize) -> Result<String> {
        let raw = self.read_raw(count)?;
        String::from_utf8(raw)
            .map_err(|e| FoxtrailError::InvalidFormat(format!("invalid UTF-8: {e}")))
    }

    pub fn read_u16(&mut self, endian: Endian) -> Result<u16> {
        let raw: [u8; 2] = self.read_array()?;
        Ok(match endian {
            Endian::Big => u16::from_be_bytes(raw),
            Endian::Little => u16::from_le_bytes(raw),
        })
    }

    pub fn read_i16(&mut self, endian: Endian) -> Result<i16> {
        Ok(self.read_u16(endian)? as i16)
    }

    pub fn read_u32(&mut self, endian: Endian) -> Result<u32> {
        let raw: [u8; 4] = self.read_array()?;
        Ok(match endian {
            Endian::Big => u32::from_be_bytes(raw),
            Endian::Little => u32::from_le_bytes(raw),
        })
    }

    pub fn read_i32(&mut self, endian: Endian) -> Result<i32> {
        Ok(self.read_u32(endian)? as i32)
    }

    pub fn read_u64(&mut self, endian: Endian) -> Result<u64> {
        let raw: [u8; 8] = self.read_array()?;
        Ok(match endian {
            Endian::Big => u64::from_be_bytes(raw),
            Endian::Little => u64::from_le_bytes(raw),
        })
    }

    pub fn read_i64(&mut self, endian: Endian) -> Result<i64> {
        Ok(self.read_u64(endian)? as i64)
    }

    pub fn read_f32(&mut self, endian: Endian) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32(endian)?))
    }

    pub fn read_f64(&mut self, endian: Endian) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64(endian)?))
    }

    /// Unix-seconds timestamp stored as big-endian u32 (cache files).
    pub fn read_datetime_be(&mut self) -> Result<DateTime<Utc>> {
        Ok(timestamps::from_unix_seconds(self.read_u32(Endian::Big)?))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let raw = self.read_raw(N)?;
        // read_raw guarantees the length
        Ok(raw.try_into().expect("read_raw returned requested length"))
    }

    /// Read as many bytes as available into `buf`, returning the count.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.inner.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(bytes: &[u8]) -> BinaryReader<std::io::Cursor<Vec<u8>>> {
        BinaryReader::from_bytes(bytes.to_vec())
    }

    #[test]
    fn typed_reads_both_endians() {
        let mut r = reader(&[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(r.read_u32(Endian::Big).unwrap(), 0x1234_5678);
        r.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(r.read_u32(Endian::Little).unwrap(), 0x7856_3412);
    }

    #[test]
    fn signed_reads() {
        let mut r = reader(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xfe]);
        assert_eq!(r.read_i32(Endian::Big).unwrap(), -1);
        assert_eq!(r.read_i16(Endian::Big).unwrap(), -2);
    }

    #[test]
    fn floats() {
        let mut r = reader(&1.5f32.to_be_bytes());
        assert_eq!(r.read_f32(Endian::Big).unwrap(), 1.5);
        let mut r = reader(&2.25f64.to_le_bytes());
        assert_eq!(r.read_f64(Endian::Little).unwrap(), 2.25);
    }

    #[test]
    fn short_read_reports_position_and_counts() {
        let mut r = reader(&[1, 2, 3]);
        r.read_raw(2).unwrap();
        let err = r.read_raw(4).unwrap_err();
        match err {
            FoxtrailError::ShortRead { offset, wanted, got } => {
                assert_eq!(offset, 2);
                assert_eq!(wanted, 4);
                assert_eq!(got, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn can_read_does_not_consume() {
        let mut r = reader(&[1, 2, 3, 4]);
        assert!(r.can_read(4).unwrap());
        assert!(!r.can_read(5).unwrap());
        assert_eq!(r.tell().unwrap(), 0);
        assert_eq!(r.read_raw(4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn read_until_end() {
        let mut r = reader(&[1, 2, 3, 4, 5]);
        r.read_raw(2).unwrap();
        assert_eq!(r.read_until_end().unwrap(), vec![3, 4, 5]);
        assert_eq!(r.read_until_end().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn datetime_be() {
        let mut r = reader(&1_600_000_000u32.to_be_bytes());
        assert_eq!(r.read_datetime_be().unwrap().timestamp(), 1_600_000_000);
    }

    #[test]
    fn utf8_rejects_invalid_bytes() {
        let mut r = reader(&[0xff, 0xfe]);
        assert!(r.read_utf8(2).is_err());
    }
}
