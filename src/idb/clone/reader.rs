//! The structured clone stream reader.
//!
//! Everything is consumed as little-endian 8-byte `(data, tag)` pairs with
//! the read position aligned up to a multiple of 8 before each pair. Tags
//! numerically below `FLOAT_MAX` are raw doubles packed into the pair;
//! everything else dispatches on the tag.
//!
//! Objects with identity on the JavaScript side are appended to a
//! flattened-object table as they are produced; a `BACK_REFERENCE_OBJECT`
//! pair indexes that table. Composites reserve their table slot before
//! decoding children so references from inside a value to its ancestor
//! resolve to the right slot.

use std::io::{Read, Seek, SeekFrom};

use num_bigint::{BigInt, Sign};

use crate::binary_reader::{BinaryReader, Endian};
use crate::error::{FoxtrailError, Result};
use crate::idb::clone::tags::{self, ScalarType};
use crate::idb::clone::value::{
    BlobDescriptor, CloneDocument, CryptoKey, FileDescriptor, JsValue, KeyAlgorithm, TypedArray,
};
use crate::timestamps;

/// Decode a whole stream into a [`CloneDocument`].
pub fn decode<R: Read + Seek>(stream: R) -> Result<CloneDocument> {
    let mut reader = StructuredCloneReader::new(stream)?;
    let root = reader.read_root()?;
    let (scope, objects) = reader.finish();
    Ok(CloneDocument { scope, root, objects })
}

/// Outcome of reading one pair: a value, or the end-of-keys control signal
/// consumed by the enclosing collection loop.
enum Item {
    Value(JsValue),
    EndOfKeys,
}

impl Item {
    fn into_value(self) -> Result<JsValue> {
        match self {
            Item::Value(v) => Ok(v),
            Item::EndOfKeys => Err(FoxtrailError::InvalidFormat(
                "unexpected end-of-keys tag".to_string(),
            )),
        }
    }
}

/// Pull-based reader over one structured clone stream.
pub struct StructuredCloneReader<R> {
    reader: BinaryReader<R>,
    scope: u32,
    objects: Vec<JsValue>,
}

impl<R: Read + Seek> StructuredCloneReader<R> {
    /// Open a stream; reads and validates the leading `HEADER` pair.
    pub fn new(stream: R) -> Result<Self> {
        let mut reader = BinaryReader::new(stream);
        let (data, tag) = read_pair(&mut reader)?;
        if tag != tags::HEADER {
            return Err(FoxtrailError::BadMagic(format!(
                "structured clone data does not start with HEADER (got {tag:#010x})"
            )));
        }
        Ok(Self { reader, scope: data, objects: Vec::new() })
    }

    /// Decode the root value of the stream.
    pub fn read_root(&mut self) -> Result<JsValue> {
        self.read_item(&[])?.into_value()
    }

    /// The scope word carried by the header pair.
    pub fn scope(&self) -> u32 {
        self.scope
    }

    /// The flattened-object table built so far.
    pub fn objects(&self) -> &[JsValue] {
        &self.objects
    }

    /// Consume the reader, yielding the scope and the object table.
    pub fn finish(self) -> (u32, Vec<JsValue>) {
        (self.scope, self.objects)
    }

    // ── Pair Dispatch ──────────────────────────────────────────────

    /// Read one aligned pair and decode the value it introduces.
    ///
    /// `expected` restricts the acceptable tags (empty = anything), the way
    /// collection loops constrain their key pairs.
    fn read_item(&mut self, expected: &[u32]) -> Result<Item> {
        self.align()?;
        let (data, tag) = read_pair(&mut self.reader)?;
        tracing::trace!(tag, data, "structured clone pair");

        if !expected.is_empty() && !expected.contains(&tag) {
            return Err(FoxtrailError::InvalidFormat(format!(
                "unexpected tag {tag:#010x} (expected one of {expected:#010x?})"
            )));
        }

        if tag < tags::FLOAT_MAX {
            // the pair itself is a double
            let bits = (u64::from(tag) << 32) | u64::from(data);
            return Ok(Item::Value(JsValue::Double(f64::from_bits(bits))));
        }

        let value = match tag {
            tags::NULL => JsValue::Null,
            tags::UNDEFINED => JsValue::Undefined,
            tags::BOOLEAN | tags::BOOLEAN_OBJECT => {
                let value = JsValue::Bool(data != 0);
                if tag == tags::BOOLEAN_OBJECT {
                    self.objects.push(value.clone());
                }
                value
            }
            tags::INT32 => JsValue::Int(data as i32),
            tags::STRING | tags::STRING_OBJECT => {
                let value = JsValue::String(self.read_string_payload(data)?);
                if tag == tags::STRING_OBJECT {
                    self.objects.push(value.clone());
                }
                value
            }
            tags::DATE_OBJECT => {
                let millis = self.reader.read_f64(Endian::Little)?;
                let value = JsValue::Date(timestamps::from_js_millis(millis)?);
                self.objects.push(value.clone());
                value
            }
            tags::REGEXP_OBJECT => {
                let pattern = self.read_string()?;
                let value = JsValue::RegExp(pattern);
                self.objects.push(value.clone());
                value
            }
            tags::BIGINT | tags::BIGINT_OBJECT => {
                let value = JsValue::BigInt(self.read_bigint(data)?);
                if tag == tags::BIGINT_OBJECT {
                    self.objects.push(value.clone());
                }
                value
            }
            tags::NUMBER_OBJECT => {
                let value = JsValue::Double(self.reader.read_f64(Endian::Little)?);
                self.objects.push(value.clone());
                value
            }
            tags::BACK_REFERENCE_OBJECT => {
                if data as usize >= self.objects.len() {
                    return Err(FoxtrailError::InvalidBackref(data));
                }
                JsValue::BackRef(data)
            }
            tags::ARRAY_OBJECT => self.read_array(data)?,
            tags::OBJECT_OBJECT => self.read_object()?,
            tags::MAP_OBJECT => self.read_map()?,
            tags::SET_OBJECT => self.read_set()?,
            tags::TYPED_ARRAY_OBJECT | tags::TYPED_ARRAY_OBJECT_V2 => {
                self.read_typed_array(tag, data)?
            }
            tags::ARRAY_BUFFER_OBJECT => {
                let length = self.reader.read_u64(Endian::Little)?;
                let value = JsValue::ArrayBuffer(self.reader.read_raw(length as usize)?);
                self.objects.push(value.clone());
                value
            }
            tags::ARRAY_BUFFER_OBJECT_V2 => {
                let value = JsValue::ArrayBuffer(self.reader.read_raw(data as usize)?);
                self.objects.push(value.clone());
                value
            }
            tags::DOM_BLOB => {
                let size = self.reader.read_u64(Endian::Little)?;
                self.align()?;
                let mime_type = self.read_aligned_utf8()?;
                JsValue::Blob(BlobDescriptor { index: data, size, mime_type })
            }
            tags::DOM_FILE | tags::DOM_FILE_WITHOUT_LASTMODIFIEDDATE => {
                let value = self.read_file(tag, data)?;
                self.objects.push(value.clone());
                value
            }
            tags::DOM_CRYPTOKEY => JsValue::CryptoKey(self.read_crypto_key()?),
            tags::END_OF_KEYS => return Ok(Item::EndOfKeys),
            other => return Err(FoxtrailError::UnsupportedTag(other)),
        };

        Ok(Item::Value(value))
    }

    // ── Collections ────────────────────────────────────────────────

    /// Arrays are keyed sparsely on disk; the declared length densifies
    /// them, gaps becoming `Undefined`.
    fn read_array(&mut self, declared_length: u32) -> Result<JsValue> {
        let slot = self.reserve_slot();
        let mut sparse: Vec<(u32, JsValue)> = Vec::new();
        loop {
            let key = match self.read_item(&[tags::INT32, tags::END_OF_KEYS])? {
                Item::EndOfKeys => break,
                Item::Value(JsValue::Int(index)) => index,
                Item::Value(_) => unreachable!("tag restricted to INT32"),
            };
            let index = u32::try_from(key).map_err(|_| {
                FoxtrailError::InvalidFormat(format!("negative array index: {key}"))
            })?;
            if index >= declared_length {
                return Err(FoxtrailError::InvalidFormat(format!(
                    "array index {index} exceeds declared length {declared_length}"
                )));
            }
            let value = self.read_item(&[])?.into_value()?;
            sparse.push((index, value));
        }

        let mut dense = vec![JsValue::Undefined; declared_length as usize];
        for (index, value) in sparse {
            dense[index as usize] = value;
        }
        let value = JsValue::Array(dense);
        self.objects[slot] = value.clone();
        Ok(value)
    }

    fn read_object(&mut self) -> Result<JsValue> {
        let slot = self.reserve_slot();
        let mut entries = Vec::new();
        loop {
            let key = match self.read_item(&[
                tags::STRING,
                tags::STRING_OBJECT,
                tags::END_OF_KEYS,
            ])? {
                Item::EndOfKeys => break,
                Item::Value(JsValue::String(key)) => key,
                Item::Value(_) => unreachable!("tag restricted to strings"),
            };
            let value = self.read_item(&[])?.into_value()?;
            entries.push((key, value));
        }
        let value = JsValue::Object(entries);
        self.objects[slot] = value.clone();
        Ok(value)
    }

    fn read_map(&mut self) -> Result<JsValue> {
        let slot = self.reserve_slot();
        let mut entries = Vec::new();
        loop {
            let key = match self.read_item(&[])? {
                Item::EndOfKeys => break,
                Item::Value(key) => key,
            };
            let value = self.read_item(&[])?.into_value()?;
            entries.push((key, value));
        }
        let value = JsValue::Map(entries);
        self.objects[slot] = value.clone();
        Ok(value)
    }

    fn read_set(&mut self) -> Result<JsValue> {
        let slot = self.reserve_slot();
        let mut entries = Vec::new();
        loop {
            match self.read_item(&[])? {
                Item::EndOfKeys => break,
                Item::Value(value) => entries.push(value),
            }
        }
        let value = JsValue::Set(entries);
        self.objects[slot] = value.clone();
        Ok(value)
    }

    // ── Typed Arrays ───────────────────────────────────────────────

    fn read_typed_array(&mut self, tag: u32, data: u32) -> Result<JsValue> {
        // placeholder-then-replace: the slot must exist before the backing
        // buffer is decoded
        let slot = self.reserve_slot();

        let (scalar_raw, element_count) = if tag == tags::TYPED_ARRAY_OBJECT {
            (u64::from(data), self.reader.read_u64(Endian::Little)?)
        } else {
            let count = u64::from(data);
            (self.reader.read_u64(Endian::Little)?, count)
        };
        let scalar = ScalarType::from_u64(scalar_raw).ok_or_else(|| {
            FoxtrailError::InvalidFormat(format!("unknown scalar type: {scalar_raw}"))
        })?;

        let backing = self
            .read_item(&[
                tags::BACK_REFERENCE_OBJECT,
                tags::ARRAY_BUFFER_OBJECT,
                tags::ARRAY_BUFFER_OBJECT_V2,
            ])?
            .into_value()?;
        let buffer = match backing {
            JsValue::ArrayBuffer(bytes) => bytes,
            JsValue::BackRef(index) => match &self.objects[index as usize] {
                JsValue::ArrayBuffer(bytes) => bytes.clone(),
                _ => return Err(FoxtrailError::TypedArrayBackingMismatch),
            },
            _ => return Err(FoxtrailError::TypedArrayBackingMismatch),
        };

        let start_offset = if tag == tags::TYPED_ARRAY_OBJECT {
            // the backing payload may end off-alignment; the stream is a
            // sequence of 64-bit words, so realign before the next one
            self.align()?;
            self.reader.read_u64(Endian::Little)? as usize
        } else {
            0
        };
        if start_offset > buffer.len() {
            return Err(FoxtrailError::InvalidFormat(format!(
                "typed array start offset {start_offset} exceeds buffer length {}",
                buffer.len()
            )));
        }

        let value = JsValue::TypedArray(materialize(scalar, element_count, &buffer[start_offset..])?);
        self.objects[slot] = value.clone();
        Ok(value)
    }

    // ── DOM Types ──────────────────────────────────────────────────

    fn read_file(&mut self, tag: u32, index: u32) -> Result<JsValue> {
        let size = self.reader.read_u64(Endian::Little)?;
        self.align()?;
        let mime_type = self.read_aligned_utf8()?;
        let last_modified = if tag == tags::DOM_FILE {
            let millis = self.reader.read_f64(Endian::Little)?;
            Some(timestamps::from_js_millis(millis)?)
        } else {
            None
        };
        let name = self.read_aligned_utf8()?;
        Ok(JsValue::File(FileDescriptor { index, size, mime_type, name, last_modified }))
    }

    fn read_crypto_key(&mut self) -> Result<CryptoKey> {
        let version = self.reader.read_u32(Endian::Little)?;
        if version != 1 {
            return Err(FoxtrailError::BadVersion { expected: 1, got: version });
        }
        let attributes = self.reader.read_u32(Endian::Little)?;

        let symmetric_key = self.read_key_material()?;
        let private_key = self.read_key_material()?;
        let public_key = self.read_key_material()?;

        let algorithm_name = self.read_aligned_utf16()?;

        let proxy_version = self.reader.read_u32(Endian::Little)?;
        if proxy_version != 1 {
            return Err(FoxtrailError::BadVersion { expected: 1, got: proxy_version });
        }
        let algorithm_raw = self.reader.read_u32(Endian::Little)?;
        let algorithm = match algorithm_raw {
            0 => KeyAlgorithm::Aes { length: self.reader.read_u32(Endian::Little)? },
            1 => KeyAlgorithm::Kdf,
            2 => KeyAlgorithm::Hmac {
                length: self.reader.read_u32(Endian::Little)?,
                hash: self.read_aligned_utf16()?,
            },
            3 => {
                let modulus_length = self.reader.read_u32(Endian::Little)?;
                self.align()?;
                KeyAlgorithm::Rsa {
                    modulus_length,
                    public_exponent: self.read_key_material()?,
                    hash: self.read_aligned_utf16()?,
                }
            }
            4 => KeyAlgorithm::Ec { named_curve: self.read_aligned_utf16()? },
            5 => KeyAlgorithm::Ed,
            other => {
                return Err(FoxtrailError::InvalidFormat(format!(
                    "unknown crypto key algorithm: {other}"
                )))
            }
        };

        Ok(CryptoKey {
            attributes,
            symmetric_key,
            private_key,
            public_key,
            algorithm_name,
            algorithm,
        })
    }

    /// One key-material group: `(unused: u32, length: u32)` then the bytes,
    /// re-aligned afterwards.
    fn read_key_material(&mut self) -> Result<Vec<u8>> {
        let _unused = self.reader.read_u32(Endian::Little)?;
        let length = self.reader.read_u32(Endian::Little)?;
        let bytes = self.reader.read_raw(length as usize)?;
        self.align()?;
        Ok(bytes)
    }

    // ── Strings ────────────────────────────────────────────────────

    /// Read a whole string pair (used where a string must follow, e.g.
    /// regexp patterns).
    fn read_string(&mut self) -> Result<String> {
        match self.read_item(&[tags::STRING, tags::STRING_OBJECT])? {
            Item::Value(JsValue::String(s)) => Ok(s),
            _ => unreachable!("tag restricted to strings"),
        }
    }

    /// Decode a string payload given its pair's data word: the high bit
    /// selects Latin-1, the rest is the length in code points.
    fn read_string_payload(&mut self, data: u32) -> Result<String> {
        let length = (data & 0x7fff_ffff) as usize;
        if data & 0x8000_0000 == 0 {
            let raw = self.reader.read_raw(length * 2)?;
            decode_utf16_le(&raw)
        } else {
            let raw = self.reader.read_raw(length)?;
            Ok(raw.iter().map(|&b| b as char).collect())
        }
    }

    /// Length-prefixed aligned UTF-8 string used inside DOM types.
    fn read_aligned_utf8(&mut self) -> Result<String> {
        let length = self.reader.read_u32(Endian::Little)? as usize;
        self.align()?;
        let raw = self.reader.read_raw(length)?;
        self.align()?;
        String::from_utf8(raw)
            .map_err(|e| FoxtrailError::InvalidFormat(format!("invalid UTF-8 string: {e}")))
    }

    /// Length-prefixed aligned UTF-16-LE string (length in code points).
    fn read_aligned_utf16(&mut self) -> Result<String> {
        let length = self.reader.read_u32(Endian::Little)? as usize;
        self.align()?;
        let raw = self.reader.read_raw(length * 2)?;
        self.align()?;
        decode_utf16_le(&raw)
    }

    // ── Primitives ─────────────────────────────────────────────────

    fn read_bigint(&mut self, data: u32) -> Result<BigInt> {
        // length is a count of 64-bit limbs; sign rides the top bit
        let length = 8 * (data & 0x7fff_ffff) as usize;
        let negative = data & 0x8000_0000 != 0;
        let raw = self.reader.read_raw(length)?;
        let sign = if negative { Sign::Minus } else { Sign::Plus };
        Ok(BigInt::from_bytes_le(sign, &raw))
    }

    /// Reserve a flattened-object slot before decoding a composite's
    /// children, so nested back-references index correctly.
    fn reserve_slot(&mut self) -> usize {
        self.objects.push(JsValue::Undefined);
        self.objects.len() - 1
    }

    fn align(&mut self) -> Result<()> {
        let position = self.reader.tell()?;
        let remainder = position % 8;
        if remainder != 0 {
            self.reader.seek(SeekFrom::Current((8 - remainder) as i64))?;
        }
        Ok(())
    }
}

/// Read one raw `(data, tag)` pair.
fn read_pair<R: Read + Seek>(reader: &mut BinaryReader<R>) -> Result<(u32, u32)> {
    let data = reader.read_u32(Endian::Little)?;
    let tag = reader.read_u32(Endian::Little)?;
    Ok((data, tag))
}

fn decode_utf16_le(raw: &[u8]) -> Result<String> {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|e| FoxtrailError::InvalidFormat(format!("invalid UTF-16 string: {e}")))
}

/// Reinterpret `element_count` scalars from the backing bytes.
fn materialize(scalar: ScalarType, element_count: u64, bytes: &[u8]) -> Result<TypedArray> {
    let width = scalar.element_size().ok_or_else(|| {
        FoxtrailError::InvalidFormat(format!("scalar type {scalar:?} cannot be materialized"))
    })?;
    let count = element_count as usize;
    let needed = count
        .checked_mul(width)
        .ok_or_else(|| FoxtrailError::InvalidFormat("typed array length overflow".to_string()))?;
    if bytes.len() < needed {
        return Err(FoxtrailError::InvalidFormat(format!(
            "typed array needs {needed} bytes, backing buffer has {}",
            bytes.len()
        )));
    }
    let bytes = &bytes[..needed];

    macro_rules! scalars {
        ($ty:ty, $variant:ident) => {
            TypedArray::$variant(
                bytes
                    .chunks_exact(width)
                    .map(|c| <$ty>::from_le_bytes(c.try_into().expect("chunk width")))
                    .collect(),
            )
        };
    }

    Ok(match scalar {
        ScalarType::Int8 => TypedArray::Int8(bytes.iter().map(|&b| b as i8).collect()),
        ScalarType::Uint8 => TypedArray::Uint8(bytes.to_vec()),
        ScalarType::Uint8Clamped => TypedArray::Uint8Clamped(bytes.to_vec()),
        ScalarType::Int16 => scalars!(i16, Int16),
        ScalarType::Uint16 => scalars!(u16, Uint16),
        ScalarType::Int32 => scalars!(i32, Int32),
        ScalarType::Uint32 => scalars!(u32, Uint32),
        ScalarType::Float32 => scalars!(f32, Float32),
        ScalarType::Float64 => scalars!(f64, Float64),
        ScalarType::BigInt64 => scalars!(i64, BigInt64),
        ScalarType::BigUint64 => scalars!(u64, BigUint64),
        ScalarType::MaxTypedArrayViewType | ScalarType::Int64 | ScalarType::Simd128 => {
            unreachable!("filtered by element_size")
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    // ── Stream Builder ─────────────────────────────────────────────

    /// Builds aligned clone streams the way the writer lays them out.
    struct StreamBuilder {
        bytes: Vec<u8>,
    }

    impl StreamBuilder {
        fn new() -> Self {
            // header pair, scope 1 (same-process scope value is opaque here)
            let mut b = Self { bytes: Vec::new() };
            b.pair(1, tags::HEADER);
            b
        }

        fn pair(&mut self, data: u32, tag: u32) -> &mut Self {
            self.align();
            self.bytes.extend_from_slice(&data.to_le_bytes());
            self.bytes.extend_from_slice(&tag.to_le_bytes());
            self
        }

        fn raw(&mut self, bytes: &[u8]) -> &mut Self {
            self.bytes.extend_from_slice(bytes);
            self
        }

        fn u32(&mut self, v: u32) -> &mut Self {
            self.raw(&v.to_le_bytes())
        }

        fn u64(&mut self, v: u64) -> &mut Self {
            self.raw(&v.to_le_bytes())
        }

        fn f64(&mut self, v: f64) -> &mut Self {
            self.raw(&v.to_le_bytes())
        }

        fn align(&mut self) -> &mut Self {
            while self.bytes.len() % 8 != 0 {
                self.bytes.push(0);
            }
            self
        }

        fn utf16_string_pair(&mut self, s: &str) -> &mut Self {
            let units: Vec<u16> = s.encode_utf16().collect();
            self.pair(units.len() as u32, tags::STRING);
            for u in &units {
                self.bytes.extend_from_slice(&u.to_le_bytes());
            }
            self
        }

        /// Length-prefixed aligned UTF-8 string used inside DOM types.
        fn aligned_utf8(&mut self, s: &str) -> &mut Self {
            self.u32(s.len() as u32);
            self.align();
            self.raw(s.as_bytes());
            self.align()
        }

        fn aligned_utf16(&mut self, s: &str) -> &mut Self {
            let units: Vec<u16> = s.encode_utf16().collect();
            self.u32(units.len() as u32);
            self.align();
            for u in &units {
                self.bytes.extend_from_slice(&u.to_le_bytes());
            }
            self.align()
        }

        fn end_of_keys(&mut self) -> &mut Self {
            self.pair(0, tags::END_OF_KEYS)
        }

        fn build(&self) -> Vec<u8> {
            self.bytes.clone()
        }
    }

    fn decode_bytes(bytes: Vec<u8>) -> Result<CloneDocument> {
        decode(Cursor::new(bytes))
    }

    fn root_of(bytes: Vec<u8>) -> JsValue {
        decode_bytes(bytes).unwrap().root
    }

    // ── Primitives ─────────────────────────────────────────────────

    #[test]
    fn null_root() {
        let mut b = StreamBuilder::new();
        b.pair(0, tags::NULL);
        assert_eq!(root_of(b.build()), JsValue::Null);
    }

    #[test]
    fn undefined_only_document() {
        let mut b = StreamBuilder::new();
        b.pair(0, tags::UNDEFINED);
        assert_eq!(root_of(b.build()), JsValue::Undefined);
    }

    #[test]
    fn int32_root() {
        let mut b = StreamBuilder::new();
        b.pair(42, tags::INT32);
        assert_eq!(root_of(b.build()), JsValue::Int(42));
    }

    #[test]
    fn int32_negative_twos_complement() {
        let mut b = StreamBuilder::new();
        b.pair(0xffff_ffff, tags::INT32);
        assert_eq!(root_of(b.build()), JsValue::Int(-1));
    }

    #[test]
    fn raw_double_pair() {
        let bits = 3.14f64.to_bits();
        let mut b = StreamBuilder::new();
        b.pair(bits as u32, (bits >> 32) as u32);
        assert_eq!(root_of(b.build()), JsValue::Double(3.14));
    }

    #[test]
    fn boolean_and_boxed_boolean() {
        let mut b = StreamBuilder::new();
        b.pair(1, tags::BOOLEAN);
        assert_eq!(root_of(b.build()), JsValue::Bool(true));

        let mut b = StreamBuilder::new();
        b.pair(0, tags::BOOLEAN_OBJECT);
        let doc = decode_bytes(b.build()).unwrap();
        assert_eq!(doc.root, JsValue::Bool(false));
        assert_eq!(doc.objects, vec![JsValue::Bool(false)]);
    }

    #[test]
    fn utf16_string() {
        let mut b = StreamBuilder::new();
        b.utf16_string_pair("hello");
        assert_eq!(root_of(b.build()), JsValue::String("hello".to_string()));
    }

    #[test]
    fn latin1_string() {
        let mut b = StreamBuilder::new();
        b.pair(0x8000_0000 | 3, tags::STRING);
        b.raw(&[0x61, 0x62, 0xe9]); // "abé" in latin-1
        assert_eq!(root_of(b.build()), JsValue::String("ab\u{e9}".to_string()));
    }

    #[test]
    fn date_object() {
        let mut b = StreamBuilder::new();
        b.pair(0, tags::DATE_OBJECT);
        b.f64(86_400_000.0);
        match root_of(b.build()) {
            JsValue::Date(dt) => assert_eq!(dt.timestamp(), 86_400),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn regexp_keeps_pattern() {
        let mut b = StreamBuilder::new();
        b.pair(0, tags::REGEXP_OBJECT);
        b.utf16_string_pair("^a+$");
        assert_eq!(root_of(b.build()), JsValue::RegExp("^a+$".to_string()));
    }

    #[test]
    fn bigint_positive_and_negative() {
        let mut b = StreamBuilder::new();
        b.pair(1, tags::BIGINT);
        b.u64(123_456_789);
        assert_eq!(
            root_of(b.build()),
            JsValue::BigInt(BigInt::from(123_456_789u64))
        );

        let mut b = StreamBuilder::new();
        b.pair(0x8000_0001, tags::BIGINT);
        b.u64(5);
        assert_eq!(root_of(b.build()), JsValue::BigInt(BigInt::from(-5)));
    }

    #[test]
    fn bigint_multi_limb() {
        let mut b = StreamBuilder::new();
        b.pair(2, tags::BIGINT);
        b.u64(0);
        b.u64(1); // value = 1 << 64
        assert_eq!(
            root_of(b.build()),
            JsValue::BigInt(BigInt::from(1u128 << 64))
        );
    }

    // ── Collections ────────────────────────────────────────────────

    #[test]
    fn sparse_array_densified_with_undefined() {
        let mut b = StreamBuilder::new();
        b.pair(3, tags::ARRAY_OBJECT);
        b.pair(0, tags::INT32); // key 0
        b.pair(10, tags::INT32); // value 10
        b.pair(2, tags::INT32); // key 2
        b.pair(30, tags::INT32); // value 30
        b.end_of_keys();

        assert_eq!(
            root_of(b.build()),
            JsValue::Array(vec![
                JsValue::Int(10),
                JsValue::Undefined,
                JsValue::Int(30),
            ])
        );
    }

    #[test]
    fn array_index_beyond_declared_length_fails() {
        let mut b = StreamBuilder::new();
        b.pair(1, tags::ARRAY_OBJECT);
        b.pair(5, tags::INT32); // key 5 in a length-1 array
        b.pair(0, tags::INT32);
        b.end_of_keys();
        assert!(decode_bytes(b.build()).is_err());
    }

    #[test]
    fn object_preserves_insertion_order() {
        let mut b = StreamBuilder::new();
        b.pair(0, tags::OBJECT_OBJECT);
        b.utf16_string_pair("zeta");
        b.pair(1, tags::INT32);
        b.utf16_string_pair("alpha");
        b.pair(2, tags::INT32);
        b.end_of_keys();

        assert_eq!(
            root_of(b.build()),
            JsValue::Object(vec![
                ("zeta".to_string(), JsValue::Int(1)),
                ("alpha".to_string(), JsValue::Int(2)),
            ])
        );
    }

    #[test]
    fn map_with_arbitrary_keys() {
        let mut b = StreamBuilder::new();
        b.pair(0, tags::MAP_OBJECT);
        b.pair(7, tags::INT32); // key
        b.utf16_string_pair("seven"); // value
        b.end_of_keys();

        assert_eq!(
            root_of(b.build()),
            JsValue::Map(vec![(
                JsValue::Int(7),
                JsValue::String("seven".to_string())
            )])
        );
    }

    #[test]
    fn set_of_values() {
        let mut b = StreamBuilder::new();
        b.pair(0, tags::SET_OBJECT);
        b.pair(1, tags::INT32);
        b.pair(2, tags::INT32);
        b.end_of_keys();

        assert_eq!(
            root_of(b.build()),
            JsValue::Set(vec![JsValue::Int(1), JsValue::Int(2)])
        );
    }

    // ── Back-References ────────────────────────────────────────────

    #[test]
    fn backref_to_earlier_buffer() {
        // array [buffer, backref(buffer)]: array is slot 0, buffer slot 1
        let mut b = StreamBuilder::new();
        b.pair(2, tags::ARRAY_OBJECT);
        b.pair(0, tags::INT32);
        b.pair(0, tags::ARRAY_BUFFER_OBJECT_V2); // empty buffer
        b.pair(1, tags::INT32);
        b.pair(1, tags::BACK_REFERENCE_OBJECT);
        b.end_of_keys();

        let doc = decode_bytes(b.build()).unwrap();
        assert_eq!(
            doc.root,
            JsValue::Array(vec![JsValue::ArrayBuffer(vec![]), JsValue::BackRef(1)])
        );
        assert_eq!(doc.resolve(&JsValue::BackRef(1)), &JsValue::ArrayBuffer(vec![]));
        // slot 0 holds the finished array itself
        assert_eq!(doc.objects[0], doc.root);
    }

    #[test]
    fn backref_out_of_range_fails() {
        let mut b = StreamBuilder::new();
        b.pair(3, tags::BACK_REFERENCE_OBJECT);
        assert!(matches!(
            decode_bytes(b.build()),
            Err(FoxtrailError::InvalidBackref(3))
        ));
    }

    #[test]
    fn backref_inside_composite_sees_reserved_slot() {
        // object {"self": backref(0)} - slot 0 is the object itself
        let mut b = StreamBuilder::new();
        b.pair(0, tags::OBJECT_OBJECT);
        b.utf16_string_pair("self");
        b.pair(0, tags::BACK_REFERENCE_OBJECT);
        b.end_of_keys();

        let doc = decode_bytes(b.build()).unwrap();
        assert_eq!(
            doc.root,
            JsValue::Object(vec![("self".to_string(), JsValue::BackRef(0))])
        );
        assert_eq!(doc.objects[0], doc.root);
    }

    // ── Array Buffers & Typed Arrays ───────────────────────────────

    #[test]
    fn array_buffer_v1_and_v2() {
        let mut b = StreamBuilder::new();
        b.pair(0, tags::ARRAY_BUFFER_OBJECT);
        b.u64(3);
        b.raw(&[1, 2, 3]);
        assert_eq!(root_of(b.build()), JsValue::ArrayBuffer(vec![1, 2, 3]));

        let mut b = StreamBuilder::new();
        b.pair(3, tags::ARRAY_BUFFER_OBJECT_V2);
        b.raw(&[4, 5, 6]);
        assert_eq!(root_of(b.build()), JsValue::ArrayBuffer(vec![4, 5, 6]));
    }

    fn float32_payload() -> Vec<u8> {
        let mut bytes = Vec::new();
        for v in [1.0f32, 2.5, -3.25] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn typed_array_current_form() {
        let payload = float32_payload();
        let mut b = StreamBuilder::new();
        b.pair(6, tags::TYPED_ARRAY_OBJECT); // scalar code 6 = Float32
        b.u64(3); // element count
        b.pair(payload.len() as u32, tags::ARRAY_BUFFER_OBJECT_V2);
        b.raw(&payload);
        b.align();
        b.u64(0); // start offset

        assert_eq!(
            root_of(b.build()),
            JsValue::TypedArray(TypedArray::Float32(vec![1.0, 2.5, -3.25]))
        );
    }

    #[test]
    fn typed_array_v2_form_matches_v1_for_same_payload() {
        let payload = float32_payload();
        let mut b = StreamBuilder::new();
        b.pair(3, tags::TYPED_ARRAY_OBJECT_V2); // element count in the pair
        b.u64(6); // scalar code follows
        b.pair(payload.len() as u32, tags::ARRAY_BUFFER_OBJECT_V2);
        b.raw(&payload);

        assert_eq!(
            root_of(b.build()),
            JsValue::TypedArray(TypedArray::Float32(vec![1.0, 2.5, -3.25]))
        );
    }

    #[test]
    fn typed_array_with_start_offset() {
        let mut payload = vec![0xaa; 8]; // skipped prefix
        payload.extend_from_slice(&7u32.to_le_bytes());
        let mut b = StreamBuilder::new();
        b.pair(5, tags::TYPED_ARRAY_OBJECT); // Uint32
        b.u64(1);
        b.pair(payload.len() as u32, tags::ARRAY_BUFFER_OBJECT_V2);
        b.raw(&payload);
        b.align();
        b.u64(8);

        assert_eq!(
            root_of(b.build()),
            JsValue::TypedArray(TypedArray::Uint32(vec![7]))
        );
    }

    #[test]
    fn typed_array_backed_by_backref() {
        // [buffer, uint8 view over backref(buffer)]
        let mut b = StreamBuilder::new();
        b.pair(2, tags::ARRAY_OBJECT);
        b.pair(0, tags::INT32);
        b.pair(4, tags::ARRAY_BUFFER_OBJECT_V2);
        b.raw(&[9, 8, 7, 6]);
        b.pair(1, tags::INT32);
        b.pair(1, tags::TYPED_ARRAY_OBJECT); // Uint8
        b.u64(4);
        b.pair(1, tags::BACK_REFERENCE_OBJECT); // the buffer is slot 1
        b.u64(0);
        b.end_of_keys();

        match root_of(b.build()) {
            JsValue::Array(items) => {
                assert_eq!(
                    items[1],
                    JsValue::TypedArray(TypedArray::Uint8(vec![9, 8, 7, 6]))
                );
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn typed_array_backed_by_non_buffer_fails() {
        let mut b = StreamBuilder::new();
        b.pair(2, tags::ARRAY_OBJECT);
        b.pair(0, tags::INT32);
        b.pair(0, tags::DATE_OBJECT); // slot 1: a date, not a buffer
        b.f64(0.0);
        b.pair(1, tags::INT32);
        b.pair(1, tags::TYPED_ARRAY_OBJECT);
        b.u64(1);
        b.pair(1, tags::BACK_REFERENCE_OBJECT);
        b.u64(0);
        b.end_of_keys();

        assert!(matches!(
            decode_bytes(b.build()),
            Err(FoxtrailError::TypedArrayBackingMismatch)
        ));
    }

    #[test]
    fn typed_array_truncated_backing_fails() {
        let mut b = StreamBuilder::new();
        b.pair(7, tags::TYPED_ARRAY_OBJECT); // Float64
        b.u64(2); // needs 16 bytes
        b.pair(8, tags::ARRAY_BUFFER_OBJECT_V2);
        b.raw(&[0; 8]);
        b.u64(0);
        assert!(decode_bytes(b.build()).is_err());
    }

    // ── DOM Types ──────────────────────────────────────────────────

    #[test]
    fn blob_descriptor() {
        let mut b = StreamBuilder::new();
        b.pair(0, tags::DOM_BLOB); // external index 0
        b.u64(1234); // size
        b.aligned_utf8("image/png");

        assert_eq!(
            root_of(b.build()),
            JsValue::Blob(BlobDescriptor {
                index: 0,
                size: 1234,
                mime_type: "image/png".to_string(),
            })
        );
    }

    #[test]
    fn file_with_last_modified() {
        let mut b = StreamBuilder::new();
        b.pair(1, tags::DOM_FILE);
        b.u64(42);
        b.aligned_utf8("text/plain");
        b.f64(86_400_000.0);
        b.aligned_utf8("notes.txt");

        match root_of(b.build()) {
            JsValue::File(file) => {
                assert_eq!(file.index, 1);
                assert_eq!(file.size, 42);
                assert_eq!(file.mime_type, "text/plain");
                assert_eq!(file.name, "notes.txt");
                assert_eq!(file.last_modified.unwrap().timestamp(), 86_400);
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn file_without_last_modified() {
        let mut b = StreamBuilder::new();
        b.pair(0, tags::DOM_FILE_WITHOUT_LASTMODIFIEDDATE);
        b.u64(10);
        b.aligned_utf8("application/octet-stream");
        b.aligned_utf8("legacy.bin");

        match root_of(b.build()) {
            JsValue::File(file) => {
                assert_eq!(file.name, "legacy.bin");
                assert_eq!(file.last_modified, None);
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn aes_crypto_key() {
        let mut b = StreamBuilder::new();
        b.pair(0, tags::DOM_CRYPTOKEY);
        b.u32(1); // version
        b.u32(0b100); // attribute flags
        // symmetric / private / public key material groups
        b.u32(0).u32(16).raw(&[0x11; 16]).align();
        b.u32(0).u32(0).align();
        b.u32(0).u32(0).align();
        b.aligned_utf16("AES-GCM");
        b.u32(1); // proxy version
        b.u32(0); // algorithm: AES
        b.u32(128); // key length

        match root_of(b.build()) {
            JsValue::CryptoKey(key) => {
                assert_eq!(key.attributes, 0b100);
                assert_eq!(key.symmetric_key, vec![0x11; 16]);
                assert!(key.private_key.is_empty());
                assert_eq!(key.algorithm_name, "AES-GCM");
                assert_eq!(key.algorithm, KeyAlgorithm::Aes { length: 128 });
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn hmac_crypto_key() {
        let mut b = StreamBuilder::new();
        b.pair(0, tags::DOM_CRYPTOKEY);
        b.u32(1);
        b.u32(0);
        b.u32(0).u32(4).raw(&[1, 2, 3, 4]).align();
        b.u32(0).u32(0).align();
        b.u32(0).u32(0).align();
        b.aligned_utf16("HMAC");
        b.u32(1);
        b.u32(2); // HMAC
        b.u32(256);
        b.aligned_utf16("SHA-256");

        match root_of(b.build()) {
            JsValue::CryptoKey(key) => {
                assert_eq!(
                    key.algorithm,
                    KeyAlgorithm::Hmac { length: 256, hash: "SHA-256".to_string() }
                );
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }

    // ── Errors & Laws ──────────────────────────────────────────────

    #[test]
    fn missing_header_fails() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&tags::NULL.to_le_bytes());
        assert!(matches!(
            decode_bytes(bytes),
            Err(FoxtrailError::BadMagic(_))
        ));
    }

    #[test]
    fn unhandled_dom_tag_fails() {
        let mut b = StreamBuilder::new();
        b.pair(0, tags::DOM_FILELIST);
        assert!(matches!(
            decode_bytes(b.build()),
            Err(FoxtrailError::UnsupportedTag(t)) if t == tags::DOM_FILELIST
        ));
    }

    #[test]
    fn truncated_stream_fails_with_short_read() {
        let mut b = StreamBuilder::new();
        b.pair(5, tags::STRING); // claims 5 code points, no payload
        assert!(matches!(
            decode_bytes(b.build()),
            Err(FoxtrailError::ShortRead { .. })
        ));
    }

    #[test]
    fn scope_is_exposed() {
        let mut b = StreamBuilder::new();
        b.pair(0, tags::NULL);
        assert_eq!(decode_bytes(b.build()).unwrap().scope, 1);
    }

    #[test]
    fn decoding_is_deterministic() {
        let mut b = StreamBuilder::new();
        b.pair(0, tags::OBJECT_OBJECT);
        b.utf16_string_pair("k");
        b.pair(2, tags::ARRAY_OBJECT);
        b.pair(0, tags::INT32);
        b.utf16_string_pair("v");
        b.end_of_keys();
        b.end_of_keys();
        let bytes = b.build();

        let first = decode_bytes(bytes.clone()).unwrap();
        let second = decode_bytes(bytes).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn every_backref_resolves_to_an_earlier_object() {
        let mut b = StreamBuilder::new();
        b.pair(2, tags::ARRAY_OBJECT);
        b.pair(0, tags::INT32);
        b.utf16_string_pair("x"); // plain strings carry no identity
        b.pair(1, tags::INT32);
        b.pair(0, tags::BACK_REFERENCE_OBJECT); // the array itself
        b.end_of_keys();

        let doc = decode_bytes(b.build()).unwrap();
        fn walk(value: &JsValue, table_len: usize) {
            match value {
                JsValue::BackRef(i) => assert!((*i as usize) < table_len),
                JsValue::Array(items) | JsValue::Set(items) => {
                    items.iter().for_each(|v| walk(v, table_len))
                }
                JsValue::Object(entries) => {
                    entries.iter().for_each(|(_, v)| walk(v, table_len))
                }
                JsValue::Map(entries) => entries.iter().for_each(|(k, v)| {
                    walk(k, table_len);
                    walk(v, table_len);
                }),
                _ => {}
            }
        }
        walk(&doc.root, doc.objects.len());
    }
}
