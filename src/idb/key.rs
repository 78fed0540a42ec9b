//! IndexedDB key decoding.
//!
//! Keys are stored in a tagged, self-terminating format designed so that a
//! plain byte-wise comparison of encoded keys matches the type-aware
//! ordering (float < date < string < binary < array). Floats flip their
//! sign bit, string code points carry per-width offsets, and trailing zero
//! bytes of floats are truncated.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{FoxtrailError, Result};
use crate::timestamps;

const TOKEN_TERMINATOR: u8 = 0x00;
const TOKEN_FLOAT: u8 = 0x10;
const TOKEN_DATE: u8 = 0x20;
const TOKEN_STRING: u8 = 0x30;
const TOKEN_BINARY: u8 = 0x40;
const TOKEN_ARRAY: u8 = 0x50;

// ── Key Values ─────────────────────────────────────────────────────

/// A decoded IndexedDB key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum IdbKey {
    Float(f64),
    Date(DateTime<Utc>),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<IdbKey>),
}

impl IdbKey {
    fn type_rank(&self) -> u8 {
        match self {
            IdbKey::Float(_) => 0,
            IdbKey::Date(_) => 1,
            IdbKey::String(_) => 2,
            IdbKey::Binary(_) => 3,
            IdbKey::Array(_) => 4,
        }
    }
}

/// Mozilla's type-aware key ordering: float < date < string < binary <
/// array, natural order within a type.
impl PartialOrd for IdbKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (IdbKey::Float(a), IdbKey::Float(b)) => Some(a.total_cmp(b)),
            (IdbKey::Date(a), IdbKey::Date(b)) => a.partial_cmp(b),
            (IdbKey::String(a), IdbKey::String(b)) => a.partial_cmp(b),
            (IdbKey::Binary(a), IdbKey::Binary(b)) => a.partial_cmp(b),
            (IdbKey::Array(a), IdbKey::Array(b)) => a.partial_cmp(b),
            _ => self.type_rank().partial_cmp(&other.type_rank()),
        }
    }
}

/// A decoded key together with its raw encoded bytes.
///
/// Equality and hashing are by the raw bytes, which also carry the sort
/// order Firefox used in the database.
#[derive(Debug, Clone, Serialize)]
pub struct IdbKeyValue {
    value: IdbKey,
    raw: Vec<u8>,
}

impl IdbKeyValue {
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let mut reader = KeyReader::new(raw);
        let value = match reader.read_one()? {
            Token::Value(v) => v,
            Token::End => {
                return Err(FoxtrailError::InvalidFormat("empty IndexedDB key".to_string()))
            }
            Token::Terminator => {
                return Err(FoxtrailError::InvalidFormat(
                    "IndexedDB key begins with a terminator".to_string(),
                ))
            }
        };
        Ok(Self { value, raw: raw.to_vec() })
    }

    pub fn value(&self) -> &IdbKey {
        &self.value
    }

    pub fn raw_key(&self) -> &[u8] {
        &self.raw
    }
}

impl PartialEq for IdbKeyValue {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for IdbKeyValue {}

impl Hash for IdbKeyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

// ── Decoder ────────────────────────────────────────────────────────

/// Control-flow outcomes of reading one token: a value, an explicit
/// terminator (closes the innermost array) or clean end of input.
enum Token {
    Value(IdbKey),
    Terminator,
    End,
}

struct KeyReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> KeyReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_one(&mut self) -> Result<Token> {
        let Some(&tag) = self.data.get(self.pos) else {
            return Ok(Token::End);
        };
        self.pos += 1;
        self.read_token(tag)
    }

    fn read_token(&mut self, tag: u8) -> Result<Token> {
        match tag {
            TOKEN_TERMINATOR => Ok(Token::Terminator),
            TOKEN_FLOAT => Ok(Token::Value(IdbKey::Float(self.read_float()))),
            TOKEN_DATE => {
                let millis = self.read_float();
                Ok(Token::Value(IdbKey::Date(timestamps::from_js_millis(millis)?)))
            }
            TOKEN_STRING => {
                let chars = self.read_encoded_run()?;
                let text = chars
                    .into_iter()
                    .map(|cp| {
                        char::from_u32(cp).ok_or_else(|| {
                            FoxtrailError::InvalidFormat(format!(
                                "invalid code point in key string: {cp:#x}"
                            ))
                        })
                    })
                    .collect::<Result<String>>()?;
                Ok(Token::Value(IdbKey::String(text)))
            }
            TOKEN_BINARY => {
                let values = self.read_encoded_run()?;
                let bytes = values
                    .into_iter()
                    .map(|v| {
                        u8::try_from(v).map_err(|_| {
                            FoxtrailError::InvalidFormat(format!(
                                "binary key value out of byte range: {v:#x}"
                            ))
                        })
                    })
                    .collect::<Result<Vec<u8>>>()?;
                Ok(Token::Value(IdbKey::Binary(bytes)))
            }
            tag if tag >= TOKEN_ARRAY => {
                let mut elements = Vec::new();
                // the array tag may carry its first element's tag inline
                let inline = tag - TOKEN_ARRAY;
                if inline > TOKEN_TERMINATOR {
                    match self.read_token(inline)? {
                        Token::Value(v) => elements.push(v),
                        Token::Terminator | Token::End => {
                            return Err(FoxtrailError::InvalidFormat(
                                "array key with malformed inline element".to_string(),
                            ))
                        }
                    }
                }
                loop {
                    match self.read_one()? {
                        Token::Value(v) => elements.push(v),
                        Token::Terminator | Token::End => {
                            return Ok(Token::Value(IdbKey::Array(elements)))
                        }
                    }
                }
            }
            other => Err(FoxtrailError::UnsupportedTag(u32::from(other))),
        }
    }

    /// Floats are stored for byte-wise sorting: positive numbers have the
    /// sign bit set and cleared on decode; other values decode verbatim
    /// and negate. Trailing zero bytes are truncated on disk.
    fn read_float(&mut self) -> f64 {
        let available = (self.data.len() - self.pos).min(8);
        let mut raw = [0u8; 8];
        raw[..available].copy_from_slice(&self.data[self.pos..self.pos + available]);
        self.pos += available;

        if raw[0] & 0x80 != 0 {
            raw[0] &= 0x7f;
            f64::from_be_bytes(raw)
        } else {
            -f64::from_be_bytes(raw)
        }
    }

    /// Decode the variable-width code point run up to the NUL terminator.
    fn read_encoded_run(&mut self) -> Result<Vec<u32>> {
        let run = self.take_until_nul();
        let mut values = Vec::new();
        let mut i = 0;
        while i < run.len() {
            let byte_1 = run[i];
            i += 1;
            if byte_1 & 0b1000_0000 == 0 {
                // 1-byte form, stored as value + 1
                values.push(u32::from(byte_1) - 1);
            } else if byte_1 & 0b1100_0000 == 0b1000_0000 {
                // 2-byte form: 10xxxxxx xxxxxxxx with 0x7f subtracted
                let byte_2 = *run.get(i).ok_or_else(truncated_char)?;
                i += 1;
                let value = ((u32::from(byte_1 & 0b0011_1111) << 8) | u32::from(byte_2)) - 0x7f;
                values.push(value);
            } else {
                // 3-byte form: 11xxxxxx xxxxxxxx xx000000
                let byte_2 = *run.get(i).ok_or_else(truncated_char)?;
                let byte_3 = *run.get(i + 1).ok_or_else(truncated_char)?;
                i += 2;
                let mut value = u32::from(byte_1 & 0b0011_1111) << 16;
                value |= u32::from(byte_2) << 8;
                value |= u32::from(byte_3 & 0b1100_0000);
                values.push(value >> 6);
            }
        }
        Ok(values)
    }

    fn take_until_nul(&mut self) -> &'a [u8] {
        let start = self.pos;
        while self.pos < self.data.len() && self.data[self.pos] != 0 {
            self.pos += 1;
        }
        let run = &self.data[start..self.pos];
        if self.pos < self.data.len() {
            self.pos += 1; // consume the terminator
        }
        run
    }
}

fn truncated_char() -> FoxtrailError {
    FoxtrailError::InvalidFormat("truncated multi-byte character in key string".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Encode an f64 so the decoder's sign-flip rule inverts it, without
    /// truncating trailing zeros.
    fn encode_float(value: f64) -> [u8; 8] {
        if value.is_sign_negative() {
            // sign bit left clear marks a negative number
            (-value).to_be_bytes()
        } else {
            let mut raw = value.to_be_bytes();
            raw[0] |= 0x80;
            raw
        }
    }

    fn decode(bytes: &[u8]) -> IdbKey {
        IdbKeyValue::from_bytes(bytes).unwrap().value().clone()
    }

    #[test]
    fn string_bytes_are_code_point_plus_one() {
        // 0x66-1='e', 0x6f-1='n', 0x6f-1='n'
        let key = decode(&[0x30, 0x66, 0x6f, 0x6f, 0x00]);
        assert_eq!(key, IdbKey::String("enn".to_string()));
    }

    #[test]
    fn string_without_terminator_runs_to_end() {
        let key = decode(&[0x30, 0x62, 0x63]);
        assert_eq!(key, IdbKey::String("ab".to_string()));
    }

    #[test]
    fn two_byte_string_form() {
        // code point 0x100: encoded = 0x100 + 0x7f = 0x17f -> 10000001 01111111
        let key = decode(&[0x30, 0x81, 0x7f, 0x00]);
        assert_eq!(key, IdbKey::String("\u{100}".to_string()));
    }

    #[test]
    fn three_byte_string_form() {
        // U+4E2D: 0x4e2d << 6 = 0x138b40 -> bytes d3 8b 40
        let key = decode(&[0x30, 0xd3, 0x8b, 0x40, 0x00]);
        assert_eq!(key, IdbKey::String("\u{4e2d}".to_string()));
    }

    #[test]
    fn positive_float() {
        let mut bytes = vec![0x10];
        bytes.extend_from_slice(&encode_float(1.5));
        assert_eq!(decode(&bytes), IdbKey::Float(1.5));
    }

    #[test]
    fn negative_float() {
        let mut bytes = vec![0x10];
        bytes.extend_from_slice(&encode_float(-2.25));
        assert_eq!(decode(&bytes), IdbKey::Float(-2.25));
    }

    #[test]
    fn truncated_float_pads_with_zeros() {
        // 1.0 encodes (with sign flip) to bf f0 00 ... 00 -> stored truncated
        let full = encode_float(1.0);
        let bytes = vec![0x10, full[0], full[1]];
        assert_eq!(decode(&bytes), IdbKey::Float(1.0));
    }

    #[test]
    fn zero_float_fully_truncated() {
        // +0.0 -> sign bit only, all trailing bytes truncated
        assert_eq!(decode(&[0x10, 0x80]), IdbKey::Float(0.0));
    }

    #[test]
    fn date_key() {
        let mut bytes = vec![0x20];
        bytes.extend_from_slice(&encode_float(86_400_000.0)); // 1970-01-02
        match decode(&bytes) {
            IdbKey::Date(dt) => assert_eq!(dt.timestamp(), 86_400),
            other => panic!("unexpected key: {other:?}"),
        }
    }

    #[test]
    fn binary_key() {
        // bytes stored value + 1 in the 1-byte form
        let key = decode(&[0x40, 0x01, 0x02, 0x10]);
        assert_eq!(key, IdbKey::Binary(vec![0x00, 0x01, 0x0f]));
    }

    #[test]
    fn array_with_inline_first_element() {
        // 0x50 (array) + 0x10 (float) = 0x60: first element tag is inline
        let mut bytes = vec![0x60];
        bytes.extend_from_slice(&encode_float(3.0));
        bytes.push(0x00); // terminator closes the array
        let key = decode(&bytes);
        assert_eq!(key, IdbKey::Array(vec![IdbKey::Float(3.0)]));
    }

    #[test]
    fn array_terminated_by_end_of_input() {
        let mut bytes = vec![0x60];
        bytes.extend_from_slice(&encode_float(1.0));
        bytes.push(0x10);
        bytes.extend_from_slice(&encode_float(2.0));
        let key = decode(&bytes);
        assert_eq!(
            key,
            IdbKey::Array(vec![IdbKey::Float(1.0), IdbKey::Float(2.0)])
        );
    }

    #[test]
    fn nested_arrays() {
        // outer array starts with an inline nested array (0x50 + 0x50 = 0xa0)
        let mut bytes = vec![0xa0];
        bytes.push(0x10);
        bytes.extend_from_slice(&encode_float(1.0));
        bytes.push(0x00); // closes inner
        bytes.push(0x10);
        bytes.extend_from_slice(&encode_float(2.0));
        // outer closed by end of input
        let key = decode(&bytes);
        assert_eq!(
            key,
            IdbKey::Array(vec![
                IdbKey::Array(vec![IdbKey::Float(1.0)]),
                IdbKey::Float(2.0),
            ])
        );
    }

    #[test]
    fn unknown_tag_fails() {
        assert!(matches!(
            IdbKeyValue::from_bytes(&[0x35, 0x00]),
            Err(FoxtrailError::UnsupportedTag(0x35))
        ));
    }

    #[test]
    fn equality_is_by_raw_bytes() {
        let a = IdbKeyValue::from_bytes(&[0x30, 0x62, 0x00]).unwrap();
        let b = IdbKeyValue::from_bytes(&[0x30, 0x62, 0x00]).unwrap();
        let c = IdbKeyValue::from_bytes(&[0x30, 0x63, 0x00]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn type_order_is_float_date_string_binary_array() {
        let float = IdbKey::Float(1e308);
        let date = IdbKey::Date(timestamps::from_js_millis(0.0).unwrap());
        let string = IdbKey::String(String::new());
        let binary = IdbKey::Binary(vec![]);
        let array = IdbKey::Array(vec![]);
        assert!(float < date);
        assert!(date < string);
        assert!(string < binary);
        assert!(binary < array);
    }

    proptest! {
        /// Byte-wise order of encoded non-negative floats matches numeric
        /// order (the invariant the sign-flip encoding exists to provide).
        #[test]
        fn float_encoding_preserves_order(a in 0f64..1e12, b in 0f64..1e12) {
            let (ea, eb) = (encode_float(a), encode_float(b));
            let (da, db) = (
                decode(&{ let mut v = vec![0x10]; v.extend_from_slice(&ea); v }),
                decode(&{ let mut v = vec![0x10]; v.extend_from_slice(&eb); v }),
            );
            prop_assert_eq!(
                ea.cmp(&eb),
                da.partial_cmp(&db).unwrap()
            );
        }

        /// Decoding is deterministic: the same bytes decode identically.
        #[test]
        fn decode_is_deterministic(value in 0f64..1e12) {
            let mut bytes = vec![0x10];
            bytes.extend_from_slice(&encode_float(value));
            prop_assert_eq!(decode(&bytes), decode(&bytes));
        }
    }
}
