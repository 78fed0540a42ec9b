//! Cache key parsing.
//!
//! A cache key is an ASCII string of comma-separated tags ending in the
//! resource URL: `O,<suffix>,a,:https://example.com/`. The `O` (origin
//! attribute suffix) and `~` (id enhancement) tags carry a value in which a
//! literal comma is escaped as `,,`; `a` and `p` are flags; `:` introduces
//! the URL, which runs to the end of the key.

use std::hash::{Hash, Hasher};

use serde::Serialize;

use crate::error::{FoxtrailError, Result};

/// A parsed cache entry key.
///
/// Equality and hashing consider only the raw key string, so keys that
/// differ in partitioning tags stay distinct even for the same URL.
#[derive(Debug, Clone, Serialize)]
pub struct CacheKey {
    raw: String,
    url: Option<String>,
    origin_suffix: Option<String>,
    id_enhance: Option<String>,
    is_anonymous: bool,
    sync_with_private_browsing: bool,
}

impl CacheKey {
    /// Parse a raw cache key string.
    pub fn parse(raw: &str) -> Result<Self> {
        if !raw.is_ascii() {
            return Err(FoxtrailError::MalformedKey(format!(
                "cache key is not ASCII: {raw:?}"
            )));
        }

        let bytes = raw.as_bytes();
        let mut url = None;
        let mut origin_suffix = None;
        let mut id_enhance = None;
        let mut is_anonymous = false;
        let mut sync_with_private_browsing = false;

        let mut i = 0;
        while i < bytes.len() {
            let tag = bytes[i];
            i += 1;
            match tag {
                b':' => {
                    // final tag, the URL is the remainder of the key
                    url = Some(raw[i..].to_string());
                    break;
                }
                b'O' | b'~' => {
                    i = expect_separator(bytes, i)?;
                    let (value, next) = read_value(bytes, i)?;
                    i = next;
                    if tag == b'O' {
                        origin_suffix = Some(value);
                    } else {
                        id_enhance = Some(value);
                    }
                }
                b'p' => {
                    sync_with_private_browsing = true;
                    i = expect_separator(bytes, i)?;
                }
                b'a' => {
                    is_anonymous = true;
                    i = expect_separator(bytes, i)?;
                }
                b'b' | b'i' => {
                    return Err(FoxtrailError::MalformedKey(format!(
                        "legacy tag '{}' in cache key",
                        tag as char
                    )));
                }
                other => {
                    return Err(FoxtrailError::MalformedKey(format!(
                        "unexpected tag {:?} in cache key",
                        other as char
                    )));
                }
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            url,
            origin_suffix,
            id_enhance,
            is_anonymous,
            sync_with_private_browsing,
        })
    }

    /// The raw key string. Parsing then rendering is the identity.
    pub fn raw_key(&self) -> &str {
        &self.raw
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn origin_suffix(&self) -> Option<&str> {
        self.origin_suffix.as_deref()
    }

    pub fn id_enhance(&self) -> Option<&str> {
        self.id_enhance.as_deref()
    }

    pub fn is_anonymous(&self) -> bool {
        self.is_anonymous
    }

    pub fn sync_with_private_browsing(&self) -> bool {
        self.sync_with_private_browsing
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

/// Consume the mandatory `,` between tags.
fn expect_separator(bytes: &[u8], i: usize) -> Result<usize> {
    if bytes.get(i) == Some(&b',') {
        Ok(i + 1)
    } else {
        Err(FoxtrailError::MalformedKey(
            "expected a comma after a tag in a cache key".to_string(),
        ))
    }
}

/// Read a tag value: runs until a comma not followed by another comma
/// (`,,` is an escaped literal comma) or the end of the key. The
/// terminating comma is consumed.
fn read_value(bytes: &[u8], mut i: usize) -> Result<(String, usize)> {
    let mut out = String::new();
    while i < bytes.len() {
        let c = bytes[i];
        i += 1;
        if c == b',' {
            if bytes.get(i) == Some(&b',') {
                out.push(',');
                i += 1;
            } else {
                return Ok((out, i));
            }
        } else {
            out.push(c as char);
        }
    }
    Err(FoxtrailError::MalformedKey(
        "unexpected end of key while reading a value".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    #[test]
    fn plain_url_key() {
        let key = CacheKey::parse(":https://x/").unwrap();
        assert_eq!(key.url(), Some("https://x/"));
        assert_eq!(key.origin_suffix(), None);
        assert_eq!(key.id_enhance(), None);
        assert!(!key.is_anonymous());
        assert!(!key.sync_with_private_browsing());
    }

    #[test]
    fn origin_suffix_tag() {
        let key = CacheKey::parse("O,^userContextId=1,:https://example.com/").unwrap();
        assert_eq!(key.url(), Some("https://example.com/"));
        assert_eq!(key.origin_suffix(), Some("^userContextId=1"));
        assert!(!key.is_anonymous());
    }

    #[test]
    fn escaped_comma_in_value() {
        let key = CacheKey::parse("O,foo,,bar,:https://x/").unwrap();
        assert_eq!(key.origin_suffix(), Some("foo,bar"));
        assert_eq!(key.url(), Some("https://x/"));
    }

    #[test]
    fn escaped_comma_at_end_of_key() {
        let key = CacheKey::parse("O,foo,,bar,").unwrap();
        assert_eq!(key.origin_suffix(), Some("foo,bar"));
        assert_eq!(key.url(), None);
    }

    #[test]
    fn flag_tags() {
        let key = CacheKey::parse("a,p,:https://x/").unwrap();
        assert!(key.is_anonymous());
        assert!(key.sync_with_private_browsing());
    }

    #[test]
    fn id_enhance_tag() {
        let key = CacheKey::parse("~,thumbnail,:https://x/img").unwrap();
        assert_eq!(key.id_enhance(), Some("thumbnail"));
        assert_eq!(key.url(), Some("https://x/img"));
    }

    #[test]
    fn legacy_tags_are_invalid() {
        assert!(matches!(
            CacheKey::parse("b,:https://x/"),
            Err(FoxtrailError::MalformedKey(_))
        ));
        assert!(matches!(
            CacheKey::parse("i,:https://x/"),
            Err(FoxtrailError::MalformedKey(_))
        ));
    }

    #[test]
    fn unknown_tag_is_invalid() {
        assert!(CacheKey::parse("Z,:https://x/").is_err());
    }

    #[test]
    fn flag_tag_without_separator_is_invalid() {
        assert!(CacheKey::parse("a").is_err());
    }

    #[test]
    fn unterminated_value_is_invalid() {
        assert!(CacheKey::parse("O,foo").is_err());
    }

    #[test]
    fn parse_then_render_is_identity() {
        for raw in [
            ":https://x/",
            "O,^userContextId=1,:https://example.com/",
            "O,foo,,bar,:https://x/",
            "a,p,~,enh,:https://x/",
        ] {
            assert_eq!(CacheKey::parse(raw).unwrap().raw_key(), raw);
        }
    }

    #[test]
    fn equality_and_hash_are_by_raw_key() {
        let a = CacheKey::parse("a,:https://x/").unwrap();
        let b = CacheKey::parse("a,:https://x/").unwrap();
        let c = CacheKey::parse("p,:https://x/").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);

        let hash = |k: &CacheKey| {
            let mut h = DefaultHasher::new();
            k.hash(&mut h);
            h.finish()
        };
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn url_with_colons_is_kept_whole() {
        let key = CacheKey::parse(":https://example.com:8443/path?q=1,2").unwrap();
        assert_eq!(key.url(), Some("https://example.com:8443/path?q=1,2"));
    }
}
