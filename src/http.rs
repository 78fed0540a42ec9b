//! HTTP response-head parsing for cache entry header overlays.
//!
//! Cache entries persist the raw response head (status line plus folded
//! header block) as a metadata element. This module splits it into the
//! version, the status text and a case-insensitive field map.

/// A parsed HTTP response head.
///
/// Field names are folded to lowercase; lookups are last-write-wins so a
/// duplicated field behaves the way a dict built from the fields would.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponseHead {
    pub version: String,
    /// Numeric code and reason phrase, e.g. `"200 OK"`.
    pub status: String,
    fields: Vec<(String, String)>,
}

impl HttpResponseHead {
    /// Parse a raw response head. Empty input yields an empty head.
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::default();
        }

        let mut lines = raw.lines();
        let mut version = String::new();
        let mut status = String::new();
        for line in lines.by_ref() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.split_once(char::is_whitespace) {
                Some((v, s)) => {
                    version = v.to_string();
                    status = s.trim_start().to_string();
                }
                None => version = line.to_string(),
            }
            break;
        }

        let mut fields: Vec<(String, String)> = Vec::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                // RFC 5322 folded continuation of the previous field
                if let Some((_, value)) = fields.last_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                fields.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
            }
        }

        Self { version, status, fields }
    }

    /// Get a field value by case-insensitive name (last occurrence wins).
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.fields
            .iter()
            .rev()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate the fields in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.version.is_empty() && self.status.is_empty() && self.fields.is_empty()
    }
}
