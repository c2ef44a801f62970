//! Header block parsing and the fixed display subset.

use std::collections::HashMap;

use mailparse::MailHeader;

use crate::render::error::{DecodeError, Result};

/// Headers shown above the body, in display order.
pub const DISPLAY_ORDER: [&str; 5] = ["From", "To", "Cc", "Date", "Subject"];

/// Case-insensitive header map. Repeated fields are joined with `", "`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    fields: HashMap<String, String>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value, joining it to any earlier value of the same field.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        self.fields
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for HeaderSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (name, value) in iter {
            set.append(name.as_ref(), value);
        }
        set
    }
}

/// Splits `raw` at the first empty line and parses the fields above it.
///
/// Returns the header set and the body that follows the blank line. A
/// block with no blank line is all headers and an empty body. Values are
/// unfolded and RFC 2047 encoded-words decoded.
pub fn parse_header_block(raw: &[u8]) -> Result<(HeaderSet, &[u8])> {
    let (fields, body_start) = parse_fields(raw)?;
    let headers = fields
        .iter()
        .map(|field| (field.get_key(), field.get_value()))
        .collect();
    Ok((headers, &raw[body_start..]))
}

/// Reads the header fields at the start of `raw` one at a time with
/// [`mailparse::parse_header`] and returns them with the offset of the
/// body.
///
/// `mailparse` accepts a line without a colon as a field with an empty
/// value; here that line, a field name with whitespace in it, or a
/// continuation line before the first field is malformed.
pub fn parse_fields(raw: &[u8]) -> Result<(Vec<MailHeader<'_>>, usize)> {
    let mut fields = Vec::new();
    let mut pos = 0;

    while pos < raw.len() {
        let rest = &raw[pos..];
        match rest {
            [b'\n', ..] => return Ok((fields, pos + 1)),
            [b'\r', b'\n', ..] => return Ok((fields, pos + 2)),
            _ => {}
        }

        let (field, used) = mailparse::parse_header(rest)
            .map_err(|e| DecodeError::malformed(format!("header block: {e}")))?;
        let name = field.get_key_raw();
        if rest.get(name.len()) != Some(&b':') || !is_field_name(name) {
            return Err(DecodeError::malformed(format!(
                "not a header field: {}",
                excerpt(rest)
            )));
        }

        fields.push(field);
        pos += used;
    }

    Ok((fields, raw.len()))
}

fn is_field_name(name: &[u8]) -> bool {
    !name.is_empty() && name.iter().all(u8::is_ascii_graphic)
}

fn excerpt(rest: &[u8]) -> String {
    let line = rest.split(|&b| b == b'\n').next().unwrap_or_default();
    String::from_utf8_lossy(line).trim_end().chars().take(60).collect()
}

/// Renders `From`, `To`, `Cc`, `Date`, `Subject` as `Name: value` lines,
/// skipping absent or blank fields. No trailing newline.
pub fn format_headers(headers: &HeaderSet) -> String {
    DISPLAY_ORDER
        .iter()
        .filter_map(|name| {
            let value = headers.get(name)?.trim();
            (!value.is_empty()).then(|| format!("{name}: {value}"))
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
