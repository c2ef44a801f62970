//! MIME part typing and text resolution.
//!
//! `mailparse::parse_mail` splits the message into its part tree; this
//! module decides what each part is and which parts become text.

use std::collections::BTreeMap;

use mailparse::{MailHeader, MailHeaderMap, ParsedMail};

use crate::render::error::{DecodeError, Result};
use crate::render::headers::parse_fields;
use crate::render::html::extract_text;
use crate::render::normalize::normalize;
use crate::render::transfer::TransferEncoding;

/// Multiparts nested deeper than this are rejected as malformed.
pub const MAX_NESTING: usize = 64;

/// A media type with its parameters. Type and subtype are lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    pub mimetype: String,
    pub params: BTreeMap<String, String>,
}

impl Default for ContentType {
    fn default() -> Self {
        Self {
            mimetype: "text/plain".to_string(),
            params: BTreeMap::new(),
        }
    }
}

impl ContentType {
    /// Parses a `Content-Type` value.
    ///
    /// `None` when the media type is not a `type/subtype` pair, a
    /// parameter is not `name=value`, or a quoted string is left open.
    pub fn parse(value: &str) -> Option<Self> {
        let mut segments = split_params(value)?.into_iter();
        let media = segments.next()?.trim();
        let (main, sub) = media.split_once('/')?;
        if !is_token(main) || !is_token(sub) {
            return None;
        }

        let params_ok = segments.all(|param| {
            let param = param.trim();
            param.is_empty()
                || param
                    .split_once('=')
                    .is_some_and(|(name, _)| is_token(name.trim()))
        });
        if !params_ok {
            return None;
        }

        Some(Self {
            mimetype: media.to_ascii_lowercase(),
            params: mailparse::parse_content_type(value).params,
        })
    }

    pub fn is_multipart(&self) -> bool {
        self.mimetype.starts_with("multipart/")
    }

    pub fn is_html(&self) -> bool {
        self.mimetype.starts_with("text/html")
    }

    /// Only plain text and HTML leaves are ever rendered.
    pub fn is_renderable(&self) -> bool {
        self.mimetype.starts_with("text/plain") || self.is_html()
    }

    pub fn boundary(&self) -> Option<&str> {
        self.params
            .get("boundary")
            .map(String::as_str)
            .filter(|b| !b.is_empty())
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?=".contains(&b))
}

/// Splits at `;` outside double quotes.
fn split_params(value: &str) -> Option<Vec<&str>> {
    let mut segments = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ';' if !quoted => {
                segments.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&value[start..]);
    (!quoted).then_some(segments)
}

/// What a part's header fields say about its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartType {
    pub content_type: ContentType,
    pub encoding: TransferEncoding,
}

impl PartType {
    /// `None` when the part declares no `Content-Type`. An unparseable
    /// one means `text/plain` read as identity, whatever
    /// `Content-Transfer-Encoding` says.
    pub fn declared(fields: &[MailHeader<'_>]) -> Option<Self> {
        let value = fields
            .get_first_value("Content-Type")
            .filter(|v| !v.trim().is_empty())?;

        Some(match ContentType::parse(&value) {
            Some(content_type) => Self {
                content_type,
                encoding: transfer_encoding(fields),
            },
            None => {
                log::debug!("unparseable content type {value:?}, reading as plain text");
                Self {
                    content_type: ContentType::default(),
                    encoding: TransferEncoding::Identity,
                }
            }
        })
    }

    /// Type of a message's own body, where an absent `Content-Type`
    /// means `text/plain`.
    pub fn of_message(fields: &[MailHeader<'_>]) -> Self {
        Self::declared(fields).unwrap_or_else(|| Self {
            content_type: ContentType::default(),
            encoding: transfer_encoding(fields),
        })
    }
}

fn transfer_encoding(fields: &[MailHeader<'_>]) -> TransferEncoding {
    fields
        .get_first_value("Content-Transfer-Encoding")
        .map(|v| TransferEncoding::parse(&v))
        .unwrap_or_default()
}

/// Renders the textual content of a parsed message.
///
/// A multipart yields each `text/plain` or `text/html` leaf followed by
/// one blank line, flattened across nesting levels in document order.
/// Inside a multipart, parts without a `Content-Type` and parts of any
/// other type are skipped. A non-text single-part body renders empty.
pub fn render(message: &ParsedMail<'_>) -> Result<String> {
    let (fields, body_start) = parse_fields(message.raw_bytes)?;
    let part_type = PartType::of_message(&fields);
    if !part_type.content_type.is_multipart() {
        if !part_type.content_type.is_renderable() {
            return Ok(String::new());
        }
        return render_leaf(&message.raw_bytes[body_start..], &part_type);
    }

    let mut out = String::new();
    let mut levels = vec![subparts(message, &part_type.content_type)?.iter()];
    while let Some(level) = levels.last_mut() {
        let Some(part) = level.next() else {
            levels.pop();
            continue;
        };

        let (fields, body_start) = parse_fields(part.raw_bytes)?;
        let Some(part_type) = PartType::declared(&fields) else {
            log::trace!("skipping part without a content type");
            continue;
        };

        if part_type.content_type.is_multipart() {
            if levels.len() >= MAX_NESTING {
                return Err(too_deep());
            }
            levels.push(subparts(part, &part_type.content_type)?.iter());
        } else if part_type.content_type.is_renderable() {
            out.push_str(&render_leaf(&part.raw_bytes[body_start..], &part_type)?);
            out.push_str("\n\n");
        } else {
            log::trace!("skipping {} part", part_type.content_type.mimetype);
        }
    }
    Ok(out)
}

fn subparts<'t, 'r>(
    part: &'t ParsedMail<'r>,
    content_type: &ContentType,
) -> Result<&'t [ParsedMail<'r>]> {
    let Some(boundary) = content_type.boundary() else {
        return Err(DecodeError::malformed(format!(
            "{} without a boundary parameter",
            content_type.mimetype
        )));
    };
    if part.subparts.is_empty() {
        return Err(DecodeError::malformed(format!(
            "multipart body has no \"--{boundary}\" delimiter"
        )));
    }
    Ok(&part.subparts)
}

fn render_leaf(bytes: &[u8], part_type: &PartType) -> Result<String> {
    let decoded = part_type.encoding.decode(bytes)?;
    let text = String::from_utf8_lossy(&decoded);
    if part_type.content_type.is_html() {
        Ok(normalize(&extract_text(&text)))
    } else {
        Ok(normalize(&text))
    }
}

fn too_deep() -> DecodeError {
    DecodeError::malformed(format!(
        "multiparts nested deeper than {MAX_NESTING} levels"
    ))
}

/// A multipart seen while scanning, by its delimiter line prefix.
struct OpenMultipart {
    delimiter: Vec<u8>,
    in_part: bool,
    closed: bool,
}

/// Fails when multiparts nest deeper than [`MAX_NESTING`].
///
/// One pass over the lines, run before the tree is built. Parts are
/// delimited the way `mailparse` splits them: a line starting with
/// `--boundary` ends the current part of the outermost open multipart
/// using that boundary, and the first delimiter of a multipart always
/// opens a part.
pub fn check_nesting(raw: &[u8]) -> Result<()> {
    let mut open: Vec<OpenMultipart> = Vec::new();
    let mut header_start = Some(0);
    let mut pos = 0;

    while pos < raw.len() {
        let end = raw[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(raw.len(), |nl| pos + nl + 1);
        let line = &raw[pos..end];

        if let Some(level) = open
            .iter()
            .position(|m| !m.closed && line.starts_with(&m.delimiter))
        {
            open.truncate(level + 1);
            let multipart = &mut open[level];
            let close = line[multipart.delimiter.len()..].starts_with(b"--");
            if multipart.in_part && close {
                multipart.closed = true;
                header_start = None;
            } else {
                multipart.in_part = true;
                header_start = Some(end);
            }
        } else if let Some(start) = header_start
            && matches!(line, b"\n" | b"\r\n")
        {
            header_start = None;
            if let Some(delimiter) = multipart_delimiter(&raw[start..end]) {
                if open.len() >= MAX_NESTING {
                    return Err(too_deep());
                }
                open.push(OpenMultipart {
                    delimiter,
                    in_part: false,
                    closed: false,
                });
            }
        }

        pos = end;
    }
    Ok(())
}

fn multipart_delimiter(header_block: &[u8]) -> Option<Vec<u8>> {
    let (fields, _) = mailparse::parse_headers(header_block).ok()?;
    let content_type = mailparse::parse_content_type(&fields.get_first_value("Content-Type")?);
    if !content_type.mimetype.starts_with("multipart/") {
        return None;
    }
    let boundary = content_type.params.get("boundary")?;
    Some(format!("--{boundary}").into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_raw(raw: &[u8]) -> Result<String> {
        let message = mailparse::parse_mail(raw).unwrap();
        render(&message)
    }

    fn fields(raw: &[u8]) -> Vec<MailHeader<'_>> {
        parse_fields(raw).unwrap().0
    }

    /// `depth` multiparts, each holding the next, around one text part.
    fn nested(depth: usize) -> Vec<u8> {
        let mut raw = String::new();
        for level in 0..depth {
            raw.push_str(&format!(
                "Content-Type: multipart/mixed; boundary=\"b{level}x\"\r\n\r\n--b{level}x\r\n"
            ));
        }
        raw.push_str("Content-Type: text/plain\r\n\r\ndeep\r\n");
        raw.into_bytes()
    }

    #[test]
    fn content_type_parsing() {
        let ct = ContentType::parse("Text/HTML; charset=\"utf-8\"").unwrap();
        assert_eq!(ct.mimetype, "text/html");
        assert_eq!(ct.params.get("charset").map(String::as_str), Some("utf-8"));
        assert!(ct.is_renderable());

        let ct = ContentType::parse("multipart/alternative; boundary=abc;").unwrap();
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), Some("abc"));

        let ct = ContentType::parse("application/pdf; name=\"a;b.pdf\"").unwrap();
        assert_eq!(ct.mimetype, "application/pdf");
    }

    #[test]
    fn unparseable_content_types() {
        for value in [
            "",
            "garbage",
            "text/",
            "/plain",
            "text plain/x",
            "a/b/c",
            "text/plain; charset",
            "text/plain; =utf-8",
            "text/plain; name=\"open",
        ] {
            assert_eq!(ContentType::parse(value), None, "{value:?}");
        }
    }

    #[test]
    fn declared_part_types() {
        assert_eq!(PartType::declared(&fields(b"Subject: x\n\n")), None);
        assert_eq!(PartType::declared(&fields(b"Content-Type:  \n\n")), None);

        let unparseable = fields(b"Content-Type: garbage\nContent-Transfer-Encoding: base64\n\n");
        assert_eq!(
            PartType::declared(&unparseable),
            Some(PartType {
                content_type: ContentType::default(),
                encoding: TransferEncoding::Identity,
            })
        );

        let untyped = fields(b"Content-Transfer-Encoding: base64\n\n");
        let top = PartType::of_message(&untyped);
        assert_eq!(top.content_type, ContentType::default());
        assert_eq!(top.encoding, TransferEncoding::Base64);
    }

    #[test]
    fn renders_only_text_parts() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\r\n\r\n\
--b\r\n\
Content-Type: text/plain\r\n\r\n\
plain  part\r\n\
--b\r\n\
Content-Type: text/html\r\n\r\n\
<p>html part</p>\r\n\
--b\r\n\
Content-Type: application/octet-stream\r\n\
Content-Transfer-Encoding: base64\r\n\r\n\
!!! not base64 !!!\r\n\
--b--\r\n";
        assert_eq!(render_raw(raw).unwrap(), "plain part\n\nhtml part\n\n");
    }

    #[test]
    fn nested_multiparts_are_flattened() {
        let raw = b"Content-Type: multipart/mixed; boundary=outer\n\n\
--outer\n\
Content-Type: multipart/alternative; boundary=inner\n\n\
--inner\n\
Content-Type: text/plain\n\n\
first\n\
--inner\n\
Content-Type: text/plain\n\
Content-Transfer-Encoding: quoted-printable\n\n\
sec=\nond\n\
--inner--\n\
--outer\n\
Content-Type: image/png\n\n\
PNG\n\
--outer\n\n\
untyped part\n\
--outer--\n";
        assert_eq!(render_raw(raw).unwrap(), "first\n\nsecond\n\n");
    }

    #[test]
    fn untyped_part_inside_multipart_is_skipped() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\n\n\
--b\n\
X-Note: no type\n\n\
no content type here\n\
--b--\n";
        assert_eq!(render_raw(raw).unwrap(), "");
    }

    #[test]
    fn unparseable_part_is_identity_plain_text() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\n\n\
--b\n\
Content-Type: text/plain; charset\n\
Content-Transfer-Encoding: base64\n\n\
not base64 @@\n\
--b--\n";
        assert_eq!(render_raw(raw).unwrap(), "not base64 @@\n\n");
    }

    #[test]
    fn error_in_a_text_part_aborts() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\n\n\
--b\n\
Content-Type: text/plain\n\n\
fine\n\
--b\n\
Content-Type: text/plain\n\
Content-Transfer-Encoding: base64\n\n\
***\n\
--b--\n";
        assert!(matches!(render_raw(raw), Err(DecodeError::Encoding(_))));
    }

    #[test]
    fn non_text_top_level_leaf_renders_empty() {
        let raw = b"Content-Type: application/pdf\n\n%PDF-1.4";
        assert_eq!(render_raw(raw).unwrap(), "");
    }

    #[test]
    fn multipart_without_boundary_or_delimiter_is_malformed() {
        for raw in [
            &b"Content-Type: multipart/mixed\n\n--x\n\nhi\n--x--"[..],
            &b"Content-Type: multipart/mixed; boundary=b\n\nnothing here"[..],
            &b"Content-Type: multipart/mixed; boundary=b\n\n"[..],
        ] {
            assert!(
                matches!(render_raw(raw), Err(DecodeError::MalformedMessage(_))),
                "{:?}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn malformed_part_headers_are_rejected() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\n\n\
--b\n\
not a header\n\n\
text\n\
--b--\n";
        assert!(matches!(render_raw(raw), Err(DecodeError::MalformedMessage(_))));
    }

    #[test]
    fn nesting_up_to_the_limit_renders() {
        let raw = nested(MAX_NESTING);
        check_nesting(&raw).unwrap();
        assert_eq!(render_raw(&raw).unwrap(), "deep\n\n");
    }

    #[test]
    fn nesting_past_the_limit_is_malformed() {
        let err = check_nesting(&nested(MAX_NESTING + 1)).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedMessage(_)));
        assert!(err.to_string().contains("nested deeper"));
    }

    #[test]
    fn sibling_multiparts_do_not_count_as_nesting() {
        let mut raw = String::from("Content-Type: multipart/mixed; boundary=top\n\n");
        for i in 0..MAX_NESTING * 2 {
            raw.push_str(&format!(
                "--top\n\
                 Content-Type: multipart/alternative; boundary=alt{i}x\n\n\
                 --alt{i}x\n\
                 Content-Type: text/plain\n\n\
                 m{i}\n\
                 --alt{i}x--\n"
            ));
        }
        raw.push_str("--top--\n");

        check_nesting(raw.as_bytes()).unwrap();
        let text = render_raw(raw.as_bytes()).unwrap();
        assert!(text.starts_with("m0\n\nm1\n\n"), "{text}");
        assert!(text.ends_with(&format!("m{}\n\n", MAX_NESTING * 2 - 1)));
    }

    #[test]
    fn closed_multipart_ignores_later_delimiters() {
        // after "--a--" the epilogue repeats the delimiter; it opens nothing
        let mut raw = String::from(
            "Content-Type: multipart/mixed; boundary=a\n\n--a\nContent-Type: text/plain\n\nx\n--a--\n",
        );
        for _ in 0..MAX_NESTING + 1 {
            raw.push_str("--a\nContent-Type: multipart/mixed; boundary=a\n\n");
        }
        check_nesting(raw.as_bytes()).unwrap();
    }
}
