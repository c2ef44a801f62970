//! Content-Transfer-Encoding decoding (RFC 2045).

use base64::{Engine as _, engine::general_purpose};

use crate::render::error::{DecodeError, Result};

/// Transfer encodings the pipeline knows how to reverse.
///
/// Everything that is not base64 or quoted-printable (`7bit`, `8bit`,
/// `binary`, an empty header, or an unknown token) is passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferEncoding {
    Base64,
    QuotedPrintable,
    #[default]
    Identity,
}

impl TransferEncoding {
    /// Case-insensitive, surrounding whitespace ignored. Never fails.
    pub fn parse(name: &str) -> Self {
        let name = name.trim();
        if name.eq_ignore_ascii_case("base64") {
            Self::Base64
        } else if name.eq_ignore_ascii_case("quoted-printable") {
            Self::QuotedPrintable
        } else {
            Self::Identity
        }
    }

    pub fn decode(self, input: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Base64 => decode_base64(input),
            Self::QuotedPrintable => decode_quoted_printable(input),
            Self::Identity => Ok(input.to_vec()),
        }
    }
}

/// Decodes `input` according to the encoding named in a
/// `Content-Transfer-Encoding` header value.
pub fn decode_transfer(input: &[u8], encoding: &str) -> Result<Vec<u8>> {
    TransferEncoding::parse(encoding).decode(input)
}

/// Standard-alphabet base64. Line breaks and other ASCII whitespace are
/// transport artefacts and are ignored.
pub fn decode_base64(input: &[u8]) -> Result<Vec<u8>> {
    let compact: Vec<u8> = input
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    general_purpose::STANDARD
        .decode(&compact)
        .map_err(|e| DecodeError::encoding(format!("base64: {e}")))
}

/// Quoted-printable with soft line breaks.
///
/// Hard line breaks keep their original form (`\r\n` or `\n`). Trailing
/// spaces and tabs on an encoded line are transport padding and dropped.
pub fn decode_quoted_printable(input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len());
    let mut rest = input;

    while !rest.is_empty() {
        let (line, ending, next) = match rest.iter().position(|&b| b == b'\n') {
            Some(nl) if nl > 0 && rest[nl - 1] == b'\r' => {
                (&rest[..nl - 1], &b"\r\n"[..], &rest[nl + 1..])
            }
            Some(nl) => (&rest[..nl], &b"\n"[..], &rest[nl + 1..]),
            None => (rest, &b""[..], &b""[..]),
        };
        rest = next;

        let line = trim_trailing_blanks(line);
        match line.strip_suffix(b"=") {
            Some(soft) => decode_qp_line(soft, &mut out)?,
            None => {
                decode_qp_line(line, &mut out)?;
                out.extend_from_slice(ending);
            }
        }
    }

    Ok(out)
}

fn decode_qp_line(line: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let mut i = 0;
    while i < line.len() {
        if line[i] != b'=' {
            out.push(line[i]);
            i += 1;
            continue;
        }
        let hi = line.get(i + 1).copied().and_then(hex_value);
        let lo = line.get(i + 2).copied().and_then(hex_value);
        match (hi, lo) {
            (Some(hi), Some(lo)) => out.push((hi << 4) | lo),
            _ => {
                let seq = String::from_utf8_lossy(&line[i..line.len().min(i + 3)]);
                return Err(DecodeError::encoding(format!(
                    "quoted-printable: invalid escape sequence {seq:?}"
                )));
            }
        }
        i += 3;
    }
    Ok(())
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

fn trim_trailing_blanks(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map_or(0, |p| p + 1);
    &line[..end]
}
