//! Raw RFC-822 bytes to display text.
//!
//! Every backend hands its raw message to [`decode`]; the result is the
//! same for the same bytes no matter where they came from.

mod error;
pub mod headers;
pub mod html;
pub mod mime;
pub mod normalize;
pub mod transfer;

use std::fmt;

pub use error::{DecodeError, Result};
pub use headers::{HeaderSet, format_headers};
pub use mime::{ContentType, MAX_NESTING, PartType};
pub use transfer::{TransferEncoding, decode_transfer};

/// Header block and body text of one decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub headers: String,
    pub body: String,
}

impl fmt::Display for RenderedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n\n{}", self.headers, self.body)
    }
}

/// Decodes one complete message.
///
/// An absent `Content-Type` means `text/plain`. An unparseable one means
/// `text/plain` read as identity, and an unknown
/// `Content-Transfer-Encoding` means identity; none of these is an error.
/// Pure: no I/O, no shared state.
pub fn decode(raw: &[u8]) -> Result<RenderedMessage> {
    if raw.is_empty() {
        return Err(DecodeError::malformed("empty message"));
    }

    let (headers, _) = headers::parse_header_block(raw)?;
    mime::check_nesting(raw)?;
    let message = mailparse::parse_mail(raw)
        .map_err(|e| DecodeError::malformed(format!("message structure: {e}")))?;

    Ok(RenderedMessage {
        headers: format_headers(&headers),
        body: mime::render(&message)?,
    })
}
