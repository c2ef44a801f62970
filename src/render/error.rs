/// Result alias for the decoding pipeline.
pub type Result<T> = std::result::Result<T, DecodeError>;

/// Failures that abort rendering of a single message.
///
/// Both variants are reported to the caller in place of the body text;
/// neither is ever retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The header block could not be parsed, or a multipart body has no
    /// usable boundary.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A declared transfer encoding does not match its payload.
    #[error("invalid transfer encoding: {0}")]
    Encoding(String),
}

impl DecodeError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMessage(msg.into())
    }

    pub(crate) fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }
}
