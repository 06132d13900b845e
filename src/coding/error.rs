use thiserror::Error;

/// Failure while parsing a control message, datagram header, or unistream header.
///
/// Every variant here is fatal to the stream it was encountered on per spec
/// §7 (`MalformedMessage`); the caller is expected to fold these into
/// [`crate::Error::MalformedMessage`] when propagating past the coding layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("ran off the end of the buffer")]
    UnexpectedEnd,

    #[error("variable-length integer overflowed its declared width")]
    VarIntOverflow,

    #[error("unknown message type {0}")]
    UnknownMessageType(u64),

    #[error("string was not valid utf-8")]
    InvalidString,

    #[error("field bounds exceeded: {0}")]
    FieldBoundsExceeded(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("value {0} does not fit in a variable-length integer")]
    VarIntTooLarge(u64),

    #[error("output buffer does not have enough remaining capacity")]
    BufferTooShort,

    #[error("field bounds exceeded: {0}")]
    FieldBoundsExceeded(String),
}
