use thiserror::Error;

use crate::coding::{DecodeError, EncodeError};

/// Top-level error taxonomy (§7). Every core entry point returns
/// `Result<_, Error>`; a non-`Ok` result is fatal to the stream it occurred
/// on unless the caller specifically handles
/// [`Progress::Finished`](crate::Progress::Finished), which is not an error
/// at all.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Codec failure, wrong state for message type, or integer overflow.
    /// Fatal to the stream; closes it with an internal-error code.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A message arrived in a receive state that forbids it. Fatal to the
    /// stream.
    #[error("message not valid in state {state}: {message}")]
    StateViolation { state: String, message: String },

    /// Allocation failed. Fatal to the stream; may be fatal to the
    /// connection if it occurs at connection-level buffers.
    #[error("memory exhausted: {0}")]
    MemoryExhaustion(String),

    /// Propagated from the transport callback; mapped to a close reason for
    /// the publisher/consumer.
    #[error("transport error: {0}")]
    Transport(String),

    /// A subscription targeted a URL not locally registered. Fatal at an
    /// endpoint; triggers forwarding logic at a relay (out of core scope).
    #[error("source not found: {0}")]
    SourceNotFound(String),

    /// A fragment's offsets overlap inconsistently with what is already
    /// cached for that object (§4.2).
    #[error("overlapping fragment for object at offset {offset}")]
    Overlap { offset: u64 },

    /// `learn_start_point` contradicted data already delivered (§4.3).
    #[error("start point conflicts with already-delivered data")]
    StartPointConflict,
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Error::MalformedMessage(err.to_string())
    }
}

impl From<EncodeError> for Error {
    fn from(err: EncodeError) -> Self {
        Error::MalformedMessage(err.to_string())
    }
}

/// The outcome of feeding data into the reassembly engine (§7, §9 —
/// replaces the source's "positive return means finished" convention with a
/// real sum type).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Normal progress; nothing terminal happened.
    Continue,
    /// The reassembler has delivered everything up to the final object.
    /// Not an error — triggers a graceful FIN on the owning stream.
    Finished,
}

/// Why a connection-level `close` callback fired (§5, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Finished,
    RemoteApplication,
    QuicConnection,
    DeleteContext,
    InternalError,
}
