//! Error types for upload-pack sessions.

use bstr::BString;
use gix_hash::ObjectId;

/// Result type alias for upload-pack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can end an upload-pack session early.
///
/// Variants that carry a client-visible message render it exactly as it goes
/// onto the wire; see [`Error::client_message`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying transport failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Packet-line framing failed.
    #[error(transparent)]
    Framing(#[from] hull_serve_core::pktline::Error),

    /// Malformed or unexpected protocol input.
    #[error("{0}")]
    Protocol(String),

    /// A want was rejected by the request policy.
    #[error("want {0} not valid")]
    WantNotValid(ObjectId),

    /// A `want-ref` or `deepen-not` name did not resolve.
    #[error("Invalid ref name: {0}")]
    RefNotFound(BString),

    /// The client supplied a filter but the server does not allow filtering.
    #[error("unexpected filter {0}")]
    FilterNotAllowed(BString),

    /// A filter spec could not be parsed.
    #[error("invalid filter-spec '{0}'")]
    InvalidFilter(BString),

    /// A deepen request selected no commits at all.
    #[error("No commits selected for shallow request")]
    ShallowRequestEmpty,

    /// An object the engine relies on is absent from the store.
    #[error("missing object {0}")]
    MissingObject(ObjectId),

    /// The object store failed while reading.
    #[error("object store failure: {0}")]
    Resource(String),

    /// The transport closed before the exchange completed.
    #[error("client disconnected")]
    ClientDisconnect,

    /// The pack writer failed mid-stream.
    #[error("pack writing failed: {0}")]
    PackWrite(String),
}

impl Error {
    /// Create a protocol error with a preformatted message.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// The text to report to the client in an `ERR` frame, if this error is
    /// the client's to see. Transport and internal failures return `None`.
    pub fn client_message(&self) -> Option<String> {
        match self {
            Self::Protocol(_)
            | Self::WantNotValid(_)
            | Self::RefNotFound(_)
            | Self::FilterNotAllowed(_)
            | Self::InvalidFilter(_)
            | Self::ShallowRequestEmpty => Some(self.to_string()),
            _ => None,
        }
    }
}
