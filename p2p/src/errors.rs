use libconduit::crypto::SignatureError;
use libconduit::primitives::Address;
use thiserror::Error;

/// Why a line received from a peer was discarded.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Message body is not a string")]
    NotAString,
    #[error("Could not decode message. {0}")]
    Json(#[from] serde_json::Error),
    #[error("Message signed by {recovered}, but it was sent by {expected}")]
    SignatureMismatch { expected: Address, recovered: Address },
    #[error("Invalid message signature. {0}")]
    Signature(#[from] SignatureError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CapsError {
    #[error("Empty capabilities string")]
    Empty,
    #[error("Invalid capabilities url. {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Peer {0} is not reachable")]
    Unreachable(Address),
    #[error("The transport has shut down")]
    Closed,
    #[error("Transport error. {0}")]
    Other(String),
}

impl TransportError {
    /// Errors that may go away by themselves, and are worth a retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Unreachable(_) | TransportError::Other(_))
    }
}
