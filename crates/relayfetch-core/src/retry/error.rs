//! Terminal errors of a relayed request.

use crate::relay::{CodecError, RelayIdentity};
use crate::transport::TransportError;
use thiserror::Error;

use super::classify::{classify_transport_error, FailureClass};

/// The single error a caller can get back from [`super::RelayTransport::execute`].
///
/// Retryable conditions only show up here when they happened on the last
/// attempt; encode, decode and body-read failures end the call on first sight.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("encoding request for relay {relay}: {source}")]
    Encode {
        relay: RelayIdentity,
        #[source]
        source: CodecError,
    },
    #[error("decoding response from relay {relay}: {source}")]
    Decode {
        relay: RelayIdentity,
        #[source]
        source: CodecError,
    },
    #[error("request via relay {relay} failed: {source}")]
    Transport {
        relay: RelayIdentity,
        #[source]
        source: TransportError,
    },
    #[error("reading relay error body from {relay}: {source}")]
    ReadBody {
        relay: RelayIdentity,
        #[source]
        source: std::io::Error,
    },
    #[error("no outcome after {attempts} attempt(s)")]
    AttemptsExhausted { attempts: usize },
}

impl RelayError {
    /// Whether another attempt could have helped.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayError::Transport { .. })
    }

    /// Class of the underlying network failure, if this is one.
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            RelayError::Transport { source, .. } => Some(classify_transport_error(source)),
            _ => None,
        }
    }
}
