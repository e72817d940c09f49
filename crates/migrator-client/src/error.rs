//! # Design
//!
//! - Structured errors for daemon REST calls, one variant per failure stage.
//! - Carry the request URI so failures point at the exact endpoint.
//! - Preserve transport and decode sources for the error chain.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for daemon client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors raised while talking to a daemon.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The unix socket could not be reached.
    #[error("failed to connect to daemon socket {}", path.display())]
    Connect {
        /// Socket path.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// HTTP transport failure.
    #[error("daemon transport failure during {operation} for {uri}")]
    Transport {
        /// Transport stage that failed.
        operation: &'static str,
        /// Request URI.
        uri: String,
        /// Underlying hyper error.
        source: hyper::Error,
    },
    /// The request could not be assembled.
    #[error("invalid daemon request for {uri}")]
    Request {
        /// Request URI.
        uri: String,
        /// Underlying HTTP builder error.
        source: http::Error,
    },
    /// Request body serialisation failed.
    #[error("failed to encode daemon request for {uri}")]
    Encode {
        /// Request URI.
        uri: String,
        /// Underlying serde error.
        source: serde_json::Error,
    },
    /// Response body could not be decoded.
    #[error("failed to decode daemon response for {uri}")]
    Decode {
        /// Request URI.
        uri: String,
        /// Underlying serde error.
        source: serde_json::Error,
    },
    /// The daemon answered with an error envelope.
    #[error("daemon rejected {uri}: {message} (code {code})")]
    Api {
        /// Request URI.
        uri: String,
        /// Error code reported by the daemon.
        code: u16,
        /// Error message reported by the daemon.
        message: String,
    },
    /// The daemon answered with an envelope of the wrong kind.
    #[error("unexpected daemon response for {uri}: {reason}")]
    UnexpectedResponse {
        /// Request URI.
        uri: String,
        /// Static reason for the mismatch.
        reason: &'static str,
    },
    /// A background operation finished unsuccessfully.
    #[error("operation {operation} failed: {message}")]
    OperationFailed {
        /// Operation URL.
        operation: String,
        /// Numeric status reported by the daemon.
        status_code: u16,
        /// Failure detail reported by the daemon.
        message: String,
    },
}

impl ClientError {
    pub(crate) const fn transport(
        operation: &'static str,
        uri: String,
        source: hyper::Error,
    ) -> Self {
        Self::Transport {
            operation,
            uri,
            source,
        }
    }

    pub(crate) fn decode(uri: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            uri: uri.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn client_error_helpers_build_variants() -> Result<(), Box<dyn Error>> {
        let Err(json_error) = serde_json::from_str::<serde_json::Value>("invalid") else {
            return Err(io::Error::other("expected invalid json").into());
        };
        let decode = ClientError::decode("/1.0", json_error);
        assert!(matches!(decode, ClientError::Decode { .. }));
        assert!(decode.source().is_some());

        let api = ClientError::Api {
            uri: "/1.0/storage-pools".to_string(),
            code: 403,
            message: "not authorized".to_string(),
        };
        assert!(api.to_string().contains("not authorized"));
        Ok(())
    }
}
