//! Error types.

use std::fmt;

/// Why a request never produced an HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// DNS failure, connection refused, TLS handshake failure.
    Connect,
    Timeout,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Neither the metadata store nor the remote API knows this dataflow.
    #[error("schema not found for dataflow {0}")]
    SchemaNotFound(String),
    /// The dataflow answered 404 for this query.
    #[error("dataflow {0} does not serve this indicator")]
    DataflowNotApplicable(String),
    #[error("transport failure ({kind}) for {url}: {message}")]
    Transport {
        url: String,
        kind: TransportErrorKind,
        message: String,
    },
    #[error("request to {url} failed with HTTP {status}")]
    Http { url: String, status: u16 },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid indicator metadata: {0}")]
    InvalidMetadata(String),
    #[error("invalid dataflow schema: {0}")]
    InvalidSchema(String),
    #[error("invalid override pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// True when the API could not be reached at all (as opposed to answering badly).
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Error::Transport {
                kind: TransportErrorKind::Connect,
                ..
            }
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn anyhow_converts() {
        let err: Error = anyhow!("structure message truncated").into();
        assert_eq!(err.to_string(), "structure message truncated");
    }

    #[test]
    fn only_connect_failures_are_unreachable() {
        let connect = Error::Transport {
            url: "https://example.org".into(),
            kind: TransportErrorKind::Connect,
            message: "connection refused".into(),
        };
        let timeout = Error::Transport {
            url: "https://example.org".into(),
            kind: TransportErrorKind::Timeout,
            message: "timed out".into(),
        };
        assert!(connect.is_unreachable());
        assert!(!timeout.is_unreachable());
        assert!(!Error::SchemaNotFound("CME".into()).is_unreachable());
    }
}
