use {
    hushsync_protocol::stream::StreamError,
    serde_json::{Map, Value},
    thiserror::Error,
};

/// Failure of an envelope operation, a pool or a sync exchange.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Bad or tampered ciphertext container.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("unsupported encryption scheme: {0}")]
    UnsupportedScheme(String),
    /// The produced ciphertext failed the crypto context's self-check.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("broken sync stream: {0}")]
    BrokenSyncStream(String),
    /// Structured error returned by the server in place of the closing sentinel.
    #[error("remote sync error: {}", Value::Object(.0.clone()))]
    RemoteSyncError(Map<String, Value>),
    #[error("transport error: {0:#}")]
    Transport(anyhow::Error),
    #[error("staging error: {0:#}")]
    Staging(anyhow::Error),
    #[error("insertion callback failed: {0:#}")]
    Callback(anyhow::Error),
    #[error("cancelled")]
    Cancelled,
}

impl From<StreamError> for SyncError {
    #[inline]
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Broken(msg) => Self::BrokenSyncStream(msg),
            StreamError::Remote(payload) => Self::RemoteSyncError(payload),
        }
    }
}

impl SyncError {
    /// Returns the error payload sent by the server, if any.
    #[must_use]
    #[inline]
    pub fn remote_payload(&self) -> Option<&Map<String, Value>> {
        if let Self::RemoteSyncError(payload) = self {
            Some(payload)
        } else {
            None
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
