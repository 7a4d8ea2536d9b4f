//! Error types for the ratchet engine.

use thiserror::Error;

/// Result type alias for ratchet operations
pub type Result<T> = std::result::Result<T, RatchetError>;

/// Errors that can occur during ratchet operations.
///
/// Every failure is scoped to one session or one call; none is fatal to the process.
#[derive(Debug, Error)]
pub enum RatchetError {
    /// No session is registered under this id
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A live session already uses this id
    #[error("session already exists: {0}")]
    SessionAlreadyExists(String),

    /// The session has been torn down
    #[error("session destroyed")]
    SessionDestroyed,

    /// Remote ratchet key is malformed or low-order
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Skip guard tripped
    #[error("too many skipped messages: {requested} requested, limit {max}")]
    TooManySkippedMessages { requested: u64, max: usize },

    /// AEAD authentication failure or malformed envelope
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Responder tried to send before receiving its first message
    #[error("no sending chain: responder must receive before it can send")]
    SendingChainUnavailable,

    /// Key material of the wrong size
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// HKDF rejected the requested output length
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Plaintext exceeds the configured limit
    #[error("message too large: {len} bytes, limit {max}")]
    MessageTooLarge { len: usize, max: usize },

    /// AEAD seal failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// Text wire form could not be decoded
    #[error("invalid envelope encoding: {0}")]
    InvalidEnvelope(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl RatchetError {
    /// Whether retrying the same call on the same session can ever succeed.
    ///
    /// Lookup and teardown failures are permanent; the caller has to
    /// re-establish a session out-of-band.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            RatchetError::SessionNotFound(_) | RatchetError::SessionDestroyed
        )
    }
}
