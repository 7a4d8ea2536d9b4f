//! Constants and configuration for the ratchet engine.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RatchetError, Result};

/// Wire format version
pub const VERSION: u8 = 1;

/// Key length in bytes (root, chain and message keys)
pub const KEY_LEN: usize = 32;

/// X25519 public key size
pub const PUBLIC_KEY_LEN: usize = 32;

/// ChaCha20-Poly1305 nonce size
pub const NONCE_LEN: usize = 12;

/// ChaCha20-Poly1305 tag size
pub const TAG_LEN: usize = 16;

/// Canonical header size: version || dh || pn || n
pub const HEADER_LEN: usize = 1 + PUBLIC_KEY_LEN + 4 + 4;

/// Initial root key label
pub const ROOT_KEY_INFO: &[u8] = b"RootKey";

/// Root step label
pub const ROOT_STEP_INFO: &[u8] = b"RootStep";

/// Chain step constants
pub const MESSAGE_KEY_SEED: u8 = 0x01;
pub const CHAIN_KEY_SEED: u8 = 0x02;

/// Default skipped-key bound per session
pub const DEFAULT_MAX_SKIP: usize = 1000;

/// Default plaintext limit (1 MiB)
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Opaque session identifier, assigned by the caller at creation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Ratchet session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetConfig {
    /// Upper bound on cached skipped message keys, and on how far ahead a
    /// single header may jump
    pub max_skip: usize,
    /// Skipped keys older than this are purged; `None` keeps them until used
    pub skipped_key_max_age: Option<Duration>,
    /// Largest plaintext `encrypt` accepts
    pub max_message_len: usize,
}

impl Default for RatchetConfig {
    fn default() -> Self {
        Self {
            max_skip: DEFAULT_MAX_SKIP,
            skipped_key_max_age: None,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }
}

impl RatchetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_skip(mut self, max_skip: usize) -> Self {
        self.max_skip = max_skip;
        self
    }

    pub fn with_skipped_key_max_age(mut self, age: Duration) -> Self {
        self.skipped_key_max_age = Some(age);
        self
    }

    pub fn with_max_message_len(mut self, len: usize) -> Self {
        self.max_message_len = len;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_skip == 0 {
            return Err(RatchetError::ConfigError("max_skip must be >= 1".into()));
        }
        if self.max_skip > u32::MAX as usize {
            return Err(RatchetError::ConfigError(
                "max_skip must fit in a u32 message index".into(),
            ));
        }
        if self.max_message_len == 0 {
            return Err(RatchetError::ConfigError(
                "max_message_len must be >= 1".into(),
            ));
        }
        if self.skipped_key_max_age == Some(Duration::ZERO) {
            return Err(RatchetError::ConfigError(
                "skipped_key_max_age must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RatchetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_skip, 1000);
        assert_eq!(config.skipped_key_max_age, None);
    }

    #[test]
    fn test_builder() {
        let config = RatchetConfig::new()
            .with_max_skip(10)
            .with_skipped_key_max_age(Duration::from_secs(60))
            .with_max_message_len(4096);
        assert_eq!(config.max_skip, 10);
        assert_eq!(config.skipped_key_max_age, Some(Duration::from_secs(60)));
        assert_eq!(config.max_message_len, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        assert!(RatchetConfig::new().with_max_skip(0).validate().is_err());
        assert!(RatchetConfig::new()
            .with_max_message_len(0)
            .validate()
            .is_err());
        assert!(RatchetConfig::new()
            .with_skipped_key_max_age(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_config_serde() {
        let config = RatchetConfig::new().with_max_skip(42);
        let json = serde_json::to_string(&config).unwrap();
        let back: RatchetConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn test_session_id() {
        let id = SessionId::from("alice-bob");
        assert_eq!(id.as_str(), "alice-bob");
        assert_eq!(id.to_string(), "alice-bob");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice-bob\"");
    }

    #[test]
    fn test_header_len() {
        assert_eq!(HEADER_LEN, 41);
    }
}
