//! # Ghost Ratchet
//!
//! Double Ratchet session engine: per-message keys derived from a symmetric
//! chain, refreshed by X25519 key-pair rotation whenever the conversation
//! changes direction.
//!
//! ## Features
//!
//! - Forward secrecy: every message key is used once and wiped
//! - Post-compromise recovery via the DH ratchet
//! - Bounded out-of-order delivery through a skipped-key cache
//! - ChaCha20-Poly1305 AEAD with the header bound as associated data
//! - Sessions that zeroize all key material on destroy
//!
//! The initial shared secret comes from an out-of-band handshake and is an
//! input here.
//!
//! ## Example
//!
//! ```rust
//! use ghost_ratchet::{RatchetConfig, SessionId, SessionRegistry};
//!
//! let registry = SessionRegistry::new(RatchetConfig::default()).unwrap();
//! let shared_secret = [7u8; 32];
//! registry.create("alice", &shared_secret, true).unwrap();
//! registry.create("bob", &shared_secret, false).unwrap();
//!
//! let env = registry
//!     .encrypt(&SessionId::from("alice"), b"hello", None)
//!     .unwrap();
//! let pt = registry.decrypt(&SessionId::from("bob"), &env, None).unwrap();
//! assert_eq!(pt, b"hello");
//! ```

mod crypto;
mod envelope;
mod error;
mod kdf;
mod keypair;
mod registry;
mod secret;
mod session;
mod skipped;
mod types;

pub use crypto::{generate_nonce, open, seal};
pub use envelope::{Envelope, Header, WireMessage};
pub use error::{RatchetError, Result};
pub use kdf::{chain_step, derive_root_key, expand, root_step};
pub use keypair::{agree, parse_public, RatchetKeyPair};
pub use registry::SessionRegistry;
pub use secret::SecretKey;
pub use session::RatchetSession;
pub use skipped::{ChainEpoch, SkippedKeyCache};
pub use types::{
    RatchetConfig, SessionId, CHAIN_KEY_SEED, DEFAULT_MAX_MESSAGE_LEN, DEFAULT_MAX_SKIP,
    HEADER_LEN, KEY_LEN, MESSAGE_KEY_SEED, NONCE_LEN, PUBLIC_KEY_LEN, ROOT_KEY_INFO,
    ROOT_STEP_INFO, TAG_LEN, VERSION,
};
