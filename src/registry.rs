//! Table of live ratchet sessions, keyed by session id.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::envelope::Envelope;
use crate::error::{RatchetError, Result};
use crate::session::RatchetSession;
use crate::types::{RatchetConfig, SessionId};

/// Owns every live session.
///
/// The map lock is held only for lookup, insert and remove. Crypto runs under
/// each session's own lock, so unrelated sessions never wait on each other.
pub struct SessionRegistry {
    config: RatchetConfig,
    sessions: RwLock<HashMap<SessionId, Arc<RatchetSession>>>,
    /// Ids torn down and not re-created since. Kept until re-created or
    /// `forget_destroyed` is called
    destroyed: RwLock<HashSet<SessionId>>,
}

impl SessionRegistry {
    /// Create an empty registry; every session it creates uses `config`
    pub fn new(config: RatchetConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            destroyed: RwLock::new(HashSet::new()),
        })
    }

    pub fn config(&self) -> &RatchetConfig {
        &self.config
    }

    /// Create and register a session
    ///
    /// # Arguments
    /// * `id` - Unique session identifier
    /// * `shared_secret` - Output of the out-of-band handshake
    /// * `is_initiator` - Whether this side sends first
    pub fn create(
        &self,
        id: impl Into<SessionId>,
        shared_secret: &[u8],
        is_initiator: bool,
    ) -> Result<Arc<RatchetSession>> {
        let id = id.into();
        if self.sessions.read().contains_key(&id) {
            return Err(RatchetError::SessionAlreadyExists(id.to_string()));
        }

        let session = Arc::new(RatchetSession::new(
            id.clone(),
            shared_secret,
            is_initiator,
            self.config.clone(),
        )?);

        {
            let mut sessions = self.sessions.write();
            if sessions.contains_key(&id) {
                return Err(RatchetError::SessionAlreadyExists(id.to_string()));
            }
            sessions.insert(id.clone(), Arc::clone(&session));
        }
        self.destroyed.write().remove(&id);

        info!(session = %id, is_initiator, "session created");
        Ok(session)
    }

    /// Look up a live session
    pub fn get(&self, id: &SessionId) -> Result<Arc<RatchetSession>> {
        if let Some(session) = self.sessions.read().get(id) {
            return Ok(Arc::clone(session));
        }
        if self.destroyed.read().contains(id) {
            Err(RatchetError::SessionDestroyed)
        } else {
            Err(RatchetError::SessionNotFound(id.to_string()))
        }
    }

    /// Encrypt on the named session
    pub fn encrypt(
        &self,
        id: &SessionId,
        plaintext: &[u8],
        ad: Option<&[u8]>,
    ) -> Result<Envelope> {
        let session = self.get(id)?;
        session.encrypt(plaintext, ad)
    }

    /// Decrypt on the named session
    pub fn decrypt(
        &self,
        id: &SessionId,
        envelope: &Envelope,
        ad: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let session = self.get(id)?;
        session.decrypt(envelope, ad)
    }

    /// Wipe and unregister a session
    ///
    /// Returns `Ok(false)` if the id was already destroyed.
    pub fn destroy(&self, id: &SessionId) -> Result<bool> {
        let removed = self.sessions.write().remove(id);
        match removed {
            Some(session) => {
                session.destroy();
                self.destroyed.write().insert(id.clone());
                Ok(true)
            }
            None if self.destroyed.read().contains(id) => {
                debug!(session = %id, "destroy on already destroyed session");
                Ok(false)
            }
            None => Err(RatchetError::SessionNotFound(id.to_string())),
        }
    }

    /// Wipe every session
    ///
    /// Returns the number of sessions destroyed.
    pub fn destroy_all(&self) -> usize {
        let ids = self.session_ids();
        let mut count = 0;
        for id in &ids {
            if let Ok(true) = self.destroy(id) {
                count += 1;
            }
        }
        info!(count, "all sessions destroyed");
        count
    }

    /// Drop the record of destroyed ids
    ///
    /// Afterwards those ids report `SessionNotFound` instead of
    /// `SessionDestroyed`. Returns the number of ids forgotten.
    pub fn forget_destroyed(&self) -> usize {
        let mut destroyed = self.destroyed.write();
        let count = destroyed.len();
        destroyed.clear();
        destroyed.shrink_to_fit();
        debug!(count, "forgot destroyed session ids");
        count
    }

    /// Purge expired skipped keys across all sessions
    ///
    /// Returns the total number of keys removed.
    pub fn purge_expired_skipped_keys(&self) -> usize {
        let sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        sessions
            .iter()
            .map(|s| s.purge_expired_skipped_keys())
            .sum()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().cloned().collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self {
            config: RatchetConfig::default(),
            sessions: RwLock::new(HashMap::new()),
            destroyed: RwLock::new(HashSet::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHARED: [u8; 32] = [5u8; 32];

    #[test]
    fn test_create_and_get() {
        let registry = SessionRegistry::default();
        let session = registry.create("s1", &SHARED, true).unwrap();
        assert_eq!(session.session_id().as_str(), "s1");
        assert!(session.is_initiator());

        let fetched = registry.get(&"s1".into()).unwrap();
        assert!(Arc::ptr_eq(&session, &fetched));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = SessionRegistry::default();
        registry.create("dup", &SHARED, true).unwrap();
        assert!(matches!(
            registry.create("dup", &SHARED, false),
            Err(RatchetError::SessionAlreadyExists(_))
        ));
    }

    #[test]
    fn test_not_found() {
        let registry = SessionRegistry::default();
        let id = SessionId::from("nope");
        assert!(matches!(
            registry.get(&id),
            Err(RatchetError::SessionNotFound(_))
        ));
        assert!(matches!(
            registry.encrypt(&id, b"x", None),
            Err(RatchetError::SessionNotFound(_))
        ));
        assert!(registry.destroy(&id).is_err());
    }

    #[test]
    fn test_destroy_idempotent() {
        let registry = SessionRegistry::default();
        let session = registry.create("s", &SHARED, true).unwrap();
        let id = SessionId::from("s");

        assert!(registry.destroy(&id).unwrap());
        assert!(!registry.destroy(&id).unwrap());
        assert!(session.is_destroyed());
        assert!(matches!(
            registry.get(&id),
            Err(RatchetError::SessionDestroyed)
        ));
        assert!(matches!(
            registry.encrypt(&id, b"x", None),
            Err(RatchetError::SessionDestroyed)
        ));
        // A handle held elsewhere is dead too
        assert!(matches!(
            session.encrypt(b"x", None),
            Err(RatchetError::SessionDestroyed)
        ));
    }

    #[test]
    fn test_recreate_after_destroy() {
        let registry = SessionRegistry::default();
        registry.create("s", &SHARED, true).unwrap();
        registry.destroy(&"s".into()).unwrap();
        registry.create("s", &SHARED, true).unwrap();
        assert!(registry.get(&"s".into()).is_ok());
    }

    #[test]
    fn test_destroy_all() {
        let registry = SessionRegistry::default();
        let handles: Vec<_> = (0..4)
            .map(|i| registry.create(format!("s{}", i), &SHARED, i % 2 == 0).unwrap())
            .collect();

        assert_eq!(registry.destroy_all(), 4);
        assert!(registry.is_empty());
        assert!(handles.iter().all(|s| s.is_destroyed()));
        assert_eq!(registry.destroy_all(), 0);
    }

    #[test]
    fn test_forget_destroyed() {
        let registry = SessionRegistry::default();
        for i in 0..3 {
            registry.create(format!("s{}", i), &SHARED, true).unwrap();
        }
        assert_eq!(registry.destroy_all(), 3);
        assert!(matches!(
            registry.get(&"s0".into()),
            Err(RatchetError::SessionDestroyed)
        ));

        assert_eq!(registry.forget_destroyed(), 3);
        assert!(matches!(
            registry.get(&"s0".into()),
            Err(RatchetError::SessionNotFound(_))
        ));
        assert!(registry.destroy(&"s1".into()).is_err());
        assert_eq!(registry.forget_destroyed(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RatchetConfig::new().with_max_skip(0);
        assert!(matches!(
            SessionRegistry::new(config),
            Err(RatchetError::ConfigError(_))
        ));
    }

    #[test]
    fn test_encrypt_decrypt_through_registry() {
        let registry = SessionRegistry::default();
        registry.create("alice", &SHARED, true).unwrap();
        registry.create("bob", &SHARED, false).unwrap();
        let alice = SessionId::from("alice");
        let bob = SessionId::from("bob");

        let env = registry.encrypt(&alice, b"ping", None).unwrap();
        assert_eq!(registry.decrypt(&bob, &env, None).unwrap(), b"ping");

        let env = registry.encrypt(&bob, b"pong", Some(b"ad".as_slice())).unwrap();
        assert_eq!(registry.decrypt(&alice, &env, Some(b"ad".as_slice())).unwrap(), b"pong");
    }
}
