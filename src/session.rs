//! Double Ratchet session state machine.

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use x25519_dalek::PublicKey;
use zeroize::Zeroize;

use crate::crypto::{generate_nonce, open, seal};
use crate::envelope::{Envelope, Header};
use crate::error::{RatchetError, Result};
use crate::kdf::{chain_step, derive_root_key, root_step};
use crate::keypair::{parse_public, RatchetKeyPair};
use crate::secret::SecretKey;
use crate::skipped::{reserve_pending, ChainEpoch, PendingKey, SkippedKeyCache};
use crate::types::{RatchetConfig, SessionId, PUBLIC_KEY_LEN};

/// One leg of a Double Ratchet conversation
pub struct RatchetSession {
    id: SessionId,
    is_initiator: bool,
    config: RatchetConfig,
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    state: RatchetState,
    skipped: SkippedKeyCache,
    destroyed: bool,
}

/// Everything a decrypt may change, cloned so a rejected message can be
/// thrown away without touching the live session
#[derive(Clone)]
struct RatchetState {
    /// Root key
    root_key: SecretKey,
    /// Chain key for sending
    sending_chain: Option<SecretKey>,
    /// Chain key for receiving
    receiving_chain: Option<SecretKey>,
    /// Our current ratchet key pair (responder has none until first receive)
    local: Option<RatchetKeyPair>,
    /// Peer's latest ratchet public key
    remote: Option<PublicKey>,

    /// Send message counter
    send_count: u32,
    /// Receive message counter
    recv_count: u32,
    /// Length of our previous sending chain
    prev_chain_len: u32,
}

impl RatchetState {
    fn remote_epoch(&self) -> Option<ChainEpoch> {
        self.remote.map(|r| r.to_bytes())
    }

    /// Advance the receiving chain to `target`, staging every skipped key.
    ///
    /// `room` is what the cache can still accept.
    fn skip_to(
        &mut self,
        epoch: ChainEpoch,
        target: u32,
        max_skip: usize,
        room: usize,
        pending: &mut Vec<PendingKey>,
    ) -> Result<()> {
        if target <= self.recv_count {
            return Ok(());
        }
        let Some(mut ck) = self.receiving_chain.take() else {
            return Ok(());
        };

        let needed = (target - self.recv_count) as usize;
        if needed > max_skip {
            self.receiving_chain = Some(ck);
            return Err(RatchetError::TooManySkippedMessages {
                requested: needed as u64,
                max: max_skip,
            });
        }
        if pending.len() + needed > room {
            self.receiving_chain = Some(ck);
            return Err(RatchetError::TooManySkippedMessages {
                requested: (max_skip - room + pending.len() + needed) as u64,
                max: max_skip,
            });
        }

        reserve_pending(pending, needed);
        while self.recv_count < target {
            let (next, mk) = chain_step(&ck);
            pending.push(PendingKey {
                epoch,
                n: self.recv_count,
                key: mk,
            });
            ck = next;
            self.recv_count += 1;
        }
        self.receiving_chain = Some(ck);
        Ok(())
    }

    /// DH ratchet step on a new remote key
    fn dh_ratchet(&mut self, remote: PublicKey) -> Result<()> {
        let local = self
            .local
            .as_ref()
            .ok_or_else(|| RatchetError::DecryptionFailed("no local ratchet key".into()))?;

        let dh = local.agree(&remote)?;
        let (rk, ckr) = root_step(&self.root_key, dh.as_bytes());

        let next_local = RatchetKeyPair::generate();
        let dh2 = next_local.agree(&remote)?;
        let (rk, cks) = root_step(&rk, dh2.as_bytes());

        self.prev_chain_len = self.send_count;
        self.send_count = 0;
        self.recv_count = 0;
        self.remote = Some(remote);
        self.root_key = rk;
        self.receiving_chain = Some(ckr);
        self.sending_chain = Some(cks);
        // Old pair is wiped on drop
        self.local = Some(next_local);
        Ok(())
    }

    /// Responder's first receive: mirror the initiator's bootstrap, then
    /// create our own key pair and sending chain
    fn bootstrap_receiving(&mut self, remote: PublicKey) -> Result<()> {
        let (rk, ckr) = root_step(&self.root_key, remote.as_bytes());

        let local = RatchetKeyPair::generate();
        let dh = local.agree(&remote)?;
        let (rk, cks) = root_step(&rk, dh.as_bytes());

        self.prev_chain_len = self.send_count;
        self.send_count = 0;
        self.recv_count = 0;
        self.remote = Some(remote);
        self.root_key = rk;
        self.receiving_chain = Some(ckr);
        self.sending_chain = Some(cks);
        self.local = Some(local);
        Ok(())
    }
}

impl Zeroize for RatchetState {
    fn zeroize(&mut self) {
        self.root_key.zeroize();
        if let Some(ck) = self.sending_chain.as_mut() {
            ck.zeroize();
        }
        if let Some(ck) = self.receiving_chain.as_mut() {
            ck.zeroize();
        }
        if let Some(kp) = self.local.as_mut() {
            kp.zeroize();
        }
        self.remote = None;
        self.send_count = 0;
        self.recv_count = 0;
        self.prev_chain_len = 0;
    }
}

impl RatchetSession {
    /// Create a session from the out-of-band shared secret
    ///
    /// # Arguments
    /// * `id` - Session identifier
    /// * `shared_secret` - Handshake output, at least 32 bytes
    /// * `is_initiator` - Whether this side sends first
    /// * `config` - Session limits
    pub fn new(
        id: SessionId,
        shared_secret: &[u8],
        is_initiator: bool,
        config: RatchetConfig,
    ) -> Result<Self> {
        config.validate()?;
        let root_key = derive_root_key(shared_secret)?;
        let local = is_initiator.then(RatchetKeyPair::generate);

        Ok(Self {
            inner: Mutex::new(SessionInner {
                state: RatchetState {
                    root_key,
                    sending_chain: None,
                    receiving_chain: None,
                    local,
                    remote: None,
                    send_count: 0,
                    recv_count: 0,
                    prev_chain_len: 0,
                },
                skipped: SkippedKeyCache::new(config.max_skip),
                destroyed: false,
            }),
            id,
            is_initiator,
            config,
        })
    }

    /// Encrypt a message on the sending chain
    pub fn encrypt(&self, plaintext: &[u8], ad: Option<&[u8]>) -> Result<Envelope> {
        if plaintext.len() > self.config.max_message_len {
            return Err(RatchetError::MessageTooLarge {
                len: plaintext.len(),
                max: self.config.max_message_len,
            });
        }

        let mut inner = self.inner.lock();
        if inner.destroyed {
            return Err(RatchetError::SessionDestroyed);
        }
        let state = &mut inner.state;

        // Initiator's first send derives the first sending chain from its own key
        let (root_key, ck) = match state.sending_chain.as_ref() {
            Some(ck) => (None, ck.clone()),
            None => match (&state.local, state.remote) {
                (Some(local), None) if self.is_initiator => {
                    let (rk, ck) = root_step(&state.root_key, local.public().as_bytes());
                    (Some(rk), ck)
                }
                _ => return Err(RatchetError::SendingChainUnavailable),
            },
        };
        let local = state
            .local
            .as_ref()
            .ok_or(RatchetError::SendingChainUnavailable)?;
        let next_count = state
            .send_count
            .checked_add(1)
            .ok_or(RatchetError::EncryptionFailed)?;

        let (next_ck, mk) = chain_step(&ck);
        let header = Header {
            dh: local.public_bytes(),
            pn: state.prev_chain_len,
            n: state.send_count,
        };
        let aad = header.associated_data(ad.unwrap_or_default());
        let nonce = generate_nonce();
        let ciphertext = seal(&mk, &nonce, &aad, plaintext)?;
        drop(mk);

        if let Some(rk) = root_key {
            debug!(session = %self.id, "derived initial sending chain");
            state.root_key = rk;
        }
        state.sending_chain = Some(next_ck);
        state.send_count = next_count;

        debug!(
            session = %self.id,
            n = header.n,
            pn = header.pn,
            len = plaintext.len(),
            "encrypted message"
        );
        Ok(Envelope {
            header,
            nonce,
            ciphertext,
        })
    }

    /// Decrypt a message, ratcheting forward as the header demands.
    ///
    /// A failed decrypt leaves the session exactly as it was.
    pub fn decrypt(&self, envelope: &Envelope, ad: Option<&[u8]>) -> Result<Vec<u8>> {
        envelope.validate()?;

        let mut inner = self.inner.lock();
        if inner.destroyed {
            return Err(RatchetError::SessionDestroyed);
        }
        if let Some(age) = self.config.skipped_key_max_age {
            inner.skipped.purge_older_than(age);
        }

        let header = &envelope.header;
        let aad = header.associated_data(ad.unwrap_or_default());

        // Keys cached for out-of-order delivery are consumed only on success
        if let Some(mk) = inner.skipped.get(&header.dh, header.n) {
            let pt = open(mk, &envelope.nonce, &aad, &envelope.ciphertext).map_err(|e| {
                warn!(session = %self.id, n = header.n, "cached key failed to authenticate");
                e
            })?;
            inner.skipped.consume(&header.dh, header.n);
            debug!(
                session = %self.id,
                n = header.n,
                cached = inner.skipped.len(),
                "decrypted with skipped key"
            );
            return Ok(pt);
        }

        let mut staged = inner.state.clone();
        let mut pending = Vec::new();
        let room = inner.skipped.remaining_capacity();
        let max_skip = self.config.max_skip;

        let remote_changed = staged.remote_epoch() != Some(header.dh);
        if remote_changed {
            let remote = parse_public(&header.dh)?;
            if let Some(prev_epoch) = staged.remote_epoch() {
                staged.skip_to(prev_epoch, header.pn, max_skip, room, &mut pending)?;
            }
            if staged.local.is_none() {
                staged.bootstrap_receiving(remote)?;
                debug!(session = %self.id, "derived initial receiving chain");
            } else {
                staged.dh_ratchet(remote)?;
                debug!(session = %self.id, pn = header.pn, "dh ratchet step");
            }
        }

        staged.skip_to(header.dh, header.n, max_skip, room, &mut pending)?;

        if header.n < staged.recv_count {
            warn!(
                session = %self.id,
                n = header.n,
                recv = staged.recv_count,
                "message key already consumed"
            );
            return Err(RatchetError::DecryptionFailed(
                "message key already consumed".into(),
            ));
        }

        let ck = staged
            .receiving_chain
            .as_ref()
            .ok_or_else(|| RatchetError::DecryptionFailed("no receiving chain".into()))?;
        let (next_ck, mk) = chain_step(ck);
        staged.receiving_chain = Some(next_ck);
        staged.recv_count = header
            .n
            .checked_add(1)
            .ok_or_else(|| RatchetError::DecryptionFailed("message index overflow".into()))?;

        let pt = open(&mk, &envelope.nonce, &aad, &envelope.ciphertext).map_err(|e| {
            warn!(session = %self.id, n = header.n, "message failed to authenticate");
            e
        })?;

        let skipped = pending.len();
        inner.skipped.insert_all(&mut pending)?;
        inner.state = staged;

        debug!(
            session = %self.id,
            n = header.n,
            skipped,
            cached = inner.skipped.len(),
            "decrypted message"
        );
        Ok(pt)
    }

    /// Wipe every secret in place and mark the session destroyed.
    ///
    /// Returns false if it was already destroyed.
    pub fn destroy(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.destroyed {
            return false;
        }
        inner.state.zeroize();
        inner.skipped.zeroize();
        inner.destroyed = true;
        info!(session = %self.id, "session destroyed");
        true
    }

    /// Purge cached keys older than the configured maximum age
    ///
    /// Returns the number of keys removed.
    pub fn purge_expired_skipped_keys(&self) -> usize {
        let Some(age) = self.config.skipped_key_max_age else {
            return 0;
        };
        let mut inner = self.inner.lock();
        if inner.destroyed {
            return 0;
        }
        inner.skipped.purge_older_than(age)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.id
    }

    pub fn is_initiator(&self) -> bool {
        self.is_initiator
    }

    pub fn config(&self) -> &RatchetConfig {
        &self.config
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().destroyed
    }

    pub fn send_count(&self) -> u32 {
        self.inner.lock().state.send_count
    }

    pub fn recv_count(&self) -> u32 {
        self.inner.lock().state.recv_count
    }

    pub fn prev_chain_len(&self) -> u32 {
        self.inner.lock().state.prev_chain_len
    }

    pub fn skipped_key_count(&self) -> usize {
        self.inner.lock().skipped.len()
    }

    /// Our current ratchet public key, if we have one yet
    pub fn local_public_key(&self) -> Option<[u8; PUBLIC_KEY_LEN]> {
        let inner = self.inner.lock();
        if inner.destroyed {
            return None;
        }
        inner.state.local.as_ref().map(RatchetKeyPair::public_bytes)
    }

    /// Test-only view into the secret fields after destroy
    #[cfg(test)]
    pub(crate) fn secrets_are_wiped(&self) -> bool {
        let inner = self.inner.lock();
        let state = &inner.state;
        state.root_key.is_zeroed()
            && state
                .sending_chain
                .as_ref()
                .map_or(true, SecretKey::is_zeroed)
            && state
                .receiving_chain
                .as_ref()
                .map_or(true, SecretKey::is_zeroed)
            && state
                .local
                .as_ref()
                .map_or(true, RatchetKeyPair::secret_is_zeroed)
            && inner.skipped.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn cached_key_ptr(&self, epoch: &ChainEpoch, n: u32) -> Option<*const u8> {
        let inner = self.inner.lock();
        inner.skipped.get(epoch, n).map(|k| k.as_bytes().as_ptr())
    }

    #[cfg(test)]
    pub(crate) fn receiving_chain_bytes(&self) -> Option<[u8; 32]> {
        let inner = self.inner.lock();
        inner.state.receiving_chain.as_ref().map(|ck| *ck.as_bytes())
    }
}

impl std::fmt::Debug for RatchetSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatchetSession")
            .field("id", &self.id)
            .field("is_initiator", &self.is_initiator)
            .finish_non_exhaustive()
    }
}
