//! Bounded store of message keys for out-of-order delivery.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;
use zeroize::Zeroize;

use crate::error::{RatchetError, Result};
use crate::secret::SecretKey;
use crate::types::PUBLIC_KEY_LEN;

/// Identifies a receiving chain: the remote ratchet public key it was derived from
pub type ChainEpoch = [u8; PUBLIC_KEY_LEN];

/// A derived but not yet consumed message key, waiting to be committed
#[derive(Clone, Zeroize)]
pub(crate) struct PendingKey {
    pub epoch: ChainEpoch,
    pub n: u32,
    pub key: SecretKey,
}

#[derive(Clone)]
struct CachedKey {
    key: SecretKey,
    stored_at: Instant,
}

/// Message keys skipped over while advancing a receiving chain.
///
/// Capacity is a hard limit. A batch that does not fit is refused whole;
/// nothing is ever evicted to make room.
pub struct SkippedKeyCache {
    entries: HashMap<(ChainEpoch, u32), CachedKey>,
    capacity: usize,
}

impl SkippedKeyCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.entries.len())
    }

    /// Peek at a key without consuming it
    pub fn get(&self, epoch: &ChainEpoch, n: u32) -> Option<&SecretKey> {
        self.entries.get(&(*epoch, n)).map(|c| &c.key)
    }

    /// Remove and return a key; it can never be handed out again
    ///
    /// The table slot is wiped before removal, so only the returned copy
    /// holds the key.
    pub fn take(&mut self, epoch: &ChainEpoch, n: u32) -> Option<SecretKey> {
        let cached = self.entries.get_mut(&(*epoch, n))?;
        let key = cached.key.clone();
        cached.key.zeroize();
        self.entries.remove(&(*epoch, n));
        Some(key)
    }

    /// Wipe and remove a key that has just been used
    ///
    /// Returns false if no such key was cached.
    pub fn consume(&mut self, epoch: &ChainEpoch, n: u32) -> bool {
        match self.entries.get_mut(&(*epoch, n)) {
            Some(cached) => {
                cached.key.zeroize();
                self.entries.remove(&(*epoch, n));
                true
            }
            None => false,
        }
    }

    /// Grow the table without leaving key copies in the old allocation
    fn reserve_wiping(&mut self, additional: usize) {
        let wanted = self.entries.len() + additional;
        if self.entries.capacity() >= wanted {
            return;
        }
        let target = (self.entries.capacity() * 2).min(self.capacity).max(wanted);
        let mut grown = HashMap::with_capacity(target);
        for (slot, cached) in self.entries.iter() {
            grown.insert(*slot, cached.clone());
        }
        self.wipe_entries();
        self.entries = grown;
    }

    fn wipe_entries(&mut self) {
        for cached in self.entries.values_mut() {
            cached.key.zeroize();
        }
        self.entries.clear();
    }

    /// Store a batch of keys, all or nothing
    ///
    /// Keys are copied into the table and wiped in `batch`, which is left
    /// empty on success.
    pub(crate) fn insert_all(&mut self, batch: &mut Vec<PendingKey>) -> Result<()> {
        let wanted = self.entries.len() + batch.len();
        if wanted > self.capacity {
            return Err(RatchetError::TooManySkippedMessages {
                requested: wanted as u64,
                max: self.capacity,
            });
        }
        if batch.is_empty() {
            return Ok(());
        }

        let count = batch.len();
        self.reserve_wiping(count);
        let now = Instant::now();
        for pending in batch.iter() {
            self.entries.insert(
                (pending.epoch, pending.n),
                CachedKey {
                    key: pending.key.clone(),
                    stored_at: now,
                },
            );
        }
        batch.zeroize();
        debug!(stored = count, cached = self.entries.len(), "cached skipped message keys");
        Ok(())
    }

    /// Drop every key that has been cached for at least `age`
    ///
    /// Returns the number of keys removed.
    pub fn purge_older_than(&mut self, age: Duration) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, cached| now.saturating_duration_since(cached.stored_at) < age);
        let purged = before - self.entries.len();
        if purged > 0 {
            debug!(purged, cached = self.entries.len(), "purged expired skipped keys");
        }
        purged
    }
}

impl Zeroize for SkippedKeyCache {
    fn zeroize(&mut self) {
        self.wipe_entries();
    }
}

/// Make room for `additional` more pending keys without leaving copies in a
/// reallocated buffer
pub(crate) fn reserve_pending(pending: &mut Vec<PendingKey>, additional: usize) {
    if pending.capacity() - pending.len() >= additional {
        return;
    }
    let mut grown = Vec::with_capacity(pending.len() + additional);
    grown.extend(pending.iter().cloned());
    pending.zeroize();
    *pending = grown;
}

impl std::fmt::Debug for SkippedKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkippedKeyCache")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
