//! In-memory authoritative store for live single-use tokens.
//!
//! The store is sharded: each id hashes to one of a fixed set of
//! mutex-guarded maps, so consumption of unrelated tokens never contends
//! on a single lock, while check-and-mark for one id is a single critical
//! section. Expiry sweeps take the same shard locks, which makes removal
//! and consumption of the same id mutually exclusive.

use crate::codec::claims::TokenPurpose;
use crate::error::TokenError;
use crate::store::generator::TokenIdGenerator;
use crate::store::record::{TokenRecord, TokenState};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

const SHARD_COUNT: usize = 16;

fn shard_index(id: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    (hasher.finish() as usize) % SHARD_COUNT
}

/// Outcome of an [`ExpiringSet`] insertion, so the caller can keep the
/// live-entry count in step with the actual map sizes.
enum InsertOutcome {
    /// A new entry was added.
    Inserted,
    /// An expired entry with the same id was overwritten; the map did
    /// not grow.
    ReplacedExpired,
    /// The id is already present and live.
    AlreadyPresent,
}

/// Sharded id set with per-entry expiry. Backs the bearer revocation
/// list and assertion replay tracking.
struct ExpiringSet {
    shards: Vec<Mutex<HashMap<String, DateTime<Utc>>>>,
}

impl ExpiringSet {
    fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn insert_new(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> InsertOutcome {
        let mut shard = self.shards[shard_index(id)].lock();
        match shard.get(id) {
            Some(existing) if *existing > now => InsertOutcome::AlreadyPresent,
            Some(_) => {
                shard.insert(id.to_string(), expires_at);
                InsertOutcome::ReplacedExpired
            }
            None => {
                shard.insert(id.to_string(), expires_at);
                InsertOutcome::Inserted
            }
        }
    }

    fn contains(&self, id: &str, now: DateTime<Utc>) -> bool {
        self.shards[shard_index(id)]
            .lock()
            .get(id)
            .is_some_and(|expires_at| *expires_at > now)
    }

    fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut guard = shard.lock();
            let before = guard.len();
            guard.retain(|_, expires_at| *expires_at > now);
            removed += before - guard.len();
        }
        removed
    }
}

/// Authoritative record of live single-use tokens, revocations and seen
/// assertion ids, bounded by a configured capacity.
pub struct InMemoryTokenStore {
    records: Vec<Mutex<HashMap<String, TokenRecord>>>,
    revocations: ExpiringSet,
    assertions: ExpiringSet,
    live: AtomicUsize,
    capacity: usize,
}

impl InMemoryTokenStore {
    /// Create a store bounded to `capacity` live entries across records,
    /// revocations and replay marks.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            records: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            revocations: ExpiringSet::new(),
            assertions: ExpiringSet::new(),
            live: AtomicUsize::new(0),
            capacity,
        }
    }

    fn reserve_slot(&self) -> Result<(), TokenError> {
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n >= self.capacity {
                    None
                } else {
                    Some(n + 1)
                }
            })
            .map(|_| ())
            .map_err(|_| TokenError::CapacityExceeded)
    }

    fn release_slots(&self, count: usize) {
        if count > 0 {
            self.live.fetch_sub(count, Ordering::SeqCst);
        }
    }

    /// Mint and record a fresh token.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` when the store bound is hit.
    pub fn issue(
        &self,
        purpose: TokenPurpose,
        subject: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<TokenRecord, TokenError> {
        self.reserve_slot()?;

        let ttl = chrono::Duration::from_std(ttl).map_err(|_| {
            self.release_slots(1);
            TokenError::config("Token TTL out of range")
        })?;

        let id = TokenIdGenerator::generate();
        let record = TokenRecord::new(
            id.clone(),
            purpose,
            subject.to_string(),
            now,
            now + ttl,
        );

        // 256-bit random ids do not collide in practice
        self.records[shard_index(&id)]
            .lock()
            .insert(id, record.clone());

        debug!(jti = %record.id, purpose = record.purpose.as_str(), "Issued token");
        Ok(record)
    }

    /// Atomically check and consume a token: existence, expiry and state
    /// are evaluated and the terminal transition applied under one shard
    /// lock, so two concurrent consumes of the same id can never both
    /// succeed.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Expired` or `AlreadyConsumed`.
    pub fn consume(&self, id: &str, now: DateTime<Utc>) -> Result<TokenRecord, TokenError> {
        let mut shard = self.records[shard_index(id)].lock();
        let record = shard.get_mut(id).ok_or(TokenError::NotFound)?;

        if record.is_expired_at(now) {
            return Err(TokenError::Expired);
        }
        if record.state != TokenState::Issued {
            warn!(jti = %id, "Attempted reuse of consumed token");
            return Err(TokenError::AlreadyConsumed);
        }

        record.mark_consumed(now);
        Ok(record.clone())
    }

    /// Validity check without consuming; used for CSRF re-validation.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Expired` or `AlreadyConsumed`.
    pub fn check(&self, id: &str, now: DateTime<Utc>) -> Result<(), TokenError> {
        let shard = self.records[shard_index(id)].lock();
        let record = shard.get(id).ok_or(TokenError::NotFound)?;

        if record.is_expired_at(now) {
            return Err(TokenError::Expired);
        }
        if record.state != TokenState::Issued {
            return Err(TokenError::AlreadyConsumed);
        }
        Ok(())
    }

    /// Forcibly invalidate a tracked token. Idempotent: revoking a
    /// consumed, revoked or unknown id is a no-op.
    pub fn revoke(&self, id: &str, now: DateTime<Utc>) {
        let mut shard = self.records[shard_index(id)].lock();
        if let Some(record) = shard.get_mut(id) {
            if record.state == TokenState::Issued {
                record.mark_revoked(now);
                warn!(jti = %id, "Revoked token");
            }
        }
    }

    /// Add a bearer jti to the revocation list until its expiry.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` when the store bound is hit.
    pub fn add_to_revocation_list(
        &self,
        jti: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), TokenError> {
        self.reserve_slot()?;
        match self.revocations.insert_new(jti, expires_at, now) {
            InsertOutcome::Inserted => {
                warn!(jti = %jti, "Added bearer token to revocation list");
            }
            InsertOutcome::ReplacedExpired | InsertOutcome::AlreadyPresent => {
                self.release_slots(1);
            }
        }
        Ok(())
    }

    /// Whether a bearer jti has been revoked.
    #[must_use]
    pub fn is_revoked(&self, jti: &str, now: DateTime<Utc>) -> bool {
        self.revocations.contains(jti, now)
    }

    /// Record an assertion id the first time it is presented.
    ///
    /// # Errors
    ///
    /// `AlreadyConsumed` when the id was presented before,
    /// `CapacityExceeded` when the store bound is hit.
    pub fn claim_once(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), TokenError> {
        self.reserve_slot()?;
        match self.assertions.insert_new(id, expires_at, now) {
            InsertOutcome::Inserted => Ok(()),
            InsertOutcome::ReplacedExpired => {
                self.release_slots(1);
                Ok(())
            }
            InsertOutcome::AlreadyPresent => {
                self.release_slots(1);
                Err(TokenError::AlreadyConsumed)
            }
        }
    }

    /// Remove expired entries. Safe to run concurrently with issuance
    /// and consumption; each shard is drained under the same lock
    /// `consume` takes.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for shard in &self.records {
            let mut guard = shard.lock();
            let before = guard.len();
            guard.retain(|_, record| !record.is_expired_at(now));
            removed += before - guard.len();
        }
        removed += self.revocations.sweep(now);
        removed += self.assertions.sweep(now);

        self.release_slots(removed);
        if removed > 0 {
            info!(removed, "Swept expired token entries");
        }
        removed
    }

    /// Number of live entries across all shards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Whether the store holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ts: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(ts, 0).unwrap()
    }

    fn store() -> InMemoryTokenStore {
        InMemoryTokenStore::new(1024)
    }

    #[test]
    fn test_issue_and_consume_once() {
        let store = store();
        let now = at(1_000);

        let record = store
            .issue(
                TokenPurpose::PasswordReset,
                "alice@example.com",
                Duration::from_secs(900),
                now,
            )
            .unwrap();

        let consumed = store.consume(&record.id, at(1_100)).unwrap();
        assert_eq!(consumed.subject, "alice@example.com");
        assert_eq!(consumed.state, TokenState::Consumed);

        assert_eq!(
            store.consume(&record.id, at(1_200)),
            Err(TokenError::AlreadyConsumed)
        );
    }

    #[test]
    fn test_consume_unknown_id() {
        let store = store();
        assert_eq!(
            store.consume("missing", at(1_000)),
            Err(TokenError::NotFound)
        );
    }

    #[test]
    fn test_consume_expired() {
        let store = store();
        let record = store
            .issue(
                TokenPurpose::PasswordReset,
                "alice@example.com",
                Duration::from_secs(900),
                at(1_000),
            )
            .unwrap();

        assert_eq!(
            store.consume(&record.id, at(1_900)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_check_does_not_consume() {
        let store = store();
        let record = store
            .issue(
                TokenPurpose::Csrf,
                "sid-hash",
                Duration::from_secs(3600),
                at(1_000),
            )
            .unwrap();

        store.check(&record.id, at(1_100)).unwrap();
        store.check(&record.id, at(1_200)).unwrap();
        store.consume(&record.id, at(1_300)).unwrap();
        assert_eq!(
            store.check(&record.id, at(1_400)),
            Err(TokenError::AlreadyConsumed)
        );
    }

    #[test]
    fn test_revoke_is_idempotent() {
        let store = store();
        let record = store
            .issue(
                TokenPurpose::PasswordReset,
                "alice@example.com",
                Duration::from_secs(900),
                at(1_000),
            )
            .unwrap();

        store.revoke(&record.id, at(1_100));
        store.revoke(&record.id, at(1_200));
        store.revoke("unknown-id", at(1_200));

        assert_eq!(
            store.consume(&record.id, at(1_300)),
            Err(TokenError::AlreadyConsumed)
        );
    }

    #[test]
    fn test_capacity_bound() {
        let store = InMemoryTokenStore::new(2);
        let now = at(1_000);
        let ttl = Duration::from_secs(900);

        store.issue(TokenPurpose::PasswordReset, "a", ttl, now).unwrap();
        store.issue(TokenPurpose::PasswordReset, "b", ttl, now).unwrap();
        assert_eq!(
            store
                .issue(TokenPurpose::PasswordReset, "c", ttl, now)
                .unwrap_err(),
            TokenError::CapacityExceeded
        );

        // Sweeping expired entries frees capacity again
        assert_eq!(store.sweep_expired(at(2_000)), 2);
        assert!(store
            .issue(TokenPurpose::PasswordReset, "c", ttl, at(2_000))
            .is_ok());
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let store = store();
        let short = store
            .issue(
                TokenPurpose::PasswordReset,
                "a",
                Duration::from_secs(100),
                at(1_000),
            )
            .unwrap();
        let long = store
            .issue(
                TokenPurpose::PasswordReset,
                "b",
                Duration::from_secs(10_000),
                at(1_000),
            )
            .unwrap();

        assert_eq!(store.sweep_expired(at(1_200)), 1);
        assert_eq!(store.consume(&short.id, at(1_250)), Err(TokenError::NotFound));
        assert!(store.consume(&long.id, at(1_250)).is_ok());
    }

    #[test]
    fn test_revocation_list() {
        let store = store();
        let now = at(1_000);

        assert!(!store.is_revoked("jti-1", now));
        store.add_to_revocation_list("jti-1", at(2_000), now).unwrap();
        assert!(store.is_revoked("jti-1", now));

        // Entry lapses with the token's own expiry
        assert!(!store.is_revoked("jti-1", at(2_000)));
    }

    #[test]
    fn test_claim_once_blocks_second_claim() {
        let store = store();
        let now = at(1_000);

        store.claim_once("assertion-1", at(2_000), now).unwrap();
        assert_eq!(
            store.claim_once("assertion-1", at(2_000), at(1_100)),
            Err(TokenError::AlreadyConsumed)
        );
    }

    #[test]
    fn test_len_tracks_all_entry_kinds() {
        let store = store();
        let now = at(1_000);

        store
            .issue(
                TokenPurpose::PasswordReset,
                "a",
                Duration::from_secs(100),
                now,
            )
            .unwrap();
        store.add_to_revocation_list("jti-1", at(1_200), now).unwrap();
        store.claim_once("assertion-1", at(1_200), now).unwrap();
        assert_eq!(store.len(), 3);

        store.sweep_expired(at(5_000));
        assert!(store.is_empty());
    }
}
