//! Cache entries and their freshness state machine.
//!
//! An entry is Current, Dirty, or BeingProcessed. Transitions are lock-free:
//! status lives in an atomic and the Dirty -> BeingProcessed claim is a
//! compare-and-swap, so exactly one caller wins a refresh even under
//! contention. A claim carries a lease; once the lease expires another
//! caller may take the claim over, which keeps a crashed refresher from
//! wedging the entry forever.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use recall_core::{Response, SessionId, Timestamp};

use crate::dependency::DependencyKey;

// ============================================================================
// EntryStatus
// ============================================================================

/// Freshness state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryStatus {
    /// The entry reflects the backing service.
    Current = 0,
    /// A mutation disturbed the entry; the value may be served stale while
    /// a refresh is arranged.
    Dirty = 1,
    /// One caller holds the refresh claim and is repopulating the entry.
    BeingProcessed = 2,
}

impl EntryStatus {
    fn from_u8(value: u8) -> EntryStatus {
        match value {
            1 => EntryStatus::Dirty,
            2 => EntryStatus::BeingProcessed,
            _ => EntryStatus::Current,
        }
    }
}

// ============================================================================
// InsertTelemetry
// ============================================================================

/// Diagnostics recorded when an entry is populated.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertTelemetry {
    /// Caller identity from the request's telemetry wrapper, when present.
    pub caller: Option<String>,
    /// How long the backing call took.
    pub duration: Duration,
    /// Explicit column projection of the request, empty for all-columns.
    pub columns: Vec<String>,
}

// ============================================================================
// CacheEntry
// ============================================================================

/// One cached response plus its dependency monitors and freshness state.
///
/// Entries are shared behind `Arc`; all mutable state is atomic (or a short
/// critical-section lock for the dirtying session) so readers never need an
/// outer lock to inspect or transition an entry.
#[derive(Debug)]
pub struct CacheEntry {
    /// The cached response.
    pub response: Response,
    /// Dependency keys registered as change monitors for this entry.
    pub dependencies: HashSet<DependencyKey>,
    /// When the entry was populated.
    pub inserted_at: Timestamp,
    /// When the entry stops being servable, if ever.
    pub expires_at: Option<Timestamp>,
    /// Population diagnostics.
    pub telemetry: Option<InsertTelemetry>,

    status: AtomicU8,
    /// Session that dirtied the entry, for stale-read fairness.
    dirty_session: RwLock<Option<SessionId>>,
    /// Millisecond timestamp of the current refresh claim; zero when none.
    claimed_at_ms: AtomicI64,
    access_count: AtomicU64,
    stale_access_count: AtomicU64,
}

impl CacheEntry {
    /// Create a Current entry.
    pub fn new(
        response: Response,
        dependencies: HashSet<DependencyKey>,
        inserted_at: Timestamp,
        expires_at: Option<Timestamp>,
        telemetry: Option<InsertTelemetry>,
    ) -> Self {
        Self {
            response,
            dependencies,
            inserted_at,
            expires_at,
            telemetry,
            status: AtomicU8::new(EntryStatus::Current as u8),
            dirty_session: RwLock::new(None),
            claimed_at_ms: AtomicI64::new(0),
            access_count: AtomicU64::new(0),
            stale_access_count: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> EntryStatus {
        EntryStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Mark the entry Dirty, recording the session that disturbed it.
    pub fn mark_dirty(&self, session: Option<SessionId>) {
        match self.dirty_session.write() {
            Ok(mut guard) => *guard = session,
            Err(poisoned) => *poisoned.into_inner() = session,
        }
        self.claimed_at_ms.store(0, Ordering::SeqCst);
        self.status.store(EntryStatus::Dirty as u8, Ordering::SeqCst);
    }

    /// The session that dirtied the entry, when known.
    pub fn dirty_session(&self) -> Option<SessionId> {
        match self.dirty_session.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Try to win the refresh claim.
    ///
    /// Succeeds for exactly one caller on a Dirty entry, or for one caller
    /// when an existing BeingProcessed claim has outlived `lease`.
    pub fn try_claim(&self, lease: Duration, now: Timestamp) -> bool {
        let now_ms = now.timestamp_millis();

        if self
            .status
            .compare_exchange(
                EntryStatus::Dirty as u8,
                EntryStatus::BeingProcessed as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            self.claimed_at_ms.store(now_ms, Ordering::SeqCst);
            return true;
        }

        if self.status() != EntryStatus::BeingProcessed {
            return false;
        }

        // Lease takeover: the stamp CAS lets exactly one waiter steal an
        // expired claim.
        let claimed = self.claimed_at_ms.load(Ordering::SeqCst);
        if claimed == 0 || now_ms - claimed < lease.as_millis() as i64 {
            return false;
        }
        self.claimed_at_ms
            .compare_exchange(claimed, now_ms, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Return a failed refresh's claim so another caller can retry.
    pub fn release_claim(&self) {
        self.claimed_at_ms.store(0, Ordering::SeqCst);
        self.status.store(EntryStatus::Dirty as u8, Ordering::SeqCst);
    }

    /// True when the entry has outlived its expiration.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }

    /// Count a fresh read.
    pub fn record_access(&self) -> u64 {
        self.access_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count a stale read.
    pub fn record_stale_access(&self) -> u64 {
        self.stale_access_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn accesses(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    pub fn stale_accesses(&self) -> u64 {
        self.stale_access_count.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn entry() -> CacheEntry {
        CacheEntry::new(Response::Updated, HashSet::new(), Utc::now(), None, None)
    }

    #[test]
    fn test_new_entry_is_current() {
        let entry = entry();
        assert_eq!(entry.status(), EntryStatus::Current);
        assert_eq!(entry.accesses(), 0);
        assert_eq!(entry.stale_accesses(), 0);
    }

    #[test]
    fn test_mark_dirty_records_session() {
        let entry = entry();
        let session = Uuid::new_v4();
        entry.mark_dirty(Some(session));

        assert_eq!(entry.status(), EntryStatus::Dirty);
        assert_eq!(entry.dirty_session(), Some(session));
    }

    #[test]
    fn test_only_one_caller_wins_the_claim() {
        let entry = entry();
        entry.mark_dirty(None);
        let lease = Duration::from_secs(30);
        let now = Utc::now();

        assert!(entry.try_claim(lease, now));
        assert_eq!(entry.status(), EntryStatus::BeingProcessed);
        assert!(!entry.try_claim(lease, now));
    }

    #[test]
    fn test_expired_lease_can_be_taken_over() {
        let entry = entry();
        entry.mark_dirty(None);
        let lease = Duration::from_secs(30);
        let claimed_at = Utc::now();

        assert!(entry.try_claim(lease, claimed_at));

        let within_lease = claimed_at + chrono::Duration::seconds(10);
        assert!(!entry.try_claim(lease, within_lease));

        let after_lease = claimed_at + chrono::Duration::seconds(31);
        assert!(entry.try_claim(lease, after_lease));
        // The takeover consumed the stale stamp; the next caller at the
        // same instant loses.
        assert!(!entry.try_claim(lease, after_lease));
    }

    #[test]
    fn test_release_claim_returns_entry_to_dirty() {
        let entry = entry();
        entry.mark_dirty(None);
        let lease = Duration::from_secs(30);

        assert!(entry.try_claim(lease, Utc::now()));
        entry.release_claim();

        assert_eq!(entry.status(), EntryStatus::Dirty);
        assert!(entry.try_claim(lease, Utc::now()));
    }

    #[test]
    fn test_current_entry_cannot_be_claimed() {
        let entry = entry();
        assert!(!entry.try_claim(Duration::from_secs(30), Utc::now()));
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let entry = CacheEntry::new(
            Response::Updated,
            HashSet::new(),
            now,
            Some(now + chrono::Duration::seconds(60)),
            None,
        );

        assert!(!entry.is_expired(now));
        assert!(entry.is_expired(now + chrono::Duration::seconds(60)));
        assert!(!CacheEntry::new(Response::Updated, HashSet::new(), now, None, None)
            .is_expired(now + chrono::Duration::days(365)));
    }

    #[test]
    fn test_access_counters() {
        let entry = entry();
        assert_eq!(entry.record_access(), 1);
        assert_eq!(entry.record_access(), 2);
        assert_eq!(entry.record_stale_access(), 1);
        assert_eq!(entry.accesses(), 2);
        assert_eq!(entry.stale_accesses(), 1);
    }
}
