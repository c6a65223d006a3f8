//! Read-through orchestration over an [`ObjectStore`].
//!
//! `ServiceCache::execute_with` is the single entry point for reads: it
//! builds the cache key, consults the store, and either serves the entry or
//! populates it from the backing service. Dirty entries are refreshed
//! stale-while-revalidate: exactly one caller wins the refresh claim, the
//! session that caused the invalidation blocks (bounded) until the refresh
//! lands so it never reads its own stale write, and every other session is
//! served the stale value immediately.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use recall_core::{
    classify, ColumnSet, Envelope, RecallResult, Request, RequestFlags, Response, SessionId,
};

use crate::config::CacheOptions;
use crate::dependency::DependencyCalculator;
use crate::entry::{CacheEntry, EntryStatus, InsertTelemetry};
use crate::key::CacheKeyBuilder;
use crate::store::{ObjectStore, Region};

// ============================================================================
// Backend
// ============================================================================

/// The backing entity service.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute one terminal request against the service.
    async fn execute(&self, request: &Request) -> RecallResult<Response>;
}

// ============================================================================
// CallContext
// ============================================================================

/// Per-call identity, carried explicitly rather than read from ambient
/// state.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// The logical session this call belongs to, when known.
    pub session: Option<SessionId>,
}

impl CallContext {
    /// A call with no session identity.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A call belonging to the given session.
    pub fn for_session(session: SessionId) -> Self {
        Self {
            session: Some(session),
        }
    }
}

// ============================================================================
// SessionLocks
// ============================================================================

/// Per-session refresh locks.
///
/// A refresher holds the lock of the session that dirtied the entry;
/// same-session readers wait on it (bounded) so they observe the refreshed
/// value instead of their own stale write.
#[derive(Default)]
struct SessionLocks {
    locks: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    async fn lock_for(&self, session: SessionId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        // Drop locks nobody holds anymore before the map can grow unbounded.
        if locks.len() > 1024 {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        locks.entry(session).or_default().clone()
    }
}

// ============================================================================
// ServiceCache
// ============================================================================

/// Dependency-aware read-through cache in front of the entity service.
pub struct ServiceCache<S: ObjectStore> {
    store: Arc<S>,
    keys: CacheKeyBuilder,
    calculator: DependencyCalculator,
    sessions: SessionLocks,
    options: CacheOptions,
}

impl<S: ObjectStore> ServiceCache<S> {
    /// Create a cache over the given store. Fails when options are
    /// inconsistent.
    pub fn new(store: Arc<S>, options: CacheOptions) -> RecallResult<Self> {
        options.validate()?;
        Ok(Self {
            store,
            keys: CacheKeyBuilder::new(options.key_prefix.clone(), options.hash_keys),
            calculator: DependencyCalculator::new(),
            sessions: SessionLocks::default(),
            options,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn calculator(&self) -> &DependencyCalculator {
        &self.calculator
    }

    pub(crate) fn key_builder(&self) -> &CacheKeyBuilder {
        &self.keys
    }

    /// Execute a wrapped request, serving from cache where possible.
    pub async fn execute<B>(
        &self,
        envelope: &Envelope,
        backend: &B,
        context: &CallContext,
    ) -> RecallResult<Response>
    where
        B: Backend + ?Sized,
    {
        self.execute_with(envelope, backend, None, context, Response::clone)
            .await
    }

    /// Execute a wrapped request and project the response through `select`.
    ///
    /// `selector_key` must identify the projection: two different selectors
    /// over the same request get separate entries.
    pub async fn execute_with<B, T, F>(
        &self,
        envelope: &Envelope,
        backend: &B,
        selector_key: Option<&str>,
        context: &CallContext,
        select: F,
    ) -> RecallResult<T>
    where
        B: Backend + ?Sized,
        F: Fn(&Response) -> T,
    {
        let (request, flags) = envelope.unwrap_terminal()?;

        if !self.options.enabled || flags.bypass_cache || !classify::is_cacheable(request) {
            let response = backend.execute(request).await?;
            return Ok(select(&response));
        }

        let region = Region::from(classify::classify(request));
        let key = self.keys.key(envelope, selector_key)?;

        if let Some(entry) = self.store.get(&key, region).await {
            if entry.is_expired(Utc::now()) {
                debug!(key = %key, region = region.name(), "cache entry expired");
                self.store.remove(&key, region).await;
            } else {
                match entry.status() {
                    EntryStatus::Current => {
                        entry.record_access();
                        return Ok(select(&entry.response));
                    }
                    EntryStatus::Dirty | EntryStatus::BeingProcessed => {
                        return self
                            .serve_dirty(
                                entry, &key, region, request, &flags, backend, context, &select,
                            )
                            .await;
                    }
                }
            }
        }

        let entry = self.populate(&key, region, request, &flags, backend).await?;
        Ok(select(&entry.response))
    }

    /// Miss path: fetch from the backing service and store the result.
    async fn populate<B>(
        &self,
        key: &str,
        region: Region,
        request: &Request,
        flags: &RequestFlags,
        backend: &B,
    ) -> RecallResult<Arc<CacheEntry>>
    where
        B: Backend + ?Sized,
    {
        let started = Instant::now();
        let response = backend.execute(request).await?;
        let entry = self.build_entry(request, flags, response, started)?;

        // Concurrent misses race benignly here; whichever entry lands first
        // is served to both callers.
        let stored = self.store.get_or_insert(key, region, entry).await;
        debug!(
            key,
            region = region.name(),
            dependencies = stored.dependencies.len(),
            "cache populated"
        );
        Ok(stored)
    }

    /// Replace a dirty entry with a fresh one.
    async fn refresh<B>(
        &self,
        key: &str,
        region: Region,
        request: &Request,
        flags: &RequestFlags,
        backend: &B,
    ) -> RecallResult<Arc<CacheEntry>>
    where
        B: Backend + ?Sized,
    {
        let started = Instant::now();
        let response = backend.execute(request).await?;
        let entry = self.build_entry(request, flags, response, started)?;
        self.store.insert(key, region, entry.clone()).await?;
        debug!(key, region = region.name(), "cache entry refreshed");
        Ok(entry)
    }

    /// A reader found the entry Dirty or BeingProcessed.
    #[allow(clippy::too_many_arguments)]
    async fn serve_dirty<B, T, F>(
        &self,
        entry: Arc<CacheEntry>,
        key: &str,
        region: Region,
        request: &Request,
        flags: &RequestFlags,
        backend: &B,
        context: &CallContext,
        select: &F,
    ) -> RecallResult<T>
    where
        B: Backend + ?Sized,
        F: Fn(&Response) -> T,
    {
        if !self.options.stale_reads_allowed {
            // Removal-policy stores never hold dirty entries, but an entry
            // dirtied under an earlier policy must still refresh.
            let fresh = self.refresh(key, region, request, flags, backend).await?;
            fresh.record_access();
            return Ok(select(&fresh.response));
        }

        let owner = entry.dirty_session();
        let lock_session = owner.unwrap_or_else(Uuid::nil);

        if entry.try_claim(self.options.refresh_lease, Utc::now()) {
            let lock = self.sessions.lock_for(lock_session).await;
            let guard = lock.lock().await;
            let result = self.refresh(key, region, request, flags, backend).await;
            drop(guard);
            return match result {
                Ok(fresh) => {
                    fresh.record_access();
                    Ok(select(&fresh.response))
                }
                Err(error) => {
                    entry.release_claim();
                    warn!(key, %error, "cache refresh failed, claim released");
                    Err(error)
                }
            };
        }

        let same_session = context.session.is_some() && context.session == owner;
        if same_session && !flags.allow_stale {
            return self
                .await_refresh(entry, key, region, request, flags, backend, lock_session, select)
                .await;
        }

        // Another session's write dirtied this entry; this caller may keep
        // reading the stale value while the refresh is in flight.
        entry.record_stale_access();
        debug!(key, "serving stale value during refresh");
        Ok(select(&entry.response))
    }

    /// The owner session waits (bounded) for the in-flight refresh.
    #[allow(clippy::too_many_arguments)]
    async fn await_refresh<B, T, F>(
        &self,
        entry: Arc<CacheEntry>,
        key: &str,
        region: Region,
        request: &Request,
        flags: &RequestFlags,
        backend: &B,
        lock_session: SessionId,
        select: &F,
    ) -> RecallResult<T>
    where
        B: Backend + ?Sized,
        F: Fn(&Response) -> T,
    {
        let lock = self.sessions.lock_for(lock_session).await;
        let waited = tokio::time::timeout(self.options.lock_timeout, lock.lock()).await;
        match waited {
            Ok(guard) => {
                if let Some(fresh) = self.store.get(key, region).await {
                    if fresh.status() == EntryStatus::Current && !fresh.is_expired(Utc::now()) {
                        fresh.record_access();
                        return Ok(select(&fresh.response));
                    }
                }
                // The prior refresh failed or the entry went away. Only the
                // claim holder may go to the service: if the claim is still
                // held elsewhere a second refresh must not start, so this
                // caller falls back to the stale value instead.
                if entry.try_claim(self.options.refresh_lease, Utc::now()) {
                    let result = self.refresh(key, region, request, flags, backend).await;
                    drop(guard);
                    match result {
                        Ok(fresh) => {
                            fresh.record_access();
                            Ok(select(&fresh.response))
                        }
                        Err(error) => {
                            entry.release_claim();
                            warn!(key, %error, "cache refresh failed, claim released");
                            Err(error)
                        }
                    }
                } else {
                    drop(guard);
                    entry.record_stale_access();
                    debug!(key, "refresh still claimed elsewhere, serving stale value");
                    Ok(select(&entry.response))
                }
            }
            Err(_) => {
                warn!(
                    key,
                    timeout_ms = self.options.lock_timeout.as_millis() as u64,
                    "refresh wait timed out, serving stale value"
                );
                entry.record_stale_access();
                Ok(select(&entry.response))
            }
        }
    }

    fn build_entry(
        &self,
        request: &Request,
        flags: &RequestFlags,
        response: Response,
        started: Instant,
    ) -> RecallResult<Arc<CacheEntry>> {
        let now = Utc::now();
        let dependencies: HashSet<_> = if flags.skip_dependencies {
            HashSet::new()
        } else {
            self.calculator
                .for_response(request, &response, flags.single_result)?
                .into_iter()
                .collect()
        };

        let expires_at = flags.expires.or_else(|| {
            self.options
                .default_expiration
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .map(|d| now + d)
        });

        let telemetry = InsertTelemetry {
            caller: flags.caller.clone(),
            duration: started.elapsed(),
            columns: selected_columns(request),
        };

        Ok(Arc::new(CacheEntry::new(
            response,
            dependencies,
            now,
            expires_at,
            Some(telemetry),
        )))
    }
}

/// The explicit column projection of a request, empty for all-columns.
fn selected_columns(request: &Request) -> Vec<String> {
    match request {
        Request::Retrieve {
            columns: ColumnSet::Columns(columns),
            ..
        }
        | Request::RetrieveWithRelated {
            columns: ColumnSet::Columns(columns),
            ..
        } => columns.clone(),
        _ => Vec::new(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use recall_core::{BackendError, Entity};

    use super::*;
    use crate::store::MemoryStore;

    /// Backend that always answers with the configured entity and counts
    /// calls.
    struct MockBackend {
        entity: std::sync::Mutex<Entity>,
        calls: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    impl MockBackend {
        fn returning(entity: Entity) -> Self {
            Self {
                entity: std::sync::Mutex::new(entity),
                calls: AtomicUsize::new(0),
                fail: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_entity(&self, entity: Entity) {
            *self.entity.lock().unwrap() = entity;
        }

        fn set_failing(&self, failing: bool) {
            self.fail.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        async fn execute(&self, request: &Request) -> RecallResult<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(BackendError::Unavailable {
                    reason: "scripted failure".to_string(),
                }
                .into());
            }
            let entity = self.entity.lock().unwrap().clone();
            match request {
                Request::Retrieve { .. } => Ok(Response::Retrieved { entity }),
                Request::Update { .. } => Ok(Response::Updated),
                _ => Ok(Response::Retrieved { entity }),
            }
        }
    }

    fn cache() -> ServiceCache<MemoryStore> {
        ServiceCache::new(Arc::new(MemoryStore::new()), CacheOptions::default()).unwrap()
    }

    fn retrieve(entity: &Entity) -> Envelope {
        Envelope::terminal(Request::Retrieve {
            target: entity.to_reference(),
            columns: ColumnSet::All,
        })
    }

    fn contact() -> Entity {
        Entity::new("contact", Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_second_read_is_served_from_cache() {
        let cache = cache();
        let entity = contact();
        let backend = MockBackend::returning(entity.clone());
        let envelope = retrieve(&entity);
        let context = CallContext::anonymous();

        let first = cache.execute(&envelope, &backend, &context).await.unwrap();
        let second = cache.execute(&envelope, &backend, &context).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_mutations_go_straight_to_the_backend() {
        let cache = cache();
        let entity = contact();
        let backend = MockBackend::returning(entity.clone());
        let envelope = Envelope::terminal(Request::Update {
            entity: entity.clone(),
        });
        let context = CallContext::anonymous();

        cache.execute(&envelope, &backend, &context).await.unwrap();
        cache.execute(&envelope, &backend, &context).await.unwrap();
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_bypass_flag_skips_the_cache() {
        let cache = cache();
        let entity = contact();
        let backend = MockBackend::returning(entity.clone());
        let envelope = Envelope::ExplicitKey {
            inner: Box::new(retrieve(&entity)),
            key: "k".to_string(),
            allow_stale: false,
            bypass_cache: true,
            skip_dependencies: false,
            expires: None,
        };
        let context = CallContext::anonymous();

        cache.execute(&envelope, &backend, &context).await.unwrap();
        cache.execute(&envelope, &backend, &context).await.unwrap();
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_calls_backend() {
        let cache = ServiceCache::new(
            Arc::new(MemoryStore::new()),
            CacheOptions::default().with_enabled(false),
        )
        .unwrap();
        let entity = contact();
        let backend = MockBackend::returning(entity.clone());
        let envelope = retrieve(&entity);
        let context = CallContext::anonymous();

        cache.execute(&envelope, &backend, &context).await.unwrap();
        cache.execute(&envelope, &backend, &context).await.unwrap();
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_selector_keys_get_separate_entries() {
        let cache = cache();
        let entity = contact();
        let backend = MockBackend::returning(entity.clone());
        let envelope = retrieve(&entity);
        let context = CallContext::anonymous();

        let name: Option<String> = cache
            .execute_with(&envelope, &backend, Some("id-only"), &context, |r| {
                r.entity().map(|e| e.entity_name.clone())
            })
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("contact"));

        cache.execute(&envelope, &backend, &context).await.unwrap();
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_dirty_entry_is_refreshed_by_the_claiming_reader() {
        let cache = cache();
        let entity = contact();
        let backend = MockBackend::returning(entity.clone());
        let envelope = retrieve(&entity);
        let context = CallContext::anonymous();

        cache.execute(&envelope, &backend, &context).await.unwrap();

        let key = cache.key_builder().key(&envelope, None).unwrap();
        let entry = cache.store().get(&key, Region::Content).await.unwrap();
        entry.mark_dirty(None);

        let updated = entity
            .clone()
            .with_attribute("name", recall_core::AttributeValue::Text("new".into()));
        backend.set_entity(updated.clone());

        let response = cache.execute(&envelope, &backend, &context).await.unwrap();
        assert_eq!(response.entity(), Some(&updated));
        assert_eq!(backend.calls(), 2);

        let refreshed = cache.store().get(&key, Region::Content).await.unwrap();
        assert_eq!(refreshed.status(), EntryStatus::Current);
    }

    #[tokio::test]
    async fn test_non_owner_session_is_served_stale_during_refresh() {
        let cache = cache();
        let entity = contact();
        let backend = MockBackend::returning(entity.clone());
        let envelope = retrieve(&entity);

        cache
            .execute(&envelope, &backend, &CallContext::anonymous())
            .await
            .unwrap();

        let key = cache.key_builder().key(&envelope, None).unwrap();
        let entry = cache.store().get(&key, Region::Content).await.unwrap();
        let owner = Uuid::new_v4();
        entry.mark_dirty(Some(owner));
        // Simulate a refresh already in flight.
        assert!(entry.try_claim(Duration::from_secs(30), Utc::now()));

        let other = CallContext::for_session(Uuid::new_v4());
        let response = cache.execute(&envelope, &backend, &other).await.unwrap();

        assert_eq!(response.entity(), Some(&entity));
        assert_eq!(entry.stale_accesses(), 1);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_owner_does_not_start_a_second_refresh_while_the_claim_is_held() {
        let cache = cache();
        let entity = contact();
        let backend = MockBackend::returning(entity.clone());
        let envelope = retrieve(&entity);
        let owner = Uuid::new_v4();
        let context = CallContext::for_session(owner);

        cache.execute(&envelope, &backend, &context).await.unwrap();

        let key = cache.key_builder().key(&envelope, None).unwrap();
        let entry = cache.store().get(&key, Region::Content).await.unwrap();
        entry.mark_dirty(Some(owner));
        // Another caller holds the claim but has not started its refresh yet.
        assert!(entry.try_claim(Duration::from_secs(30), Utc::now()));

        let response = cache.execute(&envelope, &backend, &context).await.unwrap();

        // The owner's wait found no fresh entry and could not take the
        // claim, so it is served the stale value rather than racing a
        // second refresh against the claim holder.
        assert_eq!(response.entity(), Some(&entity));
        assert_eq!(backend.calls(), 1);
        assert_eq!(entry.stale_accesses(), 1);
        assert_eq!(entry.status(), EntryStatus::BeingProcessed);
    }

    #[tokio::test]
    async fn test_failed_refresh_releases_the_claim() {
        let cache = cache();
        let entity = contact();
        let backend = MockBackend::returning(entity.clone());
        let envelope = retrieve(&entity);
        let context = CallContext::anonymous();

        cache.execute(&envelope, &backend, &context).await.unwrap();

        let key = cache.key_builder().key(&envelope, None).unwrap();
        let entry = cache.store().get(&key, Region::Content).await.unwrap();
        entry.mark_dirty(None);

        backend.set_failing(true);
        assert!(cache.execute(&envelope, &backend, &context).await.is_err());
        assert_eq!(entry.status(), EntryStatus::Dirty);

        backend.set_failing(false);
        let response = cache.execute(&envelope, &backend, &context).await.unwrap();
        assert_eq!(response.entity(), Some(&entity));
    }

    #[tokio::test]
    async fn test_expired_entry_is_treated_as_a_miss() {
        let cache = ServiceCache::new(
            Arc::new(MemoryStore::new()),
            CacheOptions::default().with_default_expiration(Duration::from_millis(0)),
        )
        .unwrap();
        let entity = contact();
        let backend = MockBackend::returning(entity.clone());
        let envelope = retrieve(&entity);
        let context = CallContext::anonymous();

        cache.execute(&envelope, &backend, &context).await.unwrap();
        cache.execute(&envelope, &backend, &context).await.unwrap();
        assert_eq!(backend.calls(), 2);
    }
}
