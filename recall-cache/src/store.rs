//! Entry storage behind the orchestrator.
//!
//! The engine talks to storage only through [`ObjectStore`], so the in-memory
//! store here is swappable for an external key-value store without touching
//! orchestration or invalidation. The store keeps a bidirectional index
//! between entries and their dependency keys: inserting an entry registers
//! its dependencies as change monitors, and invalidation resolves a disturbed
//! key back to the entries watching it in one lookup.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use recall_core::{OperationClass, RecallResult};

use crate::dependency::DependencyKey;
use crate::entry::CacheEntry;

// ============================================================================
// Region
// ============================================================================

/// Storage region. Content and metadata entries live apart so a full
/// metadata flush never scans content entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Content,
    Metadata,
}

impl Region {
    /// Canonical lowercase name, used in logging.
    pub fn name(&self) -> &'static str {
        match self {
            Region::Content => "content",
            Region::Metadata => "metadata",
        }
    }
}

impl From<OperationClass> for Region {
    fn from(class: OperationClass) -> Self {
        match class {
            OperationClass::Content => Region::Content,
            OperationClass::Metadata => Region::Metadata,
        }
    }
}

// ============================================================================
// ObjectStore
// ============================================================================

/// Keyed storage of cache entries with dependency monitors.
///
/// Implementations must treat `insert` as replace-and-reregister: the new
/// entry's dependency set fully supersedes the old entry's monitors for
/// that key, which is what makes repopulation idempotent.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Look up an entry.
    async fn get(&self, key: &str, region: Region) -> Option<Arc<CacheEntry>>;

    /// Insert the entry unless the key is already populated; returns
    /// whichever entry ends up stored.
    async fn get_or_insert(
        &self,
        key: &str,
        region: Region,
        entry: Arc<CacheEntry>,
    ) -> Arc<CacheEntry>;

    /// Insert the entry, replacing any existing one and re-registering
    /// dependency monitors from the new entry's dependency set.
    async fn insert(&self, key: &str, region: Region, entry: Arc<CacheEntry>) -> RecallResult<()>;

    /// Remove an entry and its monitor registrations.
    async fn remove(&self, key: &str, region: Region) -> bool;

    /// Remove every entry in a region; returns how many were removed.
    async fn remove_region(&self, region: Region) -> usize;

    /// Every key currently stored in a region.
    async fn keys(&self, region: Region) -> Vec<String>;

    /// Keys of the entries monitoring the given dependency.
    async fn keys_for_dependency(&self, dependency: &DependencyKey, region: Region)
        -> Vec<String>;
}

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Default)]
struct RegionState {
    entries: HashMap<String, Arc<CacheEntry>>,
    /// dependency -> keys watching it
    monitors: HashMap<DependencyKey, HashSet<String>>,
    /// key -> dependencies it watches, for cleanup on replace/remove
    registrations: HashMap<String, HashSet<DependencyKey>>,
}

impl RegionState {
    fn register(&mut self, key: &str, entry: &CacheEntry) {
        for dependency in &entry.dependencies {
            self.monitors
                .entry(dependency.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.registrations
            .insert(key.to_string(), entry.dependencies.clone());
    }

    fn unregister(&mut self, key: &str) {
        if let Some(dependencies) = self.registrations.remove(key) {
            for dependency in dependencies {
                if let Some(watchers) = self.monitors.get_mut(&dependency) {
                    watchers.remove(key);
                    if watchers.is_empty() {
                        self.monitors.remove(&dependency);
                    }
                }
            }
        }
    }
}

/// Process-local [`ObjectStore`] over two region maps.
#[derive(Default)]
pub struct MemoryStore {
    content: RwLock<RegionState>,
    metadata: RwLock<RegionState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn region(&self, region: Region) -> &RwLock<RegionState> {
        match region {
            Region::Content => &self.content,
            Region::Metadata => &self.metadata,
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str, region: Region) -> Option<Arc<CacheEntry>> {
        self.region(region).read().await.entries.get(key).cloned()
    }

    async fn get_or_insert(
        &self,
        key: &str,
        region: Region,
        entry: Arc<CacheEntry>,
    ) -> Arc<CacheEntry> {
        let mut state = self.region(region).write().await;
        if let Some(existing) = state.entries.get(key) {
            return existing.clone();
        }
        state.register(key, &entry);
        state.entries.insert(key.to_string(), entry.clone());
        trace!(key, region = region.name(), "cache entry populated");
        entry
    }

    async fn insert(&self, key: &str, region: Region, entry: Arc<CacheEntry>) -> RecallResult<()> {
        let mut state = self.region(region).write().await;
        state.unregister(key);
        state.register(key, &entry);
        state.entries.insert(key.to_string(), entry);
        trace!(key, region = region.name(), "cache entry replaced");
        Ok(())
    }

    async fn remove(&self, key: &str, region: Region) -> bool {
        let mut state = self.region(region).write().await;
        state.unregister(key);
        state.entries.remove(key).is_some()
    }

    async fn remove_region(&self, region: Region) -> usize {
        let mut state = self.region(region).write().await;
        let removed = state.entries.len();
        state.entries.clear();
        state.monitors.clear();
        state.registrations.clear();
        removed
    }

    async fn keys(&self, region: Region) -> Vec<String> {
        self.region(region).read().await.entries.keys().cloned().collect()
    }

    async fn keys_for_dependency(
        &self,
        dependency: &DependencyKey,
        region: Region,
    ) -> Vec<String> {
        self.region(region)
            .read()
            .await
            .monitors
            .get(dependency)
            .map(|watchers| watchers.iter().cloned().collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================
