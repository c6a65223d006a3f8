//! Invalidation: routing mutations to the entries they disturb.
//!
//! A mutation resolves to dependency keys through the calculator; the store's
//! monitor index resolves those keys to entries. Under the stale-read policy
//! entries are marked Dirty (and remember the dirtying session); under the
//! removal policy they are dropped outright. System-wide signals additionally
//! force out two always-cached system collections that per-row invalidation
//! never reaches.

use async_trait::async_trait;
use tracing::{debug, info};

use recall_core::{Change, EntityId, MutationDescriptor, RecallResult, SessionId};
use recall_events::LocalInvalidator;

use crate::dependency::DependencyKey;
use crate::orchestrator::ServiceCache;
use crate::store::{ObjectStore, Region};

/// System collection of saved views, cached as a whole and refreshed only on
/// global signals.
pub const SAVED_VIEW_ENTITY: &str = "saved_view";

/// System collection of form definitions, cached as a whole and refreshed
/// only on global signals.
pub const SYSTEM_FORM_ENTITY: &str = "system_form";

/// What to do with a matched entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Mark Dirty under the stale-read policy, remove otherwise.
    Policy,
    /// Remove regardless of policy.
    Remove,
}

impl<S: ObjectStore> ServiceCache<S> {
    /// Apply a mutation: every entry monitoring a disturbed dependency key
    /// is dirtied (stale-read policy) or removed.
    pub async fn invalidate(&self, descriptor: &MutationDescriptor) -> RecallResult<()> {
        let keys = self.calculator().for_mutation(descriptor);
        let touched = self
            .apply_dependencies(&keys, descriptor.session, Disposition::Policy)
            .await;
        info!(
            change = ?descriptor.change,
            dependencies = keys.len(),
            entries = touched,
            "invalidation applied"
        );

        if let Change::Signal(_) = descriptor.change {
            self.force_out_system_collections().await;
        }
        Ok(())
    }

    /// Apply a mutation with removal semantics regardless of the stale-read
    /// policy.
    pub async fn remove_descriptor(&self, descriptor: &MutationDescriptor) -> RecallResult<()> {
        let keys = self.calculator().for_mutation(descriptor);
        self.apply_dependencies(&keys, descriptor.session, Disposition::Remove)
            .await;
        if let Change::Signal(_) = descriptor.change {
            self.force_out_system_collections().await;
        }
        Ok(())
    }

    /// Remove every entry depending on a type, or on one record of it.
    pub async fn remove(&self, entity_name: &str, id: Option<EntityId>) -> RecallResult<()> {
        let mut keys = vec![DependencyKey::entity_type(entity_name)];
        if let Some(id) = id {
            keys.push(DependencyKey::instance(entity_name, id));
            keys.push(DependencyKey::unique(entity_name));
        }
        self.apply_dependencies(&keys, None, Disposition::Remove).await;
        Ok(())
    }

    /// Drop every entry in every region.
    pub async fn remove_all(&self) -> RecallResult<()> {
        let content = self.store().remove_region(Region::Content).await;
        let metadata = self.store().remove_region(Region::Metadata).await;
        info!(content, metadata, "cache cleared");
        Ok(())
    }

    async fn apply_dependencies(
        &self,
        keys: &[DependencyKey],
        session: Option<SessionId>,
        disposition: Disposition,
    ) -> usize {
        let mark = disposition == Disposition::Policy && self.options().stale_reads_allowed;
        let mut touched = 0;

        for dependency in keys {
            for region in [Region::Content, Region::Metadata] {
                for key in self.store().keys_for_dependency(dependency, region).await {
                    if mark {
                        if let Some(entry) = self.store().get(&key, region).await {
                            entry.mark_dirty(session);
                            touched += 1;
                            debug!(key = %key, dependency = %dependency, "entry marked dirty");
                        }
                    } else if self.store().remove(&key, region).await {
                        touched += 1;
                        debug!(key = %key, dependency = %dependency, "entry removed");
                    }
                }
            }
        }
        touched
    }

    /// Per-row invalidation never disturbs the always-cached system
    /// collections, so global signals push them out directly.
    async fn force_out_system_collections(&self) {
        for entity_name in [SAVED_VIEW_ENTITY, SYSTEM_FORM_ENTITY] {
            let key = self.key_builder().all_of_type_key(entity_name);
            if self.store().remove(&key, Region::Content).await {
                debug!(key = %key, "system collection forced out");
            }
        }
    }
}

/// Distributed invalidation applies remote descriptors through the same
/// local routine as local mutations.
#[async_trait]
impl<S: ObjectStore> LocalInvalidator for ServiceCache<S> {
    async fn apply(&self, descriptor: &MutationDescriptor) -> RecallResult<()> {
        self.invalidate(descriptor).await
    }
}

// ============================================================================
// Tests
// ============================================================================
