//! End-to-end scenarios against a fake entity service: read-through
//! population, dependency-routed invalidation, single-result handling,
//! session fairness under concurrency, and distributed fan-out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use recall_cache::{
    Backend, CacheKeyBuilder, CacheOptions, CallContext, EntryStatus, MemoryStore, ObjectStore,
    Region, ServiceCache,
};
use recall_core::{
    AttributeValue, BackendError, Entity, MutationDescriptor, RecallResult, Request, Response,
};
use recall_events::{DeliveryMode, InMemoryTransport, InvalidationPublisher};
use recall_test_utils::{
    account, collection, contact, invoice, retrieve, retrieve_all, retrieve_single_where,
    retrieve_where,
};
use uuid::Uuid;

// ============================================================================
// Fake entity service
// ============================================================================

/// Answers reads from an in-memory record list, counting calls and
/// optionally delaying to widen race windows.
struct FakeService {
    records: std::sync::Mutex<Vec<Entity>>,
    calls: AtomicUsize,
    delay: std::sync::Mutex<Option<Duration>>,
}

impl FakeService {
    fn with_records(records: Vec<Entity>) -> Self {
        Self {
            records: std::sync::Mutex::new(records),
            calls: AtomicUsize::new(0),
            delay: std::sync::Mutex::new(None),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    fn push(&self, entity: Entity) {
        self.records.lock().unwrap().push(entity);
    }

    fn set_attribute(&self, id: Uuid, name: &str, value: AttributeValue) {
        let mut records = self.records.lock().unwrap();
        for record in records.iter_mut() {
            if record.id == id {
                record.attributes.insert(name.to_string(), value.clone());
            }
        }
    }

    fn of_type(&self, entity_name: &str) -> Vec<Entity> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.entity_name == entity_name)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Backend for FakeService {
    async fn execute(&self, request: &Request) -> RecallResult<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match request {
            Request::Retrieve { target, .. } => self
                .records
                .lock()
                .unwrap()
                .iter()
                .find(|e| e.id == target.id && e.entity_name == target.entity_name)
                .cloned()
                .map(|entity| Response::Retrieved { entity })
                .ok_or_else(|| {
                    BackendError::CallFailed {
                        code: 404,
                        message: format!("{}:{} not found", target.entity_name, target.id),
                    }
                    .into()
                }),
            Request::RetrieveMultiple { query } => {
                let expression = query.to_expression()?;
                let matching = self.of_type(&expression.entity_name);
                Ok(Response::RetrievedMultiple {
                    entities: collection(&expression.entity_name, matching),
                })
            }
            Request::RetrieveSingle { query } => {
                let expression = query.to_expression()?;
                Ok(Response::RetrievedSingle {
                    entity: self.of_type(&expression.entity_name).into_iter().next(),
                })
            }
            _ => Ok(Response::Updated),
        }
    }
}

fn cache() -> ServiceCache<MemoryStore> {
    ServiceCache::new(Arc::new(MemoryStore::new()), CacheOptions::default()).unwrap()
}

fn keys() -> CacheKeyBuilder {
    CacheKeyBuilder::new("recall", false)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_referenced_record_update_reaches_the_composite_entry() {
    let contact_id = Uuid::new_v4();
    let account_id = Uuid::new_v4();
    let service = FakeService::with_records(vec![
        contact(contact_id, account_id),
        account(account_id),
    ]);
    let cache = cache();
    let context = CallContext::anonymous();
    let envelope = retrieve("contact", contact_id);

    cache.execute(&envelope, &service, &context).await.unwrap();
    cache.execute(&envelope, &service, &context).await.unwrap();
    assert_eq!(service.calls(), 1);

    // The contact's cached entry depends on the account it references.
    cache
        .invalidate(&MutationDescriptor::updated("account", account_id))
        .await
        .unwrap();

    let key = keys().key(&envelope, None).unwrap();
    let entry = cache.store().get(&key, Region::Content).await.unwrap();
    assert_eq!(entry.status(), EntryStatus::Dirty);

    cache.execute(&envelope, &service, &context).await.unwrap();
    assert_eq!(service.calls(), 2);
}

#[tokio::test]
async fn test_create_refreshes_type_queries_without_false_sharing() {
    let order_id = Uuid::new_v4();
    let first_invoice = Uuid::new_v4();
    let contact_id = Uuid::new_v4();
    let account_id = Uuid::new_v4();
    let service = FakeService::with_records(vec![
        invoice(first_invoice, order_id),
        contact(contact_id, account_id),
    ]);
    let cache = cache();
    let context = CallContext::anonymous();

    let all_invoices = retrieve_all("invoice");
    let one_contact = retrieve("contact", contact_id);
    cache.execute(&all_invoices, &service, &context).await.unwrap();
    cache.execute(&one_contact, &service, &context).await.unwrap();
    assert_eq!(service.calls(), 2);

    let second_invoice = Uuid::new_v4();
    service.push(invoice(second_invoice, order_id));
    cache
        .invalidate(&MutationDescriptor::created("invoice", second_invoice))
        .await
        .unwrap();

    let response = cache.execute(&all_invoices, &service, &context).await.unwrap();
    assert_eq!(response.entities().unwrap().entities.len(), 2);
    assert_eq!(service.calls(), 3);

    // The contact entry shares no dependency with the invoice create.
    cache.execute(&one_contact, &service, &context).await.unwrap();
    assert_eq!(service.calls(), 3);
}

#[tokio::test]
async fn test_single_result_entry_ignores_unrelated_rows_but_sees_creates() {
    let order_id = Uuid::new_v4();
    let invoice_id = Uuid::new_v4();
    let service = FakeService::with_records(vec![invoice(invoice_id, order_id)]);
    let cache = cache();
    let context = CallContext::anonymous();

    let envelope = retrieve_single_where(
        "invoice",
        "salesorderid",
        serde_json::json!(order_id.to_string()),
    );
    cache.execute(&envelope, &service, &context).await.unwrap();

    let key = keys().key(&envelope, None).unwrap();
    let entry = cache.store().get(&key, Region::Content).await.unwrap();

    // An update to some other invoice must not disturb this entry: the
    // single-result shape carries no type-level dependency.
    cache
        .invalidate(&MutationDescriptor::updated("invoice", Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(entry.status(), EntryStatus::Current);

    // An update to the cached row itself arrives through its instance key.
    cache
        .invalidate(&MutationDescriptor::updated("invoice", invoice_id))
        .await
        .unwrap();
    assert_eq!(entry.status(), EntryStatus::Dirty);
    cache.execute(&envelope, &service, &context).await.unwrap();

    // A brand new invoice could change which row the query matches.
    let refreshed = cache.store().get(&key, Region::Content).await.unwrap();
    cache
        .invalidate(&MutationDescriptor::created("invoice", Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(refreshed.status(), EntryStatus::Dirty);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_non_owner_session_reads_stale_during_refresh() {
    let account_id = Uuid::new_v4();
    let service = Arc::new(FakeService::with_records(vec![account(account_id)]));
    let cache = Arc::new(cache());
    let envelope = retrieve("account", account_id);

    cache
        .execute(&envelope, service.as_ref(), &CallContext::anonymous())
        .await
        .unwrap();

    // Session A renames the account; the entry is dirtied on A's behalf.
    let session_a = Uuid::new_v4();
    service.set_attribute(account_id, "name", AttributeValue::Text("Renamed".into()));
    cache
        .invalidate(&MutationDescriptor::updated("account", account_id).with_session(session_a))
        .await
        .unwrap();

    let key = keys().key(&envelope, None).unwrap();
    let entry = cache.store().get(&key, Region::Content).await.unwrap();

    // A's read claims the refresh and blocks on the slow service.
    service.set_delay(Duration::from_millis(300));
    let owner = {
        let cache = Arc::clone(&cache);
        let service = Arc::clone(&service);
        let envelope = envelope.clone();
        tokio::spawn(async move {
            cache
                .execute(&envelope, service.as_ref(), &CallContext::for_session(session_a))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A different session reads while the refresh is in flight: stale value,
    // stale counter bumped exactly once.
    let other = cache
        .execute(
            &envelope,
            service.as_ref(),
            &CallContext::for_session(Uuid::new_v4()),
        )
        .await
        .unwrap();
    assert_eq!(
        other.entity().unwrap().attributes.get("name"),
        Some(&AttributeValue::Text("Fabrikam".into()))
    );
    assert_eq!(entry.stale_accesses(), 1);

    // The owning session gets the refreshed value, never its own stale write.
    let owned = owner.await.unwrap().unwrap();
    assert_eq!(
        owned.entity().unwrap().attributes.get("name"),
        Some(&AttributeValue::Text("Renamed".into()))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_owner_session_waits_for_a_refresh_claimed_by_another_caller() {
    let account_id = Uuid::new_v4();
    let service = Arc::new(FakeService::with_records(vec![account(account_id)]));
    let cache = Arc::new(cache());
    let envelope = retrieve("account", account_id);

    cache
        .execute(&envelope, service.as_ref(), &CallContext::anonymous())
        .await
        .unwrap();

    let session_a = Uuid::new_v4();
    service.set_attribute(account_id, "name", AttributeValue::Text("Renamed".into()));
    cache
        .invalidate(&MutationDescriptor::updated("account", account_id).with_session(session_a))
        .await
        .unwrap();

    // An anonymous reader claims the refresh first.
    service.set_delay(Duration::from_millis(300));
    let claimer = {
        let cache = Arc::clone(&cache);
        let service = Arc::clone(&service);
        let envelope = envelope.clone();
        tokio::spawn(async move {
            cache
                .execute(&envelope, service.as_ref(), &CallContext::anonymous())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The owner arrives mid-refresh and must block until the fresh value
    // lands rather than read its own stale write.
    let owned = cache
        .execute(&envelope, service.as_ref(), &CallContext::for_session(session_a))
        .await
        .unwrap();
    assert_eq!(
        owned.entity().unwrap().attributes.get("name"),
        Some(&AttributeValue::Text("Renamed".into()))
    );

    claimer.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_owner_falls_back_to_stale_when_the_refresh_outlasts_its_wait() {
    let account_id = Uuid::new_v4();
    let service = Arc::new(FakeService::with_records(vec![account(account_id)]));
    let cache = Arc::new(
        ServiceCache::new(
            Arc::new(MemoryStore::new()),
            CacheOptions::default().with_lock_timeout(Duration::from_millis(50)),
        )
        .unwrap(),
    );
    let envelope = retrieve("account", account_id);

    cache
        .execute(&envelope, service.as_ref(), &CallContext::anonymous())
        .await
        .unwrap();

    let session_a = Uuid::new_v4();
    service.set_attribute(account_id, "name", AttributeValue::Text("Renamed".into()));
    cache
        .invalidate(&MutationDescriptor::updated("account", account_id).with_session(session_a))
        .await
        .unwrap();

    let key = keys().key(&envelope, None).unwrap();
    let entry = cache.store().get(&key, Region::Content).await.unwrap();

    // The claiming reader holds the refresh far longer than the owner is
    // willing to wait.
    service.set_delay(Duration::from_millis(400));
    let claimer = {
        let cache = Arc::clone(&cache);
        let service = Arc::clone(&service);
        let envelope = envelope.clone();
        tokio::spawn(async move {
            cache
                .execute(&envelope, service.as_ref(), &CallContext::anonymous())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The owner's bounded wait expires and it is served the stale value.
    let owned = cache
        .execute(&envelope, service.as_ref(), &CallContext::for_session(session_a))
        .await
        .unwrap();
    assert_eq!(
        owned.entity().unwrap().attributes.get("name"),
        Some(&AttributeValue::Text("Fabrikam".into()))
    );
    assert_eq!(entry.stale_accesses(), 1);

    claimer.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_filtered_query_entry_is_dirtied_by_a_create_of_its_type() {
    let order_id = Uuid::new_v4();
    let invoice_id = Uuid::new_v4();
    let service = FakeService::with_records(vec![invoice(invoice_id, order_id)]);
    let cache = cache();
    let context = CallContext::anonymous();

    let envelope = retrieve_where(
        "invoice",
        "salesorderid",
        serde_json::json!(order_id.to_string()),
    );
    cache.execute(&envelope, &service, &context).await.unwrap();

    let key = keys().key(&envelope, None).unwrap();
    let entry = cache.store().get(&key, Region::Content).await.unwrap();

    // Multi-row shape: the type dependency routes creates of any invoice.
    cache
        .invalidate(&MutationDescriptor::created("invoice", Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(entry.status(), EntryStatus::Dirty);
}

#[tokio::test]
async fn test_distributed_invalidation_reaches_every_instance() {
    let account_id = Uuid::new_v4();
    let service = FakeService::with_records(vec![account(account_id)]);
    let local = Arc::new(cache());
    let remote = Arc::new(cache());
    let context = CallContext::anonymous();

    let envelope = retrieve_all("account");
    local.execute(&envelope, &service, &context).await.unwrap();
    remote.execute(&envelope, &service, &context).await.unwrap();

    let transport = Arc::new(InMemoryTransport::new());
    let subscriber: Arc<dyn recall_events::LocalInvalidator> = remote.clone();
    transport.subscribe(subscriber).await;
    let publisher =
        InvalidationPublisher::new(transport, Arc::clone(&local), DeliveryMode::Synchronous);

    publisher
        .publish(MutationDescriptor::created("account", Uuid::new_v4()))
        .await
        .unwrap();

    let key = keys().key(&envelope, None).unwrap();
    for instance in [&local, &remote] {
        let entry = instance.store().get(&key, Region::Content).await.unwrap();
        assert_eq!(entry.status(), EntryStatus::Dirty);
    }
}

#[tokio::test]
async fn test_redelivered_invalidation_is_idempotent() {
    let account_id = Uuid::new_v4();
    let service = FakeService::with_records(vec![account(account_id)]);
    let instance = Arc::new(cache());
    let context = CallContext::anonymous();

    let envelope = retrieve_all("account");
    instance.execute(&envelope, &service, &context).await.unwrap();

    let transport = Arc::new(InMemoryTransport::new());
    let subscriber: Arc<dyn recall_events::LocalInvalidator> = instance.clone();
    transport.subscribe(subscriber).await;
    let publisher = InvalidationPublisher::new(
        Arc::clone(&transport),
        Arc::clone(&instance),
        DeliveryMode::Synchronous,
    );
    publisher
        .publish(MutationDescriptor::created("account", Uuid::new_v4()))
        .await
        .unwrap();

    let message = transport.sent().await.into_iter().next().unwrap();
    transport.deliver_again(&message).await.unwrap();

    let key = keys().key(&envelope, None).unwrap();
    let entry = instance.store().get(&key, Region::Content).await.unwrap();
    assert_eq!(entry.status(), EntryStatus::Dirty);

    // Refresh once; the duplicate delivery must not have corrupted state.
    instance.execute(&envelope, &service, &context).await.unwrap();
    let refreshed = instance.store().get(&key, Region::Content).await.unwrap();
    assert_eq!(refreshed.status(), EntryStatus::Current);
    assert!(!refreshed.is_expired(Utc::now()));
}
