//! Table service.
//!
//! Owns the promotion cache behind the serial mutation queue and exposes the
//! public operations: build-or-get a table view, fetch a page, apply a field
//! mutation, and kick background validation. Every cache-affecting step runs
//! inside a queue turn, so a rebuild never observes a half-applied mutation
//! and an invalidation happens-before any later read's miss/hit decision.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use serde_json::Value;
use tracing::{debug, info};

use crate::application::builder::{TableRequest, build_table, probe_token};
use crate::application::error::AppError;
use crate::application::queue::SerialMutationQueue;
use crate::application::scheduler::KeyedCoalescingScheduler;
use crate::cache::PromotionCache;
use crate::domain::error::DomainError;
use crate::domain::paths::ResolvedPath;
use crate::domain::types::{Item, Page, Table};
use crate::infra::providers::{ItemsProvider, RoutesProvider};

const SOURCE: &str = "application::tables";

/// Caller-supplied parameters of one table request.
#[derive(Debug, Clone, Default)]
pub struct TableParams {
    /// Comma-separated `path:sortIndex:order:filter` segments.
    pub spec: String,
    pub limit: Option<usize>,
    /// Anchor resource id to make immediately visible.
    pub resource_id: Option<String>,
    /// Token of the view the caller last saw, for staleness logging.
    pub hash: Option<String>,
}

/// Mutable state owned by the mutation queue worker.
pub struct TableState {
    cache: PromotionCache<Table>,
    tokens_by_resource: HashMap<String, Vec<String>>,
}

impl TableState {
    fn new(table_limit: usize, seed: Vec<Table>) -> Self {
        let cache = PromotionCache::with_seed(table_limit, seed);
        let mut tokens_by_resource: HashMap<String, Vec<String>> = HashMap::new();
        for table in cache.list() {
            tokens_by_resource
                .entry(table.resource.clone())
                .or_default()
                .push(table.token.clone());
        }
        Self {
            cache,
            tokens_by_resource,
        }
    }

    fn index(&mut self, resource: &str, token: &str) {
        self.tokens_by_resource
            .entry(resource.to_string())
            .or_default()
            .push(token.to_string());
    }

    fn deindex(&mut self, resource: &str, token: &str) {
        if let Some(tokens) = self.tokens_by_resource.get_mut(resource) {
            tokens.retain(|existing| existing != token);
            if tokens.is_empty() {
                self.tokens_by_resource.remove(resource);
            }
        }
    }

    /// Drop every cached table for a resource.
    fn invalidate_resource(&mut self, resource: &str) {
        for token in self.tokens_by_resource.remove(resource).unwrap_or_default() {
            self.cache.invalidate(&token);
        }
    }
}

pub struct TableService {
    queue: SerialMutationQueue<TableState>,
    items: Arc<dyn ItemsProvider>,
    routes: Arc<dyn RoutesProvider>,
    scheduler: KeyedCoalescingScheduler<u64>,
    revision: AtomicU64,
    default_limit: NonZeroUsize,
}

impl TableService {
    pub fn new(
        items: Arc<dyn ItemsProvider>,
        routes: Arc<dyn RoutesProvider>,
        scheduler: KeyedCoalescingScheduler<u64>,
        table_limit: usize,
        default_limit: NonZeroUsize,
        seed: Vec<Table>,
    ) -> Self {
        Self {
            queue: SerialMutationQueue::new(TableState::new(table_limit, seed)),
            items,
            routes,
            scheduler,
            revision: AtomicU64::new(0),
            default_limit,
        }
    }

    /// Build the table for a resource, or promote and return the cached one
    /// when the computed content token already lives in the cache.
    pub async fn build_or_get(
        &self,
        resource: &str,
        params: TableParams,
    ) -> Result<Table, AppError> {
        let limit = match params.limit {
            None => self.default_limit,
            Some(value) => NonZeroUsize::new(value)
                .ok_or_else(|| DomainError::invalid_query("limit", "must be greater than zero"))?,
        };

        let items_provider = Arc::clone(&self.items);
        let routes_provider = Arc::clone(&self.routes);
        let resource = resource.to_string();

        self.queue
            .run(move |state: &mut TableState| {
                Box::pin(async move {
                    let items = items_provider.load_items(&resource).await?;
                    let routes = routes_provider.load_routes(&resource).await?;

                    let request = TableRequest {
                        resource: &resource,
                        spec: &params.spec,
                        limit,
                        resource_id: params.resource_id.as_deref(),
                    };
                    let token = probe_token(&items, &routes, &request)?;

                    if let Some(hash) = params.hash.as_deref()
                        && hash != token
                    {
                        debug!(source = SOURCE, resource, "caller view is stale");
                    }

                    if state.cache.contains(&token) {
                        counter!("tavola_table_cache_hit_total").increment(1);
                        let table = state.cache.promote(&token)?;
                        return Ok(table.view());
                    }

                    counter!("tavola_table_cache_miss_total").increment(1);
                    let table = build_table(&items, &routes, &request)?;
                    let view = table.view();

                    state.index(&resource, &table.token);
                    for evicted in state.cache.add(table)? {
                        state.deindex(&evicted.resource, &evicted.token);
                    }

                    info!(
                        source = SOURCE,
                        resource,
                        total_rows = view.total_rows,
                        pages = view.pages.len(),
                        "table built"
                    );
                    Ok(view)
                })
            })
            .await?
    }

    /// Materialize one page of a cached table by token lookup.
    pub async fn page(&self, table_token: &str, page_token: &str) -> Result<Page, AppError> {
        let table_token = table_token.to_string();
        let page_token = page_token.to_string();

        self.queue
            .run(move |state: &mut TableState| {
                Box::pin(async move {
                    let table = state.cache.get(&table_token)?;
                    table
                        .fetch_page(&page_token)
                        .ok_or_else(|| DomainError::not_found("page", &page_token).into())
                })
            })
            .await?
    }

    /// Set one field of one item: invalidate every cached table for the
    /// item's resource, persist through the items provider, then schedule
    /// background validation. Returns the updated item.
    pub async fn apply_field_mutation(
        &self,
        table_token: &str,
        path: &str,
        resource_id: &str,
        value: Value,
    ) -> Result<Item, AppError> {
        let items_provider = Arc::clone(&self.items);
        let table_token = table_token.to_string();
        let path = path.to_string();
        let resource_id = resource_id.to_string();

        let (resource, updated) = self
            .queue
            .run(move |state: &mut TableState| {
                Box::pin(async move {
                    let resource = state.cache.get(&table_token)?.resource.clone();

                    let mut items = items_provider.load_items(&resource).await?;
                    let item = items
                        .iter_mut()
                        .find(|item| item.id == resource_id)
                        .ok_or_else(|| DomainError::not_found("item", &resource_id))?;

                    let resolved = ResolvedPath::parse(&path);
                    if !resolved.set(item, value) {
                        return Err(
                            DomainError::invalid_query(path, "path cannot be written").into()
                        );
                    }
                    let updated = item.clone();

                    // Stale views must be unreachable before the write lands.
                    state.invalidate_resource(&resource);
                    items_provider.save_items(&resource, &items).await?;

                    info!(source = SOURCE, resource, item = updated.id, "field mutated");
                    Ok::<_, AppError>((resource, updated))
                })
            })
            .await??;

        self.notify_validation(&resource);
        Ok(updated)
    }

    /// Fire-and-forget entry into the coalescing scheduler. The payload is a
    /// monotonic revision so a coalesced run observes the newest state.
    pub fn notify_validation(&self, resource: &str) {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.scheduler.notify(resource, revision);
    }

    /// Defensive copy of the cache in most-recently-used order, for snapshot
    /// hand-off.
    pub async fn snapshot(&self) -> Result<Vec<Table>, AppError> {
        Ok(self
            .queue
            .run(|state: &mut TableState| Box::pin(async move { state.cache.list() }))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::future::BoxFuture;
    use serde_json::json;
    use tokio::sync::broadcast;

    use crate::application::scheduler::KeyedTaskFn;
    use crate::infra::error::InfraError;

    use super::*;

    struct MemoryStore {
        items: Mutex<Vec<Item>>,
        routes: Vec<crate::domain::types::Route>,
    }

    #[async_trait]
    impl ItemsProvider for MemoryStore {
        async fn load_items(&self, _resource: &str) -> Result<Vec<Item>, InfraError> {
            Ok(self.items.lock().unwrap().clone())
        }

        async fn save_items(&self, _resource: &str, items: &[Item]) -> Result<(), InfraError> {
            *self.items.lock().unwrap() = items.to_vec();
            Ok(())
        }
    }

    #[async_trait]
    impl RoutesProvider for MemoryStore {
        async fn load_routes(
            &self,
            _resource: &str,
        ) -> Result<Vec<crate::domain::types::Route>, InfraError> {
            Ok(self.routes.clone())
        }
    }

    fn memory_store() -> Arc<MemoryStore> {
        use crate::domain::types::{FieldKind, Route};
        Arc::new(MemoryStore {
            items: Mutex::new(
                serde_json::from_value(json!([
                    {"id": "1", "age": 5},
                    {"id": "2", "age": 7},
                ]))
                .expect("valid items"),
            ),
            routes: vec![Route {
                path: "age".to_string(),
                kind: FieldKind::Number,
                nullable: false,
            }],
        })
    }

    fn noop_task() -> KeyedTaskFn<u64> {
        Arc::new(|_key, _payload| -> BoxFuture<'static, Result<String, InfraError>> {
            Box::pin(async { Ok(String::new()) })
        })
    }

    fn service(store: Arc<MemoryStore>) -> (TableService, broadcast::Receiver<crate::application::scheduler::TaskOutcome>) {
        let (outcomes, rx) = broadcast::channel(16);
        let scheduler = KeyedCoalescingScheduler::new(1, noop_task(), outcomes);
        let service = TableService::new(
            store.clone(),
            store,
            scheduler,
            8,
            NonZeroUsize::new(50).expect("non-zero"),
            Vec::new(),
        );
        (service, rx)
    }

    fn params(spec: &str, limit: usize) -> TableParams {
        TableParams {
            spec: spec.to_string(),
            limit: Some(limit),
            ..TableParams::default()
        }
    }

    #[tokio::test]
    async fn repeated_requests_hit_the_cache_with_the_same_token() {
        let (service, _rx) = service(memory_store());

        let first = service
            .build_or_get("users", params("age:::", 1))
            .await
            .expect("built");
        let second = service
            .build_or_get("users", params("age:::", 1))
            .await
            .expect("cached");

        assert_eq!(first.token, second.token);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn pending_pages_materialize_by_token_lookup() {
        let (service, _rx) = service(memory_store());

        let table = service
            .build_or_get("users", params("age:::", 1))
            .await
            .expect("built");

        assert_eq!(table.pages.len(), 2);
        assert!(!table.pages[0].pending);
        assert_eq!(table.pages[0].items[0].resource_id, "1");
        assert!(table.pages[1].pending);
        assert!(table.pages[1].items.is_empty());

        let page = service
            .page(&table.token, &table.pages[1].page_token)
            .await
            .expect("fetched");
        assert!(!page.pending);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].resource_id, "2");
    }

    #[tokio::test]
    async fn unknown_tokens_fail_not_found() {
        let (service, _rx) = service(memory_store());

        let table = service
            .build_or_get("users", params("age:::", 1))
            .await
            .expect("built");

        let err = service.page("bogus", "bogus").await.expect_err("rejected");
        assert!(matches!(
            err,
            AppError::Domain(DomainError::NotFound { .. })
        ));

        let err = service
            .page(&table.token, "bogus")
            .await
            .expect_err("rejected");
        assert!(matches!(
            err,
            AppError::Domain(DomainError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn a_mutation_invalidates_the_cached_table() {
        let store = memory_store();
        let (service, _rx) = service(store.clone());

        let before = service
            .build_or_get("users", params("age:::", 1))
            .await
            .expect("built");

        let updated = service
            .apply_field_mutation(&before.token, "age", "1", json!(9))
            .await
            .expect("mutated");
        assert_eq!(updated.rest.get("age"), Some(&json!(9)));

        // Persisted through the provider.
        let items = store.items.lock().unwrap().clone();
        assert_eq!(items[0].rest.get("age"), Some(&json!(9)));

        // The old token is gone; a rebuild carries a new one.
        let err = service
            .page(&before.token, "anything")
            .await
            .expect_err("invalidated");
        assert!(matches!(
            err,
            AppError::Domain(DomainError::NotFound { .. })
        ));

        let after = service
            .build_or_get("users", params("age:::", 1))
            .await
            .expect("rebuilt");
        assert_ne!(before.token, after.token);
    }

    #[tokio::test]
    async fn mutations_reach_the_validation_scheduler() {
        let store = memory_store();
        let (outcomes, mut rx) = broadcast::channel(16);

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let task: KeyedTaskFn<u64> = {
            let seen = Arc::clone(&seen);
            Arc::new(move |key, _payload| {
                let seen = Arc::clone(&seen);
                Box::pin(async move {
                    seen.lock().unwrap().push(key);
                    Ok(String::new())
                })
            })
        };
        let scheduler = KeyedCoalescingScheduler::new(1, task, outcomes);
        let service = TableService::new(
            store.clone(),
            store,
            scheduler,
            8,
            NonZeroUsize::new(50).expect("non-zero"),
            Vec::new(),
        );

        let table = service
            .build_or_get("users", params("age:::", 1))
            .await
            .expect("built");
        service
            .apply_field_mutation(&table.token, "age", "2", json!(8))
            .await
            .expect("mutated");

        rx.recv().await.expect("validation outcome");
        assert_eq!(seen.lock().unwrap().as_slice(), ["users"]);
    }

    #[tokio::test]
    async fn zero_limit_is_an_invalid_query() {
        let (service, _rx) = service(memory_store());

        let err = service
            .build_or_get("users", params("age:::", 0))
            .await
            .expect_err("rejected");
        assert!(matches!(
            err,
            AppError::Domain(DomainError::InvalidQuery { .. })
        ));
    }

    #[tokio::test]
    async fn snapshots_seed_a_new_service() {
        let store = memory_store();
        let (service, _rx) = service(store.clone());

        let table = service
            .build_or_get("users", params("age:::", 1))
            .await
            .expect("built");
        let snapshot = service.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.len(), 1);

        let (outcomes, _rx2) = broadcast::channel(16);
        let scheduler = KeyedCoalescingScheduler::new(1, noop_task(), outcomes);
        let restored = TableService::new(
            store.clone(),
            store,
            scheduler,
            8,
            NonZeroUsize::new(50).expect("non-zero"),
            snapshot,
        );

        // The seeded table serves pages without a rebuild.
        let page = restored
            .page(&table.token, &table.pages[0].page_token)
            .await
            .expect("served from seed");
        assert_eq!(page.items[0].resource_id, "1");
    }
}
