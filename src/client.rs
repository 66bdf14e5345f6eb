//! The client facade: owns every collaborator, wires the
//! single `Graph::on_change` subscription that drives cache invalidation and
//! watcher notification, and exposes the public read/write/watch surface.

use std::rc::Rc;
use std::time::Duration;

use serde_json::Value as Json;

use crate::ast::Variables;
use crate::canonical::Canonical;
use crate::documents;
use crate::documents::MaterializeCache;
use crate::documents::MaterializeOptions;
use crate::error::CacheError;
use crate::fragments::FragmentHandle;
use crate::fragments::Fragments;
use crate::graph::Graph;
use crate::graph::Record;
use crate::graph::RecordId;
use crate::keys::KeyConfig;
use crate::optimistic::Builder;
use crate::optimistic::LayerId;
use crate::optimistic::Optimistic;
use crate::plan::Plan;
use crate::queries::CachePolicy;
use crate::queries::QueryHandle;
use crate::queries::Queries;
use crate::ssr::HydrationWindow;
use crate::ssr::Snapshot;
use crate::transport::Operation;
use crate::transport::OperationKind;
use crate::transport::Transport;

#[cfg(feature = "persistence")]
use std::cell::RefCell;

#[cfg(feature = "persistence")]
use futures::future::FutureExt;
#[cfg(feature = "persistence")]
use futures::future::LocalBoxFuture;

#[cfg(feature = "persistence")]
use crate::persistence::PersistenceAdapter;

/// Construction-time configuration; everything a `Client` needs that isn't
/// derivable from the graph itself.
pub struct ClientConfig {
    pub transport: Rc<dyn Transport>,
    pub keys: KeyConfig,
    pub default_cache_policy: CachePolicy,
    pub suspension_timeout: Duration,
    pub hydration_timeout: Duration,
    #[cfg(feature = "persistence")]
    pub persistence: Option<Rc<dyn PersistenceAdapter>>,
}

impl ClientConfig {
    pub fn new(transport: Rc<dyn Transport>) -> Self {
        Self {
            transport,
            keys: KeyConfig::new(),
            default_cache_policy: CachePolicy::CacheFirst,
            suspension_timeout: Duration::from_millis(300),
            hydration_timeout: Duration::from_secs(0),
            #[cfg(feature = "persistence")]
            persistence: None,
        }
    }
}

/// Composes the graph, planner, canonical connections, optimistic engine,
/// materialization cache, and the fragment/query watcher registries into the
/// single object embedders construct.
#[derive(Clone)]
pub struct Client {
    graph: Graph,
    canonical: Canonical,
    keys: KeyConfig,
    cache: MaterializeCache,
    transport: Rc<dyn Transport>,
    optimistic: Optimistic,
    fragments: Fragments,
    queries: Queries,
    hydration_window: HydrationWindow,
    #[cfg(feature = "persistence")]
    persistence: Option<Rc<dyn PersistenceAdapter>>,
    #[cfg(feature = "persistence")]
    pending_persist: Rc<RefCell<Vec<(RecordId, Option<Record>)>>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let graph = Graph::new();
        let canonical = Canonical::new();
        let cache = MaterializeCache::new();
        let optimistic = Optimistic::new(graph.clone());
        let fragments = Fragments::new(graph.clone(), canonical.clone(), config.keys.clone(), cache.clone());
        let hydration_window = HydrationWindow::new(config.hydration_timeout);
        let queries = Queries::new(
            graph.clone(),
            canonical.clone(),
            config.keys.clone(),
            cache.clone(),
            Rc::clone(&config.transport),
            config.default_cache_policy,
            config.suspension_timeout,
            hydration_window.clone(),
        );

        let client = Self {
            graph: graph.clone(),
            canonical,
            keys: config.keys,
            cache: cache.clone(),
            transport: config.transport,
            optimistic,
            fragments: fragments.clone(),
            queries: queries.clone(),
            hydration_window,
            #[cfg(feature = "persistence")]
            persistence: config.persistence,
            #[cfg(feature = "persistence")]
            pending_persist: Rc::new(RefCell::new(Vec::new())),
        };

        #[cfg(feature = "persistence")]
        let pending_persist = Rc::clone(&client.pending_persist);
        let has_persistence = {
            #[cfg(feature = "persistence")]
            {
                client.persistence.is_some()
            }
            #[cfg(not(feature = "persistence"))]
            {
                false
            }
        };

        let graph_for_listener = graph.clone();
        graph.on_change(move |touched| {
            cache.invalidate_touched(touched);
            fragments.propagate_data(touched);
            queries.propagate_data(touched);
            #[cfg(feature = "persistence")]
            if has_persistence {
                let mut pending = pending_persist.borrow_mut();
                for id in touched {
                    pending.push((id.clone(), graph_for_listener.get_record(id)));
                }
            }
            #[cfg(not(feature = "persistence"))]
            let _ = has_persistence;
        });

        client
    }

    fn root() -> RecordId {
        RecordId::root()
    }

    // -- queries --------------------------------------------------------

    pub async fn execute_query(&self, plan: Rc<Plan>, vars: Variables, policy: Option<CachePolicy>) -> Result<Rc<Json>, CacheError> {
        self.queries.execute(plan, vars, policy).await
    }

    pub fn watch_query(
        &self,
        plan: Rc<Plan>,
        vars: Variables,
        policy: CachePolicy,
        on_data: Box<dyn FnMut(Rc<Json>)>,
        on_error: Box<dyn FnMut(CacheError)>,
    ) -> (QueryHandle, Option<futures::future::LocalBoxFuture<'static, ()>>) {
        self.queries.watch(plan, vars, policy, on_data, on_error)
    }

    pub fn read_query(&self, plan: &Plan, vars: &Variables) -> Option<Rc<Json>> {
        self.fragments.read(&Self::root(), plan, vars)
    }

    pub fn write_query(&self, plan: &Plan, vars: &Variables, data: &Json) {
        self.fragments.write(&Self::root(), plan, vars, data);
    }

    // -- mutations / subscriptions ---------------------------------------

    pub async fn execute_mutation(&self, plan: Rc<Plan>, vars: Variables) -> Result<Rc<Json>, CacheError> {
        let operation = Operation { query: plan.network_query.clone(), variables: vars.clone(), operation_kind: OperationKind::Mutation };
        let response = self.transport.http(operation).await?;
        if let Some(data) = &response.data {
            documents::normalize(&self.graph, &self.canonical, &self.keys, &plan, &Self::root(), &vars, data);
        }
        self.graph.flush();
        if !response.errors.is_empty() {
            return Err(CacheError::GraphQl(std::sync::Arc::new(response.errors)));
        }
        let result = documents::materialize(
            &self.graph,
            &self.keys,
            &self.cache,
            &plan,
            &Self::root(),
            &vars,
            MaterializeOptions { canonical: true, force: true, fingerprint: true },
        );
        Ok(result.value)
    }

    pub fn execute_subscription(
        &self,
        plan: Rc<Plan>,
        vars: Variables,
    ) -> Option<futures::stream::LocalBoxStream<'static, Result<Rc<Json>, CacheError>>> {
        use futures::StreamExt;

        let operation = Operation { query: plan.network_query.clone(), variables: vars.clone(), operation_kind: OperationKind::Subscription };
        let stream = self.transport.subscribe(operation)?;
        let client = self.clone();
        Some(
            stream
                .map(move |item| {
                    let response = item?;
                    if let Some(data) = &response.data {
                        documents::normalize(&client.graph, &client.canonical, &client.keys, &plan, &Self::root(), &vars, data);
                    }
                    client.graph.flush();
                    if !response.errors.is_empty() {
                        return Err(CacheError::GraphQl(std::sync::Arc::new(response.errors)));
                    }
                    let result = documents::materialize(
                        &client.graph,
                        &client.keys,
                        &client.cache,
                        &plan,
                        &Self::root(),
                        &vars,
                        MaterializeOptions { canonical: true, force: true, fingerprint: true },
                    );
                    Ok(result.value)
                })
                .boxed_local(),
        )
    }

    // -- fragments --------------------------------------------------------

    pub fn read_fragment(&self, root_id: &RecordId, plan: &Plan, vars: &Variables) -> Option<Rc<Json>> {
        self.fragments.read(root_id, plan, vars)
    }

    pub fn write_fragment(&self, root_id: &RecordId, plan: &Plan, vars: &Variables, data: &Json) {
        self.fragments.write(root_id, plan, vars, data);
    }

    pub fn watch_fragment(&self, plan: Rc<Plan>, root_id: RecordId, vars: Variables, on_data: Box<dyn FnMut(Rc<Json>)>) -> FragmentHandle {
        self.fragments.watch(plan, root_id, vars, on_data)
    }

    // -- optimistic ---------------------------------------------------------

    pub fn modify_optimistic(&self, builder: Builder) -> Result<LayerId, CacheError> {
        self.optimistic.modify(builder)
    }

    pub fn commit_optimistic(&self, id: LayerId, builder: Builder, server_data: Option<Json>) -> Result<(), CacheError> {
        self.optimistic.commit(id, builder, server_data)
    }

    pub fn revert_optimistic(&self, id: LayerId) {
        self.optimistic.revert(id);
    }

    // -- introspection / SSR ----------------------------------------------

    /// Resolves the entity id a typed object would normalize to, or `None`
    /// if its typename has no usable key (it would be embedded instead).
    pub fn identify(&self, typename: &str, obj: &serde_json::Map<String, Json>) -> Option<RecordId> {
        self.keys.entity_id(typename, obj).map(RecordId::new)
    }

    /// Every record currently in the graph, for devtools-style inspection.
    pub fn inspect(&self) -> Vec<(RecordId, Record)> {
        self.graph.snapshot()
    }

    pub fn extract(&self) -> Snapshot {
        crate::ssr::extract(&self.graph)
    }

    pub fn hydrate(&self, snapshot: Snapshot) {
        crate::ssr::hydrate(&self.graph, snapshot, &self.hydration_window);
    }

    // -- persistence --------------------------------------------------------

    #[cfg(feature = "persistence")]
    pub async fn load_persisted(&self) -> Result<(), CacheError> {
        let Some(adapter) = &self.persistence else { return Ok(()) };
        match adapter.load().await {
            Ok(records) => {
                self.graph.load_snapshot(records);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to load persisted records");
                Ok(())
            }
        }
    }

    /// Drains the touched ids accumulated since the last drain and returns a
    /// future that writes them through the persistence adapter. `None` when
    /// nothing changed or no adapter is configured; the caller polls the
    /// future to completion on whatever executor it runs.
    #[cfg(feature = "persistence")]
    pub fn drain_persistence(&self) -> Option<LocalBoxFuture<'static, ()>> {
        let adapter = self.persistence.clone()?;
        let batch = std::mem::take(&mut *self.pending_persist.borrow_mut());
        if batch.is_empty() {
            return None;
        }
        Some(
            async move {
                let mut puts = Vec::new();
                let mut removes = Vec::new();
                for (id, record) in batch {
                    match record {
                        Some(record) => puts.push((id, record)),
                        None => removes.push(id),
                    }
                }
                if !puts.is_empty() {
                    if let Err(err) = adapter.put(puts).await {
                        tracing::warn!(error = %err, "failed to persist updated records");
                    }
                }
                if !removes.is_empty() {
                    if let Err(err) = adapter.remove(removes).await {
                        tracing::warn!(error = %err, "failed to persist removed records");
                    }
                }
            }
            .boxed_local(),
        )
    }
}
