//! Query execution and the cache-policy state machine:
//! `executeQuery`/`watchQuery`, request coalescing, and the suspension and
//! hydration windows that gate a watcher's network fetch.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use futures::channel::oneshot;
use futures::future::FutureExt;
use futures::future::LocalBoxFuture;
use serde_json::Value as Json;

use crate::ast::Variables;
use crate::canonical::Canonical;
use crate::documents;
use crate::documents::MaterializeCache;
use crate::documents::MaterializeOptions;
use crate::documents::MemoKey;
use crate::error::CacheError;
use crate::error::NetworkError;
use crate::graph::Graph;
use crate::graph::RecordId;
use crate::keys::KeyConfig;
use crate::plan::Plan;
use crate::ssr::HydrationWindow;
use crate::transport::Operation;
use crate::transport::OperationKind;
use crate::transport::Transport;
use crate::transport::TransportResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    CacheOnly,
    CacheFirst,
    NetworkOnly,
    CacheAndNetwork,
}

type OnData = Box<dyn FnMut(Rc<Json>)>;
type OnError = Box<dyn FnMut(CacheError)>;

struct InFlight {
    waiters: Vec<oneshot::Sender<Result<TransportResponse, NetworkError>>>,
}

struct WatcherState {
    id: u64,
    plan: Rc<Plan>,
    variables: Variables,
    policy: CachePolicy,
    key: MemoKey,
    last_value: Option<Rc<Json>>,
    fetch_started_at: Option<Instant>,
    on_data: OnData,
    on_error: OnError,
}

const OPTS: MaterializeOptions = MaterializeOptions { canonical: true, force: false, fingerprint: true };

/// Owns every active `watchQuery` subscription, the in-flight request table
/// used for coalescing, and the collaborators a fetch needs to normalize its
/// response and re-read the graph.
#[derive(Clone)]
pub struct Queries {
    graph: Graph,
    canonical: Canonical,
    keys: KeyConfig,
    cache: MaterializeCache,
    transport: Rc<dyn Transport>,
    default_policy: CachePolicy,
    suspension_timeout: Duration,
    hydration_window: HydrationWindow,
    in_flight: Rc<RefCell<HashMap<String, InFlight>>>,
    /// Timestamp of the last successful fetch per strict signature, consulted
    /// by [`Self::is_within_suspension`] to short-circuit a redundant fetch
    /// within `suspension_timeout`.
    last_success: Rc<RefCell<HashMap<String, Instant>>>,
    watchers: Rc<RefCell<Vec<WatcherState>>>,
    next_id: Rc<RefCell<u64>>,
}

impl Queries {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Graph,
        canonical: Canonical,
        keys: KeyConfig,
        cache: MaterializeCache,
        transport: Rc<dyn Transport>,
        default_policy: CachePolicy,
        suspension_timeout: Duration,
        hydration_window: HydrationWindow,
    ) -> Self {
        Self {
            graph,
            canonical,
            keys,
            cache,
            transport,
            default_policy,
            suspension_timeout,
            hydration_window,
            in_flight: Rc::new(RefCell::new(HashMap::new())),
            last_success: Rc::new(RefCell::new(HashMap::new())),
            watchers: Rc::new(RefCell::new(Vec::new())),
            next_id: Rc::new(RefCell::new(0)),
        }
    }

    /// Records that `signature` just fetched successfully, starting its
    /// suspension window.
    fn record_fetch_success(&self, signature: &str) {
        self.last_success.borrow_mut().insert(signature.to_owned(), Instant::now());
    }

    /// Whether `signature`'s last successful fetch is still within
    /// `suspension_timeout`, meaning a fresh fetch for it should be
    /// short-circuited to the existing cached materialization.
    fn is_within_suspension(&self, signature: &str) -> bool {
        self.last_success.borrow().get(signature).is_some_and(|at| Instant::now().duration_since(*at) <= self.suspension_timeout)
    }

    fn read(&self, plan: &Plan, vars: &Variables) -> documents::MaterializeResult {
        documents::materialize(&self.graph, &self.keys, &self.cache, plan, &RecordId::root(), vars, OPTS)
    }

    /// Runs `plan`'s network query, deduplicating concurrent requests that
    /// share the same strict signature: the first caller performs the
    /// `http` call and fans the response out to every caller that joined
    /// while it was in flight.
    async fn fetch_coalesced(&self, plan: &Plan, vars: &Variables) -> Result<TransportResponse, NetworkError> {
        let signature = plan.make_signature(false, vars);
        let receiver = {
            let mut in_flight = self.in_flight.borrow_mut();
            if let Some(entry) = in_flight.get_mut(&signature) {
                let (tx, rx) = oneshot::channel();
                entry.waiters.push(tx);
                Some(rx)
            } else {
                in_flight.insert(signature.clone(), InFlight { waiters: Vec::new() });
                None
            }
        };
        if let Some(rx) = receiver {
            return rx.await.unwrap_or_else(|_| Err(NetworkError::new("coalesced request dropped before completion")));
        }

        let operation = Operation { query: plan.network_query.clone(), variables: vars.clone(), operation_kind: OperationKind::Query };
        let result = self.transport.http(operation).await;
        let waiters = self.in_flight.borrow_mut().remove(&signature).map(|entry| entry.waiters).unwrap_or_default();
        for tx in waiters {
            let _ = tx.send(result.clone());
        }
        result
    }

    async fn network_then_read(&self, plan: &Plan, vars: &Variables) -> Result<Rc<Json>, CacheError> {
        let response = self.fetch_coalesced(plan, vars).await?;
        if let Some(data) = &response.data {
            documents::normalize(&self.graph, &self.canonical, &self.keys, plan, &RecordId::root(), vars, data);
        }
        self.graph.flush();
        if !response.errors.is_empty() {
            return Err(CacheError::GraphQl(Arc::new(response.errors)));
        }
        let result = documents::materialize(&self.graph, &self.keys, &self.cache, plan, &RecordId::root(), vars, MaterializeOptions { canonical: true, force: true, fingerprint: true });
        if result.is_complete {
            self.record_fetch_success(&plan.make_signature(false, vars));
            Ok(result.value)
        } else {
            Err(CacheError::CacheOnlyMiss { signature: plan.make_signature(true, vars) })
        }
    }

    /// `executeQuery`: one read/fetch resolved per `policy` (or the client's
    /// configured default).
    pub async fn execute(&self, plan: Rc<Plan>, vars: Variables, policy: Option<CachePolicy>) -> Result<Rc<Json>, CacheError> {
        let policy = policy.unwrap_or(self.default_policy);
        if policy == CachePolicy::CacheOnly {
            let result = self.read(&plan, &vars);
            return if result.is_complete {
                Ok(result.value)
            } else {
                Err(CacheError::CacheOnlyMiss { signature: plan.make_signature(true, &vars) })
            };
        }
        let result = self.read(&plan, &vars);
        let signature = plan.make_signature(false, &vars);
        if self.needs_network(policy, result.is_complete, &signature) {
            self.network_then_read(&plan, &vars).await
        } else {
            Ok(result.value)
        }
    }

    fn alloc_id(&self) -> u64 {
        let mut next = self.next_id.borrow_mut();
        let id = *next;
        *next += 1;
        id
    }

    /// Whether a fetch should be scheduled for a plan/vars pair already
    /// known to materialize as `cache_complete`, under `policy`. A
    /// hydrated-but-incomplete or suspended-but-incomplete cache still
    /// forces a fetch -- the hydration and suspension windows only ever
    /// excuse a fetch for data that is actually present (spec.md §4.7).
    fn needs_network(&self, policy: CachePolicy, cache_complete: bool, signature: &str) -> bool {
        match policy {
            CachePolicy::CacheOnly => false,
            CachePolicy::CacheFirst => !cache_complete && !self.is_within_suspension(signature),
            CachePolicy::NetworkOnly | CachePolicy::CacheAndNetwork => {
                !cache_complete || (!self.hydration_window.within() && !self.is_within_suspension(signature))
            }
        }
    }

    /// `watchQuery`: emits the current cache state synchronously when it is
    /// complete, then returns a future driving any network fetch the policy
    /// calls for. The caller polls that future to completion (on whatever
    /// executor hosts it); the watcher itself is notified reactively through
    /// [`Queries::propagate_data`] both when the fetch lands and on any
    /// later graph change.
    pub fn watch(&self, plan: Rc<Plan>, vars: Variables, policy: CachePolicy, mut on_data: OnData, on_error: OnError) -> (QueryHandle, Option<LocalBoxFuture<'static, ()>>) {
        let id = self.alloc_id();
        let result = self.read(&plan, &vars);
        self.cache.acquire(&result.key);
        if result.is_complete {
            on_data(Rc::clone(&result.value));
        }
        let signature = plan.make_signature(false, &vars);
        let needs_network = self.needs_network(policy, result.is_complete, &signature);
        let fetch_started_at = needs_network.then(Instant::now);
        let last_value = result.is_complete.then_some(result.value);
        self.watchers.borrow_mut().push(WatcherState {
            id,
            plan: Rc::clone(&plan),
            variables: vars.clone(),
            policy,
            key: result.key,
            last_value,
            fetch_started_at,
            on_data,
            on_error,
        });
        let fetch = needs_network.then(|| self.spawn_fetch(id, plan, vars));
        (QueryHandle { queries: self.clone(), id }, fetch)
    }

    fn spawn_fetch(&self, id: u64, plan: Rc<Plan>, vars: Variables) -> LocalBoxFuture<'static, ()> {
        let registry = self.clone();
        async move {
            let result = registry.network_then_read(&plan, &vars).await;
            registry.deliver(id, result);
        }
        .boxed_local()
    }

    fn deliver(&self, id: u64, result: Result<Rc<Json>, CacheError>) {
        let mut watchers = self.watchers.borrow_mut();
        let Some(watcher) = watchers.iter_mut().find(|w| w.id == id) else { return };
        watcher.fetch_started_at = None;
        match result {
            Ok(value) => {
                // The forced re-materialize inside `network_then_read` always
                // allocates a fresh `Rc`, so `Rc::ptr_eq` against the prior
                // emit (possibly already refreshed by this same flush via
                // `propagate_data`) can never suppress a no-op delivery; only
                // a structural comparison catches it (spec.md §4.7, Testable
                // Property #6).
                let changed = match &watcher.last_value {
                    Some(prev) => !documents::structurally_equal(prev, &value),
                    None => true,
                };
                watcher.last_value = Some(Rc::clone(&value));
                if changed {
                    (watcher.on_data)(value);
                }
            }
            Err(err) => (watcher.on_error)(err),
        }
    }

    /// `refetch`: re-runs the network fetch for an existing watcher
    /// unconditionally, ignoring its configured cache policy.
    fn refetch(&self, id: u64) -> Option<LocalBoxFuture<'static, ()>> {
        let (plan, vars) = {
            let mut watchers = self.watchers.borrow_mut();
            let watcher = watchers.iter_mut().find(|w| w.id == id)?;
            watcher.fetch_started_at = Some(Instant::now());
            (Rc::clone(&watcher.plan), watcher.variables.clone())
        };
        Some(self.spawn_fetch(id, plan, vars))
    }

    fn update(&self, id: u64, variables: Option<Variables>) -> Option<LocalBoxFuture<'static, ()>> {
        let (plan, vars, policy) = {
            let mut watchers = self.watchers.borrow_mut();
            let watcher = watchers.iter_mut().find(|w| w.id == id)?;
            self.cache.release(&watcher.key);
            if let Some(new_vars) = variables {
                watcher.variables = new_vars;
            }
            (Rc::clone(&watcher.plan), watcher.variables.clone(), watcher.policy)
        };
        let result = self.read(&plan, &vars);
        self.cache.acquire(&result.key);
        let signature = plan.make_signature(false, &vars);
        let needs_network = self.needs_network(policy, result.is_complete, &signature);
        {
            let mut watchers = self.watchers.borrow_mut();
            let Some(watcher) = watchers.iter_mut().find(|w| w.id == id) else { return None };
            watcher.key = result.key;
            if result.is_complete {
                (watcher.on_data)(Rc::clone(&result.value));
                watcher.last_value = Some(result.value);
            }
            watcher.fetch_started_at = needs_network.then(Instant::now);
        }
        needs_network.then(|| self.spawn_fetch(id, plan, vars))
    }

    fn unsubscribe(&self, id: u64) {
        let mut watchers = self.watchers.borrow_mut();
        if let Some(pos) = watchers.iter().position(|w| w.id == id) {
            let watcher = watchers.remove(pos);
            self.cache.release(&watcher.key);
        }
    }

    /// The injection point called by the client facade's single
    /// `Graph::on_change` subscription. Every watcher is re-materialized
    /// against the shared [`MaterializeCache`] on every flush rather than
    /// pre-filtered by `touched`: a plan's statically-known dependency set
    /// (`Plan::get_dependencies`) only ever covers its root and top-level
    /// connection ids, not the entity ids a ref field resolves to (those
    /// depend on response content, not the plan), so it cannot safely rule
    /// a watcher out here without risking a missed notification. The cache
    /// already makes a no-op re-materialize cheap, and `Rc::ptr_eq` below
    /// still suppresses the callback when nothing this watcher reads
    /// actually changed.
    pub fn propagate_data(&self, _touched: &HashSet<RecordId>) {
        let mut watchers = self.watchers.borrow_mut();
        for watcher in watchers.iter_mut() {
            let result = documents::materialize(&self.graph, &self.keys, &self.cache, &watcher.plan, &RecordId::root(), &watcher.variables, OPTS);
            let changed = match &watcher.last_value {
                Some(prev) => !Rc::ptr_eq(prev, &result.value),
                None => result.is_complete,
            };
            watcher.key = result.key;
            if result.is_complete {
                if changed {
                    (watcher.on_data)(Rc::clone(&result.value));
                }
                watcher.last_value = Some(result.value);
            }
        }
    }

    /// Whether watcher `id` has a network fetch that started less than the
    /// configured suspension timeout ago. A UI layer consults this to decide
    /// between showing stale cache data and a loading state while
    /// `cache-first`/`cache-and-network` wait on the network.
    fn is_within_suspension_window(&self, id: u64) -> bool {
        let watchers = self.watchers.borrow();
        watchers
            .iter()
            .find(|w| w.id == id)
            .and_then(|w| w.fetch_started_at)
            .is_some_and(|at| Instant::now().duration_since(at) <= self.suspension_timeout)
    }
}

pub struct QueryHandle {
    queries: Queries,
    id: u64,
}

impl QueryHandle {
    pub fn update(&self, variables: Option<Variables>) -> Option<LocalBoxFuture<'static, ()>> {
        self.queries.update(self.id, variables)
    }

    pub fn refetch(&self) -> Option<LocalBoxFuture<'static, ()>> {
        self.queries.refetch(self.id)
    }

    pub fn is_within_suspension_window(&self) -> bool {
        self.queries.is_within_suspension_window(self.id)
    }

    pub fn unsubscribe(&self) {
        self.queries.unsubscribe(self.id);
    }
}
