//! Snapshot and reactive read/write of a fragment rooted at an arbitrary
//! entity. Query execution is the same shape one level up (rooted at
//! [`crate::graph::ROOT_ID`] instead of a caller-supplied id); the two share
//! `documents::materialize`/`normalize` and differ only in their
//! cache-policy orchestration.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use serde_json::Value as Json;

use crate::ast::Variables;
use crate::canonical::Canonical;
use crate::documents;
use crate::documents::MaterializeCache;
use crate::documents::MaterializeOptions;
use crate::documents::MemoKey;
use crate::graph::Graph;
use crate::graph::RecordId;
use crate::keys::KeyConfig;
use crate::plan::Plan;

type OnData = Box<dyn FnMut(Rc<Json>)>;

struct WatcherState {
    id: u64,
    plan: Rc<Plan>,
    root_id: RecordId,
    variables: Variables,
    key: MemoKey,
    last_value: Option<Rc<Json>>,
    on_data: OnData,
}

/// Owns every active `watchFragment` subscription and the shared
/// materialization cache/graph/keys they read through.
#[derive(Clone)]
pub struct Fragments {
    graph: Graph,
    canonical: Canonical,
    keys: KeyConfig,
    cache: MaterializeCache,
    watchers: Rc<RefCell<Vec<WatcherState>>>,
    next_id: Rc<RefCell<u64>>,
}

const OPTS: MaterializeOptions = MaterializeOptions { canonical: true, force: false, fingerprint: true };

impl Fragments {
    pub fn new(graph: Graph, canonical: Canonical, keys: KeyConfig, cache: MaterializeCache) -> Self {
        Self { graph, canonical, keys, cache, watchers: Rc::new(RefCell::new(Vec::new())), next_id: Rc::new(RefCell::new(0)) }
    }

    /// `readFragment`: `None` when the root entity record is absent.
    pub fn read(&self, root_id: &RecordId, plan: &Plan, variables: &Variables) -> Option<Rc<Json>> {
        let result = documents::materialize(&self.graph, &self.keys, &self.cache, plan, root_id, variables, OPTS);
        result.is_complete.then_some(result.value)
    }

    /// `writeFragment`: normalizes `data` as if it were the response for
    /// `plan` rooted at `root_id`.
    pub fn write(&self, root_id: &RecordId, plan: &Plan, variables: &Variables, data: &Json) {
        documents::normalize(&self.graph, &self.canonical, &self.keys, plan, root_id, variables, data);
        self.graph.flush();
    }

    pub fn watch(&self, plan: Rc<Plan>, root_id: RecordId, variables: Variables, mut on_data: OnData) -> FragmentHandle {
        let id = self.alloc_id();
        let result = documents::materialize(&self.graph, &self.keys, &self.cache, &plan, &root_id, &variables, OPTS);
        self.cache.acquire(&result.key);
        let last_value = if result.is_complete {
            on_data(Rc::clone(&result.value));
            Some(result.value)
        } else {
            None
        };
        self.watchers.borrow_mut().push(WatcherState { id, plan, root_id, variables, key: result.key, last_value, on_data });
        FragmentHandle { fragments: self.clone(), id }
    }

    fn alloc_id(&self) -> u64 {
        let mut next = self.next_id.borrow_mut();
        let id = *next;
        *next += 1;
        id
    }

    fn update(&self, id: u64, root_id: Option<RecordId>, variables: Option<Variables>, immediate: bool) {
        let mut watchers = self.watchers.borrow_mut();
        let Some(watcher) = watchers.iter_mut().find(|w| w.id == id) else { return };
        self.cache.release(&watcher.key);
        if let Some(new_root) = root_id {
            watcher.root_id = new_root;
        }
        if let Some(new_vars) = variables {
            watcher.variables = new_vars;
        }
        let result = documents::materialize(&self.graph, &self.keys, &self.cache, &watcher.plan, &watcher.root_id, &watcher.variables, OPTS);
        self.cache.acquire(&result.key);
        watcher.key = result.key;
        if result.is_complete {
            if immediate {
                (watcher.on_data)(Rc::clone(&result.value));
            }
            watcher.last_value = Some(result.value);
        } else {
            watcher.last_value = None;
        }
    }

    fn unsubscribe(&self, id: u64) {
        let mut watchers = self.watchers.borrow_mut();
        if let Some(pos) = watchers.iter().position(|w| w.id == id) {
            let watcher = watchers.remove(pos);
            self.cache.release(&watcher.key);
        }
    }

    /// The injection point called by `Graph::on_change`. Re-materializes
    /// every watcher against the shared cache and emits only when the
    /// result's identity changed. `touched` isn't used to pre-filter
    /// watchers here: fragments can be rooted at any entity, and the only
    /// statically known dependency set (`Plan::get_dependencies`) is
    /// relative to the root record, not useful for an arbitrary one, so
    /// the cheap conservative option is to let the cache absorb repeat
    /// materializes and rely on `Rc::ptr_eq` to suppress no-op callbacks.
    pub fn propagate_data(&self, _touched: &HashSet<RecordId>) {
        let mut watchers = self.watchers.borrow_mut();
        for watcher in watchers.iter_mut() {
            let result = documents::materialize(&self.graph, &self.keys, &self.cache, &watcher.plan, &watcher.root_id, &watcher.variables, OPTS);
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
            } else {
                watcher.last_value = None;
            }
        }
    }
}

pub struct FragmentHandle {
    fragments: Fragments,
    id: u64,
}

impl FragmentHandle {
    pub fn update(&self, root_id: Option<RecordId>, variables: Option<Variables>, immediate: bool) {
        self.fragments.update(self.id, root_id, variables, immediate);
    }

    pub fn unsubscribe(&self) {
        self.fragments.unsubscribe(self.id);
    }
}
