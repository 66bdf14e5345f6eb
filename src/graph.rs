//! The in-memory record store: an id -> record map with change tracking.
//! The whole cache is single-threaded, so interior mutability is plain
//! `Rc<RefCell<..>>` rather than a `Mutex` -- there is no lock to take.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as Json;

/// Sentinel id for the root record that query/mutation root fields hang off.
pub const ROOT_ID: &str = "ROOT";

/// Reserved field key holding a record's concrete type name. Every record
/// written by the cache carries one.
pub const TYPENAME_KEY: &str = "__typename";

/// An interned-ish record id. Cheap to clone; used pervasively as a hash map
/// key and inside references, so it is reference counted rather than a
/// fresh heap allocation on every clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Rc<str>);

impl RecordId {
    pub fn new(id: impl Into<Rc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn root() -> Self {
        Self::new(ROOT_ID)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// A single field's value: a tagged union rather than raw JSON so that
/// references and reference-arrays are first-class and easy to walk without
/// re-parsing scalars on every traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Scalar(Json),
    Ref(RecordId),
    RefList(Vec<RecordId>),
}

impl FieldValue {
    pub fn as_ref_id(&self) -> Option<&RecordId> {
        match self {
            FieldValue::Ref(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_ref_list(&self) -> Option<&[RecordId]> {
        match self {
            FieldValue::RefList(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Json> {
        match self {
            FieldValue::Scalar(v) => Some(v),
            _ => None,
        }
    }
}

/// A flat field-key -> value map. Field order is preserved (insertion order)
/// purely for deterministic `inspect()` output; lookups are by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: IndexMap<Box<str>, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn typename(&self) -> Option<&str> {
        self.get(TYPENAME_KEY).and_then(FieldValue::as_scalar).and_then(Json::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_ref(), v))
    }

    /// Shallow-merges `patch` into this record. Ref-array fields are
    /// replaced wholesale (never merged element-wise), matching the data
    /// model's "replace whole array" rule. Returns the set of field keys
    /// whose value actually changed (by structural equality).
    fn merge(&mut self, patch: impl IntoIterator<Item = (String, FieldValue)>) -> Vec<Box<str>> {
        let mut changed = Vec::new();
        for (key, value) in patch {
            let key: Box<str> = key.into_boxed_str();
            match self.fields.get(&key) {
                Some(existing) if existing == &value => {}
                _ => {
                    self.fields.insert(key.clone(), value);
                    changed.push(key);
                }
            }
        }
        changed
    }

    pub(crate) fn merge_in_place(&mut self, patch: impl IntoIterator<Item = (String, FieldValue)>) {
        self.merge(patch);
    }
}

type ListenerId = u64;
type Listener = Box<dyn FnMut(&HashSet<RecordId>)>;

struct GraphInner {
    records: IndexMap<RecordId, Record>,
    touched: HashSet<RecordId>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener_id: ListenerId,
}

/// Handle returned by [`Graph::on_change`]; dropping it does not
/// unsubscribe (call [`ChangeSubscription::unsubscribe`] explicitly), which
/// mirrors the JS-style explicit-dispose handles used elsewhere in the core.
#[derive(Clone, Copy)]
pub struct ChangeSubscription(ListenerId);

/// The record graph. Cloning a `Graph` clones the handle, not the data --
/// every clone shares the same underlying store, the same way every module
/// in the cache shares one graph.
#[derive(Clone)]
pub struct Graph {
    inner: Rc<RefCell<GraphInner>>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(GraphInner {
                records: IndexMap::new(),
                touched: HashSet::new(),
                listeners: Vec::new(),
                next_listener_id: 0,
            })),
        }
    }

    pub fn get_record(&self, id: &RecordId) -> Option<Record> {
        self.inner.borrow().records.get(id).cloned()
    }

    pub fn has_record(&self, id: &RecordId) -> bool {
        self.inner.borrow().records.contains_key(id)
    }

    /// Shallow-merges `patch` into the record at `id`, creating it if
    /// absent. Field names actually changing are added to the pending
    /// touched-id set for the next [`Graph::flush`].
    pub fn put_record(&self, id: &RecordId, patch: impl IntoIterator<Item = (String, FieldValue)>) {
        let mut inner = self.inner.borrow_mut();
        let record = inner.records.entry(id.clone()).or_default();
        let changed = record.merge(patch);
        if !changed.is_empty() {
            inner.touched.insert(id.clone());
        }
    }

    pub fn delete_record(&self, id: &RecordId) {
        let mut inner = self.inner.borrow_mut();
        if inner.records.shift_remove(id).is_some() {
            inner.touched.insert(id.clone());
        }
    }

    /// Every id currently in the store, in insertion order. Used by
    /// `Client::inspect` and by optimistic replay to enumerate entities.
    pub fn record_ids(&self) -> Vec<RecordId> {
        self.inner.borrow().records.keys().cloned().collect()
    }

    /// Registers a listener invoked with the accumulated touched-id set on
    /// every [`Graph::flush`]. Listeners run in registration order within a
    /// single flush, each to completion before the next, matching the
    /// single-threaded notification-ordering contract.
    pub fn on_change(&self, listener: impl FnMut(&HashSet<RecordId>) + 'static) -> ChangeSubscription {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner.listeners.push((id, Box::new(listener)));
        ChangeSubscription(id)
    }

    pub fn unsubscribe(&self, subscription: ChangeSubscription) {
        self.inner.borrow_mut().listeners.retain(|(id, _)| *id != subscription.0);
    }

    /// Delivers the accumulated touched-id set to every listener and clears
    /// it. A no-op when nothing changed since the last flush, so callers can
    /// flush unconditionally at the end of every synchronous span (a
    /// normalize, a `writeQuery`, an optimistic builder run, a commit).
    pub fn flush(&self) {
        let touched = {
            let mut inner = self.inner.borrow_mut();
            if inner.touched.is_empty() {
                return;
            }
            std::mem::take(&mut inner.touched)
        };
        // Listeners run outside any borrow of `inner`: one may itself call
        // `put_record`/`on_change`/`unsubscribe`, which would otherwise
        // panic on a RefCell already borrowed by this loop.
        let mut listeners = std::mem::take(&mut self.inner.borrow_mut().listeners);
        for (_, listener) in listeners.iter_mut() {
            listener(&touched);
        }
        let mut inner = self.inner.borrow_mut();
        listeners.append(&mut inner.listeners);
        inner.listeners = listeners;
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().records.is_empty()
    }

    /// Discards every record and pending touched id. Used by SSR hydrate,
    /// which replaces the whole graph with a snapshot.
    pub fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.records.clear();
        inner.touched.clear();
    }

    /// Snapshot of every `(id, record)` pair, in insertion order. Used by
    /// SSR extract and by the persistence adapter's initial `put` batch.
    pub fn snapshot(&self) -> Vec<(RecordId, Record)> {
        self.inner.borrow().records.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Loads a snapshot verbatim (no diffing, no touched-id tracking) --
    /// used for SSR hydration and persistence-adapter `load()`, both of
    /// which replace state rather than incrementally patch it.
    pub fn load_snapshot(&self, records: impl IntoIterator<Item = (RecordId, Record)>) {
        let mut inner = self.inner.borrow_mut();
        for (id, record) in records {
            inner.records.insert(id, record);
        }
    }

    /// Moves the record at `old` to `new` and rewrites every Ref/RefList
    /// field across the whole store pointing at `old` to point at `new`.
    /// Used by the optimistic engine to rewrite placeholder ids to server
    /// ids on commit.
    pub fn rename_id(&self, old: &RecordId, new: &RecordId) {
        let mut inner = self.inner.borrow_mut();
        if old == new {
            return;
        }
        if let Some(record) = inner.records.shift_remove(old) {
            inner.records.insert(new.clone(), record);
            inner.touched.insert(new.clone());
        }
        let ids: Vec<RecordId> = inner.records.keys().cloned().collect();
        for id in ids {
            let mut changed = false;
            if let Some(record) = inner.records.get_mut(&id) {
                for value in record.fields.values_mut() {
                    match value {
                        FieldValue::Ref(r) if r == old => {
                            *r = new.clone();
                            changed = true;
                        }
                        FieldValue::RefList(rs) => {
                            for r in rs.iter_mut() {
                                if r == old {
                                    *r = new.clone();
                                    changed = true;
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            if changed {
                inner.touched.insert(id);
            }
        }
    }
}
