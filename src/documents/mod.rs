//! Normalization and materialization: writing a response
//! into the graph, and reading a plan back out of it through a
//! refcounted, structurally memoized cache.

mod materialize;
mod normalize;

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::rc::Rc;

use serde_json::Value as Json;

pub use materialize::materialize;
pub use materialize::structurally_equal;
pub use materialize::MaterializeOptions;
pub use materialize::MaterializeResult;
pub use normalize::normalize;

use crate::graph::RecordId;

/// The identity a materialization is memoized under: everything but `force`,
/// which only ever decides whether this call bypasses a read of the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoKey {
    pub plan_id: u64,
    pub canonical: bool,
    pub vars_key: String,
}

struct MemoEntry {
    value: Rc<Json>,
    deps: HashSet<RecordId>,
    refcount: u32,
}

/// The per-plan+vars materialization cache. A "weak-by-refcount" cache per
/// the design notes: entries persist as long as something holds a reference
/// (via [`MaterializeCache::acquire`]) or until a graph change invalidates
/// them, whichever comes first.
#[derive(Clone)]
pub struct MaterializeCache {
    entries: Rc<RefCell<HashMap<MemoKey, MemoEntry>>>,
}

impl Default for MaterializeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterializeCache {
    pub fn new() -> Self {
        Self { entries: Rc::new(RefCell::new(HashMap::new())) }
    }

    fn get(&self, key: &MemoKey) -> Option<Rc<Json>> {
        self.entries.borrow().get(key).map(|entry| Rc::clone(&entry.value))
    }

    fn store(&self, key: MemoKey, value: Rc<Json>, deps: HashSet<RecordId>) {
        let mut entries = self.entries.borrow_mut();
        let refcount = entries.get(&key).map(|e| e.refcount).unwrap_or(0);
        entries.insert(key, MemoEntry { value, deps, refcount });
    }

    /// Increments the refcount for `key`; a no-op if nothing has
    /// materialized it yet (the first `materialize` call populates it).
    pub fn acquire(&self, key: &MemoKey) {
        if let Some(entry) = self.entries.borrow_mut().get_mut(key) {
            entry.refcount += 1;
        }
    }

    /// Decrements the refcount for `key`, dropping the entry once it hits
    /// zero.
    pub fn release(&self, key: &MemoKey) {
        let mut entries = self.entries.borrow_mut();
        let Some(entry) = entries.get_mut(key) else { return };
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount == 0 {
            entries.remove(key);
        }
    }

    /// Drops every entry whose dependency set overlaps `touched`. Called
    /// from the client facade's single `Graph::on_change` subscription.
    pub fn invalidate_touched(&self, touched: &HashSet<RecordId>) {
        self.entries.borrow_mut().retain(|_, entry| entry.deps.is_disjoint(touched));
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}
