//! SSR extract/hydrate (external interface): moving the whole graph across
//! a server/client boundary as a plain serializable payload, plus tracking
//! the hydration window `watchQuery` consults to skip a redundant refetch
//! right after hydrating.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;

use crate::graph::Graph;
use crate::graph::Record;
use crate::graph::RecordId;

/// The wire payload: every record in the graph, in insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub records: Vec<(RecordId, Record)>,
}

/// Serializes the whole graph. Call once on the server after the render
/// pass has populated the cache via `executeQuery`.
pub fn extract(graph: &Graph) -> Snapshot {
    Snapshot { records: graph.snapshot() }
}

/// Replaces the client graph's contents with `snapshot` and records the
/// hydration instant so `HydrationWindow::within` can answer queries made
/// immediately after.
pub fn hydrate(graph: &Graph, snapshot: Snapshot, window: &HydrationWindow) {
    graph.clear();
    graph.load_snapshot(snapshot.records);
    window.mark_now();
}

/// Shared clock for "did we just hydrate" checks. A query whose root is
/// already populated within this window is treated as satisfied by
/// `cache-and-network`'s cache read without an immediate duplicate refetch.
#[derive(Clone)]
pub struct HydrationWindow {
    hydrated_at: Rc<Cell<Option<Instant>>>,
    timeout: std::time::Duration,
}

impl HydrationWindow {
    pub fn new(timeout: std::time::Duration) -> Self {
        Self { hydrated_at: Rc::new(Cell::new(None)), timeout }
    }

    fn mark_now(&self) {
        self.hydrated_at.set(Some(Instant::now()));
    }

    /// True while `now` is still inside the configured timeout since the
    /// last `hydrate` call. Always false before the first hydration.
    pub fn within(&self) -> bool {
        match self.hydrated_at.get() {
            Some(at) => Instant::now().duration_since(at) <= self.timeout,
            None => false,
        }
    }
}
