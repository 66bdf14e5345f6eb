//! Layered optimistic mutation engine: an ordered list of diffs per record id
//! plus per-connection edge operations, replayed over a lazily captured
//! baseline.
//! Revert is list removal followed by a full replay of the remaining layers;
//! there is no copy-on-write graph underneath.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::error::CacheError;
use crate::graph::FieldValue;
use crate::graph::Graph;
use crate::graph::Record;
use crate::graph::RecordId;
use crate::graph::TYPENAME_KEY;

pub type LayerId = u64;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Optimistic,
    Commit,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum PatchMode {
    Merge,
    Replace,
}

#[derive(Clone)]
pub enum Position {
    Start,
    End,
    After(RecordId),
    Before(RecordId),
}

#[derive(Clone)]
struct EntityPatch {
    mode: PatchMode,
    fields: IndexMap<String, FieldValue>,
}

#[derive(Clone)]
enum EntityOp {
    Patch(EntityPatch),
    Delete,
}

#[derive(Clone)]
pub struct EdgeSpec {
    pub node_id: RecordId,
    pub cursor: Option<Json>,
    pub extra: IndexMap<String, FieldValue>,
}

#[derive(Clone)]
enum ConnectionOp {
    AddNode { edge: EdgeSpec, position: Position },
    RemoveNode { node_id: RecordId },
    Patch { fields: IndexMap<String, FieldValue> },
}

#[derive(Clone, Default)]
struct Layer {
    id: LayerId,
    entity_ops: Vec<(RecordId, EntityOp)>,
    connection_ops: Vec<(RecordId, ConnectionOp)>,
    /// Records touched by an `addNode(..., fragment: ...)` nested-connection
    /// auto-init, so a revert tears the placeholder connections down too.
    initialized_connections: HashSet<RecordId>,
    committed: bool,
}

impl Layer {
    fn touched_entities(&self) -> impl Iterator<Item = &RecordId> {
        self.entity_ops.iter().map(|(id, _)| id)
    }

    fn touched_connections(&self) -> impl Iterator<Item = &RecordId> {
        self.connection_ops.iter().map(|(id, _)| id).chain(self.initialized_connections.iter())
    }
}

/// Accumulates the operations an optimistic builder closure issues. Shared
/// (via interior mutability) between the closure and the engine running it.
pub struct OptimisticContext {
    phase: Phase,
    data: Option<Json>,
    layer: RefCell<Layer>,
    renames: RefCell<Vec<(RecordId, RecordId)>>,
}

impl OptimisticContext {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn data(&self) -> Option<&Json> {
        self.data.as_ref()
    }

    pub fn patch(&self, target: &RecordId, mode: PatchMode, fields: IndexMap<String, FieldValue>) {
        self.layer.borrow_mut().entity_ops.push((target.clone(), EntityOp::Patch(EntityPatch { mode, fields })));
    }

    pub fn delete(&self, target: &RecordId) {
        self.layer.borrow_mut().entity_ops.push((target.clone(), EntityOp::Delete));
    }

    pub fn connection(&self, id: &RecordId) -> ConnectionHandle<'_> {
        ConnectionHandle { ctx: self, id: id.clone() }
    }

    /// Registers a placeholder-id -> server-id rewrite, applied globally by
    /// the engine once the commit-phase builder run finishes.
    pub fn rename(&self, old: RecordId, new: RecordId) {
        self.renames.borrow_mut().push((old, new));
    }

    /// Marks `connection_id` as auto-initialized by this layer's `addNode`
    /// fragment option, so revert removes it along with the node. Idempotent
    /// per call site: re-registering the same id is a no-op.
    pub fn mark_initialized_connection(&self, connection_id: RecordId) {
        self.layer.borrow_mut().initialized_connections.insert(connection_id);
    }

    pub fn is_connection_initialized(&self, connection_id: &RecordId) -> bool {
        self.layer.borrow().initialized_connections.contains(connection_id)
    }
}

pub struct ConnectionHandle<'a> {
    ctx: &'a OptimisticContext,
    id: RecordId,
}

impl ConnectionHandle<'_> {
    pub fn add_node(&self, edge: EdgeSpec, position: Position) {
        self.ctx.layer.borrow_mut().connection_ops.push((self.id.clone(), ConnectionOp::AddNode { edge, position }));
    }

    pub fn remove_node(&self, node_id: RecordId) {
        self.ctx.layer.borrow_mut().connection_ops.push((self.id.clone(), ConnectionOp::RemoveNode { node_id }));
    }

    pub fn patch(&self, fields: IndexMap<String, FieldValue>) {
        self.ctx.layer.borrow_mut().connection_ops.push((self.id.clone(), ConnectionOp::Patch { fields }));
    }
}

/// A builder closure: runs once per `modifyOptimistic` call (phase
/// `Optimistic`), and again on `commit` (phase `Commit`, with the server
/// payload available via `ctx.data()`).
pub type Builder = Rc<dyn Fn(&OptimisticContext) -> Result<(), CacheError>>;

#[derive(Clone, Default)]
struct ConnectionSnapshot {
    node_ids: Vec<RecordId>,
    edge_fields: HashMap<RecordId, IndexMap<String, FieldValue>>,
    container: IndexMap<String, FieldValue>,
}

struct EngineInner {
    layers: Vec<Layer>,
    baseline: HashMap<RecordId, Option<Record>>,
    baseline_connections: HashMap<RecordId, ConnectionSnapshot>,
    next_id: LayerId,
}

/// The optimistic engine. Shares a [`Graph`] with the rest of the cache and
/// writes the replayed result of every active layer straight into it.
#[derive(Clone)]
pub struct Optimistic {
    inner: Rc<RefCell<EngineInner>>,
    graph: Graph,
}

impl Optimistic {
    pub fn new(graph: Graph) -> Self {
        Self {
            inner: Rc::new(RefCell::new(EngineInner {
                layers: Vec::new(),
                baseline: HashMap::new(),
                baseline_connections: HashMap::new(),
                next_id: 0,
            })),
            graph,
        }
    }

    /// Runs `builder` in the optimistic phase, capturing baselines for every
    /// record it touches and writing the replayed result into the graph.
    /// On error, the partial layer is discarded before the error propagates.
    pub fn modify(&self, builder: Builder) -> Result<LayerId, CacheError> {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            id
        };
        let ctx = OptimisticContext { phase: Phase::Optimistic, data: None, layer: RefCell::new(Layer::default()), renames: RefCell::new(Vec::new()) };
        if let Err(err) = builder(&ctx) {
            return Err(err);
        }
        let mut layer = ctx.layer.into_inner();
        layer.id = id;
        self.capture_baseline(&layer);
        self.inner.borrow_mut().layers.push(layer);
        self.recompute_and_flush();
        self.graph.flush();
        Ok(id)
    }

    /// Re-runs `builder` in the commit phase with `server_data`, applies any
    /// id renames it registered everywhere (other layers, baselines, graph),
    /// replaces the layer's stored ops with the commit-phase ones, then
    /// replays. The layer stays in the active stack: per the concrete
    /// revert-after-commit scenario, committing only rewrites ids, it does
    /// not seal the layer against a later revert.
    pub fn commit(&self, id: LayerId, builder: Builder, server_data: Option<Json>) -> Result<(), CacheError> {
        let ctx = OptimisticContext { phase: Phase::Commit, data: server_data, layer: RefCell::new(Layer::default()), renames: RefCell::new(Vec::new()) };
        if let Err(err) = builder(&ctx) {
            return Err(err);
        }
        let mut new_layer = ctx.layer.into_inner();
        new_layer.id = id;
        new_layer.committed = true;
        let renames = ctx.renames.into_inner();

        let mut inner = self.inner.borrow_mut();
        for (old, new) in &renames {
            rename_in_layers(&mut inner.layers, old, new);
            rename_in_layer(&mut new_layer, old, new);
            rename_in_baseline_connections(&mut inner.baseline_connections, old, new);
        }
        if let Some(pos) = inner.layers.iter().position(|l| l.id == id) {
            inner.layers[pos] = new_layer;
        } else {
            inner.layers.push(new_layer);
        }
        drop(inner);
        for (old, new) in &renames {
            self.graph.rename_id(old, new);
        }
        self.recapture_after_rename(&renames);
        self.recompute_and_flush();
        self.graph.flush();
        Ok(())
    }

    /// Discards the layer and replays baseline + remaining active layers
    /// over every id it touched. Idempotent: reverting an id not in the
    /// active stack is a no-op.
    pub fn revert(&self, id: LayerId) {
        let removed = {
            let mut inner = self.inner.borrow_mut();
            let Some(pos) = inner.layers.iter().position(|l| l.id == id) else { return };
            Some(inner.layers.remove(pos))
        };
        if removed.is_none() {
            return;
        }
        self.recompute_and_flush();
        self.graph.flush();
    }

    /// Rebuilds the scoped records from baseline + all active layers,
    /// returning the node ids added/removed for the connections scope
    /// relative to the connection's current graph state.
    pub fn replay(&self, entities: &[RecordId], connections: &[RecordId]) -> (Vec<RecordId>, Vec<RecordId>) {
        let before: HashMap<RecordId, HashSet<RecordId>> =
            connections.iter().map(|id| (id.clone(), self.current_node_set(id))).collect();
        for id in entities {
            self.recompute_entity(id);
        }
        let mut added = Vec::new();
        let mut removed = Vec::new();
        for id in connections {
            let snapshot = self.resolve_connection(id);
            let after: HashSet<RecordId> = snapshot.node_ids.iter().cloned().collect();
            let prior = before.get(id).cloned().unwrap_or_default();
            added.extend(after.difference(&prior).cloned());
            removed.extend(prior.difference(&after).cloned());
            self.write_connection_snapshot(id, &snapshot);
        }
        self.graph.flush();
        (added, removed)
    }

    fn current_node_set(&self, id: &RecordId) -> HashSet<RecordId> {
        self.graph
            .get_record(id)
            .and_then(|r| r.get("edges").and_then(FieldValue::as_ref_list).map(|ids| ids.to_vec()))
            .map(|edge_ids| {
                edge_ids
                    .iter()
                    .filter_map(|eid| self.graph.get_record(eid))
                    .filter_map(|r| r.get("node").and_then(FieldValue::as_ref_id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn capture_baseline(&self, layer: &Layer) {
        let mut inner = self.inner.borrow_mut();
        for id in layer.touched_entities() {
            inner.baseline.entry(id.clone()).or_insert_with(|| self.graph.get_record(id));
        }
        for id in layer.touched_connections() {
            if inner.baseline_connections.contains_key(id) {
                continue;
            }
            let snapshot = self.read_connection_from_graph(id);
            inner.baseline_connections.insert(id.clone(), snapshot);
        }
    }

    fn read_connection_from_graph(&self, id: &RecordId) -> ConnectionSnapshot {
        let Some(record) = self.graph.get_record(id) else { return ConnectionSnapshot::default() };
        let mut snapshot = ConnectionSnapshot::default();
        for (key, value) in record.iter() {
            if key != "edges" && key != "pageInfo" && key != TYPENAME_KEY {
                snapshot.container.insert(key.to_owned(), value.clone());
            }
        }
        if let Some(edge_ids) = record.get("edges").and_then(FieldValue::as_ref_list) {
            for edge_id in edge_ids {
                let Some(edge) = self.graph.get_record(edge_id) else { continue };
                let Some(node_id) = edge.get("node").and_then(FieldValue::as_ref_id).cloned() else { continue };
                let extra: IndexMap<String, FieldValue> =
                    edge.iter().filter(|(k, _)| *k != "node" && *k != TYPENAME_KEY).map(|(k, v)| (k.to_owned(), v.clone())).collect();
                snapshot.node_ids.push(node_id.clone());
                snapshot.edge_fields.insert(node_id, extra);
            }
        }
        snapshot
    }

    fn recompute_and_flush(&self) {
        let (entity_ids, connection_ids): (HashSet<RecordId>, HashSet<RecordId>) = {
            let inner = self.inner.borrow();
            let mut ents = HashSet::new();
            let mut conns = HashSet::new();
            for layer in &inner.layers {
                ents.extend(layer.touched_entities().cloned());
                conns.extend(layer.touched_connections().cloned());
            }
            for id in inner.baseline.keys() {
                ents.insert(id.clone());
            }
            for id in inner.baseline_connections.keys() {
                conns.insert(id.clone());
            }
            (ents, conns)
        };
        for id in &entity_ids {
            self.recompute_entity(id);
        }
        for id in &connection_ids {
            let snapshot = self.resolve_connection(id);
            self.write_connection_snapshot(id, &snapshot);
        }
    }

    fn recompute_entity(&self, id: &RecordId) {
        let inner = self.inner.borrow();
        let mut value = inner.baseline.get(id).cloned().flatten();
        for layer in &inner.layers {
            for (target, op) in &layer.entity_ops {
                if target != id {
                    continue;
                }
                match op {
                    EntityOp::Delete => value = None,
                    EntityOp::Patch(patch) => {
                        let mut record = value.unwrap_or_default();
                        if patch.mode == PatchMode::Replace {
                            record = Record::default();
                        }
                        record = apply_patch(record, &patch.fields);
                        value = Some(record);
                    }
                }
            }
        }
        drop(inner);
        match value {
            Some(record) => self.graph.put_record(id, record.iter().map(|(k, v)| (k.to_owned(), v.clone()))),
            None => self.graph.delete_record(id),
        }
    }

    fn resolve_connection(&self, id: &RecordId) -> ConnectionSnapshot {
        let inner = self.inner.borrow();
        let mut snapshot = inner.baseline_connections.get(id).cloned().unwrap_or_default();
        for layer in &inner.layers {
            for (target, op) in &layer.connection_ops {
                if target != id {
                    continue;
                }
                match op {
                    ConnectionOp::RemoveNode { node_id } => {
                        snapshot.node_ids.retain(|n| n != node_id);
                        snapshot.edge_fields.remove(node_id);
                    }
                    ConnectionOp::Patch { fields } => {
                        for (k, v) in fields {
                            snapshot.container.insert(k.clone(), v.clone());
                        }
                    }
                    ConnectionOp::AddNode { edge, position } => {
                        if snapshot.node_ids.contains(&edge.node_id) {
                            snapshot.node_ids.retain(|n| n != &edge.node_id);
                        }
                        let mut fields = edge.extra.clone();
                        fields.insert("cursor".to_owned(), FieldValue::Scalar(edge.cursor.clone().unwrap_or(Json::Null)));
                        let insert_at = match position {
                            Position::Start => 0,
                            Position::End => snapshot.node_ids.len(),
                            Position::After(anchor) => {
                                snapshot.node_ids.iter().position(|n| n == anchor).map(|i| i + 1).unwrap_or(snapshot.node_ids.len())
                            }
                            Position::Before(anchor) => snapshot.node_ids.iter().position(|n| n == anchor).unwrap_or(0),
                        };
                        snapshot.node_ids.insert(insert_at.min(snapshot.node_ids.len()), edge.node_id.clone());
                        snapshot.edge_fields.insert(edge.node_id.clone(), fields);
                    }
                }
            }
        }
        snapshot
    }

    fn write_connection_snapshot(&self, id: &RecordId, snapshot: &ConnectionSnapshot) {
        let mut edge_ids = Vec::with_capacity(snapshot.node_ids.len());
        for (i, node_id) in snapshot.node_ids.iter().enumerate() {
            let edge_id = RecordId::new(format!("{id}.edges.{i}"));
            let mut fields: Vec<(String, FieldValue)> =
                vec![(TYPENAME_KEY.to_owned(), FieldValue::Scalar(Json::String("Edge".into()))), ("node".to_owned(), FieldValue::Ref(node_id.clone()))];
            if let Some(extra) = snapshot.edge_fields.get(node_id) {
                fields.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            self.graph.put_record(&edge_id, fields);
            edge_ids.push(edge_id);
        }
        let mut fields: Vec<(String, FieldValue)> = vec![("edges".to_owned(), FieldValue::RefList(edge_ids))];
        fields.extend(snapshot.container.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.graph.put_record(id, fields);
    }

    fn recapture_after_rename(&self, renames: &[(RecordId, RecordId)]) {
        let mut inner = self.inner.borrow_mut();
        for (old, new) in renames {
            if let Some(value) = inner.baseline.remove(old) {
                inner.baseline.insert(new.clone(), value);
            }
        }
    }
}

fn apply_patch(mut record: Record, patch: &IndexMap<String, FieldValue>) -> Record {
    let changes: Vec<(String, FieldValue)> = patch.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    record.merge_in_place(changes);
    record
}

fn rename_in_layer(layer: &mut Layer, old: &RecordId, new: &RecordId) {
    for (target, op) in &mut layer.entity_ops {
        if *target == *old {
            *target = new.clone();
        }
        if let EntityOp::Patch(patch) = op {
            rename_in_fields(&mut patch.fields, old, new);
        }
    }
    for (target, op) in &mut layer.connection_ops {
        if *target == *old {
            *target = new.clone();
        }
        match op {
            ConnectionOp::AddNode { edge, position } => {
                if edge.node_id == *old {
                    edge.node_id = new.clone();
                }
                match position {
                    Position::After(a) | Position::Before(a) if *a == *old => *a = new.clone(),
                    _ => {}
                }
            }
            ConnectionOp::RemoveNode { node_id } if *node_id == *old => *node_id = new.clone(),
            _ => {}
        }
    }
    let renamed: HashSet<RecordId> = layer
        .initialized_connections
        .iter()
        .map(|id| if id == old { new.clone() } else { id.clone() })
        .collect();
    layer.initialized_connections = renamed;
}

fn rename_in_layers(layers: &mut [Layer], old: &RecordId, new: &RecordId) {
    for layer in layers {
        rename_in_layer(layer, old, new);
    }
}

fn rename_in_fields(fields: &mut IndexMap<String, FieldValue>, old: &RecordId, new: &RecordId) {
    for value in fields.values_mut() {
        match value {
            FieldValue::Ref(id) if *id == *old => *value = FieldValue::Ref(new.clone()),
            FieldValue::RefList(ids) => {
                for id in ids.iter_mut() {
                    if *id == *old {
                        *id = new.clone();
                    }
                }
            }
            _ => {}
        }
    }
}

fn rename_in_baseline_connections(map: &mut HashMap<RecordId, ConnectionSnapshot>, old: &RecordId, new: &RecordId) {
    for snapshot in map.values_mut() {
        for node_id in snapshot.node_ids.iter_mut() {
            if *node_id == *old {
                *node_id = new.clone();
            }
        }
        if let Some(fields) = snapshot.edge_fields.remove(old) {
            snapshot.edge_fields.insert(new.clone(), fields);
        }
    }
}
