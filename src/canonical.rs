//! Canonical (union) connection views. A canonical record
//! merges every strict page sharing a parent, connection key and filter set
//! into one ordered edge list, independent of which page most recently
//! fetched which node.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::graph::FieldValue;
use crate::graph::Graph;
use crate::graph::RecordId;
use crate::graph::TYPENAME_KEY;

/// A single contributed edge, already normalized: `node_id` is the ref this
/// edge points at, `extra` is every edge-level field other than `cursor`/`node`.
#[derive(Clone)]
pub struct PageEdge {
    pub node_id: RecordId,
    pub cursor: Option<Json>,
    pub extra: IndexMap<String, FieldValue>,
}

#[derive(Clone, Default)]
pub struct PageInfo {
    pub start_cursor: Option<Json>,
    pub end_cursor: Option<Json>,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

/// Which end of the canonical list a page's edges merge into, derived from
/// the page's own pagination arguments (`after`/`before`/`last`).
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Clone, Default)]
struct CanonicalState {
    edges: Vec<PageEdge>,
    page_info: PageInfo,
    container: IndexMap<String, FieldValue>,
}

/// A page write to merge into the canonical keyed by `canonical_id`.
pub struct PageWrite {
    pub canonical_id: RecordId,
    pub edges: Vec<PageEdge>,
    pub page_info: PageInfo,
    pub direction: Direction,
    /// True when the page carried neither `after` nor `before`: a fresh
    /// first page rather than a continuation.
    pub is_leader: bool,
    pub container: IndexMap<String, FieldValue>,
    pub typename: String,
}

/// Holds every canonical connection's merged edge order. Cloning shares the
/// underlying state, matching [`Graph`].
#[derive(Clone)]
pub struct Canonical {
    states: Rc<RefCell<HashMap<RecordId, CanonicalState>>>,
}

impl Default for Canonical {
    fn default() -> Self {
        Self::new()
    }
}

impl Canonical {
    pub fn new() -> Self {
        Self { states: Rc::new(RefCell::new(HashMap::new())) }
    }

    /// Merges `write` into the canonical state and writes the resulting
    /// Connection/Edge/PageInfo records into `graph`.
    pub fn on_page_written(&self, graph: &Graph, write: PageWrite) {
        let mut states = self.states.borrow_mut();
        let state = states.entry(write.canonical_id.clone()).or_default();

        match write.direction {
            Direction::Forward if write.is_leader => {
                state.edges = write.edges;
                state.page_info.start_cursor = write.page_info.start_cursor;
                state.page_info.has_previous_page = write.page_info.has_previous_page;
            }
            Direction::Forward => merge_append(&mut state.edges, write.edges),
            Direction::Backward => merge_prepend(&mut state.edges, write.edges),
        }
        match write.direction {
            Direction::Forward => {
                state.page_info.end_cursor = write.page_info.end_cursor;
                state.page_info.has_next_page = write.page_info.has_next_page;
            }
            Direction::Backward => {
                state.page_info.start_cursor = write.page_info.start_cursor;
                state.page_info.has_previous_page = write.page_info.has_previous_page;
            }
        }
        for (key, value) in write.container {
            state.container.insert(key, value);
        }
        let state = state.clone();
        drop(states);
        write_connection(graph, &write.canonical_id, &write.typename, &state);
    }

    pub fn remove_node(&self, graph: &Graph, canonical_id: &RecordId, node_id: &RecordId) {
        let mut states = self.states.borrow_mut();
        let Some(state) = states.get_mut(canonical_id) else { return };
        state.edges.retain(|e| &e.node_id != node_id);
        let state = state.clone();
        drop(states);
        write_connection(graph, canonical_id, "", &state);
    }

    pub fn patch(&self, graph: &Graph, canonical_id: &RecordId, fields: IndexMap<String, FieldValue>) {
        let mut states = self.states.borrow_mut();
        let state = states.entry(canonical_id.clone()).or_default();
        for (key, value) in fields {
            state.container.insert(key, value);
        }
        let state = state.clone();
        drop(states);
        write_connection(graph, canonical_id, "", &state);
    }

    pub fn has(&self, canonical_id: &RecordId) -> bool {
        self.states.borrow().contains_key(canonical_id)
    }
}

/// Merges `incoming` into `edges`, appending ones not already present while
/// updating the metadata (but not the position) of ones that are.
fn merge_append(edges: &mut Vec<PageEdge>, incoming: Vec<PageEdge>) {
    for edge in incoming {
        if let Some(existing) = edges.iter_mut().find(|e| e.node_id == edge.node_id) {
            existing.cursor = edge.cursor;
            existing.extra = edge.extra;
        } else {
            edges.push(edge);
        }
    }
}

/// Merges `incoming` into `edges`, prepending ones not already present
/// (preserving their relative order) while updating the metadata of ones
/// already present in place.
fn merge_prepend(edges: &mut Vec<PageEdge>, incoming: Vec<PageEdge>) {
    let mut fresh = Vec::new();
    for edge in incoming {
        if let Some(existing) = edges.iter_mut().find(|e| e.node_id == edge.node_id) {
            existing.cursor = edge.cursor;
            existing.extra = edge.extra;
        } else {
            fresh.push(edge);
        }
    }
    fresh.extend(std::mem::take(edges));
    *edges = fresh;
}

/// Serializes a [`CanonicalState`] into the graph as a Connection record
/// plus its Edge and PageInfo sub-records.
fn write_connection(graph: &Graph, canonical_id: &RecordId, typename: &str, state: &CanonicalState) {
    let page_info_id = RecordId::new(format!("{canonical_id}.pageInfo"));
    graph.put_record(
        &page_info_id,
        [
            (TYPENAME_KEY.to_owned(), FieldValue::Scalar(Json::String("PageInfo".into()))),
            ("startCursor".to_owned(), FieldValue::Scalar(state.page_info.start_cursor.clone().unwrap_or(Json::Null))),
            ("endCursor".to_owned(), FieldValue::Scalar(state.page_info.end_cursor.clone().unwrap_or(Json::Null))),
            ("hasNextPage".to_owned(), FieldValue::Scalar(Json::Bool(state.page_info.has_next_page))),
            ("hasPreviousPage".to_owned(), FieldValue::Scalar(Json::Bool(state.page_info.has_previous_page))),
        ],
    );

    let mut edge_ids = Vec::with_capacity(state.edges.len());
    for (i, edge) in state.edges.iter().enumerate() {
        let edge_id = RecordId::new(format!("{canonical_id}.edges.{i}"));
        let mut fields: Vec<(String, FieldValue)> = vec![
            (TYPENAME_KEY.to_owned(), FieldValue::Scalar(Json::String("Edge".into()))),
            ("cursor".to_owned(), FieldValue::Scalar(edge.cursor.clone().unwrap_or(Json::Null))),
            ("node".to_owned(), FieldValue::Ref(edge.node_id.clone())),
        ];
        fields.extend(edge.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        graph.put_record(&edge_id, fields);
        edge_ids.push(edge_id);
    }

    let mut fields: Vec<(String, FieldValue)> = Vec::new();
    if !typename.is_empty() {
        fields.push((TYPENAME_KEY.to_owned(), FieldValue::Scalar(Json::String(typename.to_owned()))));
    }
    fields.push(("edges".to_owned(), FieldValue::RefList(edge_ids)));
    fields.push(("pageInfo".to_owned(), FieldValue::Ref(page_info_id)));
    fields.extend(state.container.iter().map(|(k, v)| (k.clone(), v.clone())));
    graph.put_record(canonical_id, fields);
}
