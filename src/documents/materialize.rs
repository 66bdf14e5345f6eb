use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;
use std::rc::Rc;

use serde_json::Value as Json;

use crate::ast::Variables;
use crate::documents::MemoKey;
use crate::documents::MaterializeCache;
use crate::graph::FieldValue;
use crate::graph::Graph;
use crate::graph::Record;
use crate::graph::RecordId;
use crate::graph::TYPENAME_KEY;
use crate::keys::KeyConfig;
use crate::plan::Plan;
use crate::plan::PlanField;
use crate::plan::connection_record_id;

#[derive(Debug, Clone, Copy, Default)]
pub struct MaterializeOptions {
    pub canonical: bool,
    pub force: bool,
    pub fingerprint: bool,
}

pub struct MaterializeResult {
    /// `Null` when the root record is absent; otherwise the materialized
    /// object, always reference-equal to the previous call's result for the
    /// same `(plan, vars, options)` as long as nothing read was touched.
    pub value: Rc<Json>,
    pub is_complete: bool,
    pub key: MemoKey,
}

/// Reads `plan` rooted at `root_id` out of the graph. `root_id` is
/// [`crate::graph::ROOT_ID`] for query/mutation plans, or an arbitrary
/// entity id for a fragment plan.
pub fn materialize(
    graph: &Graph,
    keys: &KeyConfig,
    cache: &MaterializeCache,
    plan: &Plan,
    root_id: &RecordId,
    vars: &Variables,
    options: MaterializeOptions,
) -> MaterializeResult {
    let key = MemoKey { plan_id: plan.id, canonical: options.canonical, vars_key: plan.make_vars_key(options.canonical, vars) };

    if !options.force {
        if let Some(value) = cache.get(&key) {
            let is_complete = !matches!(value.as_ref(), Json::Null);
            return MaterializeResult { value, is_complete, key };
        }
    }

    let mut deps = HashSet::new();
    deps.insert(root_id.clone());

    let Some(root_record) = graph.get_record(root_id) else {
        let value = Rc::new(Json::Null);
        cache.store(key.clone(), Rc::clone(&value), deps);
        return MaterializeResult { value, is_complete: false, key };
    };

    let mut obj = materialize_fields(graph, keys, &plan.root, root_id, &root_record, vars, options.canonical, &mut deps);
    let mut value = Json::Object(std::mem::take(&mut obj));
    if options.fingerprint {
        attach_fingerprint(&mut value);
    }
    let value = Rc::new(value);
    cache.store(key.clone(), Rc::clone(&value), deps);
    MaterializeResult { value, is_complete: true, key }
}

fn materialize_fields(
    graph: &Graph,
    keys: &KeyConfig,
    fields: &[PlanField],
    parent_id: &RecordId,
    parent_record: &Record,
    vars: &Variables,
    canonical: bool,
    deps: &mut HashSet<RecordId>,
) -> serde_json::Map<String, Json> {
    let mut out = serde_json::Map::new();
    let parent_typename = parent_record.typename();

    for field in fields {
        if !field.is_selected(vars) {
            continue;
        }
        if let Some(condition) = &field.type_condition {
            match parent_typename {
                Some(tn) if keys.type_condition_matches(condition, tn) => {}
                _ => continue,
            }
        }

        if field.field_name == "__typename" {
            out.insert(field.response_key.clone(), parent_typename.map(|t| Json::String(t.to_owned())).unwrap_or(Json::Null));
            continue;
        }

        if field.is_connection() {
            let conn_id = connection_record_id(parent_id, field, vars, canonical);
            let value = materialize_connection(graph, keys, field, &conn_id, vars, canonical, deps);
            out.insert(field.response_key.clone(), value);
            continue;
        }

        let field_key = field.field_key(vars);
        let value = match parent_record.get(&field_key) {
            None => Json::Null,
            Some(FieldValue::Scalar(v)) => v.clone(),
            Some(FieldValue::Ref(id)) => materialize_ref(graph, keys, &field.selection_set, id, vars, canonical, deps),
            Some(FieldValue::RefList(ids)) => {
                let items: Vec<Json> =
                    ids.iter().map(|id| materialize_ref(graph, keys, &field.selection_set, id, vars, canonical, deps)).collect();
                Json::Array(items)
            }
        };
        out.insert(field.response_key.clone(), value);
    }
    out
}

fn materialize_ref(
    graph: &Graph,
    keys: &KeyConfig,
    selection_set: &[PlanField],
    id: &RecordId,
    vars: &Variables,
    canonical: bool,
    deps: &mut HashSet<RecordId>,
) -> Json {
    deps.insert(id.clone());
    let Some(record) = graph.get_record(id) else { return Json::Null };
    if selection_set.is_empty() {
        return Json::Null;
    }
    Json::Object(materialize_fields(graph, keys, selection_set, id, &record, vars, canonical, deps))
}

fn materialize_connection(
    graph: &Graph,
    keys: &KeyConfig,
    field: &PlanField,
    conn_id: &RecordId,
    vars: &Variables,
    canonical: bool,
    deps: &mut HashSet<RecordId>,
) -> Json {
    deps.insert(conn_id.clone());
    let Some(record) = graph.get_record(conn_id) else { return Json::Null };
    let mut out = serde_json::Map::new();

    for child in &field.selection_set {
        if !child.is_selected(vars) {
            continue;
        }
        match child.field_name.as_str() {
            "__typename" => {
                out.insert(child.response_key.clone(), record.typename().map(|t| Json::String(t.to_owned())).unwrap_or(Json::Null));
            }
            "edges" => {
                let edge_ids: Vec<RecordId> = record.get("edges").and_then(FieldValue::as_ref_list).map(<[_]>::to_vec).unwrap_or_default();
                let mut arr = Vec::with_capacity(edge_ids.len());
                for edge_id in &edge_ids {
                    deps.insert(edge_id.clone());
                    let Some(edge_record) = graph.get_record(edge_id) else { continue };
                    arr.push(Json::Object(materialize_edge(graph, keys, &child.selection_set, &edge_record, vars, canonical, deps)));
                }
                out.insert(child.response_key.clone(), Json::Array(arr));
            }
            "pageInfo" => {
                let value = match record.get("pageInfo").and_then(FieldValue::as_ref_id) {
                    Some(id) => materialize_ref(graph, keys, &child.selection_set, id, vars, canonical, deps),
                    None => Json::Null,
                };
                out.insert(child.response_key.clone(), value);
            }
            _ => {
                let field_key = child.field_key(vars);
                let value = match record.get(&field_key) {
                    Some(FieldValue::Scalar(v)) => v.clone(),
                    _ => Json::Null,
                };
                out.insert(child.response_key.clone(), value);
            }
        }
    }
    Json::Object(out)
}

fn materialize_edge(
    graph: &Graph,
    keys: &KeyConfig,
    fields: &[PlanField],
    edge_record: &Record,
    vars: &Variables,
    canonical: bool,
    deps: &mut HashSet<RecordId>,
) -> serde_json::Map<String, Json> {
    let mut out = serde_json::Map::new();
    for field in fields {
        if !field.is_selected(vars) {
            continue;
        }
        let value = if field.field_name == "node" {
            match edge_record.get("node").and_then(FieldValue::as_ref_id) {
                Some(id) => materialize_ref(graph, keys, &field.selection_set, id, vars, canonical, deps),
                None => Json::Null,
            }
        } else {
            let field_key = field.field_key(vars);
            match edge_record.get(&field_key) {
                Some(FieldValue::Scalar(v)) => v.clone(),
                _ => Json::Null,
            }
        };
        out.insert(field.response_key.clone(), value);
    }
    out
}

/// True when `a` and `b` are equal once every `__version` fingerprint is
/// stripped out. Two materializations of unrelated `Rc` identity (e.g. one
/// read from the memo cache, one produced by a `force: true` re-read) still
/// compare equal here when the underlying data didn't actually change,
/// which is what a policy's redundant-emit suppression checks against.
pub fn structurally_equal(a: &Json, b: &Json) -> bool {
    strip_fingerprint(a) == strip_fingerprint(b)
}

fn strip_fingerprint(value: &Json) -> Json {
    match value {
        Json::Object(map) => {
            Json::Object(map.iter().filter(|(k, _)| k.as_str() != "__version").map(|(k, v)| (k.clone(), strip_fingerprint(v))).collect())
        }
        Json::Array(items) => Json::Array(items.iter().map(strip_fingerprint).collect()),
        other => other.clone(),
    }
}

/// Attaches a deterministic `__version` field (a hash of the object's own
/// content) to every entity-shaped object in the tree, innermost first.
fn attach_fingerprint(value: &mut Json) {
    match value {
        Json::Array(items) => {
            for item in items.iter_mut() {
                attach_fingerprint(item);
            }
        }
        Json::Object(map) => {
            for v in map.values_mut() {
                attach_fingerprint(v);
            }
            if map.contains_key(TYPENAME_KEY) {
                let mut hasher = DefaultHasher::new();
                serde_json::to_string(&Json::Object(map.clone())).unwrap_or_default().hash(&mut hasher);
                map.insert("__version".to_owned(), Json::String(format!("{:x}", hasher.finish())));
            }
        }
        _ => {}
    }
}
