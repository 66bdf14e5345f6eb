use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::ast::Variables;
use crate::canonical::Canonical;
use crate::canonical::Direction;
use crate::canonical::PageEdge;
use crate::canonical::PageInfo;
use crate::canonical::PageWrite;
use crate::graph::FieldValue;
use crate::graph::Graph;
use crate::graph::RecordId;
use crate::graph::TYPENAME_KEY;
use crate::keys::KeyConfig;
use crate::plan::Plan;
use crate::plan::PlanField;
use crate::plan::canonical_id;
use crate::plan::strict_page_id;

/// Writes `data` (a response matching `plan`'s shape) into the graph,
/// rooted at `root_id`. `root_id` is [`crate::graph::ROOT_ID`] for a
/// query/mutation plan, or an arbitrary entity id for `writeFragment`.
pub fn normalize(graph: &Graph, canonical: &Canonical, keys: &KeyConfig, plan: &Plan, root_id: &RecordId, vars: &Variables, data: &Json) {
    let Json::Object(obj) = data else { return };
    normalize_fields(graph, canonical, keys, &plan.root, root_id, vars, obj, &plan.root_typename);
}

fn normalize_fields(
    graph: &Graph,
    canonical: &Canonical,
    keys: &KeyConfig,
    fields: &[PlanField],
    parent_id: &RecordId,
    vars: &Variables,
    obj: &serde_json::Map<String, Json>,
    parent_typename: &str,
) {
    for field in fields {
        if !field.is_selected(vars) {
            continue;
        }
        if let Some(condition) = &field.type_condition {
            if !keys.type_condition_matches(condition, parent_typename) {
                continue;
            }
        }
        let Some(value) = obj.get(&field.response_key) else { continue };

        if field.is_connection() {
            normalize_connection(graph, canonical, keys, field, parent_id, vars, value);
            continue;
        }

        let field_key = field.field_key(vars);
        match value {
            Json::Array(items) if !field.selection_set.is_empty() => {
                let mut ids = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    if let Json::Object(item_obj) = item {
                        let child_typename = item_obj.get(TYPENAME_KEY).and_then(Json::as_str).unwrap_or_default();
                        let child_id = resolve_child_id(keys, parent_id, &field.response_key, i, child_typename, item_obj, true);
                        normalize_fields(graph, canonical, keys, &field.selection_set, &child_id, vars, item_obj, child_typename);
                        ids.push(child_id);
                    }
                }
                graph.put_record(parent_id, [(field_key, FieldValue::RefList(ids))]);
            }
            Json::Object(item_obj) if !field.selection_set.is_empty() => {
                let child_typename = item_obj.get(TYPENAME_KEY).and_then(Json::as_str).unwrap_or_default();
                let child_id = resolve_child_id(keys, parent_id, &field.response_key, 0, child_typename, item_obj, false);
                normalize_fields(graph, canonical, keys, &field.selection_set, &child_id, vars, item_obj, child_typename);
                graph.put_record(parent_id, [(field_key, FieldValue::Ref(child_id))]);
            }
            other => {
                graph.put_record(parent_id, [(field_key, FieldValue::Scalar(other.clone()))]);
            }
        }
    }
}

/// Derives the sub-record id for a field's object value: a deduplicated
/// entity id when the typename+object yields a key, otherwise a synthetic
/// id scoped under the parent (indexed, for array elements).
fn resolve_child_id(
    keys: &KeyConfig,
    parent_id: &RecordId,
    response_key: &str,
    index: usize,
    typename: &str,
    obj: &serde_json::Map<String, Json>,
    is_array_element: bool,
) -> RecordId {
    if !typename.is_empty() {
        if let Some(id) = keys.entity_id(typename, obj) {
            return RecordId::new(id);
        }
    }
    if is_array_element {
        RecordId::new(format!("{parent_id}.{response_key}.{index}"))
    } else {
        RecordId::new(format!("{parent_id}.{response_key}"))
    }
}

fn normalize_connection(graph: &Graph, canonical: &Canonical, keys: &KeyConfig, field: &PlanField, parent_id: &RecordId, vars: &Variables, value: &Json) {
    let Json::Object(obj) = value else { return };
    let strict_id = strict_page_id(parent_id, field, vars);
    let canonical_record_id = canonical_id(parent_id, field, vars);
    let typename = obj.get(TYPENAME_KEY).and_then(Json::as_str).unwrap_or("Connection").to_owned();

    let node_field = field.selection_set.iter().find(|f| f.field_name == "edges").and_then(|ef| ef.selection_set.iter().find(|f| f.field_name == "node"));

    let mut edge_ids = Vec::new();
    let mut page_edges = Vec::new();
    if let Some(Json::Array(edges)) = obj.get("edges") {
        for (i, edge_val) in edges.iter().enumerate() {
            let Json::Object(edge_obj) = edge_val else { continue };
            let Some(Json::Object(node_obj)) = edge_obj.get("node") else { continue };
            let node_typename = node_obj.get(TYPENAME_KEY).and_then(Json::as_str).unwrap_or_default();
            if node_typename.is_empty() {
                continue;
            }
            let edge_id = RecordId::new(format!("{strict_id}.edges.{i}"));
            let node_id = resolve_child_id(keys, &edge_id, "node", 0, node_typename, node_obj, false);
            if let Some(nf) = node_field {
                normalize_fields(graph, canonical, keys, &nf.selection_set, &node_id, vars, node_obj, node_typename);
            }

            let cursor = edge_obj.get("cursor").cloned();
            let extra: IndexMap<String, FieldValue> = edge_obj
                .iter()
                .filter(|(k, _)| k.as_str() != "cursor" && k.as_str() != "node" && k.as_str() != TYPENAME_KEY)
                .map(|(k, v)| (k.clone(), FieldValue::Scalar(v.clone())))
                .collect();

            let mut edge_fields: Vec<(String, FieldValue)> = vec![
                (TYPENAME_KEY.to_owned(), FieldValue::Scalar(Json::String(edge_obj.get(TYPENAME_KEY).and_then(Json::as_str).unwrap_or("Edge").to_owned()))),
                ("cursor".to_owned(), FieldValue::Scalar(cursor.clone().unwrap_or(Json::Null))),
                ("node".to_owned(), FieldValue::Ref(node_id.clone())),
            ];
            edge_fields.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
            graph.put_record(&edge_id, edge_fields);
            edge_ids.push(edge_id);
            page_edges.push(PageEdge { node_id, cursor, extra });
        }
    }

    let page_info_obj = obj.get("pageInfo").and_then(Json::as_object);
    let start_cursor = page_info_obj.and_then(|o| o.get("startCursor")).cloned();
    let end_cursor = page_info_obj.and_then(|o| o.get("endCursor")).cloned();
    let has_next_page = page_info_obj.and_then(|o| o.get("hasNextPage")).and_then(Json::as_bool).unwrap_or(false);
    let has_previous_page = page_info_obj.and_then(|o| o.get("hasPreviousPage")).and_then(Json::as_bool).unwrap_or(false);

    let page_info_id = RecordId::new(format!("{strict_id}.pageInfo"));
    graph.put_record(
        &page_info_id,
        [
            (TYPENAME_KEY.to_owned(), FieldValue::Scalar(Json::String("PageInfo".into()))),
            ("startCursor".to_owned(), FieldValue::Scalar(start_cursor.clone().unwrap_or(Json::Null))),
            ("endCursor".to_owned(), FieldValue::Scalar(end_cursor.clone().unwrap_or(Json::Null))),
            ("hasNextPage".to_owned(), FieldValue::Scalar(Json::Bool(has_next_page))),
            ("hasPreviousPage".to_owned(), FieldValue::Scalar(Json::Bool(has_previous_page))),
        ],
    );

    let mut container = IndexMap::new();
    for (k, v) in obj {
        if k == "edges" || k == "pageInfo" || k == TYPENAME_KEY {
            continue;
        }
        container.insert(k.clone(), FieldValue::Scalar(v.clone()));
    }

    let mut strict_fields: Vec<(String, FieldValue)> = vec![
        (TYPENAME_KEY.to_owned(), FieldValue::Scalar(Json::String(typename.clone()))),
        ("edges".to_owned(), FieldValue::RefList(edge_ids)),
        ("pageInfo".to_owned(), FieldValue::Ref(page_info_id)),
    ];
    strict_fields.extend(container.iter().map(|(k, v)| (k.clone(), v.clone())));
    graph.put_record(&strict_id, strict_fields);
    graph.put_record(parent_id, [(field.field_key(vars), FieldValue::Ref(strict_id))]);

    let args = field.build_args(vars);
    let direction = if args.contains_key("after") {
        Direction::Forward
    } else if args.contains_key("before") || args.contains_key("last") {
        Direction::Backward
    } else {
        Direction::Forward
    };
    let is_leader = !args.contains_key("after") && !args.contains_key("before");

    canonical.on_page_written(
        graph,
        PageWrite {
            canonical_id: canonical_record_id,
            edges: page_edges,
            page_info: PageInfo { start_cursor, end_cursor, has_next_page, has_previous_page },
            direction,
            is_leader,
            container,
            typename,
        },
    );
}
