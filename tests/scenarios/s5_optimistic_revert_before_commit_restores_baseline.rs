use std::rc::Rc;

use graph_cache::graph::FieldValue;
use graph_cache::graph::Graph;
use graph_cache::graph::RecordId;
use graph_cache::optimistic::EdgeSpec;
use graph_cache::optimistic::Optimistic;
use graph_cache::optimistic::OptimisticContext;
use graph_cache::optimistic::Position;
use indexmap::IndexMap;
use serde_json::json;

/// An optimistic insert into a connection that already has a server page is
/// visible immediately, and `revert` before any `commit` restores exactly
/// that pre-layer baseline -- the server edge stays, the optimistic one is
/// gone.
#[test]
fn revert_without_commit_restores_the_server_page() {
    let graph = Graph::new();
    let conn_id = RecordId::new("@.ROOT.posts");

    let server_edge_id = RecordId::new("@.ROOT.posts.edges.0");
    graph.put_record(&RecordId::new("Post:1"), [("__typename".to_owned(), FieldValue::Scalar(json!("Post"))), ("title".to_owned(), FieldValue::Scalar(json!("Existing")))]);
    graph.put_record(
        &server_edge_id,
        [("__typename".to_owned(), FieldValue::Scalar(json!("Edge"))), ("node".to_owned(), FieldValue::Ref(RecordId::new("Post:1"))), ("cursor".to_owned(), FieldValue::Scalar(json!("c1")))],
    );
    graph.put_record(&conn_id, [("edges".to_owned(), FieldValue::RefList(vec![server_edge_id.clone()]))]);
    graph.flush();

    let optimistic = Optimistic::new(graph.clone());
    let layer_id = optimistic
        .modify(Rc::new({
            let conn_id = conn_id.clone();
            move |ctx: &OptimisticContext| {
                ctx.connection(&conn_id).add_node(
                    EdgeSpec { node_id: RecordId::new("Post:temp"), cursor: Some(json!("temp-cursor")), extra: IndexMap::new() },
                    Position::Start,
                );
                Ok(())
            }
        }))
        .expect("optimistic insert succeeds");

    let during = graph.get_record(&conn_id).expect("connection present");
    let during_edges = during.get("edges").and_then(FieldValue::as_ref_list).expect("edges is a ref list");
    assert_eq!(during_edges.len(), 2, "the optimistic edge is prepended alongside the server edge");
    let first_node = graph.get_record(&during_edges[0]).and_then(|e| e.get("node").and_then(FieldValue::as_ref_id).cloned());
    assert_eq!(first_node, Some(RecordId::new("Post:temp")));

    optimistic.revert(layer_id);

    let after = graph.get_record(&conn_id).expect("connection still present");
    let after_edges = after.get("edges").and_then(FieldValue::as_ref_list).expect("edges is a ref list");
    assert_eq!(after_edges.len(), 1, "reverting drops exactly the optimistic edge");
    let remaining_node = graph.get_record(&after_edges[0]).and_then(|e| e.get("node").and_then(FieldValue::as_ref_id).cloned());
    assert_eq!(remaining_node, Some(RecordId::new("Post:1")), "the pre-existing server edge survives the revert untouched");
}
