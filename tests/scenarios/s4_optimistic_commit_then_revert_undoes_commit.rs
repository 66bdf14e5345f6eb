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

fn node_of(graph: &Graph, conn_id: &RecordId, index: usize) -> RecordId {
    let conn = graph.get_record(conn_id).expect("connection record exists");
    let edge_ids = conn.get("edges").and_then(FieldValue::as_ref_list).expect("edges is a ref list");
    let edge = graph.get_record(&edge_ids[index]).expect("edge record exists");
    edge.get("node").and_then(FieldValue::as_ref_id).cloned().expect("edge has a node ref")
}

/// Committing an optimistic layer keeps it on the active stack under the
/// same id: it only rewrites the placeholder node id to the server one. A
/// later `revert` of that same id is therefore a real operation, replaying
/// baseline plus the (now empty) remaining stack -- not a no-op just because
/// the layer was already committed.
#[test]
fn revert_after_commit_undoes_the_commit_too() {
    let graph = Graph::new();
    let optimistic = Optimistic::new(graph.clone());
    let conn_id = RecordId::new("@.ROOT.posts");

    let layer_id = optimistic
        .modify(Rc::new({
            let conn_id = conn_id.clone();
            move |ctx: &OptimisticContext| {
                ctx.connection(&conn_id).add_node(
                    EdgeSpec { node_id: RecordId::new("Post:temp"), cursor: Some(json!("temp-cursor")), extra: IndexMap::new() },
                    Position::End,
                );
                Ok(())
            }
        }))
        .expect("optimistic insert succeeds");

    assert_eq!(node_of(&graph, &conn_id, 0), RecordId::new("Post:temp"));

    optimistic
        .commit(
            layer_id,
            Rc::new({
                let conn_id = conn_id.clone();
                move |ctx: &OptimisticContext| {
                    ctx.connection(&conn_id).add_node(
                        EdgeSpec { node_id: RecordId::new("Post:server-1"), cursor: Some(json!("server-cursor")), extra: IndexMap::new() },
                        Position::End,
                    );
                    ctx.rename(RecordId::new("Post:temp"), RecordId::new("Post:server-1"));
                    Ok(())
                }
            }),
            Some(json!({ "id": "server-1" })),
        )
        .expect("commit succeeds");

    let committed = graph.get_record(&conn_id).expect("connection still present after commit");
    let committed_edges = committed.get("edges").and_then(FieldValue::as_ref_list).expect("edges is a ref list");
    assert_eq!(committed_edges.len(), 1, "commit keeps exactly the one server-confirmed node");
    assert_eq!(node_of(&graph, &conn_id, 0), RecordId::new("Post:server-1"));

    optimistic.revert(layer_id);

    let reverted = graph.get_record(&conn_id).expect("connection record still exists, just emptied");
    let reverted_edges = reverted.get("edges").and_then(FieldValue::as_ref_list).expect("edges is a ref list");
    assert!(reverted_edges.is_empty(), "reverting the committed layer replays back to the pre-layer baseline, not the committed state");
}
