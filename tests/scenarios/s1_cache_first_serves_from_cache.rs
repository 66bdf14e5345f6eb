use std::rc::Rc;

use graph_cache::ast::Variables;
use graph_cache::client::Client;
use graph_cache::client::ClientConfig;
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::support;

/// A `CacheFirst` query fetches the network exactly once; every subsequent
/// read for the same plan and variables is served from the materialize
/// cache without a second `Transport::http` call, and returns the exact
/// same `Rc<Json>` (no rebuild happened at all, not just an equal one).
#[tokio::test]
async fn cache_first_fetches_once_then_serves_cache() {
    let plan = support::compile("query GetUser($id: ID!) { user(id: $id) { id name } }", None);
    let transport = Rc::new(support::StubTransport::new());
    transport.push_data(json!({ "user": { "__typename": "User", "id": "1", "name": "Ada" } }));

    let client = Client::new(ClientConfig::new(transport.clone()));
    let mut vars = Variables::new();
    vars.insert("id".to_owned(), json!("1"));

    let first = client.execute_query(Rc::clone(&plan), vars.clone(), None).await.expect("first fetch succeeds");
    assert_eq!(transport.call_count(), 1);
    assert_eq!(support::strip_version(&first), json!({ "user": { "__typename": "User", "id": "1", "name": "Ada" } }));

    let second = client.execute_query(Rc::clone(&plan), vars.clone(), None).await.expect("second read succeeds");
    assert_eq!(transport.call_count(), 1, "a complete cache hit must not re-fetch");
    assert!(Rc::ptr_eq(&first, &second), "unchanged data must return the same memoized value");
}
