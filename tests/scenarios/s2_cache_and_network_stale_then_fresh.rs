use std::cell::RefCell;
use std::rc::Rc;

use graph_cache::ast::Variables;
use graph_cache::client::Client;
use graph_cache::client::ClientConfig;
use graph_cache::queries::CachePolicy;
use serde_json::json;
use serde_json::Value as Json;

use crate::support;

/// `CacheAndNetwork` delivers the stale cache value synchronously (from a
/// prior `writeQuery`), then delivers the fresh network value once the
/// returned fetch future is driven to completion -- exactly twice total,
/// since the fresh value is structurally different from the stale one and
/// so is not suppressed as a redundant emit.
#[tokio::test]
async fn cache_and_network_delivers_stale_then_fresh() {
    let plan = support::compile("query GetUser($id: ID!) { user(id: $id) { id name } }", None);
    let transport = Rc::new(support::StubTransport::new());
    transport.push_data(json!({ "user": { "__typename": "User", "id": "1", "name": "Ada Lovelace" } }));

    let client = Client::new(ClientConfig::new(transport.clone()));
    let mut vars = Variables::new();
    vars.insert("id".to_owned(), json!("1"));

    client.write_query(&plan, &vars, &json!({ "user": { "__typename": "User", "id": "1", "name": "Ada" } }));

    let deliveries: Rc<RefCell<Vec<Json>>> = Rc::new(RefCell::new(Vec::new()));
    let on_data = {
        let deliveries = Rc::clone(&deliveries);
        Box::new(move |value: Rc<Json>| deliveries.borrow_mut().push(support::strip_version(&value)))
    };
    let on_error = Box::new(|err| panic!("unexpected error: {err}"));

    let (_handle, fetch) = client.watch_query(Rc::clone(&plan), vars, CachePolicy::CacheAndNetwork, on_data, on_error);

    assert_eq!(deliveries.borrow().len(), 1, "the stale cache value is delivered synchronously");
    assert_eq!(deliveries.borrow()[0]["user"]["name"], json!("Ada"));
    assert_eq!(transport.call_count(), 0, "the network fetch has not run yet");

    fetch.expect("cache-and-network always schedules its own fetch outside a hydration window").await;

    assert_eq!(transport.call_count(), 1);
    let seen = deliveries.borrow();
    assert_eq!(seen.len(), 2, "the fresh network value is delivered exactly once after the stale one, with no redundant second emit");
    assert_eq!(seen[0]["user"]["name"], json!("Ada"), "the first delivery is the stale cached value");
    assert_eq!(seen[1]["user"]["name"], json!("Ada Lovelace"), "the second delivery reflects the network response");
}
