use std::cell::RefCell;
use std::rc::Rc;

use graph_cache::ast::Variables;
use graph_cache::client::Client;
use graph_cache::client::ClientConfig;
use graph_cache::queries::CachePolicy;
use serde_json::json;
use serde_json::Value as Json;

use crate::support;

/// When the network result materializes to a snapshot structurally equal to
/// the cache-and-network's synchronous pre-fetch emit, the watcher receives
/// exactly one emission rather than a redundant identical second one.
#[tokio::test]
async fn identical_network_result_does_not_re_emit() {
    let plan = support::compile("query GetUser($id: ID!) { user(id: $id) { id name } }", None);
    let transport = Rc::new(support::StubTransport::new());
    transport.push_data(json!({ "user": { "__typename": "User", "id": "1", "name": "Ada Lovelace" } }));

    let client = Client::new(ClientConfig::new(transport.clone()));
    let mut vars = Variables::new();
    vars.insert("id".to_owned(), json!("1"));

    client.write_query(&plan, &vars, &json!({ "user": { "__typename": "User", "id": "1", "name": "Ada Lovelace" } }));

    let deliveries: Rc<RefCell<Vec<Json>>> = Rc::new(RefCell::new(Vec::new()));
    let on_data = {
        let deliveries = Rc::clone(&deliveries);
        Box::new(move |value: Rc<Json>| deliveries.borrow_mut().push(support::strip_version(&value)))
    };
    let on_error = Box::new(|err| panic!("unexpected error: {err}"));

    let (_handle, fetch) = client.watch_query(Rc::clone(&plan), vars, CachePolicy::CacheAndNetwork, on_data, on_error);

    assert_eq!(deliveries.borrow().len(), 1, "the cached value is delivered synchronously");

    fetch.expect("cache-and-network always schedules its own fetch outside a hydration window").await;

    assert_eq!(transport.call_count(), 1);
    assert_eq!(deliveries.borrow().len(), 1, "a network result identical to the cached emit is suppressed, not re-delivered");
}
