use std::rc::Rc;
use std::time::Duration;

use graph_cache::ast::Variables;
use graph_cache::client::Client;
use graph_cache::client::ClientConfig;
use graph_cache::keys::KeyConfig;
use graph_cache::queries::CachePolicy;
use serde_json::json;

use crate::support;

/// A server-rendered `Client` extracts its populated graph into a `Snapshot`;
/// a freshly constructed client hydrates it and, as long as it is configured
/// with a nonzero hydration window, a `CacheAndNetwork` watch registered
/// immediately after serves the hydrated data without scheduling a fetch at
/// all.
#[tokio::test]
async fn hydration_window_suppresses_the_immediate_refetch() {
    let plan = support::compile("query GetUser($id: ID!) { user(id: $id) { id name } }", None);
    let mut vars = Variables::new();
    vars.insert("id".to_owned(), json!("1"));

    let server_transport = Rc::new(support::StubTransport::new());
    server_transport.push_data(json!({ "user": { "__typename": "User", "id": "1", "name": "Ada" } }));
    let server = Client::new(ClientConfig::new(server_transport));
    server.execute_query(Rc::clone(&plan), vars.clone(), Some(CachePolicy::NetworkOnly)).await.expect("server-side fetch succeeds");
    let snapshot = server.extract();

    let client_transport = Rc::new(support::StubTransport::new());
    let client_config = ClientConfig {
        transport: client_transport.clone(),
        keys: KeyConfig::new(),
        default_cache_policy: CachePolicy::CacheFirst,
        suspension_timeout: Duration::from_millis(300),
        hydration_timeout: Duration::from_millis(500),
    };
    let client = Client::new(client_config);
    client.hydrate(snapshot);

    let on_data = Box::new(|_value: Rc<serde_json::Value>| {});
    let on_error = Box::new(|err| panic!("unexpected error: {err}"));
    let (_handle, fetch) = client.watch_query(Rc::clone(&plan), vars, CachePolicy::CacheAndNetwork, on_data, on_error);

    assert!(fetch.is_none(), "inside the hydration window, cache-and-network must not schedule a redundant fetch");
    assert_eq!(client_transport.call_count(), 0);
}
