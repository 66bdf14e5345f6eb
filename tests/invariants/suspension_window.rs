use std::rc::Rc;
use std::time::Duration;

use graph_cache::ast::Variables;
use graph_cache::client::Client;
use graph_cache::client::ClientConfig;
use graph_cache::queries::CachePolicy;
use serde_json::json;

use crate::support;

/// Two `network-only` executions for the same strict signature within the
/// suspension window share the first's materialization instead of both
/// reaching the transport; once the window elapses, the next call fetches
/// again.
#[tokio::test]
async fn suspension_window_collapses_then_expires() {
    let plan = support::compile("query GetUser($id: ID!) { user(id: $id) { id name } }", None);
    let transport = Rc::new(support::StubTransport::new());
    transport.push_data(json!({ "user": { "__typename": "User", "id": "1", "name": "Ada" } }));
    transport.push_data(json!({ "user": { "__typename": "User", "id": "1", "name": "Ada Lovelace" } }));

    let mut config = ClientConfig::new(transport.clone());
    config.suspension_timeout = Duration::from_millis(60);
    let client = Client::new(config);
    let mut vars = Variables::new();
    vars.insert("id".to_owned(), json!("1"));

    client.execute_query(Rc::clone(&plan), vars.clone(), Some(CachePolicy::NetworkOnly)).await.expect("first call succeeds");
    assert_eq!(transport.call_count(), 1);

    let second = client.execute_query(Rc::clone(&plan), vars.clone(), Some(CachePolicy::NetworkOnly)).await.expect("second call succeeds");
    assert_eq!(transport.call_count(), 1, "a call within the suspension window is served from the cached materialization");
    assert_eq!(support::strip_version(&second)["user"]["name"], json!("Ada"));

    tokio::time::sleep(Duration::from_millis(90)).await;

    let third = client.execute_query(Rc::clone(&plan), vars.clone(), Some(CachePolicy::NetworkOnly)).await.expect("third call succeeds");
    assert_eq!(transport.call_count(), 2, "the suspension window has elapsed, so this call reaches the network again");
    assert_eq!(support::strip_version(&third)["user"]["name"], json!("Ada Lovelace"));
}

/// The suspension window is keyed per strict signature: a second, distinct
/// signature (different variables) is unaffected by the first's window and
/// fetches immediately.
#[tokio::test]
async fn suspension_window_is_scoped_to_its_own_signature() {
    let plan = support::compile("query GetUser($id: ID!) { user(id: $id) { id name } }", None);
    let transport = Rc::new(support::StubTransport::new());
    transport.push_data(json!({ "user": { "__typename": "User", "id": "1", "name": "Ada" } }));
    transport.push_data(json!({ "user": { "__typename": "User", "id": "2", "name": "Grace" } }));

    let mut config = ClientConfig::new(transport.clone());
    config.suspension_timeout = Duration::from_millis(200);
    let client = Client::new(config);
    let mut vars_one = Variables::new();
    vars_one.insert("id".to_owned(), json!("1"));
    let mut vars_two = Variables::new();
    vars_two.insert("id".to_owned(), json!("2"));

    client.execute_query(Rc::clone(&plan), vars_one, Some(CachePolicy::NetworkOnly)).await.expect("first call succeeds");
    assert_eq!(transport.call_count(), 1);

    let second = client.execute_query(Rc::clone(&plan), vars_two, Some(CachePolicy::NetworkOnly)).await.expect("second call succeeds");
    assert_eq!(transport.call_count(), 2, "a different signature's suspension window does not apply here");
    assert_eq!(support::strip_version(&second)["user"]["name"], json!("Grace"));
}
