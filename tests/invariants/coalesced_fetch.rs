use std::rc::Rc;
use std::time::Duration;

use futures::join;
use graph_cache::ast::Variables;
use graph_cache::client::Client;
use graph_cache::client::ClientConfig;
use graph_cache::queries::CachePolicy;
use serde_json::json;

use crate::support;

/// Concurrent callers that share a plan and a strict signature fan out from
/// exactly one `Transport::http` call, regardless of how many joined while
/// it was in flight.
#[tokio::test]
async fn concurrent_requests_for_the_same_signature_share_one_network_call() {
    let plan = support::compile("query GetUser($id: ID!) { user(id: $id) { id name } }", None);
    let transport = Rc::new(support::StubTransport::new());
    transport.push_data(json!({ "user": { "__typename": "User", "id": "1", "name": "Ada" } }));

    let client = Client::new(ClientConfig::new(transport.clone()));
    let mut vars = Variables::new();
    vars.insert("id".to_owned(), json!("1"));

    let (a, b, c) = join!(
        client.execute_query(Rc::clone(&plan), vars.clone(), Some(CachePolicy::NetworkOnly)),
        client.execute_query(Rc::clone(&plan), vars.clone(), Some(CachePolicy::NetworkOnly)),
        client.execute_query(Rc::clone(&plan), vars.clone(), Some(CachePolicy::NetworkOnly)),
    );

    assert_eq!(transport.call_count(), 1, "three requests sharing a signature fan out from a single network call");

    let a = support::strip_version(&a.expect("first caller succeeds"));
    let b = support::strip_version(&b.expect("second caller succeeds"));
    let c = support::strip_version(&c.expect("third caller succeeds"));
    assert_eq!(a["user"]["name"], json!("Ada"));
    assert_eq!(a, b);
    assert_eq!(b, c);
}

/// A second batch, issued only after the first has fully drained its
/// in-flight table entry, gets its own network call: coalescing only
/// collapses requests that genuinely overlap in time. The suspension
/// window is zeroed out so this test isolates coalescing from the
/// separate time-based suspension gate (see `suspension_window.rs`).
#[tokio::test]
async fn a_later_request_after_the_first_completes_fetches_again() {
    let plan = support::compile("query GetUser($id: ID!) { user(id: $id) { id name } }", None);
    let transport = Rc::new(support::StubTransport::new());
    transport.push_data(json!({ "user": { "__typename": "User", "id": "1", "name": "Ada" } }));
    transport.push_data(json!({ "user": { "__typename": "User", "id": "1", "name": "Ada Lovelace" } }));

    let mut config = ClientConfig::new(transport.clone());
    config.suspension_timeout = Duration::ZERO;
    let client = Client::new(config);
    let mut vars = Variables::new();
    vars.insert("id".to_owned(), json!("1"));

    client.execute_query(Rc::clone(&plan), vars.clone(), Some(CachePolicy::NetworkOnly)).await.expect("first call succeeds");
    assert_eq!(transport.call_count(), 1);

    let second = client.execute_query(Rc::clone(&plan), vars.clone(), Some(CachePolicy::NetworkOnly)).await.expect("second call succeeds");
    assert_eq!(transport.call_count(), 2, "network-only always fetches, and the in-flight entry from the first call is long gone");
    assert_eq!(support::strip_version(&second)["user"]["name"], json!("Ada Lovelace"));
}
