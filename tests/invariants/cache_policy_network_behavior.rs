use std::rc::Rc;

use graph_cache::ast::Variables;
use graph_cache::client::Client;
use graph_cache::client::ClientConfig;
use graph_cache::error::CacheError;
use graph_cache::queries::CachePolicy;
use rstest::rstest;
use serde_json::json;

use crate::support;

/// Against an empty cache, only `CacheOnly` refuses to go to the network;
/// every other policy falls through to a fetch and completes.
#[rstest]
#[case::cache_only_misses(CachePolicy::CacheOnly, false)]
#[case::cache_first_fetches(CachePolicy::CacheFirst, true)]
#[case::network_only_fetches(CachePolicy::NetworkOnly, true)]
#[case::cache_and_network_fetches(CachePolicy::CacheAndNetwork, true)]
#[tokio::test]
async fn policy_decides_whether_an_empty_cache_reaches_the_network(#[case] policy: CachePolicy, #[case] expect_fetch: bool) {
    let plan = support::compile("query GetUser($id: ID!) { user(id: $id) { id name } }", None);
    let transport = Rc::new(support::StubTransport::new());
    transport.push_data(json!({ "user": { "__typename": "User", "id": "1", "name": "Ada" } }));

    let client = Client::new(ClientConfig::new(transport.clone()));
    let mut vars = Variables::new();
    vars.insert("id".to_owned(), json!("1"));

    let result = client.execute_query(Rc::clone(&plan), vars, Some(policy)).await;

    if expect_fetch {
        assert_eq!(transport.call_count(), 1, "{policy:?} must reach the network on an empty cache");
        let value = result.expect("policy resolves once the network answers");
        assert_eq!(support::strip_version(&value)["user"]["name"], json!("Ada"));
    } else {
        assert_eq!(transport.call_count(), 0, "{policy:?} must never touch the network");
        assert!(matches!(result, Err(CacheError::CacheOnlyMiss { .. })), "cache-only reports an explicit miss instead of an empty result");
    }
}
