use std::rc::Rc;

use graph_cache::ast::Variables;
use graph_cache::client::Client;
use graph_cache::client::ClientConfig;
use serde_json::json;

use crate::support;

/// Two strict pages fetched for the same connection (the first a leader page
/// with no `after`, the second continuing from its `endCursor`) stitch into a
/// single canonical edge list in request order, with `pageInfo` taken from
/// the leader's `startCursor`/`hasPreviousPage` and the trailing page's
/// `endCursor`/`hasNextPage`.
#[tokio::test]
async fn forward_pagination_appends_into_one_canonical_list() {
    let plan = support::compile(
        "query Feed($after: String) { posts(first: 2, after: $after) @connection(key: \"feed\") { edges { cursor node { id title } } pageInfo { startCursor endCursor hasNextPage hasPreviousPage } } }",
        None,
    );

    let transport = Rc::new(support::StubTransport::new());
    let client = Client::new(ClientConfig::new(transport));

    // No `after` variable at all (not even a defined-null one): the field's
    // built argument map must omit the key entirely for this to read as the
    // leader page rather than a forward-continuation page.
    let page1_vars = Variables::new();
    client.write_query(
        &plan,
        &page1_vars,
        &json!({
            "posts": {
                "__typename": "PostConnection",
                "edges": [
                    { "__typename": "PostEdge", "cursor": "c1", "node": { "__typename": "Post", "id": "1", "title": "First" } },
                    { "__typename": "PostEdge", "cursor": "c2", "node": { "__typename": "Post", "id": "2", "title": "Second" } },
                ],
                "pageInfo": { "startCursor": "c1", "endCursor": "c2", "hasNextPage": true, "hasPreviousPage": false },
            }
        }),
    );

    let mut page2_vars = Variables::new();
    page2_vars.insert("after".to_owned(), json!("c2"));
    client.write_query(
        &plan,
        &page2_vars,
        &json!({
            "posts": {
                "__typename": "PostConnection",
                "edges": [
                    { "__typename": "PostEdge", "cursor": "c3", "node": { "__typename": "Post", "id": "3", "title": "Third" } },
                ],
                "pageInfo": { "startCursor": "c3", "endCursor": "c3", "hasNextPage": false, "hasPreviousPage": true },
            }
        }),
    );

    // Either page's variables resolve to the same canonical connection: the
    // `after` argument is a pagination-window argument and is excluded from
    // the canonical filter set.
    let stitched = client.read_query(&plan, &page1_vars).expect("canonical read is complete");
    let stitched = support::strip_version(&stitched);

    let titles: Vec<&str> = stitched["posts"]["edges"].as_array().unwrap().iter().map(|edge| edge["node"]["title"].as_str().unwrap()).collect();
    assert_eq!(titles, vec!["First", "Second", "Third"], "pages stitch in request order, not a dedup or a reset");

    assert_eq!(stitched["posts"]["pageInfo"]["startCursor"], json!("c1"), "startCursor comes from the leader page");
    assert_eq!(stitched["posts"]["pageInfo"]["hasPreviousPage"], json!(false), "hasPreviousPage comes from the leader page");
    assert_eq!(stitched["posts"]["pageInfo"]["endCursor"], json!("c3"), "endCursor comes from the trailing page");
    assert_eq!(stitched["posts"]["pageInfo"]["hasNextPage"], json!(false), "hasNextPage comes from the trailing page");
}
