use std::rc::Rc;

use graph_cache::ast::Variables;
use graph_cache::client::Client;
use graph_cache::client::ClientConfig;
use graph_cache::graph::RecordId;
use serde_json::json;

use crate::support;

/// A materialized value is rebuilt exactly when something it actually read
/// changes. Writing an entity this query never touches must not perturb its
/// memoized identity; writing the entity it does read must.
#[tokio::test]
async fn rebuild_tracks_the_recorded_dependency_set_not_every_write() {
    let plan = support::compile("query GetUser($id: ID!) { user(id: $id) { id name } }", None);
    let unrelated_plan = support::compile("{ id name }", None);
    let transport = Rc::new(support::StubTransport::new());
    let client = Client::new(ClientConfig::new(transport));

    let mut vars = Variables::new();
    vars.insert("id".to_owned(), json!("1"));
    client.write_query(&plan, &vars, &json!({ "user": { "__typename": "User", "id": "1", "name": "Ada" } }));

    let first = client.read_query(&plan, &vars).expect("query is complete after the write");

    client.write_fragment(&RecordId::new("Org:1"), &unrelated_plan, &Variables::new(), &json!({ "id": "1", "name": "Acme" }));
    let second = client.read_query(&plan, &vars).expect("still complete");
    assert!(Rc::ptr_eq(&first, &second), "writing an entity this plan never read must not invalidate its cached value");

    client.write_query(&plan, &vars, &json!({ "user": { "__typename": "User", "id": "1", "name": "Ada Lovelace" } }));
    let third = client.read_query(&plan, &vars).expect("still complete");
    assert!(!Rc::ptr_eq(&second, &third), "writing the entity this plan read through a ref must invalidate its cached value");
    assert_eq!(support::strip_version(&third)["user"]["name"], json!("Ada Lovelace"));
}
