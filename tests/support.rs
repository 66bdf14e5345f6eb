//! Shared fixtures for the integration scenarios: a queued stub transport
//! and a small compile helper so each scenario doesn't repeat the
//! parse-then-plan boilerplate.

use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;
use graph_cache::error::NetworkError;
use graph_cache::keys::KeyConfig;
use graph_cache::plan::Plan;
use graph_cache::transport::Operation;
use graph_cache::transport::Transport;
use graph_cache::transport::TransportResponse;
use serde_json::Value as Json;

/// A `Transport` backed by a queue of canned responses, consumed in order.
/// Counts every `http` call so scenarios can assert on coalescing/caching
/// behavior without instrumenting the cache itself.
#[derive(Default)]
pub struct StubTransport {
    responses: RefCell<std::collections::VecDeque<Result<TransportResponse, NetworkError>>>,
    calls: RefCell<u32>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_data(&self, data: Json) {
        self.responses.borrow_mut().push_back(Ok(TransportResponse { data: Some(data), errors: Vec::new() }));
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.borrow()
    }
}

#[async_trait(?Send)]
impl Transport for StubTransport {
    async fn http(&self, _operation: Operation) -> Result<TransportResponse, NetworkError> {
        // Yields once so concurrent callers sharing a signature actually
        // overlap in flight instead of each resolving synchronously before
        // the next is polled, which is what request coalescing exists for.
        tokio::task::yield_now().await;
        *self.calls.borrow_mut() += 1;
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(NetworkError::new("stub transport: no response queued")))
    }
}

/// Parses and compiles `source` as the sole (or named) operation/fragment.
pub fn compile(source: &str, operation_name: Option<&str>) -> Rc<Plan> {
    let document = graph_cache::ast::parse_document(source).expect("document parses");
    Plan::compile(&document, operation_name, &KeyConfig::new()).expect("plan compiles")
}

/// Strips the `__version` fingerprint field [`graph_cache`] attaches to every
/// typed object, so scenario assertions can compare against a literal
/// expected shape without hard-coding a hash.
pub fn strip_version(value: &Json) -> Json {
    match value {
        Json::Object(map) => {
            Json::Object(map.iter().filter(|(k, _)| k.as_str() != "__version").map(|(k, v)| (k.clone(), strip_version(v))).collect())
        }
        Json::Array(items) => Json::Array(items.iter().map(strip_version).collect()),
        other => other.clone(),
    }
}
