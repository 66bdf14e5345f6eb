//! The transport collaborator: a single `http` method plus an optional
//! subscription stream. Kept as a trait object so the client facade never
//! depends on a concrete HTTP stack.

use futures::stream::LocalBoxStream;

use crate::ast::Variables;
use crate::error::GraphQlError;
use crate::error::NetworkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// `plan.networkQuery` plus the variables it was compiled for, ready to be
/// serialized onto the wire by a concrete transport.
#[derive(Debug, Clone)]
pub struct Operation {
    pub query: String,
    pub variables: Variables,
    pub operation_kind: OperationKind,
}

#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub data: Option<serde_json::Value>,
    pub errors: Vec<GraphQlError>,
}

/// Single-threaded by construction (`?Send`): the whole cache is
/// `Rc`-based, so a transport that required `Send` futures would force an
/// unnecessary `Arc`/`Mutex` boundary at every call site.
#[async_trait::async_trait(?Send)]
pub trait Transport {
    async fn http(&self, operation: Operation) -> Result<TransportResponse, NetworkError>;

    /// Subscriptions are optional; a transport that cannot stream returns
    /// `None` and `executeSubscription` surfaces that as a `NetworkError`.
    fn subscribe(&self, operation: Operation) -> Option<LocalBoxStream<'static, Result<TransportResponse, NetworkError>>> {
        let _ = operation;
        None
    }
}
