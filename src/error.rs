//! Error kinds surfaced by the cache. A write never partially corrupts the
//! graph, so every error here is either raised
//! *before* a write is attempted (`CacheOnlyMiss`), describes a side-channel
//! failure that does not touch the graph (`Network`, `Persistence`), or is
//! reported alongside data that was still normalized (`GraphQl`).

use std::sync::Arc;

/// The top-level error type returned by the client facade.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// A `cache-only` execution found no data for the root of the plan.
    #[error("cache-only read found no data for signature `{signature}`")]
    CacheOnlyMiss { signature: String },

    /// The transport rejected or failed to complete a request.
    #[error("network request failed: {0}")]
    Network(#[from] NetworkError),

    /// The transport returned both `data` and GraphQL `errors`; the data
    /// was normalized regardless, but callers should still see the errors.
    #[error("{} graphql error(s) returned alongside data", .0.len())]
    GraphQl(Arc<Vec<GraphQlError>>),

    /// An optimistic builder raised while running; the partial layer was
    /// rolled back before this error reached the caller.
    #[error("optimistic builder failed: {0}")]
    OptimisticBuilder(String),

    /// The document could not be turned into a plan.
    #[error(transparent)]
    Document(#[from] crate::ast::DocumentError),

    /// Internal invariant violation; should never surface in practice.
    #[error("internal cache error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct NetworkError {
    pub message: String,
}

impl NetworkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphQlError {
    pub message: String,
    pub path: Vec<String>,
}

/// A malformed response is coerced by best effort: the offending field is
/// dropped from the graph write rather than aborting the whole normalize.
/// Normalization never returns this as a hard error to callers; it is
/// recorded for diagnostics (`Client::inspect`) instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("normalization dropped field `{response_key}` at `{parent_id}`: {reason}")]
pub struct NormalizationWarning {
    pub parent_id: String,
    pub response_key: String,
    pub reason: String,
}

/// Failures in the storage adapter are logged and swallowed; the in-memory
/// cache remains authoritative. Kept as a distinct type so adapters have a
/// place to put context even though the client only ever logs it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("persistence adapter error: {0}")]
pub struct PersistenceError(pub String);

pub type Result<T> = std::result::Result<T, CacheError>;
