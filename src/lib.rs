//! A normalized, reactive cache for typed graph queries: a record graph
//! (`graph`), a document compiler (`ast`, `plan`), normalization and
//! materialization against that graph (`documents`), canonical connection
//! merging (`canonical`), a layered optimistic-update engine (`optimistic`),
//! and the fragment/query watcher registries and client facade that tie them
//! together (`fragments`, `queries`, `client`).

pub mod ast;
pub mod canonical;
pub mod client;
pub mod documents;
pub mod error;
pub mod fragments;
pub mod graph;
pub mod keys;
pub mod optimistic;
#[cfg(feature = "persistence")]
pub mod persistence;
pub mod plan;
pub mod queries;
pub mod ssr;
pub mod transport;

pub use client::Client;
pub use client::ClientConfig;
pub use error::CacheError;
pub use error::Result;
pub use queries::CachePolicy;
pub use transport::Transport;
