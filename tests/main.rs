//! Single integration test binary (`autotests = false` in Cargo.toml keeps
//! this the only test target, matching the `cargo test` invocation the rest
//! of the workspace's CI expects).

mod support;

mod invariants;
mod scenarios;
