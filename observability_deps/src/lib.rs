//! Facade crate for the tracing/logging ecosystem used throughout this
//! workspace, so that every other crate depends on `observability_deps`
//! rather than pinning `tracing` directly.

pub use tracing;
