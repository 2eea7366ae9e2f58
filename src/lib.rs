//! gcpgraph - incremental GCP inventory sync into a property graph
//!
//! Resource types are described as data in [`resource`]; the engine in
//! [`sync`] lists them through [`gcp`] and writes them through a
//! [`graph::GraphStore`].

pub mod config;
pub mod gcp;
pub mod graph;
pub mod resource;
pub mod sync;

/// Version injected at compile time via GCPGRAPH_VERSION env var (set by CI/CD),
/// or the crate version for local builds.
pub const VERSION: &str = match option_env!("GCPGRAPH_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};
