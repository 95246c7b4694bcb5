//! Incremental code knowledge graph.
//!
//! Source files are parsed into structural records (imports, classes, functions,
//! call references), embedded, and upserted into a workspace-scoped graph with a
//! cosine vector index. A sync engine applies change sets against an on-disk
//! mirror of each workspace; a retriever answers questions over the graph, with a
//! ranked-list fallback when no generation backend is reachable.

pub mod error;
pub mod extractor;
pub mod languages;
pub mod mirror;
pub mod patch;
pub mod retriever;
pub mod store;
pub mod sync;

pub use error::{IndexError, Result};
