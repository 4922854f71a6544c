//! Native engine: adapters over SQLite and a cache, an embedding
//! gateway, the ingestion pipeline, the retrieval executor, and the
//! hybrid engine that orchestrates all of it.
//!
//! Everything in [`hybrid_retrieval_core`] is pure or trait-based; this
//! crate supplies the I/O — tokio, sqlx, reqwest, moka — behind those
//! traits.

pub mod cache;
pub mod config;
pub mod db;
pub mod embed_gateway;
pub mod embedding_providers;
pub mod executor;
pub mod graph_store;
pub mod hybrid_engine;
pub mod ingest;
#[cfg(feature = "local-embeddings-tract")]
pub mod local_tract;
pub mod migrate;
pub mod telemetry;
pub mod vector_store;

pub use hybrid_retrieval_core::error::{EngineError, EngineResult};
