//! # Hybrid Retrieval Core
//!
//! Shared, backend-agnostic logic for the hybrid retrieval engine: data
//! models, the chunker, concept extraction, query analysis, result fusion,
//! and the adapter traits that the native engine crate implements against
//! SQLite, an embedding provider, and a cache.
//!
//! This crate holds no tokio, sqlx, or other native-I/O dependency. Every
//! type here is plain data or a pure function; the traits in [`traits`]
//! describe capabilities without committing to an executor or backend.

pub mod analyzer;
pub mod chunk;
pub mod concept;
pub mod embedding;
pub mod error;
pub mod fakes;
pub mod fuse;
pub mod models;
pub mod traits;

pub use error::{EngineError, EngineResult};
