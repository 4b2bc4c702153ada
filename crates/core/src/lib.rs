//! # convrag Core
//!
//! Domain types, capability traits, and error definitions for the convrag
//! conversational retrieval service. This crate has **zero framework
//! dependencies**: it defines the domain model that all other crates
//! implement against.
//!
//! ## Design Philosophy
//!
//! Every external capability (generation, retrieval, token counting) is a
//! trait here. Implementations live in their respective crates, so tests can
//! swap in scripted stand-ins and the dependency graph points inward.

pub mod error;
pub mod message;
pub mod provider;
pub mod retrieval;
pub mod token;

// Re-export key types at crate root for ergonomics
pub use error::{CommitConflict, Error, ProviderError, Result, RetrievalError, Transient};
pub use message::{Role, SessionId, Turn};
pub use provider::{EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse, Usage};
pub use retrieval::{Passage, Retriever};
pub use token::TokenEstimator;
