//! Session memory and retrieval backends for convrag.

pub mod index;
pub mod noop;
pub mod session;
pub mod vector;

pub use index::{IndexedChunk, VectorIndex};
pub use noop::NoopRetriever;
pub use session::SessionStore;
pub use vector::{cosine_similarity, top_k};
