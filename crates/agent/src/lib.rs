//! The conversational RAG pipeline.
//!
//! Each request walks a fixed sequence of stages:
//!
//! 1. **Receive** the question and snapshot the session history
//! 2. **Retrieve** the top-k passages for the question
//! 3. **Assemble** history, passages and question into one prompt under budget
//! 4. **Generate** the answer with the configured provider
//! 5. **Commit** the question/answer pair to the session in one step
//!
//! External calls are bounded by [`RetryPolicy`]; a failure at any stage
//! leaves the session unchanged.

pub mod context;
pub mod pipeline;
pub mod retry;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{
    AssembledPrompt, AssemblyInput, AssemblyMetadata, ContextAssembler, DropInfo, LayerStats,
    TokenBudget,
};
pub use pipeline::{Answer, ConversationPipeline, Exchange, PipelineSettings, Stage};
pub use retry::RetryPolicy;
