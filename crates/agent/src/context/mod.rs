//! Prompt assembly under a token budget.
//!
//! Three layers, in render order:
//!
//! | Layer | Source | Trim strategy |
//! |-------|--------|---------------|
//! | Instructions | Fixed RAG template | Never trimmed |
//! | Conversation history | Session turns | Oldest turn dropped first |
//! | Context | Retrieved passages | Lowest-ranked dropped first |
//!
//! The question itself is never trimmed.

pub mod assembler;
pub mod token;

pub use assembler::{
    AssembledPrompt, AssemblyInput, AssemblyMetadata, ContextAssembler, DropInfo, HISTORY_HEADER,
    LayerStats, RAG_TEMPLATE, TokenBudget,
};
pub use token::{Cl100kEstimator, HeuristicEstimator, estimate_tokens, estimator_for};
