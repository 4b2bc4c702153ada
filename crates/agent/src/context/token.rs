//! Token estimation.
//!
//! Two interchangeable schemes, fixed per process:
//! - [`Cl100kEstimator`]: BPE count with the `cl100k_base` encoding
//!   (GPT-3.5/GPT-4 family).
//! - [`HeuristicEstimator`]: ~4 characters per token, rounded up. Within
//!   ~10% of BPE counts on English text and needs no vocabulary.

use std::sync::Arc;

use convrag_config::EstimatorKind;
use convrag_core::TokenEstimator;
use tiktoken_rs::CoreBPE;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn estimate(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

/// Exact BPE counts with the `cl100k_base` vocabulary.
pub struct Cl100kEstimator {
    bpe: CoreBPE,
}

impl Cl100kEstimator {
    pub fn new() -> Result<Self, convrag_core::Error> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| convrag_core::Error::Config {
            message: format!("Failed to load cl100k_base encoding: {e}"),
        })?;
        Ok(Self { bpe })
    }
}

impl TokenEstimator for Cl100kEstimator {
    fn name(&self) -> &str {
        "cl100k"
    }

    fn estimate(&self, text: &str) -> usize {
        // Special-token markers in user text count as plain text.
        self.bpe.encode_ordinary(text).len()
    }
}

/// Build the estimator selected in configuration.
pub fn estimator_for(kind: EstimatorKind) -> Result<Arc<dyn TokenEstimator>, convrag_core::Error> {
    Ok(match kind {
        EstimatorKind::Cl100k => Arc::new(Cl100kEstimator::new()?),
        EstimatorKind::Heuristic => Arc::new(HeuristicEstimator),
    })
}
