//! Token estimation.

/// Approximates the token count of a text block.
///
/// One scheme is used per process so budget comparisons stay meaningful.
/// Implementations must be pure.
pub trait TokenEstimator: Send + Sync {
    fn name(&self) -> &str;

    fn estimate(&self, text: &str) -> usize;
}
