//! Context assembly: merges history and retrieved passages into one prompt.
//!
//! The prompt has three parts:
//!
//! 1. **Previous conversation** (`Human: ...` / `Assistant: ...` lines),
//!    omitted when there is no history
//! 2. **Instruction template** with the current question, never trimmed
//! 3. **Context**: passage texts in rank order, separated by blank lines
//!
//! # Budget enforcement
//!
//! Each history line and passage is estimated once. While the running
//! total exceeds the budget, the oldest history turn is dropped; once
//! history is exhausted, the lowest-ranked passage is dropped. The kept
//! window is rendered once and checked with a single estimate of the
//! whole text. If the template and question alone still exceed the budget,
//! the prompt is returned with `within_budget = false`.
//!
//! Assembly is deterministic: identical inputs always produce identical
//! outputs.

use std::sync::Arc;

use convrag_core::message::Turn;
use convrag_core::retrieval::Passage;
use convrag_core::TokenEstimator;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// The fixed question-answering instruction.
pub const RAG_TEMPLATE: &str = "You are an assistant for question-answering tasks. \
Use the following pieces of retrieved context to answer the question. \
If you don't know the answer, just say that you don't know. \
Use three sentences maximum and keep the answer concise.\n\
Question: {question}\n\
Context: {context}\n\
Answer:";

pub const HISTORY_HEADER: &str = "Previous conversation:\n";

// ── Types ─────────────────────────────────────────────────────────────────

/// Token budget configuration.
#[derive(Debug, Clone, Copy)]
pub struct TokenBudget {
    /// Upper bound on the estimated size of the assembled prompt.
    pub total: usize,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self { total: 8192 }
    }
}

/// All inputs required by the assembler for a single generation call.
pub struct AssemblyInput<'a> {
    /// Prior turns, oldest first, excluding the current question.
    pub history: &'a [Turn],
    /// Retrieved passages in rank order (most relevant first).
    pub passages: &'a [Passage],
    /// The current question.
    pub question: &'a str,
}

/// The assembled prompt, ready for a completion call.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub text: String,
    /// Estimate for `text` under the assembler's estimator.
    pub estimated_tokens: usize,
    pub metadata: AssemblyMetadata,
}

/// Detailed metadata about the assembly process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyMetadata {
    /// Estimated tokens in the assembled prompt.
    pub total_tokens: usize,
    /// Configured token budget.
    pub budget: usize,
    /// False only when the fixed part alone exceeds the budget.
    pub within_budget: bool,
    /// Budget utilization percentage.
    pub utilization_pct: f32,
    /// Per-section statistics.
    pub per_layer: Vec<LayerStats>,
    /// Items dropped from each section.
    pub drops: Vec<DropInfo>,
}

/// Statistics for a single prompt section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerStats {
    pub name: String,
    /// Estimated tokens of this section rendered on its own.
    pub tokens: usize,
    pub items_included: usize,
    pub items_total: usize,
}

/// Information about items dropped from a section during budget enforcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropInfo {
    pub layer: String,
    pub items_dropped: usize,
    pub tokens_dropped: usize,
    pub reason: String,
}

// ── Assembler ─────────────────────────────────────────────────────────────

/// The context assembler. Stateless: create one and reuse it.
#[derive(Clone)]
pub struct ContextAssembler {
    budget: TokenBudget,
    estimator: Arc<dyn TokenEstimator>,
}

impl ContextAssembler {
    /// Create a new assembler with the given token budget.
    pub fn new(budget: TokenBudget, estimator: Arc<dyn TokenEstimator>) -> Self {
        Self { budget, estimator }
    }

    pub fn budget(&self) -> TokenBudget {
        self.budget
    }

    pub fn estimator(&self) -> &Arc<dyn TokenEstimator> {
        &self.estimator
    }

    /// Assemble a prompt within the token budget.
    ///
    /// # Algorithm
    ///
    /// 1. Estimate the fixed part, each history line and each passage once
    /// 2. While the running total is over budget: drop the oldest turn,
    ///    else the lowest-ranked passage
    /// 3. Render the kept window once and verify it with a final estimate;
    ///    keep dropping only if the estimate of the whole text disagrees
    pub fn assemble(&self, input: &AssemblyInput<'_>) -> AssembledPrompt {
        let history = input.history;
        let passages = input.passages;
        let budget = self.budget.total;

        let fixed = self.estimator.estimate(&render(&[], &[], input.question));
        let history_overhead =
            self.estimator.estimate(HISTORY_HEADER) + self.estimator.estimate("\n");
        let turn_costs: Vec<usize> = history
            .iter()
            .map(|t| self.estimator.estimate(&format!("{}\n", t.render())))
            .collect();
        let passage_costs: Vec<usize> = passages
            .iter()
            .map(|p| {
                self.estimator.estimate(&p.content) + self.estimator.estimate(PASSAGE_SEPARATOR)
            })
            .collect();

        let mut window = Window::new(&turn_costs, &passage_costs);

        let (text, estimated_tokens, within_budget) = loop {
            while window.projected(fixed, history_overhead) > budget && window.drop_one() {}

            let text = render(
                &history[window.first_turn..],
                &passages[..window.passage_count],
                input.question,
            );
            let tokens = self.estimator.estimate(&text);

            if tokens <= budget {
                break (text, tokens, true);
            }
            if !window.drop_one() {
                warn!(
                    tokens,
                    budget, "Question and instructions alone exceed the token budget"
                );
                break (text, tokens, false);
            }
        };

        let mut per_layer = vec![
            LayerStats {
                name: "instructions".into(),
                tokens: fixed,
                items_included: 1,
                items_total: 1,
            },
            LayerStats {
                name: "conversation_history".into(),
                tokens: window.history_tokens,
                items_included: history.len() - window.first_turn,
                items_total: history.len(),
            },
            LayerStats {
                name: "context".into(),
                tokens: window.context_tokens,
                items_included: window.passage_count,
                items_total: passages.len(),
            },
        ];
        per_layer.retain(|l| l.items_total > 0);

        let drops = [
            Self::maybe_drop(
                "conversation_history",
                window.first_turn,
                turn_costs[..window.first_turn].iter().sum(),
                "Oldest turns dropped",
            ),
            Self::maybe_drop(
                "context",
                passages.len() - window.passage_count,
                passage_costs[window.passage_count..].iter().sum(),
                "Lowest-ranked passages dropped",
            ),
        ]
        .into_iter()
        .flatten()
        .collect();

        AssembledPrompt {
            text,
            estimated_tokens,
            metadata: AssemblyMetadata {
                total_tokens: estimated_tokens,
                budget,
                within_budget,
                utilization_pct: (estimated_tokens as f32 / budget.max(1) as f32) * 100.0,
                per_layer,
                drops,
            },
        }
    }

    fn maybe_drop(layer: &str, dropped: usize, tokens: usize, reason: &str) -> Option<DropInfo> {
        if dropped > 0 {
            Some(DropInfo {
                layer: layer.into(),
                items_dropped: dropped,
                tokens_dropped: tokens,
                reason: reason.into(),
            })
        } else {
            None
        }
    }
}

// ── Window ────────────────────────────────────────────────────────────────

/// The kept slice of history and passages, with cached per-item costs.
///
/// Keeps `history[first_turn..]` and `passages[..passage_count]`.
struct Window<'c> {
    turn_costs: &'c [usize],
    passage_costs: &'c [usize],
    first_turn: usize,
    passage_count: usize,
    history_tokens: usize,
    context_tokens: usize,
}

impl<'c> Window<'c> {
    fn new(turn_costs: &'c [usize], passage_costs: &'c [usize]) -> Self {
        Self {
            turn_costs,
            passage_costs,
            first_turn: 0,
            passage_count: passage_costs.len(),
            history_tokens: turn_costs.iter().sum(),
            context_tokens: passage_costs.iter().sum(),
        }
    }

    fn projected(&self, fixed: usize, history_overhead: usize) -> usize {
        let history = if self.first_turn < self.turn_costs.len() {
            history_overhead + self.history_tokens
        } else {
            0
        };
        fixed + history + self.context_tokens
    }

    /// Drop the oldest turn, else the lowest-ranked passage.
    /// Returns false when nothing droppable remains.
    fn drop_one(&mut self) -> bool {
        if self.first_turn < self.turn_costs.len() {
            self.history_tokens -= self.turn_costs[self.first_turn];
            self.first_turn += 1;
        } else if self.passage_count > 0 {
            self.passage_count -= 1;
            self.context_tokens -= self.passage_costs[self.passage_count];
        } else {
            return false;
        }
        true
    }
}

// ── Rendering ─────────────────────────────────────────────────────────────

const PASSAGE_SEPARATOR: &str = "\n\n";

fn render(history: &[Turn], passages: &[Passage], question: &str) -> String {
    let body = RAG_TEMPLATE
        .replace("{context}", &render_context(passages))
        .replacen("{question}", question, 1);

    if history.is_empty() {
        body
    } else {
        format!("{HISTORY_HEADER}{}\n\n{body}", render_history(history))
    }
}

fn render_history(history: &[Turn]) -> String {
    history.iter().map(Turn::render).collect::<Vec<_>>().join("\n")
}

fn render_context(passages: &[Passage]) -> String {
    passages
        .iter()
        .map(|p| p.content.as_str())
        .collect::<Vec<_>>()
        .join(PASSAGE_SEPARATOR)
}
