//! The conversation pipeline: one linear state machine per request.
//!
//! ```text
//! RECEIVED → RETRIEVED → ASSEMBLED → GENERATED → COMMITTED
//!     └──────────┴───────────┴───────────┴──────→ FAILED
//! ```
//!
//! The session store is read once when the request is received and written
//! once at the very end with the complete question/answer pair. A failure,
//! timeout, or cancellation at any earlier stage leaves the session exactly
//! as it was.

use std::sync::Arc;
use std::time::Duration;

use convrag_config::AppConfig;
use convrag_core::error::{Error, Result};
use convrag_core::message::{SessionId, Turn};
use convrag_core::provider::{Provider, ProviderRequest};
use convrag_core::retrieval::{Passage, Retriever};
use convrag_memory::SessionStore;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::context::{AssembledPrompt, AssemblyInput, AssemblyMetadata, ContextAssembler, TokenBudget};
use crate::context::token::estimator_for;
use crate::retry::RetryPolicy;

// ── State machine ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Received,
    Retrieved,
    Assembled,
    Generated,
    Committed,
    Failed,
}

impl Stage {
    /// The only legal successor on the success path.
    pub fn next(self) -> Option<Stage> {
        match self {
            Self::Received => Some(Self::Retrieved),
            Self::Retrieved => Some(Self::Assembled),
            Self::Assembled => Some(Self::Generated),
            Self::Generated => Some(Self::Committed),
            Self::Committed | Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Failed)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Received => "RECEIVED",
            Self::Retrieved => "RETRIEVED",
            Self::Assembled => "ASSEMBLED",
            Self::Generated => "GENERATED",
            Self::Committed => "COMMITTED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Per-request working state. Never shared between requests.
#[derive(Debug)]
pub struct PipelineState {
    pub question: String,
    /// `None` for single-shot asks.
    pub session_id: Option<SessionId>,
    /// Snapshot taken at RECEIVED; its length guards the commit.
    pub history: Vec<Turn>,
    pub passages: Vec<Passage>,
    pub prompt: Option<AssembledPrompt>,
    pub answer: Option<String>,
    stage: Stage,
}

impl PipelineState {
    fn received(question: &str, session_id: Option<SessionId>, history: Vec<Turn>) -> Self {
        debug!(stage = %Stage::Received, session_id = ?session_id, prior_turns = history.len(), "Pipeline stage");
        Self {
            question: question.to_string(),
            session_id,
            history,
            passages: Vec::new(),
            prompt: None,
            answer: None,
            stage: Stage::Received,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn advance(&mut self) {
        if let Some(next) = self.stage.next() {
            debug!(from = %self.stage, to = %next, "Pipeline stage");
            self.stage = next;
        }
    }

    fn fail(&mut self, error: &Error) {
        warn!(stage = %self.stage, error = %error, "Pipeline failed");
        self.stage = Stage::Failed;
    }
}

// ── Results ───────────────────────────────────────────────────────────────

/// A committed chat exchange.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub answer: String,
    pub session_id: SessionId,
    /// Full session history after the commit.
    pub history: Vec<Turn>,
    pub sources: Vec<String>,
    pub context: AssemblyMetadata,
}

/// A single-shot answer with no session involved.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<String>,
    pub context: AssemblyMetadata,
}

// ── Pipeline ──────────────────────────────────────────────────────────────

/// Tunables that do not belong to a collaborator.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Passages per chat request.
    pub k: usize,
    /// Passages per single-shot ask.
    pub k_single_shot: usize,
    pub retrieval_timeout: Duration,
    pub generation_timeout: Duration,
    /// Internal re-resolve + re-commit attempts after a conflict.
    pub commit_retries: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            temperature: 0.7,
            max_tokens: Some(1024),
            k: 3,
            k_single_shot: 30,
            retrieval_timeout: Duration::from_secs(30),
            generation_timeout: Duration::from_secs(120),
            commit_retries: 0,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
            k: config.chat_k(),
            k_single_shot: config.retrieval.k_qa,
            retrieval_timeout: Duration::from_secs(config.retrieval.timeout_secs),
            generation_timeout: Duration::from_secs(config.retry.generation_timeout_secs),
            commit_retries: config.retry.commit_retries,
        }
    }
}

/// Orchestrates retrieval, assembly, generation and the session commit.
///
/// Cheap to share behind an `Arc`; each call to [`run`](Self::run) or
/// [`ask`](Self::ask) owns its own [`PipelineState`].
pub struct ConversationPipeline {
    sessions: Arc<SessionStore>,
    retriever: Arc<dyn Retriever>,
    provider: Arc<dyn Provider>,
    assembler: ContextAssembler,
    retry: RetryPolicy,
    settings: PipelineSettings,
}

impl ConversationPipeline {
    pub fn new(
        sessions: Arc<SessionStore>,
        retriever: Arc<dyn Retriever>,
        provider: Arc<dyn Provider>,
        assembler: ContextAssembler,
    ) -> Self {
        Self {
            sessions,
            retriever,
            provider,
            assembler,
            retry: RetryPolicy::default(),
            settings: PipelineSettings::default(),
        }
    }

    /// Wire a pipeline from configuration. Fails if the configured token
    /// estimator cannot be loaded.
    pub fn from_config(
        config: &AppConfig,
        sessions: Arc<SessionStore>,
        retriever: Arc<dyn Retriever>,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let estimator = estimator_for(config.context.estimator)?;
        let assembler = ContextAssembler::new(
            TokenBudget {
                total: config.context.token_budget,
            },
            estimator,
        );

        Ok(Self::new(sessions, retriever, provider, assembler)
            .with_retry(RetryPolicy::from_config(&config.retry))
            .with_settings(PipelineSettings::from_config(config, model)))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run one chat exchange against `session_id` (generated when absent).
    ///
    /// On success the session holds two more turns: the question and the
    /// answer. On any error the session is untouched.
    pub async fn run(&self, question: &str, session_id: Option<&str>) -> Result<Exchange> {
        let (id, history) = self.sessions.resolve(session_id).await;
        let mut state = PipelineState::received(question, Some(id.clone()), history);

        let outcome: Result<Vec<Turn>> = async {
            self.retrieve(&mut state, self.settings.k).await?;
            self.assemble(&mut state);
            self.generate(&mut state).await?;
            self.commit(&mut state).await
        }
        .await;

        match outcome {
            Ok(history) => {
                let context = state
                    .prompt
                    .map(|p| p.metadata)
                    .ok_or_else(|| Error::Internal("committed without a prompt".into()))?;
                Ok(Exchange {
                    answer: state.answer.unwrap_or_default(),
                    session_id: id,
                    history,
                    sources: state.passages.iter().map(|p| p.source.clone()).collect(),
                    context,
                })
            }
            Err(e) => {
                state.fail(&e);
                Err(e)
            }
        }
    }

    /// Answer a single question with no conversational memory.
    ///
    /// Uses the broader single-shot `k` and never touches the session store.
    pub async fn ask(&self, question: &str) -> Result<Answer> {
        let mut state = PipelineState::received(question, None, Vec::new());

        let outcome: Result<()> = async {
            self.retrieve(&mut state, self.settings.k_single_shot).await?;
            self.assemble(&mut state);
            self.generate(&mut state).await
        }
        .await;

        if let Err(e) = outcome {
            state.fail(&e);
            return Err(e);
        }

        let context = state
            .prompt
            .map(|p| p.metadata)
            .ok_or_else(|| Error::Internal("generated without a prompt".into()))?;
        Ok(Answer {
            text: state.answer.unwrap_or_default(),
            sources: state.passages.iter().map(|p| p.source.clone()).collect(),
            context,
        })
    }

    // ── Stages ────────────────────────────────────────────────────────────

    async fn retrieve(&self, state: &mut PipelineState, k: usize) -> Result<()> {
        let question = state.question.clone();
        let retriever = &self.retriever;

        let passages = self
            .retry
            .run("retrieval", self.settings.retrieval_timeout, || {
                retriever.similarity_search(&question, k)
            })
            .await?;

        let sources: Vec<&str> = passages.iter().map(|p| p.source.as_str()).collect();
        info!(k, retrieved = passages.len(), sources = ?sources, "Retrieved passages");

        state.passages = passages;
        state.advance();
        Ok(())
    }

    fn assemble(&self, state: &mut PipelineState) {
        let prompt = self.assembler.assemble(&AssemblyInput {
            history: &state.history,
            passages: &state.passages,
            question: &state.question,
        });

        info!(
            input_tokens = prompt.estimated_tokens,
            budget = prompt.metadata.budget,
            within_budget = prompt.metadata.within_budget,
            "Assembled prompt"
        );
        for drop in &prompt.metadata.drops {
            debug!(layer = %drop.layer, dropped = drop.items_dropped, reason = %drop.reason, "Trimmed prompt");
        }

        state.prompt = Some(prompt);
        state.advance();
    }

    async fn generate(&self, state: &mut PipelineState) -> Result<()> {
        let prompt = state
            .prompt
            .as_ref()
            .ok_or_else(|| Error::Internal("generation before assembly".into()))?;

        let request = ProviderRequest {
            model: self.settings.model.clone(),
            prompt: prompt.text.clone(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            stop: Vec::new(),
        };
        let provider = &self.provider;

        let response = self
            .retry
            .run("generation", self.settings.generation_timeout, || {
                provider.complete(request.clone())
            })
            .await?;

        info!(
            output_tokens = self.assembler.estimator().estimate(&response.text),
            model = %response.model,
            "Generated answer"
        );

        state.answer = Some(response.text);
        state.advance();
        Ok(())
    }

    async fn commit(&self, state: &mut PipelineState) -> Result<Vec<Turn>> {
        let (Some(id), Some(answer)) = (state.session_id.as_ref(), state.answer.as_deref()) else {
            return Err(Error::Internal("commit without session or answer".into()));
        };

        let mut expected = state.history.len();
        let mut retries_left = self.settings.commit_retries;

        loop {
            match self
                .sessions
                .commit_exchange(id, &state.question, answer, expected)
                .await
            {
                Ok(history) => {
                    state.advance();
                    return Ok(history);
                }
                // A cleared session is never resurrected by a retry.
                Err(conflict) if retries_left > 0 && conflict.actual.is_some() => {
                    retries_left -= 1;
                    warn!(
                        session_id = %id,
                        expected = conflict.expected,
                        actual = ?conflict.actual,
                        retries_left,
                        "Commit conflict, re-resolving session"
                    );
                    expected = match self.sessions.get(id.as_str()).await {
                        Some(current) => current.len(),
                        None => return Err(conflict.into()),
                    };
                }
                Err(conflict) => return Err(conflict.into()),
            }
        }
    }
}
