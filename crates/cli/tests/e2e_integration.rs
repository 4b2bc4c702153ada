//! End-to-end integration tests for convrag.
//!
//! These tests drive the full stack in-process: HTTP router → pipeline →
//! vector index (loaded from a JSON file) → session store, with an
//! in-memory model standing in for the completion and embedding endpoints.

use std::io::Write;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use convrag_agent::context::token::HeuristicEstimator;
use convrag_agent::{ContextAssembler, ConversationPipeline, RetryPolicy, TokenBudget};
use convrag_core::error::ProviderError;
use convrag_core::provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse, Usage,
};
use convrag_gateway::{AppState, SharedState, build_router};
use convrag_memory::{SessionStore, VectorIndex};

// ── Mock model ───────────────────────────────────────────────────────────

const TOPICS: [&str; 3] = ["values", "governance", "holiday"];

/// Embeds text as keyword counts over [`TOPICS`] and answers with the
/// first line of the context block it was given.
struct KeywordModel {
    prompts: Mutex<Vec<String>>,
}

impl KeywordModel {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

fn embed_text(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    TOPICS
        .iter()
        .map(|t| lower.matches(t).count() as f32 + 0.01)
        .collect()
}

#[async_trait::async_trait]
impl Provider for KeywordModel {
    fn name(&self) -> &str {
        "e2e_keyword"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());

        let answer = request
            .prompt
            .split("Context: ")
            .nth(1)
            .and_then(|rest| rest.lines().next())
            .filter(|line| !line.trim().is_empty())
            .unwrap_or("I don't know.")
            .to_string();

        Ok(ProviderResponse {
            text: answer,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: request.model,
        })
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        Ok(EmbeddingResponse {
            embeddings: request.inputs.iter().map(|t| embed_text(t)).collect(),
            model: request.model,
            usage: None,
        })
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────

fn write_index() -> tempfile::NamedTempFile {
    let docs = [
        ("handbook/values.md", "Our values are integrity, respect and openness."),
        ("handbook/governance.md", "Governance is overseen by the board and its committees."),
        ("handbook/holiday.md", "Holiday requests go through the HR portal."),
    ];
    let chunks: Vec<serde_json::Value> = docs
        .iter()
        .enumerate()
        .map(|(i, (source, content))| {
            serde_json::json!({
                "id": format!("chunk-{i}"),
                "source": source,
                "content": content,
                "embedding": embed_text(source),
            })
        })
        .collect();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", serde_json::json!({ "chunks": chunks })).unwrap();
    file
}

fn pipeline_with_budget(model: Arc<KeywordModel>, budget: usize) -> ConversationPipeline {
    let index_file = write_index();
    let index = VectorIndex::load(
        index_file.path(),
        Arc::clone(&model) as Arc<dyn Provider>,
        "keyword-embed",
    )
    .unwrap();
    assert_eq!(index.len(), 3);

    ConversationPipeline::new(
        Arc::new(SessionStore::new()),
        Arc::new(index),
        model,
        ContextAssembler::new(TokenBudget { total: budget }, Arc::new(HeuristicEstimator)),
    )
    .with_retry(RetryPolicy::no_retry())
}

fn app_state(model: Arc<KeywordModel>) -> SharedState {
    Arc::new(AppState {
        pipeline: Arc::new(pipeline_with_budget(model, 8192)),
    })
}

async fn send(state: &SharedState, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = build_router(state.clone()).oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

fn invoke(question: &str, session_id: Option<&str>) -> Request<Body> {
    let mut body = serde_json::json!({ "question": question });
    if let Some(id) = session_id {
        body["session_id"] = id.into();
    }
    Request::builder()
        .method("POST")
        .uri("/AgentInvoke")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn conversation(method: &str, id: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(format!("/conversation/{id}"))
        .body(Body::empty())
        .unwrap()
}

// ── E2E: conversational flow ─────────────────────────────────────────────

#[tokio::test]
async fn e2e_two_turn_conversation_on_named_session() {
    let model = KeywordModel::new();
    let state = app_state(Arc::clone(&model));

    let (status, first) = send(&state, invoke("What are the company values?", Some("s1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["session_id"], "s1");
    assert_eq!(
        first["answer"],
        "Our values are integrity, respect and openness."
    );
    assert_eq!(first["conversation_history"].as_array().unwrap().len(), 2);

    let (status, second) = send(&state, invoke("And governance?", Some("s1"))).await;
    assert_eq!(status, StatusCode::OK);

    let history = second["conversation_history"].as_array().unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0]["type"], "HumanMessage");
    assert_eq!(history[0]["content"], "What are the company values?");
    assert_eq!(history[1]["type"], "AIMessage");
    assert_eq!(history[2]["content"], "And governance?");
    assert_eq!(history[3]["type"], "AIMessage");

    let prompts = model.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].starts_with("Previous conversation:\n"));
    assert!(prompts[1].contains("Human: What are the company values?"));
    assert!(prompts[1].contains("Question: And governance?"));
    // The governance chunk ranks first for the second question.
    assert!(prompts[1].contains("Context: Governance is overseen"));

    let (_, conv) = send(&state, conversation("GET", "s1")).await;
    assert_eq!(conv["session_id"], "s1");
    assert_eq!(conv["conversation_history"], second["conversation_history"]);
}

#[tokio::test]
async fn e2e_new_session_id_is_fresh_and_readable() {
    let state = app_state(KeywordModel::new());

    let (_, a) = send(&state, invoke("What are the values?", None)).await;
    let (_, b) = send(&state, invoke("What are the values?", None)).await;

    let a_id = a["session_id"].as_str().unwrap();
    let b_id = b["session_id"].as_str().unwrap();
    assert!(!a_id.is_empty());
    assert_ne!(a_id, b_id);

    let (_, conv) = send(&state, conversation("GET", a_id)).await;
    assert_eq!(conv["conversation_history"], a["conversation_history"]);
}

#[tokio::test]
async fn e2e_delete_then_get_reports_not_found() {
    let state = app_state(KeywordModel::new());
    send(&state, invoke("Holiday policy?", Some("gone"))).await;

    let (_, body) = send(&state, conversation("DELETE", "gone")).await;
    assert_eq!(body["message"], "Conversation gone cleared");

    let (status, body) = send(&state, conversation("GET", "gone")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({ "error": "Session not found" }));
}

#[tokio::test]
async fn e2e_single_shot_endpoint_leaves_no_session() {
    let model = KeywordModel::new();
    let state = app_state(Arc::clone(&model));

    let req = Request::builder()
        .uri("/AgentInvoke?prompt=How%20do%20I%20book%20a%20holiday%3F")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&state, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!("Holiday requests go through the HR portal."));
    assert!(state.pipeline.sessions().is_empty().await);
    assert!(!model.prompts()[0].contains("Previous conversation"));
}

// ── E2E: concurrency ─────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn e2e_concurrent_exchanges_on_one_session_keep_all_turns() {
    let state = app_state(KeywordModel::new());
    let n = 16;

    let handles: Vec<_> = (0..n)
        .map(|i| {
            let state = state.clone();
            tokio::spawn(async move {
                let question = format!("Question {i} about values");
                loop {
                    let (status, body) = send(&state, invoke(&question, Some("busy"))).await;
                    match status {
                        StatusCode::OK => return,
                        StatusCode::CONFLICT => {
                            assert_eq!(body["retryable"], true);
                            tokio::task::yield_now().await;
                        }
                        other => panic!("unexpected status {other}: {body}"),
                    }
                }
            })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        result.unwrap();
    }

    let history = state.pipeline.sessions().get("busy").await.unwrap();
    assert_eq!(history.len(), 2 * n);

    let mut questions: Vec<String> = history
        .iter()
        .step_by(2)
        .map(|t| t.content().to_string())
        .collect();
    questions.sort();
    questions.dedup();
    assert_eq!(questions.len(), n);
}

// ── E2E: token budget ────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_long_history_is_trimmed_to_budget() {
    let model = KeywordModel::new();
    let budget = 200;
    let pipeline = pipeline_with_budget(Arc::clone(&model), budget);

    for i in 0..20 {
        let long = format!("Turn {i}: {}", "tell me more about governance ".repeat(10));
        pipeline.run(&long, Some("long")).await.unwrap();
    }
    let exchange = pipeline
        .run("What are the company values?", Some("long"))
        .await
        .unwrap();

    assert_eq!(exchange.history.len(), 42);
    assert!(exchange.context.total_tokens <= budget);
    assert!(exchange.context.within_budget);
    assert!(!exchange.context.drops.is_empty());

    let last_prompt = model.prompts().pop().unwrap();
    assert!(last_prompt.contains("Question: What are the company values?"));
    assert!(!last_prompt.contains("Turn 0:"));
}

// ── E2E: configuration wiring ────────────────────────────────────────────

#[test]
fn e2e_pipeline_builds_from_config_without_index() {
    let mut config = convrag_config::AppConfig::default();
    config.api_key = Some("sk-test".into());
    config.context.estimator = convrag_config::EstimatorKind::Heuristic;

    let pipeline = convrag_gateway::build_pipeline(&config).unwrap();
    assert_eq!(pipeline.settings().k, 3);
    assert_eq!(pipeline.settings().k_single_shot, 30);
}

#[test]
fn e2e_missing_index_file_is_reported() {
    let mut config = convrag_config::AppConfig::default();
    config.api_key = Some("sk-test".into());
    config.retrieval.index_path = Some("/nonexistent/convrag/index.json".into());

    let err = match convrag_gateway::build_pipeline(&config) {
        Ok(_) => panic!("expected an error for a missing index"),
        Err(e) => e,
    };
    assert!(err.to_string().contains("Index unavailable"));
}
