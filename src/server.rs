//! HTTP API for the reading companion.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Answer a question strictly from the book |
//! | `GET`  | `/settings` | Current session settings |
//! | `POST` | `/settings` | Replace session settings (last write wins) |
//! | `POST` | `/admin/reindex` | Rebuild the index snapshot |
//! | `GET`  | `/progress` | Section spans for the boundary picker |
//! | `GET`  | `/metrics` | Citation metrics over the dialog journal |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `offline` (400), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the local web UI
//! can be served from any port.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

use crate::answer::{answer, AnswerContext};
use crate::config::{Config, SessionSettings};
use crate::guard::Vocabulary;
use crate::journal::{citation_metrics, DialogJournal, MetricsReport};
use crate::pipeline::{load_index, rebuild_index};
use crate::providers::{
    create_embedding_provider, EmbeddingProvider, GenerationProvider, OpenAiProvider,
};
use crate::retriever::{Citation, RankingRules};
use crate::store::IndexedPassage;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    /// Mutable session settings, replaced wholesale by `POST /settings`.
    session: Arc<RwLock<SessionSettings>>,
    embeddings: Arc<dyn EmbeddingProvider>,
    generation: Option<Arc<dyn GenerationProvider>>,
    vocabulary: Arc<Vocabulary>,
    rules: Arc<RankingRules>,
    journal: Arc<DialogJournal>,
}

/// Starts the HTTP server on `[server].bind` and runs until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let offline = config.session.offline;

    let embeddings: Arc<dyn EmbeddingProvider> =
        create_embedding_provider(&config.embedding, &config.generation, offline)?.into();
    let generation: Option<Arc<dyn GenerationProvider>> =
        if config.embedding.provider == "openai" && std::env::var("OPENAI_API_KEY").is_ok() {
            Some(Arc::new(OpenAiProvider::new(
                &config.embedding,
                &config.generation,
                offline,
            )?))
        } else {
            None
        };

    let state = AppState {
        config: Arc::new(config.clone()),
        session: Arc::new(RwLock::new(config.session.clone())),
        embeddings,
        generation,
        vocabulary: Arc::new(Vocabulary::symposium()),
        rules: Arc::new(RankingRules::symposium()),
        journal: Arc::new(DialogJournal::new(&config.data.journal_dir)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/chat", post(handle_chat))
        .route("/settings", get(handle_get_settings).post(handle_update_settings))
        .route("/admin/reindex", post(handle_reindex))
        .route("/progress", get(handle_progress))
        .route("/metrics", get(handle_metrics))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("Server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn offline_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "offline".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    reply: String,
    citations: Vec<Citation>,
}

/// Handler for `POST /chat`.
///
/// Refusals (empty index, boundary, low confidence) are normal replies
/// with an empty citation list, not HTTP errors.
async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let session = state.session.read().await.clone();
    let ctx = AnswerContext {
        config: &state.config,
        session: &session,
        embeddings: state.embeddings.as_ref(),
        generation: state.generation.as_deref(),
        vocabulary: &state.vocabulary,
        rules: &state.rules,
        journal: Some(&state.journal),
    };
    let outcome = answer(&ctx, &req.message, None).await;
    Ok(Json(ChatResponse {
        reply: outcome.reply,
        citations: outcome.citations,
    }))
}

// ============ GET/POST /settings ============

async fn handle_get_settings(State(state): State<AppState>) -> Json<SessionSettings> {
    Json(state.session.read().await.clone())
}

async fn handle_update_settings(
    State(state): State<AppState>,
    Json(new): Json<SessionSettings>,
) -> Json<SessionSettings> {
    let mut session = state.session.write().await;
    *session = new;
    Json(session.clone())
}

// ============ POST /admin/reindex ============

#[derive(Serialize)]
struct ReindexResponse {
    status: String,
    items: usize,
}

/// Handler for `POST /admin/reindex`. Refused in offline mode.
async fn handle_reindex(State(state): State<AppState>) -> Result<Json<ReindexResponse>, AppError> {
    if state.session.read().await.offline {
        return Err(offline_error("Оффлайн-режим: переиндексация недоступна"));
    }
    let store = rebuild_index(&state.config, state.embeddings.as_ref())
        .await
        .map_err(|e| internal(format!("{:#}", e)))?;
    Ok(Json(ReindexResponse {
        status: "ok".to_string(),
        items: store.all().len(),
    }))
}

// ============ GET /progress ============

/// One section's sequence span, as shown in the boundary picker.
#[derive(Debug, PartialEq, Serialize)]
pub struct SectionProgress {
    pub title: String,
    pub min_seq: u64,
    pub max_seq: u64,
    pub count: usize,
}

#[derive(Serialize)]
struct ProgressResponse {
    status: String,
    sections: Vec<SectionProgress>,
    current_seq: Option<u64>,
}

/// Group passages by section title, ordered by first appearance. Lets
/// the reader pick a boundary without raw numbers.
pub fn section_spans(items: &[IndexedPassage]) -> Vec<SectionProgress> {
    let mut buckets: BTreeMap<String, SectionProgress> = BTreeMap::new();
    for it in items {
        let title = it.section_title.trim();
        if title.is_empty() {
            continue;
        }
        let bucket = buckets.entry(title.to_string()).or_insert(SectionProgress {
            title: title.to_string(),
            min_seq: it.sequence,
            max_seq: it.sequence,
            count: 0,
        });
        bucket.min_seq = bucket.min_seq.min(it.sequence);
        bucket.max_seq = bucket.max_seq.max(it.sequence);
        bucket.count += 1;
    }
    let mut sections: Vec<SectionProgress> = buckets.into_values().collect();
    sections.sort_by_key(|s| s.min_seq);
    sections
}

async fn handle_progress(State(state): State<AppState>) -> Result<Json<ProgressResponse>, AppError> {
    let store = load_index(&state.config).map_err(|e| internal(e.to_string()))?;
    let current_seq = state.session.read().await.read_boundary_seq;
    Ok(Json(ProgressResponse {
        status: "ok".to_string(),
        sections: section_spans(store.all()),
        current_seq,
    }))
}

// ============ GET /metrics ============

#[derive(Deserialize)]
struct MetricsQuery {
    start: Option<String>,
    end: Option<String>,
}

async fn handle_metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<MetricsReport>, AppError> {
    let report = citation_metrics(
        &state.config.data.journal_dir,
        query.start.as_deref(),
        query.end.as_deref(),
    )
    .map_err(|e| internal(format!("{:#}", e)))?;
    Ok(Json(report))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(title: &str, seq: u64) -> IndexedPassage {
        IndexedPassage {
            source_file: "book.md".to_string(),
            section_title: title.to_string(),
            anchor: format!("{:010}", seq),
            sequence: seq,
            embedding: vec![0.0; 4],
            quote: "цитата".to_string(),
        }
    }

    #[test]
    fn test_section_spans_and_order() {
        let items = vec![
            passage("речь павсания", 5),
            passage("речь федра", 0),
            passage("речь федра", 4),
            passage("речь павсания", 9),
            passage("", 10),
        ];
        let sections = section_spans(&items);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title, "речь федра");
        assert_eq!(sections[0].min_seq, 0);
        assert_eq!(sections[0].max_seq, 4);
        assert_eq!(sections[0].count, 2);
        assert_eq!(sections[1].title, "речь павсания");
        assert_eq!(sections[1].max_seq, 9);
    }

    #[test]
    fn test_section_spans_empty_index() {
        assert!(section_spans(&[]).is_empty());
    }
}
