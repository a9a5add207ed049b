use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let index = &state.index_metadata;
    Json(json!({
        "initialized": true,
        "chatModel": state.settings.llm.chat_model,
        "language": state.settings.generation.language,
        "topK": state.assistant.retriever().top_k(),
        "index": {
            "embeddingModel": index.embedding_model,
            "dimension": index.dimension,
            "chunkCount": index.chunk_count,
            "chunkSize": index.chunk_size,
            "chunkOverlap": index.chunk_overlap,
            "builtAt": index.built_at.to_rfc3339(),
        },
        "sessions": state.sessions.len().await,
        "startedAt": state.started_at.to_rfc3339(),
    }))
}
