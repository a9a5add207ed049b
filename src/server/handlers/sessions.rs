use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::classifier::QuestionLabel;
use crate::core::errors::ApiError;
use crate::generator::Language;
use crate::pipeline::{clean_question, run_turn, TurnEvent};
use crate::session::{ConversationSession, SharedSession};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub language: Option<String>,
}

fn session_json(session: &ConversationSession) -> Value {
    json!({
        "id": session.id(),
        "history": session.history(),
    })
}

async fn find_session(state: &AppState, session_id: &str) -> Result<SharedSession, ApiError> {
    state
        .sessions
        .get(session_id)
        .await
        .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))
}

/// Falls back to the configured language when the request names none.
pub(crate) fn resolve_language(state: &AppState, requested: Option<&str>) -> Result<Language, ApiError> {
    match requested.map(str::trim).filter(|l| !l.is_empty()) {
        Some(language) => language.parse(),
        None => Ok(state.settings.generation.language),
    }
}

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sessions = state.sessions.list().await;
    Json(json!({ "sessions": sessions }))
}

pub async fn create_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let session = state.sessions.create().await;
    let session = session.lock().await;
    Json(json!({ "session": session_json(&session) }))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = find_session(&state, &session_id).await?;
    let session = session.lock().await;
    Ok(Json(json!({ "session": session_json(&session) })))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.sessions.remove(&session_id).await {
        return Err(ApiError::NotFound("Session not found".to_string()));
    }
    Ok(Json(json!({ "status": "deleted" })))
}

pub async fn clear_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = find_session(&state, &session_id).await?;
    let mut session = session.lock().await;
    session.clear();
    Ok(Json(json!({ "session": session_json(&session) })))
}

/// Runs a whole turn and returns the finished answer.
pub async fn ask(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<AskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = find_session(&state, &session_id).await?;
    let language = resolve_language(&state, payload.language.as_deref())?;
    clean_question(&payload.question)?;

    let mut session = session.lock().await;
    let (tx, mut rx) = mpsc::channel(64);

    let turn = async {
        let tx = tx;
        run_turn(&state.assistant, &mut session, &payload.question, language, &tx).await
    };
    let outcome = async {
        let mut label: Option<QuestionLabel> = None;
        let mut error: Option<String> = None;
        while let Some(event) = rx.recv().await {
            match event {
                TurnEvent::Classified(l) => label = Some(l),
                TurnEvent::Failed(message) => error = Some(message),
                _ => {}
            }
        }
        (label, error)
    };
    let (turn, (label, error)) = tokio::join!(turn, outcome);

    Ok(Json(json!({
        "label": label,
        "answer": turn.content,
        "citations": turn.citations,
        "error": error,
    })))
}
