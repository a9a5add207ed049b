use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::protocol::{history_json, session_changed_json, turn_event_json, WsIncomingMessage};
use crate::core::errors::ApiError;
use crate::generator::Language;
use crate::pipeline::{clean_question, run_turn, TurnEvent};
use crate::server::handlers::sessions::resolve_language;
use crate::session::SharedSession;
use crate::state::AppState;

type WsSender = SplitSink<WebSocket, Message>;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let origin_ok = validate_origin(&headers, &state);
    ws.on_upgrade(move |socket| handle_socket(socket, state, origin_ok))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, origin_ok: bool) {
    let (mut sender, mut receiver) = socket.split();

    if !origin_ok {
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: 4003,
                reason: "Forbidden: Invalid Origin".into(),
            })))
            .await;
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<WsIncomingMessage>();
    tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<WsIncomingMessage>(&text) {
                    Ok(incoming) => {
                        if tx.send(incoming).is_err() {
                            break;
                        }
                    }
                    Err(err) => tracing::debug!("Ignoring malformed WebSocket message: {}", err),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let mut current = state.sessions.create().await;
    let own_session_id = current.lock().await.id().to_string();

    if announce_session(&mut sender, &current).await.is_ok() {
        while let Some(incoming) = rx.recv().await {
            if let Err(err) = handle_message(&mut sender, &state, &mut current, incoming).await {
                if send_json(&mut sender, json!({"type": "error", "message": err.to_string()}))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }

    if state.sessions.remove_if_untouched(&own_session_id).await {
        tracing::debug!("Dropped unused session {} on disconnect", own_session_id);
    }
}

async fn handle_message(
    sender: &mut WsSender,
    state: &Arc<AppState>,
    current: &mut SharedSession,
    data: WsIncomingMessage,
) -> Result<(), ApiError> {
    match data.msg_type.as_deref().unwrap_or("message") {
        "set_session" => {
            let Some(session_id) = data.session_id else {
                return Err(ApiError::BadRequest("sessionId is required".to_string()));
            };
            let session = state
                .sessions
                .get(&session_id)
                .await
                .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;
            *current = session;
            announce_session(sender, current).await
        }
        "clear" => {
            let mut session = current.lock().await;
            session.clear();
            send_json(sender, history_json(&session)).await
        }
        "message" => {
            if let Some(session_id) = data.session_id.as_deref() {
                let requested = state.sessions.get_or_create(Some(session_id)).await;
                if !Arc::ptr_eq(&requested, current) {
                    *current = requested;
                    announce_session(sender, current).await?;
                }
            }
            let question = data.message.unwrap_or_default();
            let language = resolve_language(state, data.language.as_deref())?;
            clean_question(&question)?;

            stream_turn(sender, state, current, &question, language).await
        }
        other => Err(ApiError::BadRequest(format!(
            "unknown message type '{}'",
            other
        ))),
    }
}

/// Runs the turn while forwarding its events to the socket. If the socket
/// stops accepting writes, the event channel is dropped, which ends
/// generation.
async fn stream_turn(
    sender: &mut WsSender,
    state: &Arc<AppState>,
    session: &SharedSession,
    question: &str,
    language: Language,
) -> Result<(), ApiError> {
    let mut session = session.lock().await;
    let (tx, mut rx) = mpsc::channel::<TurnEvent>(64);

    let turn = async {
        let tx = tx;
        run_turn(&state.assistant, &mut session, question, language, &tx).await
    };
    let forward = async {
        while let Some(event) = rx.recv().await {
            if send_json(sender, turn_event_json(&event)).await.is_err() {
                tracing::debug!("WebSocket closed mid-turn");
                break;
            }
        }
        drop(rx);
    };
    tokio::join!(turn, forward);
    Ok(())
}

async fn announce_session(sender: &mut WsSender, session: &SharedSession) -> Result<(), ApiError> {
    let session = session.lock().await;
    send_json(sender, session_changed_json(session.id())).await?;
    send_json(sender, history_json(&session)).await
}

pub async fn send_json(sender: &mut WsSender, payload: Value) -> Result<(), ApiError> {
    let text = serde_json::to_string(&payload).map_err(ApiError::internal)?;
    sender
        .send(Message::Text(text))
        .await
        .map_err(ApiError::internal)?;
    Ok(())
}

fn validate_origin(headers: &HeaderMap, state: &AppState) -> bool {
    let Some(origin) = headers.get("origin").and_then(|v| v.to_str().ok()) else {
        // Non-browser clients send no Origin header.
        let env = std::env::var("POKEGPT_ENV").unwrap_or_default();
        return env != "production";
    };

    state
        .settings
        .allowed_origins()
        .iter()
        .any(|allowed| allowed.trim() == origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::StreamScript;
    use crate::state::tests::{pikachu_docs, test_app, TestApp};
    use axum::http::HeaderValue;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::Message as ClientMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn connect(app: &TestApp) -> Client {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = crate::server::router::router(app.state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        let (client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        client
    }

    async fn next_event(client: &mut Client) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for a WebSocket event")
                .unwrap()
                .unwrap();
            if msg.is_text() {
                return serde_json::from_str(msg.to_text().unwrap()).unwrap();
            }
        }
    }

    async fn send(client: &mut Client, payload: Value) {
        client
            .send(ClientMessage::text(payload.to_string()))
            .await
            .unwrap();
    }

    /// Reads the `session_changed` + `history` greeting pair and returns the id.
    async fn opening_session(client: &mut Client) -> String {
        let changed = next_event(client).await;
        assert_eq!(changed["type"], "session_changed");
        let history = next_event(client).await;
        assert_eq!(history["type"], "history");
        assert_eq!(history["messages"].as_array().unwrap().len(), 1);
        changed["sessionId"].as_str().unwrap().to_string()
    }

    async fn events_until_done(client: &mut Client) -> Vec<Value> {
        let mut events = Vec::new();
        loop {
            let event = next_event(client).await;
            let finished = event["type"] == "done" || event["type"] == "error";
            events.push(event);
            if finished {
                return events;
            }
        }
    }

    #[tokio::test]
    async fn message_streams_classified_chunks_sources_done() {
        let app = test_app(pikachu_docs()).await;
        app.provider
            .push_chat(Ok("pokemon".into()))
            .push_stream(StreamScript::text(&["Pikachu is ", "Electric-type."]));
        let mut client = connect(&app).await;
        let session_id = opening_session(&mut client).await;

        send(
            &mut client,
            json!({ "type": "message", "message": "What type is Pikachu?", "language": "English" }),
        )
        .await;
        let events = events_until_done(&mut client).await;

        let kinds: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["classified", "chunk", "chunk", "sources", "done"]);
        assert_eq!(events[0]["label"], "domain");
        assert_eq!(events[1]["message"], "Pikachu is ");
        assert_eq!(events[2]["message"], "Electric-type.");
        assert_eq!(events[3]["sources"][0]["sourceId"], "Pikachu.txt");

        let session = app.state.sessions.get(&session_id).await.unwrap();
        let session = session.lock().await;
        assert_eq!(session.history().len(), 3);
        assert_eq!(session.history()[2].content, "Pikachu is Electric-type.");
    }

    #[tokio::test]
    async fn clear_returns_single_greeting_history() {
        let app = test_app(pikachu_docs()).await;
        app.provider
            .push_chat(Ok("general".into()))
            .push_stream(StreamScript::text(&["It is 2026."]));
        let mut client = connect(&app).await;
        opening_session(&mut client).await;

        send(&mut client, json!({ "type": "message", "message": "What year is it?" })).await;
        events_until_done(&mut client).await;

        send(&mut client, json!({ "type": "clear" })).await;
        let history = next_event(&mut client).await;

        assert_eq!(history["type"], "history");
        let messages = history["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "assistant");
    }

    #[tokio::test]
    async fn set_session_with_unknown_id_is_an_error() {
        let app = test_app(pikachu_docs()).await;
        let mut client = connect(&app).await;
        opening_session(&mut client).await;

        send(&mut client, json!({ "type": "set_session", "sessionId": "no-such-session" })).await;
        let event = next_event(&mut client).await;

        assert_eq!(event["type"], "error");
        assert!(event["message"].as_str().unwrap().contains("Session not found"));
    }

    #[tokio::test]
    async fn unknown_language_is_an_error_and_leaves_history_alone() {
        let app = test_app(pikachu_docs()).await;
        let mut client = connect(&app).await;
        let session_id = opening_session(&mut client).await;

        send(
            &mut client,
            json!({ "type": "message", "message": "What type is Pikachu?", "language": "Klingon" }),
        )
        .await;
        let event = next_event(&mut client).await;

        assert_eq!(event["type"], "error");
        let session = app.state.sessions.get(&session_id).await.unwrap();
        assert_eq!(session.lock().await.history().len(), 1);
        assert_eq!(app.provider.chat_calls(), 0);
    }

    async fn wait_for_removal(app: &TestApp, session_id: &str) -> bool {
        for _ in 0..100 {
            if app.state.sessions.get(session_id).await.is_none() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn unused_connection_session_is_dropped_on_disconnect() {
        let app = test_app(pikachu_docs()).await;
        let mut client = connect(&app).await;
        let session_id = opening_session(&mut client).await;
        assert_eq!(app.state.sessions.len().await, 1);

        client.close(None).await.unwrap();

        assert!(wait_for_removal(&app, &session_id).await);
        assert!(app.state.sessions.is_empty().await);
    }

    #[tokio::test]
    async fn session_with_turns_outlives_the_connection() {
        let app = test_app(pikachu_docs()).await;
        app.provider
            .push_chat(Ok("general".into()))
            .push_stream(StreamScript::text(&["It is 2026."]));
        let mut client = connect(&app).await;
        let session_id = opening_session(&mut client).await;
        send(&mut client, json!({ "type": "message", "message": "What year is it?" })).await;
        events_until_done(&mut client).await;

        client.close(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let session = app.state.sessions.get(&session_id).await.unwrap();
        assert_eq!(session.lock().await.history().len(), 3);
    }

    #[tokio::test]
    async fn origin_must_be_in_the_allow_list() {
        let app = test_app(pikachu_docs()).await;

        let mut headers = HeaderMap::new();
        headers.insert("origin", HeaderValue::from_static("http://localhost:5173"));
        assert!(validate_origin(&headers, &app.state));

        headers.insert("origin", HeaderValue::from_static("https://evil.example"));
        assert!(!validate_origin(&headers, &app.state));
    }
}
