use serde::Deserialize;
use serde_json::{json, Value};

use crate::pipeline::TurnEvent;
use crate::session::ConversationSession;

#[derive(Debug, Deserialize, Default)]
pub struct WsIncomingMessage {
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    pub message: Option<String>,
    pub language: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

pub fn turn_event_json(event: &TurnEvent) -> Value {
    match event {
        TurnEvent::Classified(label) => json!({ "type": "classified", "label": label }),
        TurnEvent::Fragment(text) => json!({ "type": "chunk", "message": text }),
        TurnEvent::Sources(citations) => json!({ "type": "sources", "sources": citations }),
        TurnEvent::Done => json!({ "type": "done" }),
        TurnEvent::Failed(message) => json!({ "type": "error", "message": message }),
    }
}

pub fn session_changed_json(session_id: &str) -> Value {
    json!({ "type": "session_changed", "sessionId": session_id })
}

pub fn history_json(session: &ConversationSession) -> Value {
    json!({
        "type": "history",
        "sessionId": session.id(),
        "messages": session.history(),
    })
}
