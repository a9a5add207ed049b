use tokio::sync::mpsc;

use super::assistant::Assistant;
use crate::classifier::QuestionLabel;
use crate::core::errors::ApiError;
use crate::generator::Language;
use crate::session::{Citation, ConversationSession, ConversationTurn};

/// Progress of one turn, in emission order: `Classified`, any number of
/// `Fragment`s, `Sources`, then `Done`. `Failed` replaces everything after
/// the point of failure.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    Classified(QuestionLabel),
    Fragment(String),
    Sources(Vec<Citation>),
    Done,
    Failed(String),
}

/// Runs one question against `session` and returns the assistant turn that
/// was appended.
///
/// Errors never escape: they become an apology turn, and the turns already in
/// the session are kept. When the event receiver goes away, generation stops
/// and the partial answer is recorded.
pub async fn run_turn(
    assistant: &Assistant,
    session: &mut ConversationSession,
    question: &str,
    language: Language,
    events: &mpsc::Sender<TurnEvent>,
) -> ConversationTurn {
    session.append(ConversationTurn::user(question));

    let turn = match answer(assistant, question, language, events).await {
        Ok((text, citations)) => {
            let _ = events.send(TurnEvent::Sources(citations.clone())).await;
            let _ = events.send(TurnEvent::Done).await;
            ConversationTurn::assistant(text, citations)
        }
        Err(err) => {
            tracing::error!("Turn failed in session {}: {}", session.id(), err);
            let message = format!("Sorry, an error occurred: {}", err);
            let _ = events.send(TurnEvent::Failed(message.clone())).await;
            ConversationTurn::assistant(message, Vec::new())
        }
    };

    session.append(turn.clone());
    turn
}

async fn answer(
    assistant: &Assistant,
    question: &str,
    language: Language,
    events: &mpsc::Sender<TurnEvent>,
) -> Result<(String, Vec<Citation>), ApiError> {
    let mut answer = assistant.classify_and_answer(question, language).await?;
    let _ = events.send(TurnEvent::Classified(answer.label)).await;

    let mut text = String::new();
    while let Some(fragment) = answer.stream.next_fragment().await {
        let fragment = fragment?;
        text.push_str(&fragment);
        if events.send(TurnEvent::Fragment(fragment)).await.is_err() {
            tracing::debug!("Turn consumer went away; stopping generation");
            break;
        }
    }

    let citations = answer.citations_for(&text);
    Ok((text, citations))
}
