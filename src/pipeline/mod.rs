//! Per-question control flow: classify, optionally retrieve, generate.

mod assistant;
mod turn;

pub use assistant::{clean_question, Answer, Assistant, CompletedAnswer};
pub use turn::{run_turn, TurnEvent};
