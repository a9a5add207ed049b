pub mod openai;
pub mod provider;
pub mod retry;
pub mod stream;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use openai::OpenAiCompatibleProvider;
pub use provider::LlmProvider;
pub use retry::with_transport_retry;
pub use stream::TextStream;
pub use types::{ChatMessage, ChatRequest};
