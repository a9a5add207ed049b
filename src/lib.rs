pub mod classifier;
pub mod core;
pub mod embedding;
pub mod generator;
pub mod llm;
pub mod pipeline;
pub mod rag;
pub mod server;
pub mod session;
pub mod state;
pub mod vector_math;
