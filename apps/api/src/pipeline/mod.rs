pub mod extract;
pub mod handlers;
pub mod orchestrator;
pub mod parse;
pub mod progress;
pub mod prompts;
pub mod score;
