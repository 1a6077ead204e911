//! Visual-novel story engine driven by a generative language model.
//!
//! [`session::GameSession`] is the entry point: it asks the
//! [`engine::Engine`] for scenes, keeps the conversation history, and stops
//! accepting choices once an ending is reached. Model access goes through
//! the [`llm::ModelClient`] trait.

pub mod config;
pub mod engine;
pub mod error;
pub mod images;
pub mod llm;
pub mod prompts;
pub mod sanitize;
pub mod scene;
pub mod session;
