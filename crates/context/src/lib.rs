//! PropForge Context Engine
//!
//! Turns a chat message into a grounded prompt:
//! - Query understanding (intents, entities, follow-ups)
//! - Intent-routed hybrid retrieval with per-source timeouts
//! - Cross-source ranking and conversation memory
//! - Structured prompt assembly with source attribution

mod engine;
mod sweeper;

pub use engine::ContextEngine;
pub use sweeper::spawn_session_sweeper;
