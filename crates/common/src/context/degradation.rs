//! Recorded (never raised) component failures

use serde::{Deserialize, Serialize};
use std::fmt;

/// A failure the pipeline absorbed while still producing a prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// No intent rule fired; the query fell back to `general`
    AnalysisDegraded,

    SourceTimeout { source_id: String, latency_ms: u64 },

    SourceUnavailable { source_id: String, message: String },

    /// Every planned source failed (or none was planned); the prompt is
    /// built from conversation memory alone
    AllSourcesFailed,

    /// Session state violated its invariants and was reset
    MemoryCorrupted { reason: String },
}

impl Degradation {
    /// Source id for per-source degradations
    pub fn source_id(&self) -> Option<&str> {
        match self {
            Degradation::SourceTimeout { source_id, .. }
            | Degradation::SourceUnavailable { source_id, .. } => Some(source_id),
            _ => None,
        }
    }
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::AnalysisDegraded => f.write_str("no intent matched, using general"),
            Degradation::SourceTimeout { source_id, latency_ms } => {
                write!(f, "source {} timed out after {}ms", source_id, latency_ms)
            }
            Degradation::SourceUnavailable { source_id, message } => {
                write!(f, "source {} unavailable: {}", source_id, message)
            }
            Degradation::AllSourcesFailed => f.write_str("no retrieved context available"),
            Degradation::MemoryCorrupted { reason } => {
                write!(f, "conversation memory reset: {}", reason)
            }
        }
    }
}
