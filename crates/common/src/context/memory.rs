//! Conversation Memory - Per-session rolling window with decay
//!
//! Provides:
//! - Bounded FIFO turn window per session
//! - Preference extraction (last write wins per entity kind)
//! - Decay-weighted window retrieval
//! - Idle eviction and explicit close
//!
//! Sessions live in a [`SessionStore`] injected into the engine. Each
//! session has its own async mutex, so turns of one session are applied in
//! order while different sessions never contend on a shared lock.

use crate::context::intent::{Entities, Intent};
use crate::context::patterns::{AnalyzedText, PatternLibrary};
use crate::errors::{AppError, Result};
use crate::metrics;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One message in a session. Never modified once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<Entities>,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(TurnRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, text)
    }

    fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            intent: None,
            entities: None,
            created_at: Utc::now(),
        }
    }

    /// Attach the analysis of this turn
    pub fn with_analysis(mut self, intent: Intent, entities: Entities) -> Self {
        self.intent = Some(intent);
        self.entities = Some(entities);
        self
    }
}

/// A turn with its recency weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedTurn {
    #[serde(flatten)]
    pub turn: ConversationTurn,
    /// 1.0 for the newest turn, decaying into the past
    pub weight: f32,
}

/// Conversation memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum turns kept per session
    pub window_size: usize,

    /// Per-step decay for older turns, in (0, 1)
    pub decay_factor: f32,

    /// Turns handed to the prompt
    pub prompt_turns: usize,

    /// Idle time after which a session is evicted
    pub idle_ttl_secs: u64,

    /// How often the sweeper looks for idle sessions
    pub sweep_interval_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            decay_factor: 0.85,
            prompt_turns: 6,
            idle_ttl_secs: 1800,
            sweep_interval_secs: 60,
        }
    }
}

impl MemoryConfig {
    pub fn validate(&self) -> Result<()> {
        let error = |message: &str| -> Result<()> {
            Err(AppError::Configuration { message: format!("memory.{}", message) })
        };
        if self.window_size == 0 {
            return error("window_size must be positive");
        }
        if !(self.decay_factor > 0.0 && self.decay_factor < 1.0) {
            return error("decay_factor must be within (0, 1)");
        }
        if self.prompt_turns == 0 {
            return error("prompt_turns must be positive");
        }
        if self.idle_ttl_secs == 0 || self.sweep_interval_secs == 0 {
            return error("idle_ttl_secs and sweep_interval_secs must be positive");
        }
        Ok(())
    }
}

/// State of one session
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    pub session_id: String,
    turns: VecDeque<ConversationTurn>,
    preferences: Entities,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Set when the store dropped this session; holders must re-resolve
    evicted: bool,
}

impl ConversationMemory {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            turns: VecDeque::new(),
            preferences: Entities::new(),
            created_at: now,
            last_accessed_at: now,
            evicted: false,
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn preferences(&self) -> &Entities {
        &self.preferences
    }

    fn push(&mut self, mut turn: ConversationTurn, window_size: usize) {
        if let Some(last) = self.turns.back() {
            turn.created_at = turn.created_at.max(last.created_at);
        }
        if turn.role == TurnRole::User {
            if let Some(entities) = &turn.entities {
                for (kind, value) in entities {
                    self.preferences.insert(*kind, value.clone());
                }
            }
        }
        self.turns.push_back(turn);
        while self.turns.len() > window_size {
            self.turns.pop_front();
        }
    }

    /// Last `n` turns, oldest first, weighted `decay ^ (len - i)`
    fn window(&self, n: usize, decay_factor: f32) -> Vec<WeightedTurn> {
        let len = n.min(self.turns.len());
        self.turns
            .iter()
            .skip(self.turns.len() - len)
            .enumerate()
            .map(|(index, turn)| WeightedTurn {
                turn: turn.clone(),
                weight: decay_factor.powi((len - (index + 1)) as i32),
            })
            .collect()
    }

    fn integrity_violation(&self, expected_id: &str, window_size: usize) -> Option<String> {
        if self.session_id != expected_id {
            return Some(format!(
                "memory belongs to session {} but is stored under {}",
                self.session_id, expected_id
            ));
        }
        if self.turns.len() > window_size {
            return Some(format!(
                "window holds {} turns, limit is {}",
                self.turns.len(),
                window_size
            ));
        }
        let out_of_order = self
            .turns
            .iter()
            .zip(self.turns.iter().skip(1))
            .any(|(earlier, later)| later.created_at < earlier.created_at);
        if out_of_order {
            return Some("turns out of time order".to_string());
        }
        None
    }

    fn reset(&mut self, session_id: &str) {
        self.session_id = session_id.to_string();
        self.turns.clear();
        self.preferences.clear();
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct MemorySnapshot {
    pub session_id: String,
    pub window: Vec<WeightedTurn>,
    pub preferences: Entities,
    pub turn_count: usize,
    pub last_accessed_at: DateTime<Utc>,
    /// Why the session was reset while taking this snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_reason: Option<String>,
}

impl MemorySnapshot {
    pub fn empty(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            window: Vec::new(),
            preferences: Entities::new(),
            turn_count: 0,
            last_accessed_at: Utc::now(),
            reset_reason: None,
        }
    }

    /// Window turns without weights, oldest first
    pub fn recent_turns(&self) -> Vec<ConversationTurn> {
        self.window.iter().map(|w| w.turn.clone()).collect()
    }
}

type SessionHandle = Arc<Mutex<ConversationMemory>>;

/// Session-keyed conversation memory
pub struct SessionStore {
    sessions: DashMap<String, SessionHandle>,
    config: MemoryConfig,
    library: Arc<PatternLibrary>,
}

impl SessionStore {
    pub fn new(config: MemoryConfig, library: Arc<PatternLibrary>) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
            library,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Resolve or create the session handle. The map guard is released
    /// before returning so callers can await the session lock.
    fn handle(&self, session_id: &str) -> SessionHandle {
        if let Some(handle) = self.sessions.get(session_id) {
            return handle.value().clone();
        }
        let handle = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id = %session_id, "Creating session");
                Arc::new(Mutex::new(ConversationMemory::new(session_id)))
            })
            .value()
            .clone();
        metrics::set_active_sessions(self.sessions.len());
        handle
    }

    fn existing(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.get(session_id).map(|h| h.value().clone())
    }

    fn repair(&self, memory: &mut ConversationMemory, session_id: &str) -> Option<String> {
        let reason = memory.integrity_violation(session_id, self.config.window_size)?;
        tracing::warn!(session_id = %session_id, reason = %reason, "Conversation memory corrupted, resetting");
        metrics::record_memory_reset();
        memory.reset(session_id);
        Some(reason)
    }

    /// Append a turn, creating the session on first use.
    ///
    /// User turns without entities get them extracted; their entities are
    /// merged into the preferences. Returns the updated preferences.
    pub async fn append(&self, session_id: &str, mut turn: ConversationTurn) -> Entities {
        if turn.role == TurnRole::User && turn.entities.is_none() {
            turn.entities = Some(self.library.extract_entities(&AnalyzedText::new(&turn.text)));
        }

        loop {
            let handle = self.handle(session_id);
            let mut memory = handle.lock().await;
            if memory.evicted {
                // swept between lookup and lock; resolve again
                continue;
            }
            self.repair(&mut memory, session_id);
            memory.push(turn, self.config.window_size);
            memory.last_accessed_at = Utc::now();

            tracing::debug!(
                session_id = %session_id,
                turns = memory.len(),
                preferences = memory.preferences.len(),
                "Turn appended"
            );
            return memory.preferences.clone();
        }
    }

    /// Last `n` turns with decay weights; empty for unknown sessions
    pub async fn get_window(&self, session_id: &str, n: usize) -> Vec<WeightedTurn> {
        match self.snapshot(session_id, n).await {
            Some(snapshot) => snapshot.window,
            None => Vec::new(),
        }
    }

    /// Preferences of a session; empty for unknown sessions
    pub async fn get_preferences(&self, session_id: &str) -> Entities {
        let Some(handle) = self.existing(session_id) else {
            return Entities::new();
        };
        let memory = handle.lock().await;
        memory.preferences.clone()
    }

    /// Window, preferences and integrity status in one lock acquisition
    pub async fn snapshot(&self, session_id: &str, n: usize) -> Option<MemorySnapshot> {
        let handle = self.existing(session_id)?;
        let mut memory = handle.lock().await;
        if memory.evicted {
            return None;
        }
        let reset_reason = self.repair(&mut memory, session_id);
        memory.last_accessed_at = Utc::now();

        Some(MemorySnapshot {
            session_id: session_id.to_string(),
            window: memory.window(n, self.config.decay_factor),
            preferences: memory.preferences.clone(),
            turn_count: memory.len(),
            last_accessed_at: memory.last_accessed_at,
            reset_reason,
        })
    }

    /// Drop a session. Returns whether it existed.
    pub async fn close(&self, session_id: &str) -> bool {
        let Some((_, handle)) = self.sessions.remove(session_id) else {
            return false;
        };
        handle.lock().await.evicted = true;
        metrics::set_active_sessions(self.sessions.len());
        tracing::info!(session_id = %session_id, "Session closed");
        true
    }

    /// Evict sessions idle for longer than the TTL. Sessions whose lock is
    /// held are in use and kept.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let ttl = Duration::seconds(self.config.idle_ttl_secs.min(u32::MAX as u64) as i64);
        let mut evicted = 0;

        self.sessions.retain(|session_id, handle| match handle.try_lock() {
            Ok(mut memory) if now - memory.last_accessed_at > ttl => {
                memory.evicted = true;
                evicted += 1;
                tracing::debug!(session_id = %session_id, "Evicting idle session");
                false
            }
            _ => true,
        });

        if evicted > 0 {
            tracing::info!(evicted = evicted, remaining = self.sessions.len(), "Evicted idle sessions");
            metrics::record_sessions_evicted(evicted as u64);
        }
        metrics::set_active_sessions(self.sessions.len());
        evicted
    }

    #[cfg(test)]
    fn insert_raw(&self, key: &str, memory: ConversationMemory) {
        self.sessions.insert(key.to_string(), Arc::new(Mutex::new(memory)));
    }
}
