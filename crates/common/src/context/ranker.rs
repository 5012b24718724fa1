//! Context Ranker - Fuses heterogeneous hits onto one relevance scale
//!
//! Provides:
//! - Per-source min-max normalization
//! - Source weighting
//! - Content-fingerprint deduplication
//! - Stable ordering and budget truncation
//!
//! Raw scores from different source kinds (cosine similarity vs exact row
//! matches) are never compared directly; only weighted normalized scores
//! are.

use crate::context::router::SourceKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};

/// One retrieved candidate passage or row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    /// Passage text or rendered row
    pub content: String,

    /// Collection or table the item came from
    pub source_id: String,

    pub source_kind: SourceKind,

    /// Score as returned by the source; only comparable within a source
    pub raw_score: f32,

    /// Weighted normalized score in [0, 1], written by the ranker
    pub normalized_score: f32,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ContextItem {
    pub fn new(
        content: impl Into<String>,
        source_id: impl Into<String>,
        source_kind: SourceKind,
        raw_score: f32,
    ) -> Self {
        Self {
            content: content.into(),
            source_id: source_id.into(),
            source_kind,
            raw_score,
            normalized_score: 0.0,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// SHA-256 of the alphanumeric, lower-cased, whitespace-collapsed content
    pub fn fingerprint(&self) -> String {
        let canonical = self
            .content
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        let canonical = canonical.split_whitespace().collect::<Vec<_>>().join(" ");
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }
}

/// Stateless ranker
#[derive(Debug, Clone, Default)]
pub struct ContextRanker;

impl ContextRanker {
    pub fn new() -> Self {
        Self
    }

    /// Rank items for the prompt: normalize, weight, sort, dedupe, truncate
    pub fn rank(
        &self,
        mut items: Vec<ContextItem>,
        weights_by_source: &HashMap<String, f32>,
        top_k: usize,
    ) -> Vec<ContextItem> {
        let retrieved = items.len();
        self.normalize(&mut items, weights_by_source);

        // sort_by is stable, so remaining ties keep retrieval order
        items.sort_by(|a, b| {
            b.normalized_score
                .total_cmp(&a.normalized_score)
                .then_with(|| a.source_kind.tie_rank().cmp(&b.source_kind.tie_rank()))
        });

        let mut seen = HashSet::new();
        items.retain(|item| seen.insert((item.source_id.clone(), item.fingerprint())));
        let unique = items.len();
        items.truncate(top_k);

        tracing::debug!(
            retrieved = retrieved,
            unique = unique,
            kept = items.len(),
            top_k = top_k,
            "Ranked context"
        );

        items
    }

    /// Write `normalized_score` from `raw_score` alone.
    ///
    /// Scores are min-max scaled within each source; a source whose scores
    /// are all equal maps to 1.0. The result is multiplied by the source
    /// weight (1.0 for sources without one).
    pub fn normalize(&self, items: &mut [ContextItem], weights_by_source: &HashMap<String, f32>) {
        let mut bounds: HashMap<&str, (f32, f32)> = HashMap::new();
        for item in items.iter() {
            let raw = sanitize(item.raw_score);
            bounds
                .entry(item.source_id.as_str())
                .and_modify(|(min, max)| {
                    *min = min.min(raw);
                    *max = max.max(raw);
                })
                .or_insert((raw, raw));
        }
        let bounds: HashMap<String, (f32, f32)> = bounds
            .into_iter()
            .map(|(id, b)| (id.to_string(), b))
            .collect();

        for item in items.iter_mut() {
            let (min, max) = bounds.get(&item.source_id).copied().unwrap_or((0.0, 0.0));
            let span = max - min;
            let scaled = if span <= f32::EPSILON {
                1.0
            } else {
                (sanitize(item.raw_score) - min) / span
            };
            let weight = weights_by_source
                .get(&item.source_id)
                .copied()
                .unwrap_or(1.0)
                .clamp(0.0, 1.0);
            item.normalized_score = (scaled * weight).clamp(0.0, 1.0);
        }
    }
}

fn sanitize(score: f32) -> f32 {
    if score.is_finite() {
        score
    } else {
        0.0
    }
}
