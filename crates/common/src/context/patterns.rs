//! Pattern Library - declarative intent and entity rules
//!
//! Rules are declared as a serde-friendly [`PatternLibrarySpec`] (built in,
//! or loaded from a file) and compiled once into an immutable
//! [`PatternLibrary`]. Compilation validates every rule so that a bad
//! pattern fails at startup instead of at query time.
//!
//! Provides:
//! - Text normalization shared by all matchers
//! - Weighted intent matchers (keyword, phrase, regex pattern)
//! - Entity extractors (budget ranges, counts, gazetteers)

use crate::context::intent::{BudgetRange, Entities, EntityKind, EntityValue, Intent};
use crate::errors::{AppError, Result};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ============================================================================
// Normalization
// ============================================================================

/// Lower-case, strip punctuation, collapse whitespace.
///
/// Decimal points between digits survive (`3.5m`) and thousands
/// separators between digits are dropped (`1,500,000` -> `1500000`).
pub fn normalize(text: &str) -> String {
    let chars: Vec<char> = text.to_lowercase().chars().collect();
    let mut out = String::with_capacity(chars.len());

    for (i, &c) in chars.iter().enumerate() {
        if c.is_alphanumeric() {
            out.push(c);
            continue;
        }
        let between_digits = i > 0
            && i + 1 < chars.len()
            && chars[i - 1].is_ascii_digit()
            && chars[i + 1].is_ascii_digit();
        match c {
            '.' if between_digits => out.push('.'),
            ',' if between_digits => {}
            _ => out.push(' '),
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lower-case and drop thousands separators, keeping punctuation that
/// carries meaning for amounts (`-`, `.`).
fn normalize_numeric(text: &str) -> String {
    let chars: Vec<char> = text.to_lowercase().chars().collect();
    let mut out = String::with_capacity(chars.len());

    for (i, &c) in chars.iter().enumerate() {
        let between_digits = i > 0
            && i + 1 < chars.len()
            && chars[i - 1].is_ascii_digit()
            && chars[i + 1].is_ascii_digit();
        if c == ',' && between_digits {
            continue;
        }
        out.push(c);
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A query prepared once for every matcher
#[derive(Debug, Clone)]
pub struct AnalyzedText {
    /// Fully normalized text, tokens separated by single spaces
    pub normalized: String,

    /// Lightly normalized text used by amount patterns
    pub numeric: String,

    /// Byte spans of tokens in `normalized`
    spans: Vec<(usize, usize)>,
}

impl AnalyzedText {
    pub fn new(raw: &str) -> Self {
        let normalized = normalize(raw);
        let numeric = normalize_numeric(raw);

        let mut spans = Vec::new();
        let mut start = 0;
        for token in normalized.split(' ') {
            if !token.is_empty() {
                spans.push((start, start + token.len()));
            }
            start += token.len() + 1;
        }

        Self { normalized, numeric, spans }
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    fn token(&self, index: usize) -> &str {
        let (start, end) = self.spans[index];
        &self.normalized[start..end]
    }

    fn contains_token(&self, token: &str) -> bool {
        (0..self.spans.len()).any(|i| self.token(i) == token)
    }

    /// Byte offset of the first occurrence of a contiguous token sequence
    fn find_sequence(&self, sequence: &[String]) -> Option<usize> {
        if sequence.is_empty() || sequence.len() > self.spans.len() {
            return None;
        }
        (0..=self.spans.len() - sequence.len())
            .find(|&i| {
                sequence
                    .iter()
                    .enumerate()
                    .all(|(offset, expected)| self.token(i + offset) == expected)
            })
            .map(|i| self.spans[i].0)
    }
}

fn tokenize(value: &str) -> Vec<String> {
    normalize(value).split_whitespace().map(str::to_string).collect()
}

// ============================================================================
// Declarative specification
// ============================================================================

/// Serializable rule table, compiled by [`PatternLibrary::compile`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternLibrarySpec {
    /// Intent rules in declaration order (the tie-break order)
    pub intents: Vec<IntentRuleSpec>,

    /// Entity extractors; several may target the same kind
    pub entities: Vec<EntityRuleSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRuleSpec {
    pub intent: Intent,
    pub matchers: Vec<MatcherSpec>,
}

/// One weighted matcher.
///
/// Keywords default to weight 1.0 and phrases to their token count, so a
/// multi-token phrase always outweighs a single keyword unless overridden.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatcherSpec {
    Keyword {
        value: String,
        #[serde(default)]
        weight: Option<f32>,
    },
    Phrase {
        value: String,
        #[serde(default)]
        weight: Option<f32>,
    },
    Pattern {
        value: String,
        weight: f32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "extractor", rename_all = "snake_case")]
pub enum EntityRuleSpec {
    /// Price bounds, always yields `EntityKind::BudgetRange`
    Budget {
        upper_markers: Vec<String>,
        lower_markers: Vec<String>,
        /// Markers that follow the amount, as in "3m budget"
        #[serde(default)]
        trailing_upper_markers: Vec<String>,
        /// Amounts below this (after units) are not prices
        min_amount: u64,
    },
    /// `<number> <unit>` counts such as "2 bedrooms"
    Count {
        kind: EntityKind,
        units: Vec<String>,
        /// Tokens meaning a count of zero ("studio")
        #[serde(default)]
        zero_words: Vec<String>,
    },
    /// Canonical value looked up through aliases
    Gazetteer {
        kind: EntityKind,
        entries: Vec<GazetteerEntry>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GazetteerEntry {
    pub canonical: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

// ============================================================================
// Compiled library
// ============================================================================

#[derive(Debug, Clone)]
enum Matcher {
    Keyword(String),
    Phrase(Vec<String>),
    Pattern(Regex),
}

#[derive(Debug, Clone)]
struct WeightedMatcher {
    matcher: Matcher,
    weight: f32,
}

impl WeightedMatcher {
    fn matches(&self, text: &AnalyzedText) -> bool {
        match &self.matcher {
            Matcher::Keyword(keyword) => text.contains_token(keyword),
            Matcher::Phrase(tokens) => text.find_sequence(tokens).is_some(),
            Matcher::Pattern(regex) => regex.is_match(&text.normalized),
        }
    }
}

#[derive(Debug, Clone)]
struct IntentRule {
    intent: Intent,
    matchers: Vec<WeightedMatcher>,
}

/// Accumulated weighted-match score of one intent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntentScore {
    pub intent: Intent,
    pub score: f32,
    pub matched: usize,
}

/// Candidate produced by an extractor; lowest position wins, then the
/// longest match.
#[derive(Debug, Clone)]
struct EntityMatch {
    position: usize,
    length: usize,
    value: EntityValue,
}

#[derive(Debug, Clone)]
struct BudgetExtractor {
    range: Regex,
    upper: Regex,
    trailing_upper: Option<Regex>,
    lower: Regex,
    min_amount: u64,
}

#[derive(Debug, Clone)]
struct CountExtractor {
    pattern: Regex,
    zero_words: Vec<String>,
}

#[derive(Debug, Clone)]
struct GazetteerExtractor {
    /// (alias tokens, canonical)
    aliases: Vec<(Vec<String>, String)>,
}

#[derive(Debug, Clone)]
enum EntityExtractor {
    Budget(BudgetExtractor),
    Count(CountExtractor),
    Gazetteer(GazetteerExtractor),
}

#[derive(Debug, Clone)]
struct EntityRule {
    kind: EntityKind,
    extractor: EntityExtractor,
}

/// Immutable, compiled rule table
#[derive(Debug, Clone)]
pub struct PatternLibrary {
    intent_rules: Vec<IntentRule>,
    entity_rules: Vec<EntityRule>,
}

const AMOUNT: &str = r"(\d+(?:\.\d+)?)\s*(k|thousand|m|mn|million|b|bn|billion)?\b";
const CURRENCY: &str = r"(?:(?:aed|dhs|dh)\s*)?";
const NUMBER_WORDS: [(&str, u32); 10] = [
    ("one", 1), ("two", 2), ("three", 3), ("four", 4), ("five", 5),
    ("six", 6), ("seven", 7), ("eight", 8), ("nine", 9), ("ten", 10),
];

impl PatternLibrary {
    /// Compile and validate a rule table
    pub fn compile(spec: &PatternLibrarySpec) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut intent_rules = Vec::with_capacity(spec.intents.len());

        for rule in &spec.intents {
            if rule.intent == Intent::General {
                return Err(config_error("the general intent is the fallback and cannot have rules"));
            }
            if !seen.insert(rule.intent) {
                return Err(config_error(format!("duplicate rule for intent {}", rule.intent)));
            }
            let matchers = rule
                .matchers
                .iter()
                .map(compile_matcher)
                .collect::<Result<Vec<_>>>()?;
            intent_rules.push(IntentRule { intent: rule.intent, matchers });
        }

        let entity_rules = spec
            .entities
            .iter()
            .map(compile_entity_rule)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { intent_rules, entity_rules })
    }

    /// Intents in declaration order
    pub fn intents(&self) -> impl ExactSizeIterator<Item = Intent> + '_ {
        self.intent_rules.iter().map(|r| r.intent)
    }

    /// Score every intent rule against the text, in declaration order
    pub fn score_intents(&self, text: &AnalyzedText) -> Vec<IntentScore> {
        self.intent_rules
            .iter()
            .map(|rule| {
                let (score, matched) = rule
                    .matchers
                    .iter()
                    .filter(|m| m.matches(text))
                    .fold((0.0_f32, 0_usize), |(score, n), m| (score + m.weight, n + 1));
                IntentScore { intent: rule.intent, score, matched }
            })
            .collect()
    }

    /// Run every entity extractor; first match in text order wins per kind
    pub fn extract_entities(&self, text: &AnalyzedText) -> Entities {
        let mut best: Vec<(EntityKind, EntityMatch)> = Vec::new();

        for rule in &self.entity_rules {
            let Some(candidate) = rule.extractor.extract(text) else {
                continue;
            };
            match best.iter_mut().find(|(kind, _)| *kind == rule.kind) {
                Some((_, current)) => {
                    let earlier = candidate.position < current.position
                        || (candidate.position == current.position
                            && candidate.length > current.length);
                    if earlier {
                        *current = candidate;
                    }
                }
                None => best.push((rule.kind, candidate)),
            }
        }

        best.into_iter().map(|(kind, m)| (kind, m.value)).collect()
    }
}

fn config_error(message: impl Into<String>) -> AppError {
    AppError::Configuration { message: format!("pattern library: {}", message.into()) }
}

fn check_weight(weight: f32, what: &str) -> Result<f32> {
    if weight.is_finite() && weight > 0.0 {
        Ok(weight)
    } else {
        Err(config_error(format!("weight for '{}' must be positive, got {}", what, weight)))
    }
}

fn compile_matcher(spec: &MatcherSpec) -> Result<WeightedMatcher> {
    match spec {
        MatcherSpec::Keyword { value, weight } => {
            let tokens = tokenize(value);
            if tokens.len() != 1 {
                return Err(config_error(format!("keyword '{}' must be a single token", value)));
            }
            Ok(WeightedMatcher {
                weight: check_weight(weight.unwrap_or(1.0), value)?,
                matcher: Matcher::Keyword(tokens[0].clone()),
            })
        }
        MatcherSpec::Phrase { value, weight } => {
            let tokens = tokenize(value);
            if tokens.is_empty() {
                return Err(config_error("empty phrase"));
            }
            Ok(WeightedMatcher {
                weight: check_weight(weight.unwrap_or(tokens.len() as f32), value)?,
                matcher: Matcher::Phrase(tokens),
            })
        }
        MatcherSpec::Pattern { value, weight } => {
            let regex = Regex::new(value)
                .map_err(|e| config_error(format!("invalid pattern '{}': {}", value, e)))?;
            Ok(WeightedMatcher {
                weight: check_weight(*weight, value)?,
                matcher: Matcher::Pattern(regex),
            })
        }
    }
}

/// Alternation of escaped markers, longest first
fn alternation(words: &[String]) -> String {
    let mut words: Vec<String> = words
        .iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();
    words.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    words
        .iter()
        .map(|w| regex_lite::escape(w).replace(' ', r"\s+"))
        .collect::<Vec<_>>()
        .join("|")
}

fn build_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| config_error(format!("invalid generated pattern: {}", e)))
}

fn compile_entity_rule(spec: &EntityRuleSpec) -> Result<EntityRule> {
    match spec {
        EntityRuleSpec::Budget { upper_markers, lower_markers, trailing_upper_markers, min_amount } => {
            if upper_markers.is_empty() || lower_markers.is_empty() {
                return Err(config_error("budget rule needs upper and lower markers"));
            }
            let range = build_regex(&format!(
                r"(?:(?:between|from)\s+)?{c}{a}\s*(?:-|to|and)\s*{c}{a}",
                c = CURRENCY,
                a = AMOUNT
            ))?;
            let upper = build_regex(&format!(
                r"\b(?:{})\s+{}{}",
                alternation(upper_markers),
                CURRENCY,
                AMOUNT
            ))?;
            let lower = build_regex(&format!(
                r"\b(?:{})\s+{}{}",
                alternation(lower_markers),
                CURRENCY,
                AMOUNT
            ))?;
            let trailing_upper = if trailing_upper_markers.is_empty() {
                None
            } else {
                Some(build_regex(&format!(
                    r"\b{}{}\s*(?:{})\b",
                    CURRENCY,
                    AMOUNT,
                    alternation(trailing_upper_markers)
                ))?)
            };
            Ok(EntityRule {
                kind: EntityKind::BudgetRange,
                extractor: EntityExtractor::Budget(BudgetExtractor {
                    range,
                    upper,
                    trailing_upper,
                    lower,
                    min_amount: *min_amount,
                }),
            })
        }
        EntityRuleSpec::Count { kind, units, zero_words } => {
            if units.is_empty() {
                return Err(config_error(format!("count rule for {} has no units", kind)));
            }
            let words = NUMBER_WORDS.iter().map(|(w, _)| *w).collect::<Vec<_>>().join("|");
            let pattern = build_regex(&format!(
                r"\b(\d{{1,2}}|{})\s*(?:{})\b",
                words,
                alternation(units)
            ))?;
            Ok(EntityRule {
                kind: *kind,
                extractor: EntityExtractor::Count(CountExtractor {
                    pattern,
                    zero_words: zero_words.iter().map(|w| normalize(w)).collect(),
                }),
            })
        }
        EntityRuleSpec::Gazetteer { kind, entries } => {
            let mut aliases = Vec::new();
            for entry in entries {
                if entry.canonical.trim().is_empty() {
                    return Err(config_error(format!("empty canonical value in {} gazetteer", kind)));
                }
                let mut names = vec![entry.canonical.clone()];
                names.extend(entry.aliases.iter().cloned());
                for name in names {
                    let tokens = tokenize(&name);
                    if !tokens.is_empty() {
                        aliases.push((tokens, entry.canonical.clone()));
                    }
                }
            }
            Ok(EntityRule {
                kind: *kind,
                extractor: EntityExtractor::Gazetteer(GazetteerExtractor { aliases }),
            })
        }
    }
}

impl EntityExtractor {
    fn extract(&self, text: &AnalyzedText) -> Option<EntityMatch> {
        match self {
            EntityExtractor::Budget(budget) => budget.extract(&text.numeric),
            EntityExtractor::Count(count) => count.extract(text),
            EntityExtractor::Gazetteer(gazetteer) => gazetteer.extract(text),
        }
    }
}

fn parse_amount(number: &str, unit: Option<&str>) -> Option<u64> {
    let value: f64 = number.parse().ok()?;
    let multiplier = match unit {
        Some("k") | Some("thousand") => 1e3,
        Some("m") | Some("mn") | Some("million") => 1e6,
        Some("b") | Some("bn") | Some("billion") => 1e9,
        _ => 1.0,
    };
    let amount = (value * multiplier).round();
    (amount.is_finite() && amount >= 0.0).then_some(amount as u64)
}

impl BudgetExtractor {
    fn extract(&self, text: &str) -> Option<EntityMatch> {
        let mut candidates = Vec::new();

        if let Some((pos, len, range)) = self.find_range(text) {
            candidates.push((pos, 0, len, range));
        }
        let trailing = self.trailing_upper.as_ref().and_then(|regex| self.find_bound(regex, text));
        for (pos, len, max) in self.find_bound(&self.upper, text).into_iter().chain(trailing) {
            candidates.push((pos, 1, len, BudgetRange { min: None, max: Some(max) }));
        }
        if let Some((pos, len, min)) = self.find_bound(&self.lower, text) {
            candidates.push((pos, 2, len, BudgetRange { min: Some(min), max: None }));
        }

        // Earliest wins; at equal position a range beats a single bound
        candidates.sort_by_key(|(pos, rank, _, _)| (*pos, *rank));
        candidates.into_iter().next().map(|(position, _, length, range)| EntityMatch {
            position,
            length,
            value: EntityValue::Budget(range),
        })
    }

    fn find_range(&self, text: &str) -> Option<(usize, usize, BudgetRange)> {
        self.range.captures_iter(text).find_map(|caps| {
            let whole = caps.get(0)?;
            let low_unit = caps.get(2).map(|m| m.as_str());
            let high_unit = caps.get(4).map(|m| m.as_str());
            let low_number = caps.get(1)?.as_str();
            // "1.5 to 2m" shares the trailing unit; "800,000 to 1.2m" does not
            let low = match low_unit {
                Some(_) => parse_amount(low_number, low_unit)?,
                None => {
                    let bare = parse_amount(low_number, None)?;
                    if bare < self.min_amount {
                        parse_amount(low_number, high_unit)?
                    } else {
                        bare
                    }
                }
            };
            let high = parse_amount(caps.get(3)?.as_str(), high_unit)?;
            let (min, max) = if low <= high { (low, high) } else { (high, low) };
            (min >= self.min_amount).then(|| {
                (whole.start(), whole.len(), BudgetRange { min: Some(min), max: Some(max) })
            })
        })
    }

    fn find_bound(&self, regex: &Regex, text: &str) -> Option<(usize, usize, u64)> {
        regex.captures_iter(text).find_map(|caps| {
            let whole = caps.get(0)?;
            let amount = parse_amount(caps.get(1)?.as_str(), caps.get(2).map(|m| m.as_str()))?;
            (amount >= self.min_amount).then_some((whole.start(), whole.len(), amount))
        })
    }
}

impl CountExtractor {
    fn extract(&self, text: &AnalyzedText) -> Option<EntityMatch> {
        let numeric = self.pattern.captures(&text.normalized).and_then(|caps| {
            let whole = caps.get(0)?;
            let raw = caps.get(1)?.as_str();
            let count = raw.parse::<u32>().ok().or_else(|| {
                NUMBER_WORDS.iter().find(|(w, _)| *w == raw).map(|(_, n)| *n)
            })?;
            Some(EntityMatch {
                position: whole.start(),
                length: whole.len(),
                value: EntityValue::Count(count),
            })
        });

        let zero = self.zero_words.iter().find_map(|word| {
            let tokens: Vec<String> = word.split(' ').map(str::to_string).collect();
            text.find_sequence(&tokens).map(|position| EntityMatch {
                position,
                length: word.len(),
                value: EntityValue::Count(0),
            })
        });

        match (numeric, zero) {
            (Some(a), Some(b)) => Some(if b.position < a.position { b } else { a }),
            (a, b) => a.or(b),
        }
    }
}

impl GazetteerExtractor {
    fn extract(&self, text: &AnalyzedText) -> Option<EntityMatch> {
        self.aliases
            .iter()
            .filter_map(|(tokens, canonical)| {
                text.find_sequence(tokens).map(|position| EntityMatch {
                    position,
                    length: tokens.iter().map(String::len).sum::<usize>() + tokens.len() - 1,
                    value: EntityValue::Text(canonical.clone()),
                })
            })
            .min_by(|a, b| a.position.cmp(&b.position).then_with(|| b.length.cmp(&a.length)))
    }
}

// ============================================================================
// Built-in rule table (Dubai residential real estate)
// ============================================================================

fn keywords(words: &[&str]) -> Vec<MatcherSpec> {
    words
        .iter()
        .map(|w| MatcherSpec::Keyword { value: (*w).to_string(), weight: None })
        .collect()
}

fn weighted_keywords(words: &[&str], weight: f32) -> Vec<MatcherSpec> {
    words
        .iter()
        .map(|w| MatcherSpec::Keyword { value: (*w).to_string(), weight: Some(weight) })
        .collect()
}

fn phrases(values: &[&str]) -> Vec<MatcherSpec> {
    values
        .iter()
        .map(|p| MatcherSpec::Phrase { value: (*p).to_string(), weight: None })
        .collect()
}

fn phrase(value: &str, weight: f32) -> MatcherSpec {
    MatcherSpec::Phrase { value: value.to_string(), weight: Some(weight) }
}

fn rule(intent: Intent, groups: Vec<Vec<MatcherSpec>>) -> IntentRuleSpec {
    IntentRuleSpec { intent, matchers: groups.into_iter().flatten().collect() }
}

fn gazetteer(kind: EntityKind, entries: &[(&str, &[&str])]) -> EntityRuleSpec {
    EntityRuleSpec::Gazetteer {
        kind,
        entries: entries
            .iter()
            .map(|(canonical, aliases)| GazetteerEntry {
                canonical: (*canonical).to_string(),
                aliases: aliases.iter().map(|a| (*a).to_string()).collect(),
            })
            .collect(),
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

impl Default for PatternLibrarySpec {
    fn default() -> Self {
        let intents = vec![
            rule(Intent::PropertySearch, vec![
                keywords(&[
                    "apartment", "apartments", "flat", "flats", "villa", "villas",
                    "townhouse", "townhouses", "penthouse", "penthouses", "duplex",
                    "studio", "bedroom", "bedrooms", "bed", "beds", "br", "listing",
                    "listings", "available", "rent", "buy", "lease",
                ]),
                phrases(&["show me", "looking for", "find me", "for sale", "for rent", "properties in", "homes in"]),
                vec![MatcherSpec::Pattern { value: r"\b(?:under|below|up to|within)\s+\d".into(), weight: 1.0 }],
            ]),
            rule(Intent::MarketInfo, vec![
                keywords(&[
                    "market", "prices", "price", "trend", "trends", "demand", "supply",
                    "index", "statistics", "average", "sqft", "performance",
                ]),
                phrases(&["market trends", "average price", "how much", "price trend", "transaction volume", "property prices"]),
                vec![phrase("price per square foot", 3.0)],
            ]),
            rule(Intent::InvestmentQuestion, vec![
                keywords(&[
                    "invest", "investment", "investing", "investor", "yield", "yields",
                    "returns", "appreciation", "profitable", "profit",
                ]),
                weighted_keywords(&["roi"], 2.0),
                phrases(&["rental yield", "capital appreciation", "off plan", "good investment", "cash flow"]),
                vec![phrase("return on investment", 3.0)],
            ]),
            rule(Intent::RegulatoryQuestion, vec![
                keywords(&[
                    "rera", "dld", "regulation", "regulations", "law", "laws", "legal",
                    "freehold", "leasehold", "escrow", "oqood", "visas", "residency",
                    "eligible", "eligibility", "qualify", "permit",
                ]),
                phrases(&["golden visa", "residence visa", "title deed", "service charges", "ownership rules"]),
            ]),
            rule(Intent::NeighborhoodQuestion, vec![
                keywords(&[
                    "neighborhood", "neighbourhood", "community", "communities", "area",
                    "areas", "schools", "amenities", "lifestyle", "family", "families",
                    "commute", "parks", "beach", "restaurants", "safe", "safety",
                ]),
                phrases(&["live in", "living in", "best area", "family friendly", "things to do", "close to", "metro station"]),
            ]),
            rule(Intent::DeveloperQuestion, vec![
                keywords(&[
                    "developer", "developers", "builder", "reputation", "reliable",
                    "delivered", "delays", "handover",
                ]),
                weighted_keywords(&[
                    "emaar", "damac", "nakheel", "meraas", "sobha", "azizi", "danube",
                    "ellington", "binghatti", "omniyat", "aldar",
                ], 2.0),
                phrases(&["track record", "dubai properties", "select group"]),
            ]),
            rule(Intent::TransactionGuidance, vec![
                keywords(&[
                    "process", "steps", "mortgage", "mortgages", "financing", "documents",
                    "paperwork", "transfer", "noc", "conveyancing", "commission",
                    "deposit", "procedure",
                ]),
                phrases(&[
                    "how to buy", "how do i buy", "buying process", "down payment",
                    "transfer fee", "registration fee", "what documents", "step by step",
                    "how to rent",
                ]),
            ]),
        ];

        let entities = vec![
            EntityRuleSpec::Budget {
                upper_markers: strings(&[
                    "under", "below", "less than", "up to", "upto", "max", "maximum",
                    "maximum of", "within", "not more than", "no more than",
                    "budget", "budget of", "budget is",
                ]),
                lower_markers: strings(&[
                    "over", "above", "more than", "at least", "min", "minimum",
                    "starting from", "starting at", "from",
                ]),
                trailing_upper_markers: strings(&["budget", "max", "maximum", "tops"]),
                min_amount: 10_000,
            },
            EntityRuleSpec::Count {
                kind: EntityKind::BedroomCount,
                units: strings(&["bed", "beds", "bedroom", "bedrooms", "br", "bhk", "bdr"]),
                zero_words: strings(&["studio"]),
            },
            gazetteer(EntityKind::Location, &[
                ("Dubai Marina", &["marina"]),
                ("Downtown Dubai", &["downtown"]),
                ("Palm Jumeirah", &["the palm"]),
                ("Jumeirah Village Circle", &["jvc"]),
                ("Jumeirah Lake Towers", &["jlt"]),
                ("Jumeirah Beach Residence", &["jbr"]),
                ("Business Bay", &[]),
                ("Dubai Hills Estate", &["dubai hills"]),
                ("Arabian Ranches", &[]),
                ("Dubai Creek Harbour", &["creek harbour", "dubai creek harbor", "creek harbor"]),
                ("Emaar Beachfront", &[]),
                ("DIFC", &["dubai international financial centre"]),
                ("Al Barsha", &["barsha"]),
                ("Dubai South", &[]),
                ("Mohammed Bin Rashid City", &["mbr city"]),
                ("Damac Hills", &[]),
                ("Town Square", &[]),
                ("Meydan", &[]),
                ("City Walk", &[]),
                ("Bluewaters Island", &["bluewaters"]),
            ]),
            gazetteer(EntityKind::PropertyType, &[
                ("apartment", &["apartments", "flat", "flats"]),
                ("villa", &["villas"]),
                ("townhouse", &["townhouses"]),
                ("penthouse", &["penthouses"]),
                ("duplex", &["duplexes"]),
                ("office", &["offices"]),
                ("plot", &["plots", "land"]),
            ]),
            gazetteer(EntityKind::DeveloperName, &[
                ("Emaar", &["emaar properties"]),
                ("DAMAC", &["damac properties"]),
                ("Nakheel", &[]),
                ("Meraas", &[]),
                ("Sobha", &["sobha realty"]),
                ("Dubai Properties", &[]),
                ("Select Group", &[]),
                ("Ellington", &["ellington properties"]),
                ("Azizi", &["azizi developments"]),
                ("Danube", &["danube properties"]),
                ("Binghatti", &[]),
                ("Omniyat", &[]),
                ("Aldar", &[]),
            ]),
            gazetteer(EntityKind::TransactionType, &[
                ("buy", &["buying", "purchase", "purchasing", "for sale"]),
                ("rent", &["renting", "for rent", "to rent", "lease", "leasing"]),
            ]),
        ];

        Self { intents, entities }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> PatternLibrary {
        PatternLibrary::compile(&PatternLibrarySpec::default()).unwrap()
    }

    fn entities(text: &str) -> Entities {
        library().extract_entities(&AnalyzedText::new(text))
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Off-plan, in JVC?!"), "off plan in jvc");
        assert_eq!(normalize("AED 1,500,000 or 3.5M"), "aed 1500000 or 3.5m");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn test_default_library_compiles() {
        let lib = library();
        assert_eq!(lib.intents().len(), lib.intent_rules.len());
        let intents: Vec<Intent> = lib.intents().collect();
        assert_eq!(intents.first(), Some(&Intent::PropertySearch));
        assert!(!intents.contains(&Intent::General));
    }

    #[test]
    fn test_phrase_outweighs_keyword() {
        let lib = library();
        let text = AnalyzedText::new("what is the return on investment");
        let scores = lib.score_intents(&text);
        let investment = scores.iter().find(|s| s.intent == Intent::InvestmentQuestion).unwrap();
        // "return on investment" (3.0) + "investment" (1.0)
        assert_eq!(investment.matched, 2);
        assert!((investment.score - 4.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_budget_upper_bound() {
        let found = entities("villas under 3M please");
        assert_eq!(
            found.get(&EntityKind::BudgetRange),
            Some(&EntityValue::Budget(BudgetRange { min: None, max: Some(3_000_000) }))
        );
    }

    #[test]
    fn test_budget_range_shares_unit() {
        let found = entities("something between 1.5 and 2m in JLT");
        assert_eq!(
            found.get(&EntityKind::BudgetRange),
            Some(&EntityValue::Budget(BudgetRange { min: Some(1_500_000), max: Some(2_000_000) }))
        );
    }

    #[test]
    fn test_budget_from_to_prefers_range() {
        let found = entities("from AED 800,000 to 1.2m");
        assert_eq!(
            found.get(&EntityKind::BudgetRange).map(|v| v.to_string()),
            Some("800000-1200000".to_string())
        );
    }

    #[test]
    fn test_full_lower_amount_keeps_its_own_scale() {
        let cases = [
            ("between 900,000 and 1.5m", "900000-1500000"),
            ("apartments between 750000 and 1m in JVC", "750000-1000000"),
            ("aed 2m to 2.5m", "2000000-2500000"),
            ("from 500k to 1.1m", "500000-1100000"),
        ];
        for (text, expected) in cases {
            assert_eq!(
                entities(text).get(&EntityKind::BudgetRange).map(|v| v.to_string()),
                Some(expected.to_string()),
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_budget_trailing_marker() {
        let found = entities("3M budget villa in Arabian Ranches");
        assert_eq!(
            found.get(&EntityKind::BudgetRange),
            Some(&EntityValue::Budget(BudgetRange { min: None, max: Some(3_000_000) }))
        );
        assert!(!entities("2 bedrooms max").contains_key(&EntityKind::BudgetRange));
    }

    #[test]
    fn test_small_numbers_are_not_budgets() {
        let found = entities("2 to 3 bedrooms from 2019");
        assert!(!found.contains_key(&EntityKind::BudgetRange));
        // only "3 bedrooms" carries a unit
        assert_eq!(found.get(&EntityKind::BedroomCount), Some(&EntityValue::Count(3)));
    }

    #[test]
    fn test_bedroom_variants() {
        assert_eq!(entities("3br in jbr").get(&EntityKind::BedroomCount), Some(&EntityValue::Count(3)));
        assert_eq!(entities("two bedroom flat").get(&EntityKind::BedroomCount), Some(&EntityValue::Count(2)));
        assert_eq!(entities("a studio in JVC").get(&EntityKind::BedroomCount), Some(&EntityValue::Count(0)));
    }

    #[test]
    fn test_location_first_match_wins() {
        let found = entities("compare Business Bay with Dubai Marina");
        assert_eq!(
            found.get(&EntityKind::Location),
            Some(&EntityValue::Text("Business Bay".into()))
        );
    }

    #[test]
    fn test_longer_alias_wins_at_same_position() {
        let found = entities("homes in dubai hills estate");
        assert_eq!(
            found.get(&EntityKind::Location),
            Some(&EntityValue::Text("Dubai Hills Estate".into()))
        );
    }

    #[test]
    fn test_rental_yield_is_not_rent() {
        let found = entities("what rental yield does JVC give");
        assert!(!found.contains_key(&EntityKind::TransactionType));
    }

    #[test]
    fn test_invalid_specs_rejected() {
        let mut spec = PatternLibrarySpec::default();
        spec.intents.push(IntentRuleSpec {
            intent: Intent::General,
            matchers: keywords(&["hello"]),
        });
        assert!(PatternLibrary::compile(&spec).is_err());

        let bad_pattern = PatternLibrarySpec {
            intents: vec![IntentRuleSpec {
                intent: Intent::MarketInfo,
                matchers: vec![MatcherSpec::Pattern { value: "(".into(), weight: 1.0 }],
            }],
            entities: vec![],
        };
        assert!(PatternLibrary::compile(&bad_pattern).is_err());

        let bad_weight = PatternLibrarySpec {
            intents: vec![IntentRuleSpec {
                intent: Intent::MarketInfo,
                matchers: vec![MatcherSpec::Keyword { value: "market".into(), weight: Some(0.0) }],
            }],
            entities: vec![],
        };
        assert!(PatternLibrary::compile(&bad_weight).is_err());
    }

    #[test]
    fn test_spec_deserializes_from_json() {
        let json = r#"{
            "intents": [
                { "intent": "market_info", "matchers": [
                    { "kind": "keyword", "value": "prices" },
                    { "kind": "phrase", "value": "price index", "weight": 2.5 }
                ]}
            ],
            "entities": [
                { "extractor": "gazetteer", "kind": "location",
                  "entries": [ { "canonical": "Al Furjan", "aliases": ["furjan"] } ] }
            ]
        }"#;
        let spec: PatternLibrarySpec = serde_json::from_str(json).unwrap();
        let lib = PatternLibrary::compile(&spec).unwrap();
        let text = AnalyzedText::new("Price index for Furjan");
        assert_eq!(
            lib.extract_entities(&text).get(&EntityKind::Location),
            Some(&EntityValue::Text("Al Furjan".into()))
        );
        assert_eq!(lib.score_intents(&text)[0].score, 2.5);
    }
}
