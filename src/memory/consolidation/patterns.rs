//! Episode grouping and skill generalization helpers.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use regex::{NoExpand, Regex};

use crate::memory::core::episode::Episode;
use crate::memory::core::errors::MemoryResult;

/// Episodes grouped under a pattern key.
pub type PatternGroups = BTreeMap<String, Vec<Episode>>;

/// Boxed future returned by [`PatternGrouper::group`].
pub type GroupFuture<'a> = Pin<Box<dyn Future<Output = MemoryResult<PatternGroups>> + Send + 'a>>;

/// Strategy that clusters successful episodes into candidate skills.
pub trait PatternGrouper: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Partition `episodes`; every episode lands in exactly one group.
    fn group<'a>(&'a self, episodes: &'a [Episode]) -> GroupFuture<'a>;
}

/// Groups episodes by the first few lowercase whitespace tokens of their action.
#[derive(Clone, Copy, Debug)]
pub struct LeadingTokensGrouper {
    tokens: usize,
}

impl LeadingTokensGrouper {
    /// Group by the first `tokens` lower-cased action tokens.
    #[must_use]
    pub const fn new(tokens: usize) -> Self {
        Self { tokens }
    }
}

impl Default for LeadingTokensGrouper {
    fn default() -> Self {
        Self::new(3)
    }
}

impl PatternGrouper for LeadingTokensGrouper {
    fn name(&self) -> &'static str {
        "leading_tokens"
    }

    fn group<'a>(&'a self, episodes: &'a [Episode]) -> GroupFuture<'a> {
        Box::pin(async move {
            let mut groups = PatternGroups::new();
            for episode in episodes {
                groups
                    .entry(pattern_key(&episode.action, self.tokens))
                    .or_default()
                    .push(episode.clone());
            }
            Ok(groups)
        })
    }
}

/// First `tokens` lowercase words of `action` joined with `_`, or `unknown`.
#[must_use]
pub fn pattern_key(action: &str, tokens: usize) -> String {
    let words: Vec<String> = action
        .split_whitespace()
        .take(tokens)
        .map(str::to_lowercase)
        .collect();
    if words.is_empty() {
        "unknown".to_string()
    } else {
        words.join("_")
    }
}

/// Words of the first text that appear (case-insensitively) in every text.
///
/// Falls back to the first 100 characters of the first text when nothing is shared.
#[must_use]
pub fn common_pattern(texts: &[&str]) -> String {
    let Some(first) = texts.first() else {
        return String::new();
    };
    let shared: Vec<&str> = first
        .split_whitespace()
        .filter(|word| {
            let lower = word.to_lowercase();
            texts[1..].iter().all(|text| {
                text.split_whitespace()
                    .any(|other| other.to_lowercase() == lower)
            })
        })
        .collect();
    if shared.is_empty() {
        first.chars().take(100).collect()
    } else {
        shared.join(" ")
    }
}

/// Context words longer than three characters found in at least half the contexts.
///
/// Words keep their first-appearance order; at most `max` are returned.
#[must_use]
pub fn trigger_keywords(contexts: &[&str], max: usize) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for context in contexts {
        let mut seen: Vec<String> = Vec::new();
        for word in context.to_lowercase().split_whitespace() {
            if word.chars().count() <= 3 || seen.iter().any(|w| w == word) {
                continue;
            }
            seen.push(word.to_string());
            let count = counts.entry(word.to_string()).or_insert(0);
            if *count == 0 {
                order.push(word.to_string());
            }
            *count += 1;
        }
    }
    let threshold = contexts.len().div_ceil(2);
    order
        .into_iter()
        .filter(|word| counts.get(word).is_some_and(|c| *c >= threshold))
        .take(max)
        .collect()
}

/// Replaces concrete values in an action with named placeholders.
pub struct ActionGeneralizer {
    path: Regex,
    number: Regex,
    double_quoted: Regex,
    single_quoted: Regex,
}

impl ActionGeneralizer {
    /// Compile the substitution patterns.
    ///
    /// # Errors
    /// Returns an error if a pattern fails to compile.
    pub fn new() -> MemoryResult<Self> {
        Ok(Self {
            path: Regex::new(r"/[\w/.-]+")?,
            number: Regex::new(r"\b\d+\b")?,
            double_quoted: Regex::new(r#""[^"]*""#)?,
            single_quoted: Regex::new(r"'[^']*'")?,
        })
    }

    /// Paths become `{{PATH}}`, standalone numbers `{{NUMBER}}`, quoted strings `{{STRING}}`.
    #[must_use]
    pub fn generalize(&self, action: &str) -> String {
        let template = self.path.replace_all(action, NoExpand("{{PATH}}"));
        let template = self.number.replace_all(&template, NoExpand("{{NUMBER}}"));
        let template = self
            .double_quoted
            .replace_all(&template, NoExpand("{{STRING}}"));
        self.single_quoted
            .replace_all(&template, NoExpand("{{STRING}}"))
            .into_owned()
    }
}
