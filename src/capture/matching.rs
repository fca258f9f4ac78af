//! Window matching strategies
//!
//! Pure functions over a window snapshot. Each strategy returns every
//! candidate; [`most_recently_focused`] then breaks ties by focus rank so the
//! window the user last touched wins.
//!
//! 1. **Substring** - Case-insensitive substring of the title (default)
//! 2. **Regex** - Case-insensitive regex on the title
//! 3. **Class** - WM_CLASS, case-insensitive exact match
//! 4. **Fuzzy** - SkimMatcherV2 on the title
//!
//! # Security
//!
//! Regex patterns are limited to 1MB to prevent ReDoS attacks.

use fuzzy_matcher::{FuzzyMatcher, skim::SkimMatcherV2};
use regex::RegexBuilder;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{error::ResolutionError, model::WindowHandle};

/// Maximum regex pattern size (1MB) to prevent ReDoS attacks
const MAX_REGEX_SIZE: usize = 1_048_576;

/// Minimum fuzzy match score for a positive match
const FUZZY_THRESHOLD: i64 = 60;

/// How a window query is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    /// Case-insensitive title substring
    #[default]
    Substring,
    /// Case-insensitive title regex
    Regex,
    /// WM_CLASS name
    Class,
    /// Fuzzy title match
    Fuzzy,
}

/// Windows whose title contains `needle`, ignoring case
pub fn substring_matches<'a>(needle: &str, windows: &'a [WindowHandle]) -> Vec<&'a WindowHandle> {
    let needle = needle.to_lowercase();
    windows
        .iter()
        .filter(|w| w.title.to_lowercase().contains(&needle))
        .collect()
}

/// Windows whose title matches `pattern`, ignoring case
///
/// # Errors
///
/// Returns [`ResolutionError::InvalidQuery`] if the pattern is too large or
/// does not compile.
pub fn regex_matches<'a>(
    pattern: &str,
    windows: &'a [WindowHandle],
) -> Result<Vec<&'a WindowHandle>, ResolutionError> {
    if pattern.len() > MAX_REGEX_SIZE {
        return Err(ResolutionError::InvalidQuery {
            reason: "regex pattern larger than 1MB".to_string(),
        });
    }

    let regex = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(MAX_REGEX_SIZE)
        .build()
        .map_err(|e| ResolutionError::InvalidQuery {
            reason: format!("invalid regex '{pattern}': {e}"),
        })?;

    Ok(windows.iter().filter(|w| regex.is_match(&w.title)).collect())
}

/// Windows whose class equals `class`, ignoring ASCII case
pub fn class_matches<'a>(class: &str, windows: &'a [WindowHandle]) -> Vec<&'a WindowHandle> {
    windows
        .iter()
        .filter(|w| w.class.eq_ignore_ascii_case(class))
        .collect()
}

/// Windows scoring at or above the fuzzy threshold, best score only
///
/// Several windows can share the best score; all of them are returned.
pub fn fuzzy_matches<'a>(pattern: &str, windows: &'a [WindowHandle]) -> Vec<&'a WindowHandle> {
    let matcher = SkimMatcherV2::default();

    let scored: Vec<(&WindowHandle, i64)> = windows
        .iter()
        .filter_map(|w| {
            matcher
                .fuzzy_match(&w.title, pattern)
                .filter(|score| *score >= FUZZY_THRESHOLD)
                .map(|score| {
                    tracing::debug!(
                        "Fuzzy match candidate: {} (title: {}, score: {})",
                        w.id,
                        w.title,
                        score
                    );
                    (w, score)
                })
        })
        .collect();

    let Some(best) = scored.iter().map(|(_, s)| *s).max() else {
        return Vec::new();
    };
    scored
        .into_iter()
        .filter(|(_, s)| *s == best)
        .map(|(w, _)| w)
        .collect()
}

/// Picks the candidate with the highest focus rank
///
/// Ties keep the earliest candidate so results are stable for a given
/// snapshot.
pub fn most_recently_focused<'a>(candidates: &[&'a WindowHandle]) -> Option<&'a WindowHandle> {
    candidates.iter().copied().fold(None, |best, w| match best {
        Some(b) if b.focus_rank >= w.focus_rank => Some(b),
        _ => Some(w),
    })
}
