//! Window listing and target resolution

use std::sync::Arc;

use super::{WindowSystem, matching, matching::MatchStrategy};
use crate::{
    error::{ResolutionError, WindowSystemError},
    model::WindowHandle,
};

/// Resolves a natural-language title query against a window snapshot
///
/// Case-insensitive substring match on the title; when several windows
/// match, the most recently focused one wins.
///
/// # Errors
///
/// - [`ResolutionError::InvalidQuery`] - empty query
/// - [`ResolutionError::NotFound`] - nothing matched
pub fn resolve_in(query: &str, windows: &[WindowHandle]) -> Result<WindowHandle, ResolutionError> {
    resolve_with(query, MatchStrategy::Substring, windows)
}

/// Like [`resolve_in`] with an explicit strategy
pub fn resolve_with(
    query: &str,
    strategy: MatchStrategy,
    windows: &[WindowHandle],
) -> Result<WindowHandle, ResolutionError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ResolutionError::InvalidQuery {
            reason: "query is empty".to_string(),
        });
    }

    let candidates = match strategy {
        MatchStrategy::Substring => matching::substring_matches(query, windows),
        MatchStrategy::Regex => matching::regex_matches(query, windows)?,
        MatchStrategy::Class => matching::class_matches(query, windows),
        MatchStrategy::Fuzzy => matching::fuzzy_matches(query, windows),
    };

    if candidates.len() > 1 {
        tracing::debug!(
            "{} windows match '{}', preferring the most recently focused",
            candidates.len(),
            query
        );
    }

    matching::most_recently_focused(&candidates)
        .cloned()
        .ok_or_else(|| ResolutionError::NotFound {
            query:    query.to_string(),
            searched: windows.len(),
        })
}

/// Live window queries against a [`WindowSystem`]
#[derive(Clone)]
pub struct WindowLocator {
    system: Arc<dyn WindowSystem>,
}

impl WindowLocator {
    /// Creates a locator over a window system
    pub fn new(system: Arc<dyn WindowSystem>) -> Self {
        Self { system }
    }

    /// Lists windows; every call queries the window system afresh
    pub async fn list_windows(&self) -> Result<Vec<WindowHandle>, WindowSystemError> {
        let windows = self.system.list_windows().await?;
        tracing::debug!("Listed {} windows", windows.len());
        Ok(windows)
    }

    /// Resolves a title query using the substring policy
    pub async fn resolve(&self, query: &str) -> Result<WindowHandle, ResolutionError> {
        self.resolve_with(query, MatchStrategy::Substring).await
    }

    /// Resolves a query using the given strategy
    pub async fn resolve_with(
        &self,
        query: &str,
        strategy: MatchStrategy,
    ) -> Result<WindowHandle, ResolutionError> {
        let windows = self.list_windows().await?;
        let window = resolve_with(query, strategy, &windows)?;
        tracing::info!("Resolved '{}' to window {} ('{}')", query, window.id, window.title);
        Ok(window)
    }

    /// Finds a window by its id
    pub async fn resolve_id(&self, id: &str) -> Result<WindowHandle, ResolutionError> {
        let windows = self.list_windows().await?;
        let searched = windows.len();
        windows
            .into_iter()
            .find(|w| w.id == id)
            .ok_or_else(|| ResolutionError::NotFound {
                query: format!("window id {id}"),
                searched,
            })
    }
}
