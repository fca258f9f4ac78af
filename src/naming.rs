//! Deterministic file naming
//!
//! Templates are plain strings with `{placeholder}` markers. Rendering is a
//! pure function of the template and a [`NamingContext`]; the context carries
//! a fixed "now" so two renders with the same inputs are always identical.
//!
//! Supported placeholders:
//!
//! | placeholder  | value                                            |
//! |--------------|--------------------------------------------------|
//! | `{page}`     | page index, zero-padded to the context width     |
//! | `{page:0Nd}` | page index, zero-padded to `N`                   |
//! | `{date}`     | `%Y-%m-%d`                                       |
//! | `{time}`     | `%H%M%S`                                         |
//! | `{timestamp}`| per [`TimestampFormat`]                          |
//! | `{title}`    | sanitized window or document title               |
//! | `{session}`  | session id                                       |
//!
//! Anything else, and any placeholder without a value in the context, is
//! copied through verbatim.

use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};

use crate::{
    config::{CollisionPolicy, Config, TimestampFormat},
    error::NamingError,
};

/// Longest sanitized path component
pub const MAX_COMPONENT_LEN: usize = 50;

const ISO_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Inputs to template rendering
#[derive(Debug, Clone, PartialEq)]
pub struct NamingContext {
    /// Page index
    pub page:             Option<u32>,
    /// Default zero-padding for `{page}`
    pub padding:          usize,
    /// Fixed clock reading
    pub now:              DateTime<Local>,
    /// `{timestamp}` style
    pub timestamp_format: TimestampFormat,
    /// Raw title (sanitized on render)
    pub title:            Option<String>,
    /// Session id
    pub session:          Option<String>,
}

impl NamingContext {
    /// Context with no page, title or session
    pub fn new(now: DateTime<Local>, padding: usize, timestamp_format: TimestampFormat) -> Self {
        Self {
            page: None,
            padding,
            now,
            timestamp_format,
            title: None,
            session: None,
        }
    }

    /// Context seeded from configuration
    pub fn from_config(config: &Config, now: DateTime<Local>) -> Self {
        Self::new(now, config.page_padding, config.timestamp_format.clone())
    }

    /// Sets the page index
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Sets the title
    pub fn with_title(mut self, title: Option<impl Into<String>>) -> Self {
        self.title = title.map(Into::into);
        self
    }

    /// Sets the session id
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// `{timestamp}` value
    pub fn timestamp(&self) -> String {
        format_timestamp(&self.now, &self.timestamp_format)
    }
}

/// Renders a template into a relative path
///
/// # Examples
///
/// ```
/// use auto_snap_mcp::{config::TimestampFormat, naming::{render, NamingContext}};
/// use chrono::Local;
///
/// let ctx = NamingContext::new(Local::now(), 3, TimestampFormat::Iso).with_page(7);
/// assert_eq!(render("page_{page}", &ctx), std::path::PathBuf::from("page_007"));
/// assert_eq!(render("p{page:05d}-{nope}", &ctx), std::path::PathBuf::from("p00007-{nope}"));
/// ```
pub fn render(template: &str, ctx: &NamingContext) -> PathBuf {
    PathBuf::from(render_string(template, ctx))
}

fn render_string(template: &str, ctx: &NamingContext) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };

        let key = &after[..close];
        match expand(key, ctx) {
            Some(value) => out.push_str(&value),
            None => {
                out.push('{');
                out.push_str(key);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

fn expand(key: &str, ctx: &NamingContext) -> Option<String> {
    match key {
        "page" => ctx
            .page
            .map(|p| format!("{:0width$}", p, width = ctx.padding)),
        "date" => Some(ctx.now.format("%Y-%m-%d").to_string()),
        "time" => Some(ctx.now.format("%H%M%S").to_string()),
        "timestamp" => Some(ctx.timestamp()),
        "title" => ctx
            .title
            .as_deref()
            .map(|t| sanitize_component(t, MAX_COMPONENT_LEN)),
        "session" => ctx.session.clone(),
        _ => {
            let spec = key.strip_prefix("page:")?;
            let width = parse_width(spec)?;
            ctx.page.map(|p| format!("{:0width$}", p, width = width))
        }
    }
}

/// Parses `0Nd` / `Nd` width specs
fn parse_width(spec: &str) -> Option<usize> {
    let digits = spec.strip_suffix('d')?;
    let digits = digits.strip_prefix('0').unwrap_or(digits);
    if digits.is_empty() {
        return Some(0);
    }
    digits.parse::<usize>().ok().filter(|w| *w <= 12)
}

fn format_timestamp(now: &DateTime<Local>, format: &TimestampFormat) -> String {
    match format {
        TimestampFormat::Iso => now.format(ISO_FORMAT).to_string(),
        TimestampFormat::Unix => now.timestamp().to_string(),
        TimestampFormat::Custom(pattern) => {
            let mut out = String::new();
            // chrono reports bad specifiers through fmt::Error
            if write!(out, "{}", now.format(pattern)).is_err() {
                tracing::warn!("Invalid custom timestamp format '{}', using ISO", pattern);
                return now.format(ISO_FORMAT).to_string();
            }
            out
        }
    }
}

/// Makes a string safe for use as a single path component
///
/// Strips characters that are invalid on common filesystems, maps
/// whitespace to `_`, truncates to `max_len` characters and trims
/// leading/trailing underscores and dots.
pub fn sanitize_component(raw: &str, max_len: usize) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .filter(|c| !c.is_control())
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .take(max_len)
        .collect();

    let trimmed = cleaned.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// File name for a staged page image
///
/// Renders the configured page template, optionally appends
/// `_{timestamp}`, and adds the image extension.
pub fn page_file_name(config: &Config, ctx: &NamingContext) -> PathBuf {
    let mut name = render_string(&config.file_name_template, ctx);
    if config.include_timestamp {
        name.push('_');
        name.push_str(&ctx.timestamp());
    }
    name.push('.');
    name.push_str(config.image_format.extension());
    PathBuf::from(name)
}

/// Directory for finished artifacts
///
/// `output_dir[/YYYY-MM-DD][/session][/project]`
pub fn output_directory(config: &Config, now: &DateTime<Local>, session: Option<&str>) -> PathBuf {
    let mut dir = config.output_dir.clone();
    if config.use_date_subdirs {
        dir.push(now.format("%Y-%m-%d").to_string());
    }
    if config.use_session_subdirs {
        if let Some(session) = session {
            dir.push(sanitize_component(session, MAX_COMPONENT_LEN));
        }
    }
    if let Some(project) = &config.project_name {
        dir.push(sanitize_component(project, MAX_COMPONENT_LEN));
    }
    dir
}

/// Applies the collision policy to a candidate path
///
/// # Errors
///
/// Returns [`NamingError::Collision`] if the path exists and the policy is
/// [`CollisionPolicy::Fail`].
pub fn resolve_collision(path: PathBuf, policy: CollisionPolicy) -> Result<PathBuf, NamingError> {
    if !path.exists() {
        return Ok(path);
    }
    if policy == CollisionPolicy::Fail {
        return Err(NamingError::Collision { path });
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let mut n: u32 = 1;
    loop {
        let file_name = match &extension {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = parent.join(file_name);
        if !candidate.exists() {
            tracing::debug!("Resolved name collision: {}", candidate.display());
            return Ok(candidate);
        }
        n = n.saturating_add(1);
        if n == u32::MAX {
            return Err(NamingError::Collision { path });
        }
    }
}
