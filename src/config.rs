//! Runtime configuration
//!
//! All tunables are read once at startup from `AUTO_SNAP_*` environment
//! variables into an immutable [`Config`] snapshot that is shared as
//! `Arc<Config>`. Sessions copy the values they need when they are created,
//! so later changes never affect a running session.
//!
//! # Examples
//!
//! ```
//! use auto_snap_mcp::config::Config;
//!
//! let config = Config::from_env_with(|key| match key {
//!     "AUTO_SNAP_OUTPUT_DIR" => Some("/srv/scans".to_string()),
//!     _ => None,
//! })
//! .unwrap();
//! assert_eq!(config.output_dir, std::path::PathBuf::from("/srv/scans"));
//! ```

use std::{path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, model::ImageFormat};

/// How `{timestamp}` renders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampFormat {
    /// `%Y%m%d_%H%M%S`
    Iso,
    /// Seconds since the epoch
    Unix,
    /// strftime pattern
    Custom(String),
}

/// What to do when an output path already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Append `_1`, `_2`, ... to the file stem
    #[default]
    Suffix,
    /// Refuse with an error (`OutputExists` for documents)
    Fail,
}

impl FromStr for CollisionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "suffix" => Ok(CollisionPolicy::Suffix),
            "fail" | "error" => Ok(CollisionPolicy::Fail),
            other => Err(format!("expected 'suffix' or 'fail', got '{other}'")),
        }
    }
}

/// Immutable configuration snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root for finished artifacts
    pub output_dir:           PathBuf,
    /// Root for per-session staging directories
    pub temp_dir:             PathBuf,
    /// Put artifacts under a `%Y-%m-%d` subdirectory
    pub use_date_subdirs:     bool,
    /// Put artifacts under a per-session subdirectory
    pub use_session_subdirs:  bool,
    /// Optional project subdirectory
    pub project_name:         Option<String>,
    /// Template for staged page images
    pub file_name_template:   String,
    /// Template for PDF files
    pub pdf_name_template:    String,
    /// Zero-padding width of `{page}`
    pub page_padding:         usize,
    /// Append `_{timestamp}` to page names
    pub include_timestamp:    bool,
    /// `{timestamp}` rendering
    pub timestamp_format:     TimestampFormat,
    /// Frame encoding
    pub image_format:         ImageFormat,
    /// JPEG quality for frames and compressed PDFs (1-100)
    pub image_quality:        u8,
    /// Try lossy image compression when building PDFs
    pub pdf_compression:      bool,
    /// Resolution used to size PDF pages
    pub pdf_dpi:              u32,
    /// Default PDF title
    pub pdf_title:            String,
    /// Output collision handling
    pub collision_policy:     CollisionPolicy,
    /// Similarity at or above which two frames count as the same page
    pub duplicate_threshold:  f32,
    /// Pause after accepting a page before the next shot
    pub shot_delay:           Duration,
    /// Pause before re-shooting after a duplicate
    pub poll_interval:        Duration,
    /// Longest wait for a page to change
    pub max_wait_per_page:    Duration,
    /// Longest total session runtime
    pub max_session_duration: Duration,
    /// Transient capture failures tolerated per session
    pub max_capture_retries:  u32,
    /// Key sent to advance pages (xdotool syntax); None = manual paging
    pub navigation_key:       Option<String>,
    /// Settle time after focusing a window
    pub focus_settle:         Duration,
    /// Default OCR language
    pub ocr_language:         String,
    /// OCR engine timeout per page
    pub ocr_timeout:          Duration,
    /// Remove unreferenced staging files after assembly
    pub auto_cleanup_temp:    bool,
    /// Age after which orphaned staging dirs are pruned at startup
    pub temp_retention:       Duration,
    /// Use `./captures` and `./temp_captures`
    pub legacy_mode:          bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir:           PathBuf::from("auto-snap-captures"),
            temp_dir:             std::env::temp_dir().join("auto-snap-temp"),
            use_date_subdirs:     true,
            use_session_subdirs:  false,
            project_name:         None,
            file_name_template:   "page_{page}".to_string(),
            pdf_name_template:    "{title}_{timestamp}".to_string(),
            page_padding:         3,
            include_timestamp:    false,
            timestamp_format:     TimestampFormat::Iso,
            image_format:         ImageFormat::Png,
            image_quality:        95,
            pdf_compression:      true,
            pdf_dpi:              150,
            pdf_title:            "Auto-Snap Captured Document".to_string(),
            collision_policy:     CollisionPolicy::Suffix,
            duplicate_threshold:  0.98,
            shot_delay:           Duration::from_millis(1000),
            poll_interval:        Duration::from_millis(500),
            max_wait_per_page:    Duration::from_secs(10),
            max_session_duration: Duration::from_secs(600),
            max_capture_retries:  3,
            navigation_key:       None,
            focus_settle:         Duration::from_millis(500),
            ocr_language:         "eng".to_string(),
            ocr_timeout:          Duration::from_secs(30),
            auto_cleanup_temp:    true,
            temp_retention:       Duration::from_secs(24 * 3600),
            legacy_mode:          false,
        }
    }
}

impl Config {
    /// Loads configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if any variable is set but
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an injectable variable lookup
    ///
    /// Unset (or empty) variables keep their defaults.
    pub fn from_env_with<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&get);
        let mut config = Config::default();

        config.legacy_mode = env.parse_bool("AUTO_SNAP_LEGACY_MODE")?.unwrap_or(false);

        config.output_dir = match env.get("AUTO_SNAP_OUTPUT_DIR") {
            Some(dir) => expand_home(&dir, &get),
            None if config.legacy_mode => PathBuf::from("captures"),
            None => match get("HOME") {
                Some(home) => PathBuf::from(home).join("auto-snap-captures"),
                None => config.output_dir.clone(),
            },
        };
        config.temp_dir = match env.get("AUTO_SNAP_TEMP_DIR") {
            Some(dir) => expand_home(&dir, &get),
            None if config.legacy_mode => PathBuf::from("temp_captures"),
            None => config.temp_dir.clone(),
        };

        if config.legacy_mode {
            config.use_date_subdirs = false;
        }
        if let Some(v) = env.parse_bool("AUTO_SNAP_USE_DATE_SUBDIRS")? {
            config.use_date_subdirs = v;
        }
        if let Some(v) = env.parse_bool("AUTO_SNAP_USE_SESSION_SUBDIRS")? {
            config.use_session_subdirs = v;
        }
        config.project_name = env.get("AUTO_SNAP_PROJECT_NAME");
        if let Some(t) = env.get("AUTO_SNAP_FILE_NAME_TEMPLATE") {
            config.file_name_template = t;
        }
        if let Some(t) = env.get("AUTO_SNAP_PDF_NAME_TEMPLATE") {
            config.pdf_name_template = t;
        }
        if let Some(v) = env.parse::<usize>("AUTO_SNAP_PAGE_PADDING")? {
            config.page_padding = v.min(12);
        }
        if let Some(v) = env.parse_bool("AUTO_SNAP_INCLUDE_TIMESTAMP")? {
            config.include_timestamp = v;
        }
        config.timestamp_format = env.timestamp_format()?;
        if let Some(v) = env.parse::<ImageFormat>("AUTO_SNAP_IMAGE_FORMAT")? {
            config.image_format = v;
        }
        if let Some(v) = env.parse::<u8>("AUTO_SNAP_IMAGE_QUALITY")? {
            config.image_quality = env.check("AUTO_SNAP_IMAGE_QUALITY", v, (1..=100).contains(&v))?;
        }
        if let Some(v) = env.parse_bool("AUTO_SNAP_PDF_COMPRESSION")? {
            config.pdf_compression = v;
        }
        if let Some(v) = env.parse::<u32>("AUTO_SNAP_PDF_DPI")? {
            config.pdf_dpi = env.check("AUTO_SNAP_PDF_DPI", v, v > 0)?;
        }
        if let Some(t) = env.get("AUTO_SNAP_PDF_TITLE") {
            config.pdf_title = t;
        }
        if let Some(v) = env.parse::<CollisionPolicy>("AUTO_SNAP_COLLISION_POLICY")? {
            config.collision_policy = v;
        }
        if let Some(v) = env.parse::<f32>("AUTO_SNAP_DUPLICATE_THRESHOLD")? {
            config.duplicate_threshold =
                env.check("AUTO_SNAP_DUPLICATE_THRESHOLD", v, (0.0..=1.0).contains(&v))?;
        }
        if let Some(v) = env.parse::<u64>("AUTO_SNAP_SHOT_DELAY_MS")? {
            config.shot_delay = Duration::from_millis(v);
        }
        if let Some(v) = env.parse::<u64>("AUTO_SNAP_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(v);
        }
        if let Some(v) = env.parse::<u64>("AUTO_SNAP_MAX_WAIT_PER_PAGE_MS")? {
            config.max_wait_per_page = Duration::from_millis(v);
        }
        if let Some(v) = env.parse::<u64>("AUTO_SNAP_MAX_SESSION_SECS")? {
            config.max_session_duration = Duration::from_secs(v);
        }
        if let Some(v) = env.parse::<u32>("AUTO_SNAP_MAX_CAPTURE_RETRIES")? {
            config.max_capture_retries = v;
        }
        config.navigation_key = env.get("AUTO_SNAP_NAVIGATION_KEY");
        if let Some(v) = env.parse::<u64>("AUTO_SNAP_FOCUS_SETTLE_MS")? {
            config.focus_settle = Duration::from_millis(v);
        }
        if let Some(lang) = env.get("AUTO_SNAP_OCR_LANGUAGE") {
            config.ocr_language = lang;
        }
        if let Some(v) = env.parse::<u64>("AUTO_SNAP_OCR_TIMEOUT_SECS")? {
            config.ocr_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env.parse_bool("AUTO_SNAP_AUTO_CLEANUP_TEMP")? {
            config.auto_cleanup_temp = v;
        }
        if let Some(v) = env.parse::<u64>("AUTO_SNAP_TEMP_RETENTION_HOURS")? {
            config.temp_retention = Duration::from_secs(v * 3600);
        }

        Ok(config)
    }
}

/// Thin wrapper that turns a lookup closure into typed accessors
struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidValue {
            key:    key.to_string(),
            value:  value.to_string(),
            reason: reason.into(),
        }
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| Self::invalid(key, &raw, e.to_string())),
            None => Ok(None),
        }
    }

    fn parse_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.get(key) {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Some(true)),
                "0" | "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(Self::invalid(key, &raw, "expected true or false")),
            },
            None => Ok(None),
        }
    }

    fn check<T: std::fmt::Display>(&self, key: &str, value: T, ok: bool) -> Result<T, ConfigError> {
        if ok {
            Ok(value)
        } else {
            Err(Self::invalid(key, &value.to_string(), "out of range"))
        }
    }

    fn timestamp_format(&self) -> Result<TimestampFormat, ConfigError> {
        let custom = self.get("AUTO_SNAP_CUSTOM_TIMESTAMP");
        match self.get("AUTO_SNAP_TIMESTAMP_FORMAT") {
            None => Ok(TimestampFormat::Iso),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "iso" => Ok(TimestampFormat::Iso),
                "unix" => Ok(TimestampFormat::Unix),
                "custom" => custom.map(TimestampFormat::Custom).ok_or_else(|| {
                    Self::invalid(
                        "AUTO_SNAP_TIMESTAMP_FORMAT",
                        &raw,
                        "custom format requires AUTO_SNAP_CUSTOM_TIMESTAMP",
                    )
                }),
                _ => Err(Self::invalid(
                    "AUTO_SNAP_TIMESTAMP_FORMAT",
                    &raw,
                    "expected iso, unix or custom",
                )),
            },
        }
    }
}

fn expand_home<F>(raw: &str, get: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    match (raw.strip_prefix("~/"), get("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(raw),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_env_with(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_env() {
        let config = load(&[("HOME", "/home/ada")]).unwrap();

        assert_eq!(config.output_dir, PathBuf::from("/home/ada/auto-snap-captures"));
        assert_eq!(config.file_name_template, "page_{page}");
        assert_eq!(config.page_padding, 3);
        assert_eq!(config.pdf_dpi, 150);
        assert_eq!(config.ocr_language, "eng");
        assert_eq!(config.collision_policy, CollisionPolicy::Suffix);
        assert!(config.use_date_subdirs);
        assert!(!config.legacy_mode);
        assert!(config.navigation_key.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("AUTO_SNAP_OUTPUT_DIR", "/srv/out"),
            ("AUTO_SNAP_TEMP_DIR", "/srv/tmp"),
            ("AUTO_SNAP_SHOT_DELAY_MS", "250"),
            ("AUTO_SNAP_MAX_WAIT_PER_PAGE_MS", "2000"),
            ("AUTO_SNAP_IMAGE_FORMAT", "jpeg"),
            ("AUTO_SNAP_COLLISION_POLICY", "fail"),
            ("AUTO_SNAP_NAVIGATION_KEY", "Page_Down"),
            ("AUTO_SNAP_USE_DATE_SUBDIRS", "no"),
        ])
        .unwrap();

        assert_eq!(config.output_dir, PathBuf::from("/srv/out"));
        assert_eq!(config.temp_dir, PathBuf::from("/srv/tmp"));
        assert_eq!(config.shot_delay, Duration::from_millis(250));
        assert_eq!(config.max_wait_per_page, Duration::from_secs(2));
        assert_eq!(config.image_format, ImageFormat::Jpeg);
        assert_eq!(config.collision_policy, CollisionPolicy::Fail);
        assert_eq!(config.navigation_key.as_deref(), Some("Page_Down"));
        assert!(!config.use_date_subdirs);
    }

    #[test]
    fn test_home_expansion() {
        let config = load(&[("HOME", "/home/ada"), ("AUTO_SNAP_OUTPUT_DIR", "~/scans")]).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/home/ada/scans"));
    }

    #[test]
    fn test_legacy_mode_dirs() {
        let config = load(&[("AUTO_SNAP_LEGACY_MODE", "true")]).unwrap();

        assert_eq!(config.output_dir, PathBuf::from("captures"));
        assert_eq!(config.temp_dir, PathBuf::from("temp_captures"));
        assert!(!config.use_date_subdirs);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = load(&[("AUTO_SNAP_PDF_DPI", "lots")]).unwrap_err();
        let ConfigError::InvalidValue { key, value, .. } = err;
        assert_eq!(key, "AUTO_SNAP_PDF_DPI");
        assert_eq!(value, "lots");
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        assert!(load(&[("AUTO_SNAP_IMAGE_QUALITY", "0")]).is_err());
        assert!(load(&[("AUTO_SNAP_DUPLICATE_THRESHOLD", "1.5")]).is_err());
        assert!(load(&[("AUTO_SNAP_PDF_DPI", "0")]).is_err());
    }

    #[test]
    fn test_invalid_bool_is_rejected() {
        assert!(load(&[("AUTO_SNAP_PDF_COMPRESSION", "maybe")]).is_err());
    }

    #[test]
    fn test_timestamp_formats() {
        assert_eq!(
            load(&[("AUTO_SNAP_TIMESTAMP_FORMAT", "unix")]).unwrap().timestamp_format,
            TimestampFormat::Unix
        );
        assert_eq!(
            load(&[
                ("AUTO_SNAP_TIMESTAMP_FORMAT", "custom"),
                ("AUTO_SNAP_CUSTOM_TIMESTAMP", "%d%m%Y"),
            ])
            .unwrap()
            .timestamp_format,
            TimestampFormat::Custom("%d%m%Y".to_string())
        );
        assert!(load(&[("AUTO_SNAP_TIMESTAMP_FORMAT", "custom")]).is_err());
    }

    #[test]
    fn test_empty_values_keep_defaults() {
        let config = load(&[("AUTO_SNAP_OCR_LANGUAGE", "  ")]).unwrap();
        assert_eq!(config.ocr_language, "eng");
    }

    #[test]
    fn test_from_process_env() {
        temp_env::with_vars(
            [
                ("AUTO_SNAP_OCR_LANGUAGE", Some("deu")),
                ("AUTO_SNAP_PAGE_PADDING", Some("4")),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.ocr_language, "deu");
                assert_eq!(config.page_padding, 4);
            },
        );
    }
}
