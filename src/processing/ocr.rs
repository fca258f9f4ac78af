//! OCR engines
//!
//! [`OcrEngine`] is the seam between the pipeline and the text recognizer.
//! [`TesseractEngine`] drives the `tesseract` CLI; [`MockOcrEngine`] returns
//! scripted text for tests.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::error::OcrError;

/// Text recognizer
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Installed language codes
    async fn available_languages(&self) -> Result<Vec<String>, OcrError>;

    /// Recognizes the text in `image`
    ///
    /// `language` may combine several codes with `+` (e.g. `eng+deu`).
    async fn recognize(&self, image: &Path, language: &str) -> Result<String, OcrError>;

    /// Engine name for reports
    fn name(&self) -> &'static str;
}

/// Checks every `+`-separated component of `language` against `available`
fn validate_language(language: &str, available: &[String]) -> Result<(), OcrError> {
    let missing = language
        .split('+')
        .map(str::trim)
        .any(|code| code.is_empty() || !available.iter().any(|a| a == code));

    if missing {
        return Err(OcrError::LanguageUnavailable {
            language:  language.to_string(),
            available: available.to_vec(),
        });
    }
    Ok(())
}

/// Parses `tesseract --list-langs` output
fn parse_language_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of"))
        .map(str::to_string)
        .collect()
}

/// Tesseract CLI engine
///
/// Runs `tesseract <image> stdout -l <lang> --psm 6` (uniform block of
/// text). The language list is queried once and cached.
#[derive(Debug)]
pub struct TesseractEngine {
    binary:    PathBuf,
    timeout:   Duration,
    languages: OnceCell<Vec<String>>,
}

impl TesseractEngine {
    /// Creates an engine using `tesseract` from `PATH`
    pub fn new(timeout: Duration) -> Self {
        Self::with_binary("tesseract", timeout)
    }

    /// Creates an engine using a specific binary
    pub fn with_binary(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            languages: OnceCell::new(),
        }
    }

    async fn run(&self, args: &[&std::ffi::OsStr]) -> Result<std::process::Output, OcrError> {
        let child = tokio::process::Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| OcrError::EngineFailure {
                reason: format!("tesseract timed out after {}s", self.timeout.as_secs()),
            })?
            .map_err(|e| OcrError::EngineFailure {
                reason: match e.kind() {
                    std::io::ErrorKind::NotFound => {
                        format!("{} not found in PATH", self.binary.display())
                    }
                    _ => format!("failed to run {}: {e}", self.binary.display()),
                },
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::EngineFailure {
                reason: format!("tesseract exited with {}: {}", output.status, stderr.trim()),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn available_languages(&self) -> Result<Vec<String>, OcrError> {
        let languages = self
            .languages
            .get_or_try_init(|| async {
                let output = self.run(&["--list-langs".as_ref()]).await?;

                // Older releases print the list on stderr
                let text = if output.stdout.is_empty() {
                    output.stderr
                } else {
                    output.stdout
                };
                let languages = parse_language_list(&String::from_utf8_lossy(&text));
                tracing::debug!("tesseract languages: {}", languages.join(", "));
                Ok::<_, OcrError>(languages)
            })
            .await?;
        Ok(languages.clone())
    }

    async fn recognize(&self, image: &Path, language: &str) -> Result<String, OcrError> {
        let available = self.available_languages().await?;
        validate_language(language, &available)?;

        let output = self
            .run(&[
                image.as_os_str(),
                "stdout".as_ref(),
                "-l".as_ref(),
                language.as_ref(),
                "--psm".as_ref(),
                "6".as_ref(),
            ])
            .await?;

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        tracing::debug!("OCR of {} produced {} characters", image.display(), text.len());
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "tesseract"
    }
}

/// Scripted OCR engine for tests
///
/// Without scripted text, recognition returns `"Text of <file name>"`.
#[derive(Debug)]
pub struct MockOcrEngine {
    languages: Vec<String>,
    text:      Option<String>,
    error:     Option<OcrError>,
    delay:     Option<Duration>,
    calls:     AtomicU32,
}

impl Default for MockOcrEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOcrEngine {
    /// Engine with `eng` and `deu` installed
    pub fn new() -> Self {
        Self {
            languages: vec!["eng".to_string(), "deu".to_string()],
            text:      None,
            error:     None,
            delay:     None,
            calls:     AtomicU32::new(0),
        }
    }

    /// Returns `text` for every image
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Fails every call with `error`
    pub fn with_error(mut self, error: OcrError) -> Self {
        self.error = Some(error);
        self
    }

    /// Replaces the installed languages
    pub fn with_languages(mut self, languages: &[&str]) -> Self {
        self.languages = languages.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Sleeps before every recognition
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of recognize calls so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for MockOcrEngine {
    async fn available_languages(&self) -> Result<Vec<String>, OcrError> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        Ok(self.languages.clone())
    }

    async fn recognize(&self, image: &Path, language: &str) -> Result<String, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        validate_language(language, &self.languages)?;

        if !image.exists() {
            return Err(OcrError::EngineFailure {
                reason: format!("cannot read {}", image.display()),
            });
        }

        Ok(self.text.clone().unwrap_or_else(|| {
            let name = image.file_name().unwrap_or_default().to_string_lossy();
            format!("  Text of {name}\n")
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
