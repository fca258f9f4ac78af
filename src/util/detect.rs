//! Platform detection and external dependency checks
//!
//! Detection reads the environment through an injectable lookup so tests do
//! not need to mutate the process environment.

use std::{process::Stdio, time::Duration};

use crate::{
    capture::WindowSystem,
    model::{BackendType, DependencyReport, DependencyStatus, PlatformInfo},
    processing::ocr::OcrEngine,
};

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

const XDOTOOL_HINT: &str = "sudo apt-get install xdotool";
const TESSERACT_HINT: &str = "sudo apt-get install tesseract-ocr";
const DISPLAY_HINT: &str = "Run inside an X11 session and make sure DISPLAY is set (e.g. DISPLAY=:0)";

/// Detects the current platform and display backend
///
/// # Examples
///
/// ```
/// use auto_snap_mcp::util::detect::detect_platform;
///
/// let info = detect_platform();
/// assert!(!info.os.is_empty());
/// ```
pub fn detect_platform() -> PlatformInfo {
    detect_platform_with_env(|key| std::env::var(key).ok())
}

/// Detects the platform using a custom environment lookup
///
/// X11 is reported whenever `DISPLAY` is set on Linux, including XWayland
/// sessions where `WAYLAND_DISPLAY` is also present.
pub fn detect_platform_with_env<F>(get_env: F) -> PlatformInfo
where
    F: Fn(&str) -> Option<String>,
{
    let os = std::env::consts::OS.to_string();
    let has_display = get_env("DISPLAY").is_some_and(|v| !v.trim().is_empty());

    let backend = if os == "linux" && has_display {
        BackendType::X11
    } else {
        if get_env("WAYLAND_DISPLAY").is_some() {
            tracing::warn!("Wayland session without DISPLAY; X11 capture is unavailable");
        }
        BackendType::None
    };

    PlatformInfo::new(os, backend)
}

/// Runs `program args...` and returns the first line of its output
///
/// # Errors
///
/// A human-readable reason: not installed, non-zero exit, or timeout.
pub async fn query_command(program: &str, args: &[&str]) -> Result<String, String> {
    let output = tokio::time::timeout(
        QUERY_TIMEOUT,
        tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| format!("{program} did not answer within {}s", QUERY_TIMEOUT.as_secs()))?
    .map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => format!("{program} not found in PATH"),
        _ => format!("failed to run {program}: {e}"),
    })?;

    if !output.status.success() {
        return Err(format!("{program} exited with {}", output.status));
    }

    // Some tools print their version on stderr
    let text = if output.stdout.is_empty() {
        output.stderr
    } else {
        output.stdout
    };
    Ok(String::from_utf8_lossy(&text)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string())
}

/// Checks everything the pipeline depends on
///
/// The report is `ok` when the window system answers; OCR and key sending
/// are optional and only reduce functionality.
pub async fn check_dependencies(system: &dyn WindowSystem, ocr: &dyn OcrEngine) -> DependencyReport {
    let platform = PlatformInfo::new(std::env::consts::OS.to_string(), system.backend());

    let display = match system.list_windows().await {
        Ok(windows) => DependencyStatus::available(
            "display",
            Some(format!("{} backend, {} windows visible", system.backend(), windows.len())),
        ),
        Err(e) => DependencyStatus::missing("display", e.to_string(), DISPLAY_HINT),
    };

    let xdotool = match system.backend() {
        BackendType::X11 => match query_command("xdotool", &["--version"]).await {
            Ok(version) => DependencyStatus::available("xdotool", Some(version)),
            Err(reason) => DependencyStatus::missing("xdotool", reason, XDOTOOL_HINT),
        },
        other => DependencyStatus::available("xdotool", Some(format!("provided by {other} backend"))),
    };

    let (tesseract, ocr_languages) = match ocr.available_languages().await {
        Ok(languages) => (
            DependencyStatus::available(
                "tesseract",
                Some(format!("{} ({} languages)", ocr.name(), languages.len())),
            ),
            languages,
        ),
        Err(e) => (
            DependencyStatus::missing("tesseract", e.to_string(), TESSERACT_HINT),
            Vec::new(),
        ),
    };

    let ok = display.available;
    for status in [&display, &xdotool, &tesseract] {
        if !status.available {
            tracing::warn!(
                "Dependency '{}' unavailable: {}",
                status.name,
                status.detail.as_deref().unwrap_or("unknown")
            );
        }
    }

    DependencyReport {
        platform,
        display,
        xdotool,
        tesseract,
        ocr_languages,
        ok,
    }
}
