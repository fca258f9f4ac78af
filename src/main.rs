//! auto-snap-mcp: MCP server for automated document capture
//!
//! Serves the capture tools over stdio against the local X11 display.

use std::sync::Arc;

use anyhow::{Context, Result};
use auto_snap_mcp::{
    capture::WindowSystem,
    config::Config,
    error::{CaptureError, Remediable, WindowSystemError},
    mcp::AutoSnapServer,
    processing::TesseractEngine,
    util::{detect::check_dependencies, temp_files::StagingArea},
};
use rmcp::{ServiceExt, transport::stdio};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    // Respects RUST_LOG; stdout is reserved for the MCP channel
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("auto_snap_mcp=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .init();

    info!("auto-snap-mcp server starting...");

    let config = Arc::new(Config::from_env().context("Invalid configuration")?);
    info!(
        "Output: {}, staging: {}",
        config.output_dir.display(),
        config.temp_dir.display()
    );

    let backend = connect_display().await?;
    let ocr = Arc::new(TesseractEngine::new(config.ocr_timeout));

    let report = check_dependencies(backend.as_ref(), ocr.as_ref()).await;
    if !report.ocr_languages.is_empty() {
        info!("OCR languages: {}", report.ocr_languages.join(", "));
    }

    let pruned = StagingArea::new(config.temp_dir.clone()).prune_stale(config.temp_retention);
    if pruned > 0 {
        info!("Pruned {} stale staging directories", pruned);
    }

    let server = AutoSnapServer::new(config, backend, ocr);
    let sessions = server.sessions().clone();

    info!("Initializing stdio transport...");
    let service = server.serve(stdio()).await?;
    info!("Waiting for MCP requests...");

    service.waiting().await?;

    sessions.shutdown().await;
    info!("auto-snap-mcp server shutting down");
    Ok(())
}

/// Fails fast when no display can be captured
fn missing_display(cause: WindowSystemError) -> anyhow::Error {
    let error = CaptureError::DependencyMissing {
        dependency: "X11 display".to_string(),
    };
    anyhow::anyhow!("{} ({}). {}", error, cause, error.remediation_hint())
}

#[cfg(all(target_os = "linux", feature = "linux-x11"))]
async fn connect_display() -> Result<Arc<dyn WindowSystem>> {
    use auto_snap_mcp::capture::X11Backend;

    let backend = X11Backend::new().map_err(missing_display)?;
    let (width, height) = backend.screen_size().await.map_err(missing_display)?;
    info!("Backend initialized: X11 on {} ({}x{})", backend.display(), width, height);
    Ok(Arc::new(backend))
}

#[cfg(not(all(target_os = "linux", feature = "linux-x11")))]
async fn connect_display() -> Result<Arc<dyn WindowSystem>> {
    Err(missing_display(WindowSystemError::Unavailable {
        reason: "built without X11 support".to_string(),
    }))
}
