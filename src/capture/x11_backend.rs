//! X11 window system backend using x11rb
//!
//! This module implements [`WindowSystem`] for X11 display servers:
//!
//! - **Window Enumeration**: `_NET_CLIENT_LIST_STACKING` (falling back to
//!   `_NET_CLIENT_LIST`) with title, class, PID and absolute geometry
//! - **Focus Ranking**: stacking order plus `_NET_ACTIVE_WINDOW`, so the most
//!   recently focused window ranks highest
//! - **Activation**: EWMH `_NET_ACTIVE_WINDOW` client message to the root
//! - **Capture**: `GetImage` of the target's on-screen region from the root
//!   window, so whatever is visible is what gets captured
//! - **Key Presses**: delegated to `xdotool`
//!
//! # Architecture
//!
//! - **Connection per operation**: every call opens its own connection inside
//!   `spawn_blocking`; a dead X server surfaces as an error on the next call
//!   instead of poisoning shared state
//! - **Atom Caching**: EWMH atoms are interned once and cached via `OnceLock`
//! - **Timeouts**: every operation is bounded and reports
//!   [`WindowSystemError::Timeout`]
//!
//! # Examples
//!
//! ```rust,ignore
//! use auto_snap_mcp::capture::{WindowSystem, x11_backend::X11Backend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = X11Backend::new().unwrap();
//!     let windows = backend.list_windows().await.unwrap();
//! }
//! ```

use std::{process::Stdio, sync::OnceLock, time::Duration};

use async_trait::async_trait;
use x11rb::{
    connection::Connection as _,
    errors::ReplyError,
    protocol::{
        ErrorKind,
        xproto::{
            Atom, AtomEnum, ClientMessageEvent, ConnectionExt as _, EventMask, ImageFormat as XImageFormat,
            ImageOrder, Window,
        },
    },
    rust_connection::RustConnection,
};

use super::{ImageBuffer, WindowSystem};
use crate::{
    error::WindowSystemError,
    model::{BackendType, CaptureTarget, Geometry, WindowHandle},
};

/// Timeout for window enumeration (1.5s)
const LIST_WINDOWS_TIMEOUT_MS: u64 = 1500;

/// Timeout for a single pixel grab; large 4K regions over a remote display
/// can take a while
const CAPTURE_TIMEOUT_MS: u64 = 5000;

/// Timeout for activation requests
const FOCUS_TIMEOUT_MS: u64 = 1000;

/// Timeout for an `xdotool key` invocation
const SEND_KEY_TIMEOUT_MS: u64 = 2000;

/// Property reads are capped at 32KB
const PROPERTY_LONG_LENGTH: u32 = 8192;

/// X11 window system backend
///
/// Stateless apart from the cached atoms; safe to share across tasks via
/// `Arc`.
#[derive(Debug)]
pub struct X11Backend {
    /// Display name from `$DISPLAY`
    display: String,
    /// Cached EWMH atoms (initialized once on first use)
    atoms:   OnceLock<X11Atoms>,
}

/// Cached EWMH atoms for property queries
#[derive(Debug, Clone, Copy)]
struct X11Atoms {
    /// _NET_CLIENT_LIST: managed windows in mapping order
    net_client_list:          Atom,
    /// _NET_CLIENT_LIST_STACKING: managed windows bottom-to-top
    net_client_list_stacking: Atom,
    /// _NET_ACTIVE_WINDOW: currently focused client
    net_active_window:        Atom,
    /// _NET_WM_NAME: UTF-8 encoded window title
    net_wm_name:              Atom,
    /// WM_NAME: Latin-1 encoded window title (fallback)
    wm_name:                  Atom,
    /// WM_CLASS: instance and class names
    wm_class:                 Atom,
    /// _NET_WM_PID: owning process
    net_wm_pid:               Atom,
    /// UTF8_STRING: type atom for UTF-8 text
    utf8_string:              Atom,
}

impl X11Backend {
    /// Wraps an operation with a timeout
    ///
    /// # Errors
    ///
    /// Returns [`WindowSystemError::Timeout`] when `timeout_ms` elapses first;
    /// otherwise the inner result is passed through.
    async fn with_timeout<F, T>(future: F, timeout_ms: u64) -> Result<T, WindowSystemError>
    where
        F: std::future::Future<Output = Result<T, WindowSystemError>>,
    {
        tokio::time::timeout(Duration::from_millis(timeout_ms), future)
            .await
            .map_err(|_| {
                tracing::warn!("X11 operation timed out after {}ms", timeout_ms);
                WindowSystemError::Timeout {
                    duration_ms: timeout_ms,
                }
            })?
    }

    /// Creates a backend for the display named by `$DISPLAY`
    ///
    /// No connection is made here; the first operation connects.
    ///
    /// # Errors
    ///
    /// Returns [`WindowSystemError::Unavailable`] if `$DISPLAY` is unset or
    /// empty.
    pub fn new() -> Result<Self, WindowSystemError> {
        let display = std::env::var("DISPLAY").unwrap_or_default();
        if display.trim().is_empty() {
            return Err(WindowSystemError::Unavailable {
                reason: "DISPLAY is not set".to_string(),
            });
        }

        Ok(Self {
            display,
            atoms: OnceLock::new(),
        })
    }

    /// Display name this backend talks to
    pub fn display(&self) -> &str {
        &self.display
    }

    /// Opens a connection and checks the server answers
    ///
    /// Used by the dependency check; cheaper than listing windows.
    pub async fn screen_size(&self) -> Result<(u16, u16), WindowSystemError> {
        let display = self.display.clone();
        Self::with_timeout(
            run_blocking(move || {
                let (conn, screen_idx) = connect(&display)?;
                let screen = &conn.setup().roots[screen_idx];
                Ok((screen.width_in_pixels, screen.height_in_pixels))
            }),
            LIST_WINDOWS_TIMEOUT_MS,
        )
        .await
    }

    async fn run_with_atoms<F, T>(&self, timeout_ms: u64, op: F) -> Result<T, WindowSystemError>
    where
        F: FnOnce(&RustConnection, usize, &X11Atoms) -> Result<T, WindowSystemError> + Send + 'static,
        T: Send + 'static,
    {
        let display = self.display.clone();
        let cached = self.atoms.get().copied();

        let (value, atoms) = Self::with_timeout(
            run_blocking(move || {
                let (conn, screen_idx) = connect(&display)?;
                let atoms = match cached {
                    Some(atoms) => atoms,
                    None => intern_atoms(&conn)?,
                };
                let value = op(&conn, screen_idx, &atoms)?;
                Ok((value, atoms))
            }),
            timeout_ms,
        )
        .await?;

        let _ = self.atoms.set(atoms);
        Ok(value)
    }
}

async fn run_blocking<F, T>(op: F) -> Result<T, WindowSystemError>
where
    F: FnOnce() -> Result<T, WindowSystemError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| WindowSystemError::Unavailable {
            reason: format!("X11 worker failed: {e}"),
        })?
}

fn connect(display_name: &str) -> Result<(RustConnection, usize), WindowSystemError> {
    x11rb::connect(Some(display_name)).map_err(|e| {
        tracing::error!("Failed to connect to X11 display {}: {}", display_name, e);
        WindowSystemError::Unavailable {
            reason: format!("cannot connect to X11 display {display_name}: {e}"),
        }
    })
}

fn intern_atoms(conn: &RustConnection) -> Result<X11Atoms, WindowSystemError> {
    let intern = |name: &[u8]| -> Result<Atom, WindowSystemError> {
        conn.intern_atom(false, name)
            .map_err(ReplyError::from)
            .and_then(|cookie| cookie.reply())
            .map(|reply| reply.atom)
            .map_err(|e| map_reply_error(e, None))
    };

    let atoms = X11Atoms {
        net_client_list:          intern(b"_NET_CLIENT_LIST")?,
        net_client_list_stacking: intern(b"_NET_CLIENT_LIST_STACKING")?,
        net_active_window:        intern(b"_NET_ACTIVE_WINDOW")?,
        net_wm_name:              intern(b"_NET_WM_NAME")?,
        wm_name:                  AtomEnum::WM_NAME.into(),
        wm_class:                 AtomEnum::WM_CLASS.into(),
        net_wm_pid:               intern(b"_NET_WM_PID")?,
        utf8_string:              intern(b"UTF8_STRING")?,
    };
    tracing::debug!("Interned EWMH atoms");
    Ok(atoms)
}

/// Maps protocol errors; errors about `window` mean the target vanished
fn map_reply_error(err: ReplyError, window: Option<Window>) -> WindowSystemError {
    match err {
        ReplyError::X11Error(e) => match (e.error_kind, window) {
            (ErrorKind::Window | ErrorKind::Drawable | ErrorKind::Match, Some(id)) => {
                WindowSystemError::WindowGone { id: id.to_string() }
            }
            (kind @ ErrorKind::Access, _) => WindowSystemError::PermissionDenied {
                reason: format!("X server refused the request ({kind:?})"),
            },
            (kind, _) => WindowSystemError::Unavailable {
                reason: format!("X11 protocol error {kind:?}"),
            },
        },
        ReplyError::ConnectionError(e) => WindowSystemError::Unavailable {
            reason: format!("X11 connection lost: {e}"),
        },
    }
}

fn get_property(
    conn: &RustConnection,
    window: Window,
    property: Atom,
    kind: impl Into<Atom>,
    long_length: u32,
) -> Result<Vec<u8>, ReplyError> {
    let reply = conn
        .get_property(false, window, property, kind, 0, long_length)?
        .reply()?;
    Ok(reply.value)
}

fn get_window_list(conn: &RustConnection, root: Window, property: Atom) -> Result<Vec<Window>, ReplyError> {
    let reply = conn
        .get_property(false, root, property, AtomEnum::WINDOW, 0, 4096)?
        .reply()?;
    Ok(reply.value32().map(|ids| ids.collect()).unwrap_or_default())
}

fn window_title(conn: &RustConnection, window: Window, atoms: &X11Atoms) -> Result<String, ReplyError> {
    let utf8 = get_property(
        conn,
        window,
        atoms.net_wm_name,
        atoms.utf8_string,
        PROPERTY_LONG_LENGTH,
    )?;
    if !utf8.is_empty() {
        return Ok(String::from_utf8_lossy(&utf8).into_owned());
    }

    // Latin-1 fallback
    let latin1 = get_property(conn, window, atoms.wm_name, AtomEnum::STRING, PROPERTY_LONG_LENGTH)?;
    Ok(latin1.iter().map(|&b| b as char).collect())
}

fn window_class(conn: &RustConnection, window: Window, atoms: &X11Atoms) -> Result<String, ReplyError> {
    let bytes = get_property(conn, window, atoms.wm_class, AtomEnum::STRING, PROPERTY_LONG_LENGTH)?;

    // WM_CLASS is "instance\0class\0"; the class name is what users recognise
    let parts: Vec<String> = bytes
        .split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| s.iter().map(|&b| b as char).collect())
        .collect();
    Ok(parts.get(1).or_else(|| parts.first()).cloned().unwrap_or_default())
}

fn window_pid(conn: &RustConnection, window: Window, atoms: &X11Atoms) -> Result<u32, ReplyError> {
    let reply = conn
        .get_property(false, window, atoms.net_wm_pid, AtomEnum::CARDINAL, 0, 1)?
        .reply()?;
    Ok(reply.value32().and_then(|mut v| v.next()).unwrap_or(0))
}

/// Absolute on-screen geometry of a window
fn window_geometry(conn: &RustConnection, root: Window, window: Window) -> Result<Geometry, ReplyError> {
    let geometry = conn.get_geometry(window)?.reply()?;
    let origin = conn.translate_coordinates(window, root, 0, 0)?.reply()?;

    Ok(Geometry::new(
        i32::from(origin.dst_x),
        i32::from(origin.dst_y),
        u32::from(geometry.width),
        u32::from(geometry.height),
    ))
}

/// Clips a region to the screen; `None` if nothing remains visible
fn clip_to_screen(region: Geometry, screen_width: u32, screen_height: u32) -> Option<Geometry> {
    let left = i64::from(region.x).max(0);
    let top = i64::from(region.y).max(0);
    let right = (i64::from(region.x) + i64::from(region.width)).min(i64::from(screen_width));
    let bottom = (i64::from(region.y) + i64::from(region.height)).min(i64::from(screen_height));

    if right <= left || bottom <= top {
        return None;
    }

    Some(Geometry::new(
        left as i32,
        top as i32,
        (right - left) as u32,
        (bottom - top) as u32,
    ))
}

fn parse_window_id(id: &str) -> Result<Window, WindowSystemError> {
    let parsed = match id.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => id.parse::<u32>(),
    };
    parsed.map_err(|_| WindowSystemError::WindowGone { id: id.to_string() })
}

fn list_windows_blocking(
    conn: &RustConnection,
    screen_idx: usize,
    atoms: &X11Atoms,
) -> Result<Vec<WindowHandle>, WindowSystemError> {
    let root = conn.setup().roots[screen_idx].root;

    let mut ids =
        get_window_list(conn, root, atoms.net_client_list_stacking).map_err(|e| map_reply_error(e, None))?;
    if ids.is_empty() {
        ids = get_window_list(conn, root, atoms.net_client_list).map_err(|e| map_reply_error(e, None))?;
    }

    let active = get_window_list(conn, root, atoms.net_active_window)
        .ok()
        .and_then(|v| v.first().copied())
        .filter(|&w| w != 0);

    let mut windows = Vec::with_capacity(ids.len());
    for (position, &id) in ids.iter().enumerate() {
        // Windows can disappear between listing and querying; skip them
        let title = match window_title(conn, id, atoms) {
            Ok(title) => title,
            Err(e) => {
                tracing::trace!("Skipping window {} ({})", id, e);
                continue;
            }
        };
        if title.is_empty() {
            tracing::trace!("Skipping window {} (no title)", id);
            continue;
        }
        let Ok(geometry) = window_geometry(conn, root, id) else {
            continue;
        };

        let class = window_class(conn, id, atoms).unwrap_or_default();
        let pid = window_pid(conn, id, atoms).unwrap_or(0);
        let rank = if Some(id) == active {
            ids.len() as u32 + 1
        } else {
            position as u32 + 1
        };

        tracing::trace!("Window {}: title='{}', class='{}', pid={}, rank={}", id, title, class, pid, rank);
        windows.push(
            WindowHandle::new(id.to_string(), title, geometry)
                .with_class(class)
                .with_pid(pid)
                .with_focus_rank(rank),
        );
    }

    tracing::debug!(
        "Enumerated {} X11 windows (filtered {} untitled)",
        windows.len(),
        ids.len() - windows.len()
    );
    Ok(windows)
}

fn activate_blocking(
    conn: &RustConnection,
    screen_idx: usize,
    atoms: &X11Atoms,
    window: Window,
) -> Result<(), WindowSystemError> {
    let root = conn.setup().roots[screen_idx].root;

    // Fails fast with WindowGone if the window no longer exists
    conn.get_geometry(window)
        .map_err(ReplyError::from)
        .and_then(|cookie| cookie.reply())
        .map_err(|e| map_reply_error(e, Some(window)))?;

    // Source indication 2: request from a pager, honoured by most WMs
    let event = ClientMessageEvent::new(32, window, atoms.net_active_window, [2, 0, 0, 0, 0]);
    conn.send_event(
        false,
        root,
        EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
        event,
    )
    .map_err(|e| map_reply_error(e.into(), Some(window)))?;

    // Round trip so request errors surface here
    conn.get_input_focus()
        .map_err(ReplyError::from)
        .and_then(|cookie| cookie.reply())
        .map_err(|e| map_reply_error(e, Some(window)))?;
    Ok(())
}

fn capture_blocking(
    conn: &RustConnection,
    screen_idx: usize,
    window: Option<Window>,
) -> Result<(ImageBuffer, Geometry), WindowSystemError> {
    let screen = &conn.setup().roots[screen_idx];
    let root = screen.root;
    let (screen_width, screen_height) = (u32::from(screen.width_in_pixels), u32::from(screen.height_in_pixels));

    let requested = match window {
        Some(id) => window_geometry(conn, root, id).map_err(|e| map_reply_error(e, Some(id)))?,
        None => Geometry::new(0, 0, screen_width, screen_height),
    };
    let region = clip_to_screen(requested, screen_width, screen_height).ok_or_else(|| match window {
        Some(id) => WindowSystemError::WindowGone { id: id.to_string() },
        None => WindowSystemError::Unavailable {
            reason: "screen has no area".to_string(),
        },
    })?;

    let reply = conn
        .get_image(
            XImageFormat::Z_PIXMAP,
            root,
            region.x as i16,
            region.y as i16,
            region.width as u16,
            region.height as u16,
            !0,
        )
        .map_err(ReplyError::from)
        .and_then(|cookie| cookie.reply())
        .map_err(|e| map_reply_error(e, window))?;

    if reply.depth != 24 && reply.depth != 32 {
        return Err(WindowSystemError::Unavailable {
            reason: format!("unsupported X11 visual depth {}", reply.depth),
        });
    }

    let mut data = reply.data;
    if conn.setup().image_byte_order == ImageOrder::MSB_FIRST {
        // XRGB on big-endian servers; normalise to BGRX
        for pixel in data.chunks_exact_mut(4) {
            pixel.reverse();
        }
    }

    let image = ImageBuffer::from_bgrx(region.width, region.height, &data).ok_or_else(|| {
        WindowSystemError::Unavailable {
            reason: format!(
                "X11 returned {} bytes for a {}x{} region",
                data.len(),
                region.width,
                region.height
            ),
        }
    })?;

    Ok((image, region))
}

#[async_trait]
impl WindowSystem for X11Backend {
    /// Lists titled top-level windows
    ///
    /// # Errors
    ///
    /// - [`WindowSystemError::Unavailable`] - X11 connection failed
    /// - [`WindowSystemError::Timeout`] - enumeration exceeded 1.5s
    async fn list_windows(&self) -> Result<Vec<WindowHandle>, WindowSystemError> {
        tracing::debug!("Starting X11 window enumeration");
        self.run_with_atoms(LIST_WINDOWS_TIMEOUT_MS, list_windows_blocking)
            .await
    }

    async fn focus_window(&self, window: &WindowHandle) -> Result<(), WindowSystemError> {
        let id = parse_window_id(&window.id)?;
        tracing::debug!("Activating window {} ('{}')", id, window.title);
        self.run_with_atoms(FOCUS_TIMEOUT_MS, move |conn, screen_idx, atoms| {
            activate_blocking(conn, screen_idx, atoms, id)
        })
        .await
    }

    async fn capture(&self, target: &CaptureTarget) -> Result<(ImageBuffer, Geometry), WindowSystemError> {
        let window = match target {
            CaptureTarget::Window(handle) => Some(parse_window_id(&handle.id)?),
            CaptureTarget::FullScreen => None,
        };

        let display = self.display.clone();
        let (image, region) = Self::with_timeout(
            run_blocking(move || {
                let (conn, screen_idx) = connect(&display)?;
                capture_blocking(&conn, screen_idx, window)
            }),
            CAPTURE_TIMEOUT_MS,
        )
        .await?;

        tracing::debug!(
            "Grabbed {} at {}x{}+{}+{}",
            target.describe(),
            region.width,
            region.height,
            region.x,
            region.y
        );
        Ok((image, region))
    }

    async fn send_key(&self, window: Option<&WindowHandle>, key: &str) -> Result<(), WindowSystemError> {
        let mut command = tokio::process::Command::new("xdotool");
        command.arg("key");
        if let Some(window) = window {
            command.args(["--window", &window.id]);
        }
        command
            .arg(key)
            .env("DISPLAY", &self.display)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let key_owned = key.to_string();
        let output = Self::with_timeout(
            async {
                command
                    .output()
                    .await
                    .map_err(|e| WindowSystemError::KeySendFailed {
                        key:    key_owned.clone(),
                        reason: if e.kind() == std::io::ErrorKind::NotFound {
                            "xdotool not found in PATH".to_string()
                        } else {
                            e.to_string()
                        },
                    })
            },
            SEND_KEY_TIMEOUT_MS,
        )
        .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WindowSystemError::KeySendFailed {
                key:    key.to_string(),
                reason: format!("xdotool exited with {}: {}", output.status, stderr.trim()),
            });
        }

        tracing::debug!("Sent key '{}'", key);
        Ok(())
    }

    fn backend(&self) -> BackendType {
        BackendType::X11
    }
}
