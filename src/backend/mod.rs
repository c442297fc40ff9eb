//! Platform backends: one implementation per clipboard subsystem.
//!
//! Every backend satisfies [`ClipboardBackend`]. The facade never talks to
//! a backend directly: it goes through a [`ClipboardHandle`] obtained from
//! [`open_clipboard`], which serialises access within the process, retries
//! contended opens, and translates [`BackendError`] into the public
//! [`ClipboardError`](crate::ClipboardError).
//!
//! Which backend runs is decided by configuration ([`BackendKind`]), never
//! by inspecting a backend at runtime.

pub mod handle;
pub mod memory;

#[cfg(unix)]
pub mod command;
#[cfg(windows)]
pub mod windows;
#[cfg(unix)]
pub mod x11;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::buffer::{TextConvention, TransferBuffer};
use crate::config::ClipboardConfig;
use crate::format::{ContentKind, FormatId, NativeFormat};

pub use handle::{ClipboardHandle, RetryPolicy, open_clipboard};
pub use memory::MemoryBackend;

/// Errors reported by backends. Never exposed past the clipboard handle.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Another process holds the clipboard right now. Worth retrying.
    #[error("clipboard busy: {0}")]
    Busy(String),

    /// The clipboard subsystem cannot be reached at all (no display,
    /// helper tool missing, connection lost).
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),

    /// The platform refused the request.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The clipboard owner or display server misbehaved or timed out.
    #[error("protocol: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a platform decides who owns clipboard content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipModel {
    /// Content lives in this process and is served through a window; it
    /// disappears when the process exits (X11 selections).
    WindowOwned,
    /// Content is handed to a system service or helper process that keeps
    /// it after we return.
    ServiceOwned,
}

/// Capability contract of a platform clipboard backend.
///
/// `try_open` makes a single attempt; retry and serialisation live in
/// [`open_clipboard`]. All other operations are only called between a
/// successful `try_open` and the matching `close`.
pub trait ClipboardBackend: Send + Sync {
    /// Short stable name, used in logs and as the format cache key.
    fn name(&self) -> &'static str;

    fn ownership(&self) -> OwnershipModel;

    /// Line-ending and terminator rules for text on this platform.
    fn convention(&self) -> TextConvention;

    /// Native formats for `kind`, most preferred first.
    fn resolve_format(&self, kind: &ContentKind) -> Result<Vec<NativeFormat>, BackendError>;

    /// Gain access to the clipboard subsystem. One attempt, no waiting.
    fn try_open(&self) -> Result<(), BackendError>;

    /// Release access. Must tolerate being called when nothing is open.
    fn close(&self);

    /// Whether the current content advertises `format`.
    fn has_format(&self, format: &FormatId) -> Result<bool, BackendError>;

    /// First entry of `formats` the current content advertises.
    ///
    /// Backends that can list all advertised formats in one round trip
    /// should override this.
    fn first_available(
        &self,
        formats: &[NativeFormat],
    ) -> Result<Option<NativeFormat>, BackendError> {
        for format in formats {
            if self.has_format(&format.id)? {
                return Ok(Some(format.clone()));
            }
        }
        Ok(None)
    }

    /// Raw bytes for `format`, or `None` if the content lacks it.
    fn read(&self, format: &NativeFormat) -> Result<Option<TransferBuffer>, BackendError>;

    /// Replace the clipboard content with `items`, one representation per
    /// format, dropping every other format and claiming ownership.
    fn write(&self, items: Vec<(NativeFormat, TransferBuffer)>) -> Result<(), BackendError>;

    /// Replace the clipboard content with nothing.
    fn clear(&self) -> Result<(), BackendError>;

    /// Block until another client takes ownership of content this process
    /// wrote, or `timeout` elapses. Returns `true` once displaced.
    ///
    /// Only meaningful for [`OwnershipModel::WindowOwned`] backends; the
    /// others hand content off immediately and return at once.
    fn wait_displaced(&self, _timeout: Option<Duration>) -> bool {
        true
    }
}

/// Lets a caller keep its own reference to a backend it hands to a
/// [`Clipboard`](crate::Clipboard).
impl<T: ClipboardBackend + ?Sized> ClipboardBackend for std::sync::Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn ownership(&self) -> OwnershipModel {
        (**self).ownership()
    }

    fn convention(&self) -> TextConvention {
        (**self).convention()
    }

    fn resolve_format(&self, kind: &ContentKind) -> Result<Vec<NativeFormat>, BackendError> {
        (**self).resolve_format(kind)
    }

    fn try_open(&self) -> Result<(), BackendError> {
        (**self).try_open()
    }

    fn close(&self) {
        (**self).close()
    }

    fn has_format(&self, format: &FormatId) -> Result<bool, BackendError> {
        (**self).has_format(format)
    }

    fn first_available(
        &self,
        formats: &[NativeFormat],
    ) -> Result<Option<NativeFormat>, BackendError> {
        (**self).first_available(formats)
    }

    fn read(&self, format: &NativeFormat) -> Result<Option<TransferBuffer>, BackendError> {
        (**self).read(format)
    }

    fn write(&self, items: Vec<(NativeFormat, TransferBuffer)>) -> Result<(), BackendError> {
        (**self).write(items)
    }

    fn clear(&self) -> Result<(), BackendError> {
        (**self).clear()
    }

    fn wait_displaced(&self, timeout: Option<Duration>) -> bool {
        (**self).wait_displaced(timeout)
    }
}

/// Configured backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// Pick from the target OS and session environment.
    #[default]
    Auto,
    /// Native X11 selection owner.
    X11,
    /// `xclip` helper tool.
    Xclip,
    /// `wl-copy` / `wl-paste` helper tools.
    WlClipboard,
    /// Win32 clipboard.
    Windows,
    /// Process-local clipboard, no system integration.
    Memory,
}

impl BackendKind {
    /// Replace `Auto` with a concrete kind.
    ///
    /// Windows builds always use the Win32 clipboard. Elsewhere a Wayland
    /// session prefers `wl-clipboard`, an X11 session the native backend,
    /// and anything else falls back to `xclip`.
    pub fn resolve(self) -> Self {
        if self != Self::Auto {
            return self;
        }
        if cfg!(windows) {
            return Self::Windows;
        }
        if env_is_set("WAYLAND_DISPLAY") {
            Self::WlClipboard
        } else if env_is_set("DISPLAY") {
            Self::X11
        } else {
            Self::Xclip
        }
    }
}

fn env_is_set(key: &str) -> bool {
    std::env::var_os(key).is_some_and(|v| !v.is_empty())
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::X11 => "x11",
            Self::Xclip => "xclip",
            Self::WlClipboard => "wl-clipboard",
            Self::Windows => "windows",
            Self::Memory => "memory",
        })
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "x11" => Ok(Self::X11),
            "xclip" => Ok(Self::Xclip),
            "wl-clipboard" | "wayland" => Ok(Self::WlClipboard),
            "windows" | "win32" => Ok(Self::Windows),
            "memory" => Ok(Self::Memory),
            other => Err(format!(
                "unknown backend {other:?} (expected auto, x11, xclip, wl-clipboard, windows or memory)"
            )),
        }
    }
}

/// Construct the backend named by `config`.
pub fn open_backend(config: &ClipboardConfig) -> Result<Box<dyn ClipboardBackend>, BackendError> {
    let kind = config.backend.resolve();
    tracing::debug!(configured = %config.backend, resolved = %kind, "selecting clipboard backend");

    match kind {
        #[cfg(unix)]
        BackendKind::X11 => Ok(Box::new(x11::X11Backend::connect(config.read_timeout)?)),
        #[cfg(unix)]
        BackendKind::Xclip => Ok(Box::new(command::CommandBackend::new(
            command::HelperTool::Xclip,
        ))),
        #[cfg(unix)]
        BackendKind::WlClipboard => Ok(Box::new(command::CommandBackend::new(
            command::HelperTool::WlClipboard,
        ))),
        #[cfg(windows)]
        BackendKind::Windows => Ok(Box::new(windows::WindowsBackend::new())),
        BackendKind::Memory => Ok(Box::new(MemoryBackend::new())),
        other => Err(BackendError::Unavailable(format!(
            "{other} backend is not supported on this platform"
        ))),
    }
}
