//! Public clipboard API: `set_text`, `get_text`, `has_text`.
//!
//! Every operation acquires its own [`ClipboardHandle`] and releases it
//! before returning. Use [`Clipboard::session`] to run several operations
//! under one handle, so that no other thread of this process can touch the
//! clipboard between them.

use std::sync::OnceLock;
use std::time::Duration;

use crate::backend::{self, ClipboardBackend, ClipboardHandle, OwnershipModel, RetryPolicy};
use crate::config::ClipboardConfig;
use crate::error::ClipboardError;
use crate::format::ContentKind;

/// A system clipboard reached through one backend.
pub struct Clipboard {
    backend: Box<dyn ClipboardBackend>,
    retry: RetryPolicy,
}

impl Clipboard {
    pub fn new(backend: Box<dyn ClipboardBackend>) -> Self {
        Self {
            backend,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build the backend named by `config`.
    ///
    /// Failure to reach the clipboard subsystem at all (no display, no
    /// helper tool) is reported as [`ClipboardError::AcquireFailed`].
    pub fn from_config(config: &ClipboardConfig) -> Result<Self, ClipboardError> {
        let backend =
            backend::open_backend(config).map_err(|e| ClipboardError::AcquireFailed {
                attempts: 1,
                reason: e.to_string(),
            })?;
        tracing::debug!(backend = backend.name(), "clipboard backend ready");
        Ok(Self::new(backend).with_retry(config.retry))
    }

    /// The backend, for calls outside the clipboard protocol (such as
    /// simulating another owner in tests).
    pub fn backend(&self) -> &dyn ClipboardBackend {
        &*self.backend
    }

    /// Open the clipboard for a sequence of operations. Other threads of
    /// this process block until the session is dropped.
    ///
    /// Calling any other method of this type while holding a session on
    /// the same thread deadlocks.
    pub fn session(&self) -> Result<ClipboardSession<'_>, ClipboardError> {
        Ok(ClipboardSession {
            handle: backend::open_clipboard(&*self.backend, &self.retry)?,
        })
    }

    /// Replace the clipboard content with `text`, claiming ownership.
    /// An empty string is valid content.
    pub fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        self.session()?.set_text(text)
    }

    /// Current clipboard content as text.
    pub fn get_text(&self) -> Result<String, ClipboardError> {
        self.session()?.get_text()
    }

    /// Whether text can be read right now. Never fails: anything that
    /// would make [`Self::get_text`] fail reads as `false`.
    pub fn has_text(&self) -> bool {
        match self.session() {
            Ok(session) => session.has_text(),
            Err(e) => {
                tracing::debug!(backend = self.backend.name(), error = %e, "has_text: clipboard not acquired");
                false
            }
        }
    }

    /// Replace the clipboard content with raw `data` in a custom format.
    pub fn set_contents(&self, kind: &ContentKind, data: &[u8]) -> Result<(), ClipboardError> {
        self.session()?.set_contents(kind, data)
    }

    /// Raw content in a custom format.
    pub fn get_contents(&self, kind: &ContentKind) -> Result<Vec<u8>, ClipboardError> {
        self.session()?.get_contents(kind)
    }

    /// Empty the clipboard.
    pub fn clear(&self) -> Result<(), ClipboardError> {
        self.session()?.clear()
    }

    pub fn ownership(&self) -> OwnershipModel {
        self.backend.ownership()
    }

    /// For window-owned backends, block until another client takes over
    /// the content this process wrote. Returns `true` once displaced.
    pub fn wait_displaced(&self, timeout: Option<Duration>) -> bool {
        self.backend.wait_displaced(timeout)
    }
}

/// An open clipboard. Closed when dropped.
pub struct ClipboardSession<'a> {
    handle: ClipboardHandle<'a>,
}

impl ClipboardSession<'_> {
    pub fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        self.handle.write_text(text)
    }

    pub fn get_text(&self) -> Result<String, ClipboardError> {
        self.handle.read_text()
    }

    /// `true` only when [`Self::get_text`] would succeed: an advertised
    /// format that cannot be converted or decoded does not count.
    pub fn has_text(&self) -> bool {
        match self.handle.query_format(&ContentKind::Text) {
            Ok(true) => match self.handle.read_text() {
                Ok(_) => true,
                Err(e) => {
                    tracing::debug!(error = %e, "has_text: advertised text is unreadable");
                    false
                }
            },
            Ok(false) => false,
            Err(e) => {
                tracing::debug!(error = %e, "has_text: query failed");
                false
            }
        }
    }

    pub fn set_contents(&self, kind: &ContentKind, data: &[u8]) -> Result<(), ClipboardError> {
        self.handle.write_format(kind, data)
    }

    pub fn get_contents(&self, kind: &ContentKind) -> Result<Vec<u8>, ClipboardError> {
        Ok(self.handle.read_format(kind)?.into_bytes())
    }

    pub fn clear(&self) -> Result<(), ClipboardError> {
        self.handle.clear()
    }

    /// Close now rather than at end of scope.
    pub fn close(mut self) {
        self.handle.close();
    }
}

static SYSTEM: OnceLock<Result<Clipboard, ClipboardError>> = OnceLock::new();

/// The process-wide clipboard, configured from the environment on first
/// use and kept until exit.
///
/// An invalid environment falls back to defaults. A backend that cannot
/// be constructed stays unavailable for the life of the process.
pub fn system() -> Result<&'static Clipboard, ClipboardError> {
    SYSTEM
        .get_or_init(|| {
            let config = ClipboardConfig::from_env().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "invalid clipboard configuration, using defaults");
                ClipboardConfig::default()
            });
            Clipboard::from_config(&config)
        })
        .as_ref()
        .map_err(ClipboardError::clone)
}

/// [`Clipboard::set_text`] on the process-wide clipboard.
pub fn set_text(text: &str) -> Result<(), ClipboardError> {
    system()?.set_text(text)
}

/// [`Clipboard::get_text`] on the process-wide clipboard.
pub fn get_text() -> Result<String, ClipboardError> {
    system()?.get_text()
}

/// [`Clipboard::has_text`] on the process-wide clipboard.
pub fn has_text() -> bool {
    system().is_ok_and(Clipboard::has_text)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::MemoryBackend;
    use crate::format::FormatId;

    fn clipboard_with(backend: MemoryBackend) -> (Clipboard, Arc<MemoryBackend>) {
        let backend = Arc::new(backend);
        let clipboard = Clipboard::new(Box::new(Arc::clone(&backend))).with_retry(
            RetryPolicy {
                attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        );
        (clipboard, backend)
    }

    #[test]
    fn round_trip_preserves_text() {
        let (clipboard, _) = clipboard_with(MemoryBackend::new());
        for text in ["", "hello", "multi\nline\ntext\n", "日本語 🎉", "tab\tand\0nul"] {
            clipboard.set_text(text).unwrap();
            assert_eq!(clipboard.get_text().unwrap(), text);
        }
    }

    #[test]
    fn round_trip_normalizes_line_endings() {
        let (clipboard, _) = clipboard_with(MemoryBackend::new());
        clipboard.set_text("a\r\nb\rc").unwrap();
        assert_eq!(clipboard.get_text().unwrap(), "a\nb\nc");
    }

    #[test]
    fn windows_layout_round_trip() {
        let (clipboard, backend) = clipboard_with(MemoryBackend::windows_layout());
        clipboard.set_text("one\ntwo").unwrap();

        let stored = backend.peek(&backend.text_format().id).unwrap();
        let expected: Vec<u8> = "one\r\ntwo\0"
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect();
        assert_eq!(stored, expected);
        assert_eq!(clipboard.get_text().unwrap(), "one\ntwo");
    }

    #[test]
    fn windows_layout_rejects_embedded_nul() {
        let (clipboard, backend) = clipboard_with(MemoryBackend::windows_layout());
        assert!(matches!(
            clipboard.set_text("a\0b"),
            Err(ClipboardError::EncodingError(_))
        ));
        assert!(backend.formats().is_empty());
    }

    #[test]
    fn never_set_clipboard_has_no_text() {
        let (clipboard, backend) = clipboard_with(MemoryBackend::new());
        assert_eq!(clipboard.get_text(), Err(ClipboardError::NoTextAvailable));
        assert!(!clipboard.has_text());
        assert!(!backend.is_open());
    }

    #[test]
    fn empty_string_is_text() {
        let (clipboard, _) = clipboard_with(MemoryBackend::new());
        clipboard.set_text("").unwrap();
        assert!(clipboard.has_text());
        assert_eq!(clipboard.get_text().unwrap(), "");
    }

    #[test]
    fn foreign_non_text_content_hides_text() {
        let (clipboard, backend) = clipboard_with(MemoryBackend::new());
        clipboard.set_text("mine").unwrap();
        assert!(clipboard.has_text());

        backend.inject(FormatId::Named("image/png".into()), vec![0x89, 0x50, 0x4e, 0x47]);
        assert!(!clipboard.has_text());
        assert_eq!(clipboard.get_text(), Err(ClipboardError::NoTextAvailable));
    }

    #[test]
    fn foreign_text_is_decoded() {
        let (clipboard, backend) = clipboard_with(MemoryBackend::new());
        backend.inject(backend.text_format().id.clone(), b"from\r\nelsewhere".to_vec());
        assert_eq!(clipboard.get_text().unwrap(), "from\nelsewhere");
    }

    #[test]
    fn undecodable_foreign_text_fails_and_is_not_text() {
        let (clipboard, backend) = clipboard_with(MemoryBackend::new());
        backend.inject(backend.text_format().id.clone(), vec![0xc3, 0x28]);
        assert!(matches!(
            clipboard.get_text(),
            Err(ClipboardError::EncodingError(_))
        ));
        assert!(!clipboard.has_text());
    }

    #[test]
    fn contention_past_budget_is_acquire_failed_and_has_text_false() {
        let (clipboard, backend) = clipboard_with(MemoryBackend::new());
        clipboard.set_text("kept").unwrap();

        backend.hold_externally(100);
        assert!(matches!(
            clipboard.set_text("lost"),
            Err(ClipboardError::AcquireFailed { attempts: 3, .. })
        ));
        assert!(!clipboard.has_text());

        backend.hold_externally(0);
        assert_eq!(clipboard.get_text().unwrap(), "kept");
    }

    #[test]
    fn clear_removes_text() {
        let (clipboard, _) = clipboard_with(MemoryBackend::new());
        clipboard.set_text("gone soon").unwrap();
        clipboard.clear().unwrap();
        assert!(!clipboard.has_text());
        assert_eq!(clipboard.get_text(), Err(ClipboardError::NoTextAvailable));
    }

    #[test]
    fn session_closes_on_drop_and_on_close() {
        let (clipboard, backend) = clipboard_with(MemoryBackend::new());
        {
            let session = clipboard.session().unwrap();
            session.set_text("x").unwrap();
            assert!(backend.is_open());
        }
        assert!(!backend.is_open());

        let session = clipboard.session().unwrap();
        session.close();
        assert!(!backend.is_open());
    }

    #[test]
    fn concurrent_sessions_never_interleave() {
        let (clipboard, _) = clipboard_with(MemoryBackend::new());
        let clipboard = Arc::new(clipboard);
        const THREADS: usize = 8;
        const ROUNDS: usize = 25;

        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let clipboard = Arc::clone(&clipboard);
                std::thread::spawn(move || {
                    for round in 0..ROUNDS {
                        let value = format!("thread {t} round {round}");
                        let session = clipboard.session().unwrap();
                        session.set_text(&value).unwrap();
                        assert_eq!(session.get_text().unwrap(), value);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        let last = clipboard.get_text().unwrap();
        assert!(last.ends_with(&format!("round {}", ROUNDS - 1)), "{last}");
    }
}
