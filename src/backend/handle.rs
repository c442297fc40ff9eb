//! Scoped clipboard access: process lock, bounded retry, error translation.
//!
//! The OS clipboard is one global resource, so at most one
//! [`ClipboardHandle`] exists per process at a time. Opening takes a
//! process-wide lock, then retries the backend's single-shot `try_open`
//! with exponential backoff while it reports [`BackendError::Busy`].
//! Dropping the handle closes the backend before the lock is released,
//! whatever path the caller leaves by.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{BackendError, ClipboardBackend};
use crate::buffer::{self, Encoding, TransferBuffer};
use crate::error::ClipboardError;
use crate::format::{self, ContentKind, FormatList, NativeFormat};

/// Serialises clipboard sessions within the process. Guards no data, so a
/// poisoned lock is simply taken over.
static SESSION_LOCK: Mutex<()> = Mutex::new(());

/// Bounded retry schedule for contended opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total open attempts, including the first. Zero is treated as one.
    pub attempts: u32,
    /// Pause after the first failed attempt; doubles after each further one.
    pub initial_delay: Duration,
    /// Upper bound on any single pause.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Pause to take after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    /// Worst-case time spent sleeping before giving up.
    pub fn budget(&self) -> Duration {
        (1..self.attempts.max(1)).map(|n| self.delay_after(n)).sum()
    }
}

/// Open the clipboard, retrying while another process holds it.
///
/// Blocks while another thread of this process holds a handle. Fails with
/// [`ClipboardError::AcquireFailed`] once the policy is exhausted, or at
/// once if the backend reports the subsystem as unavailable.
pub fn open_clipboard<'a>(
    backend: &'a dyn ClipboardBackend,
    policy: &RetryPolicy,
) -> Result<ClipboardHandle<'a>, ClipboardError> {
    let lock = SESSION_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let attempts = policy.attempts.max(1);

    let mut attempt = 0;
    loop {
        attempt += 1;
        match backend.try_open() {
            Ok(()) => {
                tracing::trace!(backend = backend.name(), attempt, "clipboard opened");
                return Ok(ClipboardHandle {
                    backend,
                    open: true,
                    _lock: lock,
                });
            }
            Err(BackendError::Busy(reason)) if attempt < attempts => {
                let delay = policy.delay_after(attempt);
                tracing::debug!(
                    backend = backend.name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "clipboard busy, retrying"
                );
                std::thread::sleep(delay);
            }
            Err(e) => {
                tracing::warn!(backend = backend.name(), attempt, error = %e, "clipboard open failed");
                return Err(ClipboardError::AcquireFailed {
                    attempts: attempt,
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// An open clipboard session.
///
/// Field order matters: `Drop` closes the backend, then `_lock` is
/// released as the fields drop.
pub struct ClipboardHandle<'a> {
    backend: &'a dyn ClipboardBackend,
    open: bool,
    _lock: MutexGuard<'static, ()>,
}

impl<'a> ClipboardHandle<'a> {
    /// The backend behind this handle, for operations the handle does not
    /// wrap.
    pub fn backend(&self) -> &'a dyn ClipboardBackend {
        self.backend
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Release the backend. Safe to call any number of times; the process
    /// lock is held until the handle is dropped.
    pub fn close(&mut self) {
        if self.open {
            self.backend.close();
            self.open = false;
            tracing::trace!(backend = self.backend.name(), "clipboard closed");
        }
    }

    /// Whether the current content advertises `kind`.
    pub fn query_format(&self, kind: &ContentKind) -> Result<bool, ClipboardError> {
        self.ensure_open()?;
        let formats = self.resolve(kind).map_err(read_error)?;
        Ok(self
            .backend
            .first_available(&formats)
            .map_err(read_error)?
            .is_some())
    }

    /// Raw content for `kind` in the first native format the owner offers.
    pub fn read_format(&self, kind: &ContentKind) -> Result<TransferBuffer, ClipboardError> {
        self.ensure_open()?;
        let formats = self.resolve(kind).map_err(read_error)?;
        let Some(format) = self.backend.first_available(&formats).map_err(read_error)? else {
            return Err(absent(kind));
        };

        // The owner may change between the query and the read.
        let buffer = self
            .backend
            .read(&format)
            .map_err(read_error)?
            .ok_or_else(|| absent(kind))?;

        tracing::debug!(
            backend = self.backend.name(),
            format = %format.id,
            bytes = buffer.len(),
            "clipboard read"
        );
        Ok(buffer)
    }

    /// Replace the clipboard content with `data` under every writable
    /// native format of `kind`.
    pub fn write_format(&self, kind: &ContentKind, data: &[u8]) -> Result<(), ClipboardError> {
        self.ensure_open()?;
        let formats = self.resolve(kind).map_err(write_error)?;
        let items = formats
            .iter()
            .filter(|f| f.writable)
            .map(|f| (f.clone(), TransferBuffer::new(data.to_vec(), f.encoding)))
            .collect();
        self.store(items)
    }

    /// Read the clipboard as canonical text.
    pub fn read_text(&self) -> Result<String, ClipboardError> {
        let buffer = self.read_format(&ContentKind::Text)?;
        buffer::decode_text(&buffer, self.backend.convention())
    }

    /// Replace the clipboard content with `text`.
    pub fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        self.ensure_open()?;
        let convention = self.backend.convention();
        let formats = self.resolve(&ContentKind::Text).map_err(write_error)?;
        let items = formats
            .iter()
            .filter(|f| f.writable && f.encoding != Encoding::Opaque)
            .map(|f| buffer::encode_text(text, f.encoding, convention).map(|b| (f.clone(), b)))
            .collect::<Result<Vec<_>, _>>()?;
        self.store(items)
    }

    /// Empty the clipboard.
    pub fn clear(&self) -> Result<(), ClipboardError> {
        self.ensure_open()?;
        self.backend.clear().map_err(write_error)
    }

    fn store(&self, items: Vec<(NativeFormat, TransferBuffer)>) -> Result<(), ClipboardError> {
        if items.is_empty() {
            return Err(ClipboardError::WriteFailed(format!(
                "{} backend offers no writable format",
                self.backend.name()
            )));
        }
        let bytes: usize = items.iter().map(|(_, b)| b.len()).sum();
        let count = items.len();
        // Buffers are consumed by the backend and freed whatever the outcome.
        self.backend.write(items).map_err(write_error)?;
        tracing::debug!(backend = self.backend.name(), formats = count, bytes, "clipboard written");
        Ok(())
    }

    fn resolve(&self, kind: &ContentKind) -> Result<FormatList, BackendError> {
        format::registry().resolve(self.backend, kind)
    }

    fn ensure_open(&self) -> Result<(), ClipboardError> {
        if self.open {
            Ok(())
        } else {
            Err(ClipboardError::AcquireFailed {
                attempts: 0,
                reason: "clipboard handle already closed".into(),
            })
        }
    }
}

impl Drop for ClipboardHandle<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

fn absent(kind: &ContentKind) -> ClipboardError {
    match kind {
        ContentKind::Text => ClipboardError::NoTextAvailable,
        ContentKind::Custom(name) => ClipboardError::FormatUnavailable(name.clone()),
    }
}

/// Read-side failures mean the clipboard could not be reached.
fn read_error(e: BackendError) -> ClipboardError {
    ClipboardError::AcquireFailed {
        attempts: 1,
        reason: e.to_string(),
    }
}

fn write_error(e: BackendError) -> ClipboardError {
    ClipboardError::WriteFailed(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(10));
        assert_eq!(policy.delay_after(2), Duration::from_millis(20));
        assert_eq!(policy.delay_after(3), Duration::from_millis(40));
        assert_eq!(policy.delay_after(10), Duration::from_millis(200));
        assert_eq!(policy.delay_after(u32::MAX), Duration::from_millis(200));
    }

    #[test]
    fn budget_sums_pauses_between_attempts() {
        let policy = RetryPolicy::default();
        // 10 + 20 + 40 + 80 between five attempts.
        assert_eq!(policy.budget(), Duration::from_millis(150));
        let single = RetryPolicy {
            attempts: 0,
            ..policy
        };
        assert_eq!(single.budget(), Duration::ZERO);
    }

    #[test]
    fn busy_clipboard_is_retried_until_free() {
        let backend = MemoryBackend::new();
        backend.hold_externally(2);

        let handle = open_clipboard(&backend, &fast_policy(5)).unwrap();
        assert!(handle.is_open());
        assert_eq!(backend.open_attempts(), 3);
    }

    #[test]
    fn busy_clipboard_fails_after_budget() {
        let backend = MemoryBackend::new();
        backend.hold_externally(10);

        let err = open_clipboard(&backend, &fast_policy(3)).err().unwrap();
        match err {
            ClipboardError::AcquireFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!backend.is_open());
    }

    #[test]
    fn close_is_idempotent_and_reopen_works() {
        let backend = MemoryBackend::new();
        {
            let mut handle = open_clipboard(&backend, &fast_policy(1)).unwrap();
            handle.close();
            handle.close();
            assert!(!backend.is_open());
            assert!(matches!(
                handle.read_text(),
                Err(ClipboardError::AcquireFailed { attempts: 0, .. })
            ));
        }

        let handle = open_clipboard(&backend, &fast_policy(1)).unwrap();
        assert!(backend.is_open());
        drop(handle);
        assert!(!backend.is_open());
    }

    #[test]
    fn handle_closes_on_early_error() {
        let backend = MemoryBackend::new();
        let result = (|| -> Result<String, ClipboardError> {
            let handle = open_clipboard(&backend, &fast_policy(1))?;
            handle.read_text()
        })();

        assert_eq!(result, Err(ClipboardError::NoTextAvailable));
        assert!(!backend.is_open());
    }

    #[test]
    fn custom_kind_round_trips_raw_bytes() {
        let backend = MemoryBackend::new();
        let kind = ContentKind::Custom("application/x-clipd-test".into());
        let handle = open_clipboard(&backend, &fast_policy(1)).unwrap();

        assert_eq!(
            handle.read_format(&kind),
            Err(ClipboardError::FormatUnavailable("application/x-clipd-test".into()))
        );
        handle.write_format(&kind, &[0, 159, 146, 150]).unwrap();
        assert!(handle.query_format(&kind).unwrap());
        assert!(!handle.query_format(&ContentKind::Text).unwrap());
        assert_eq!(handle.read_format(&kind).unwrap().as_bytes(), &[0, 159, 146, 150]);
    }
}
