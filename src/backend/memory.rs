//! In-process clipboard: no system integration.
//!
//! Behaves like a service-owned clipboard that lives only as long as the
//! backend value. Used by tests and by hosts without a display. It can
//! also play the part of "another process": [`MemoryBackend::inject`]
//! replaces the content with arbitrary formats and
//! [`MemoryBackend::hold_externally`] makes upcoming opens fail as if the
//! clipboard were locked elsewhere.

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{BackendError, ClipboardBackend, OwnershipModel};
use crate::buffer::{Encoding, TextConvention, TransferBuffer};
use crate::format::{ContentKind, FormatId, NativeFormat};

/// Win32 `CF_UNICODETEXT`, used by the Windows-layout variant.
const CF_UNICODETEXT: u32 = 13;

#[derive(Debug, Default)]
struct State {
    /// Current content, one entry per advertised format.
    entries: Vec<(FormatId, Vec<u8>)>,
    open: bool,
    /// Opens still to be refused as `Busy`.
    held_externally: u32,
    open_attempts: u32,
}

/// Process-local clipboard.
#[derive(Debug)]
pub struct MemoryBackend {
    name: &'static str,
    text_format: NativeFormat,
    convention: TextConvention,
    state: Mutex<State>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// UTF-8 text, LF line endings, no terminator.
    pub fn new() -> Self {
        Self {
            name: "memory",
            text_format: NativeFormat::new(
                FormatId::Named("text/plain;charset=utf-8".into()),
                Encoding::Utf8,
            ),
            convention: TextConvention::UNIX,
            state: Mutex::new(State::default()),
        }
    }

    /// Stores text the way Win32 does: UTF-16LE, CRLF, NUL-terminated.
    pub fn windows_layout() -> Self {
        Self {
            name: "memory-utf16",
            text_format: NativeFormat::new(FormatId::Numeric(CF_UNICODETEXT), Encoding::Utf16Le),
            convention: TextConvention::WINDOWS,
            state: Mutex::new(State::default()),
        }
    }

    /// Refuse the next `opens` open attempts with `Busy`.
    pub fn hold_externally(&self, opens: u32) {
        self.state().held_externally = opens;
    }

    /// Replace the content as another clipboard owner would, bypassing
    /// the open/close protocol.
    pub fn inject(&self, format: FormatId, bytes: Vec<u8>) {
        self.state().entries = vec![(format, bytes)];
    }

    /// Formats currently advertised.
    pub fn formats(&self) -> Vec<FormatId> {
        self.state().entries.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Raw bytes stored under `format`, bypassing the open/close protocol.
    pub fn peek(&self, format: &FormatId) -> Option<Vec<u8>> {
        self.state()
            .entries
            .iter()
            .find(|(id, _)| id == format)
            .map(|(_, bytes)| bytes.clone())
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    /// Number of `try_open` calls so far, refused ones included.
    pub fn open_attempts(&self) -> u32 {
        self.state().open_attempts
    }

    /// Native format used for text.
    pub fn text_format(&self) -> &NativeFormat {
        &self.text_format
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn opened(&self) -> Result<MutexGuard<'_, State>, BackendError> {
        let state = self.state();
        if state.open {
            Ok(state)
        } else {
            Err(BackendError::Protocol("memory clipboard is not open".into()))
        }
    }
}

impl ClipboardBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn ownership(&self) -> OwnershipModel {
        OwnershipModel::ServiceOwned
    }

    fn convention(&self) -> TextConvention {
        self.convention
    }

    fn resolve_format(&self, kind: &ContentKind) -> Result<Vec<NativeFormat>, BackendError> {
        Ok(match kind {
            ContentKind::Text => vec![self.text_format.clone()],
            ContentKind::Custom(name) => {
                vec![NativeFormat::new(FormatId::Named(name.clone()), Encoding::Opaque)]
            }
        })
    }

    fn try_open(&self) -> Result<(), BackendError> {
        let mut state = self.state();
        state.open_attempts += 1;
        if state.held_externally > 0 {
            state.held_externally -= 1;
            return Err(BackendError::Busy("held by another owner".into()));
        }
        if state.open {
            return Err(BackendError::Busy("already open".into()));
        }
        state.open = true;
        Ok(())
    }

    fn close(&self) {
        self.state().open = false;
    }

    fn has_format(&self, format: &FormatId) -> Result<bool, BackendError> {
        Ok(self.opened()?.entries.iter().any(|(id, _)| id == format))
    }

    fn read(&self, format: &NativeFormat) -> Result<Option<TransferBuffer>, BackendError> {
        Ok(self
            .opened()?
            .entries
            .iter()
            .find(|(id, _)| *id == format.id)
            .map(|(_, bytes)| TransferBuffer::new(bytes.clone(), format.encoding)))
    }

    fn write(&self, items: Vec<(NativeFormat, TransferBuffer)>) -> Result<(), BackendError> {
        self.opened()?.entries = items
            .into_iter()
            .map(|(format, buffer)| (format.id, buffer.into_bytes()))
            .collect();
        Ok(())
    }

    fn clear(&self) -> Result<(), BackendError> {
        self.opened()?.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_require_open() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.has_format(&backend.text_format().id),
            Err(BackendError::Protocol(_))
        ));
        backend.try_open().unwrap();
        assert!(!backend.has_format(&backend.text_format().id).unwrap());
        backend.close();
        backend.close();
        assert!(!backend.is_open());
    }

    #[test]
    fn second_open_is_busy() {
        let backend = MemoryBackend::new();
        backend.try_open().unwrap();
        assert!(matches!(backend.try_open(), Err(BackendError::Busy(_))));
    }

    #[test]
    fn write_replaces_every_format() {
        let backend = MemoryBackend::new();
        backend.inject(FormatId::Named("image/png".into()), vec![0x89, 0x50]);
        backend.try_open().unwrap();

        let text = backend.text_format().clone();
        backend
            .write(vec![(text.clone(), TransferBuffer::new(b"hi".to_vec(), Encoding::Utf8))])
            .unwrap();

        assert_eq!(backend.formats(), vec![text.id.clone()]);
        assert_eq!(backend.peek(&text.id), Some(b"hi".to_vec()));
    }

    #[test]
    fn windows_layout_uses_unicode_text_format() {
        let backend = MemoryBackend::windows_layout();
        let formats = backend.resolve_format(&ContentKind::Text).unwrap();
        assert_eq!(formats[0].id, FormatId::Numeric(CF_UNICODETEXT));
        assert_eq!(formats[0].encoding, Encoding::Utf16Le);
        assert_eq!(backend.convention(), TextConvention::WINDOWS);
    }
}
