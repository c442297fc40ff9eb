//! Win32 clipboard via `clipboard-win`.
//!
//! The clipboard is opened without an owner window, so after
//! `EmptyClipboard` the data belongs to the system and survives this
//! process. `OpenClipboard` fails while another process has it open; that
//! is reported as `Busy` so the open is retried.

use clipboard_win::raw;

use super::{BackendError, ClipboardBackend, OwnershipModel};
use crate::buffer::{Encoding, TextConvention, TransferBuffer};
use crate::format::{ContentKind, FormatId, NativeFormat};

const CF_UNICODETEXT: u32 = 13;

/// Win32 implementation of [`ClipboardBackend`].
#[derive(Debug, Default)]
pub struct WindowsBackend;

impl WindowsBackend {
    pub fn new() -> Self {
        Self
    }

    fn format_number(format: &FormatId) -> Result<u32, BackendError> {
        match format {
            FormatId::Numeric(id) => Ok(*id),
            FormatId::Named(name) => Err(BackendError::Rejected(format!(
                "Win32 formats are numbers, got name {name:?}"
            ))),
        }
    }
}

impl ClipboardBackend for WindowsBackend {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn ownership(&self) -> OwnershipModel {
        OwnershipModel::ServiceOwned
    }

    fn convention(&self) -> TextConvention {
        TextConvention::WINDOWS
    }

    fn resolve_format(&self, kind: &ContentKind) -> Result<Vec<NativeFormat>, BackendError> {
        match kind {
            ContentKind::Text => Ok(vec![NativeFormat::new(
                FormatId::Numeric(CF_UNICODETEXT),
                Encoding::Utf16Le,
            )]),
            ContentKind::Custom(name) => {
                let id = raw::register_format(name).ok_or_else(|| {
                    BackendError::Rejected(format!("RegisterClipboardFormat({name:?}) failed"))
                })?;
                Ok(vec![NativeFormat::new(FormatId::Numeric(id.get()), Encoding::Opaque)])
            }
        }
    }

    fn try_open(&self) -> Result<(), BackendError> {
        raw::open().map_err(|e| BackendError::Busy(format!("OpenClipboard: {e}")))
    }

    fn close(&self) {
        // Fails harmlessly when the clipboard is not open.
        let _ = raw::close();
    }

    fn has_format(&self, format: &FormatId) -> Result<bool, BackendError> {
        Ok(raw::is_format_avail(Self::format_number(format)?))
    }

    fn read(&self, format: &NativeFormat) -> Result<Option<TransferBuffer>, BackendError> {
        let id = Self::format_number(&format.id)?;
        if !raw::is_format_avail(id) {
            return Ok(None);
        }

        let mut bytes = Vec::new();
        raw::get_vec(id, &mut bytes)
            .map_err(|e| BackendError::Protocol(format!("GetClipboardData: {e}")))?;
        Ok(Some(TransferBuffer::new(bytes, format.encoding)))
    }

    fn write(&self, items: Vec<(NativeFormat, TransferBuffer)>) -> Result<(), BackendError> {
        raw::empty().map_err(|e| BackendError::Rejected(format!("EmptyClipboard: {e}")))?;
        for (format, buffer) in items {
            let id = Self::format_number(&format.id)?;
            raw::set_without_clear(id, buffer.as_bytes())
                .map_err(|e| BackendError::Rejected(format!("SetClipboardData: {e}")))?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), BackendError> {
        raw::empty().map_err(|e| BackendError::Rejected(format!("EmptyClipboard: {e}")))
    }
}
