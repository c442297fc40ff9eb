//! Format registry: logical content kinds to native format identifiers.
//!
//! Each backend knows how to name a [`ContentKind`] natively (an X11 atom,
//! a Win32 format number, a MIME type for helper tools). The registry asks
//! once per backend and kind and keeps the answer for the life of the
//! process.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use crate::backend::{BackendError, ClipboardBackend};
use crate::buffer::Encoding;

/// What the caller wants to put on or take off the clipboard.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Text,
    /// Application-defined format, named the way the platform names it
    /// (e.g. `application/x-myapp` or a registered Win32 format name).
    Custom(String),
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

/// Platform identifier for a clipboard format. Opaque to callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FormatId {
    /// X11 atom or Win32 clipboard format number.
    Numeric(u32),
    /// MIME type or target name understood by a helper tool.
    Named(String),
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(id) => write!(f, "#{id}"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// A native format together with the byte encoding it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeFormat {
    pub id: FormatId,
    pub encoding: Encoding,
    /// Advertised when this process writes. Read-only formats are
    /// accepted from other owners but never offered.
    pub writable: bool,
}

impl NativeFormat {
    pub fn new(id: FormatId, encoding: Encoding) -> Self {
        Self {
            id,
            encoding,
            writable: true,
        }
    }

    pub fn read_only(id: FormatId, encoding: Encoding) -> Self {
        Self {
            id,
            encoding,
            writable: false,
        }
    }
}

/// Resolved formats for one kind, most preferred first.
pub type FormatList = Arc<[NativeFormat]>;

/// Process-wide cache of resolved formats.
#[derive(Debug, Default)]
pub struct FormatRegistry {
    resolved: Mutex<HashMap<(&'static str, ContentKind), FormatList>>,
}

static REGISTRY: LazyLock<FormatRegistry> = LazyLock::new(FormatRegistry::default);

/// The registry shared by every clipboard in this process.
pub fn registry() -> &'static FormatRegistry {
    &REGISTRY
}

impl FormatRegistry {
    /// Resolve `kind` for `backend`, consulting the backend only on the
    /// first request.
    ///
    /// A backend that names no format for the kind is an error; an empty
    /// list would make every query silently negative.
    pub fn resolve(
        &self,
        backend: &dyn ClipboardBackend,
        kind: &ContentKind,
    ) -> Result<FormatList, BackendError> {
        let key = (backend.name(), kind.clone());

        if let Some(list) = self
            .resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Arc::clone(list));
        }

        let formats = backend.resolve_format(kind)?;
        if formats.is_empty() {
            return Err(BackendError::Rejected(format!(
                "{} backend has no native format for {kind}",
                backend.name()
            )));
        }

        tracing::debug!(
            backend = backend.name(),
            kind = %kind,
            formats = formats.len(),
            "resolved clipboard formats"
        );

        let list: FormatList = formats.into();
        let mut resolved = self.resolved.lock().unwrap_or_else(PoisonError::into_inner);
        // A concurrent resolver may have won; keep the first answer.
        Ok(Arc::clone(resolved.entry(key).or_insert(list)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::backend::OwnershipModel;
    use crate::buffer::{TextConvention, TransferBuffer};

    /// Backend that only answers format resolution, counting calls.
    struct CountingBackend {
        name: &'static str,
        calls: AtomicUsize,
    }

    impl ClipboardBackend for CountingBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn ownership(&self) -> OwnershipModel {
            OwnershipModel::ServiceOwned
        }

        fn convention(&self) -> TextConvention {
            TextConvention::UNIX
        }

        fn resolve_format(&self, kind: &ContentKind) -> Result<Vec<NativeFormat>, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match kind {
                ContentKind::Text => Ok(vec![NativeFormat::new(
                    FormatId::Named("text/plain".into()),
                    Encoding::Utf8,
                )]),
                ContentKind::Custom(_) => Ok(Vec::new()),
            }
        }

        fn try_open(&self) -> Result<(), BackendError> {
            Ok(())
        }

        fn close(&self) {}

        fn has_format(&self, _format: &FormatId) -> Result<bool, BackendError> {
            Ok(false)
        }

        fn read(&self, _format: &NativeFormat) -> Result<Option<TransferBuffer>, BackendError> {
            Ok(None)
        }

        fn write(&self, _items: Vec<(NativeFormat, TransferBuffer)>) -> Result<(), BackendError> {
            Ok(())
        }

        fn clear(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[test]
    fn resolution_is_cached_per_backend_and_kind() {
        let backend = CountingBackend {
            name: "counting-cache",
            calls: AtomicUsize::new(0),
        };
        let registry = FormatRegistry::default();

        let first = registry.resolve(&backend, &ContentKind::Text).unwrap();
        let second = registry.resolve(&backend, &ContentKind::Text).unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first[0].id, FormatId::Named("text/plain".into()));
    }

    #[test]
    fn empty_resolution_is_rejected_and_not_cached() {
        let backend = CountingBackend {
            name: "counting-empty",
            calls: AtomicUsize::new(0),
        };
        let registry = FormatRegistry::default();
        let kind = ContentKind::Custom("application/x-nothing".into());

        assert!(matches!(
            registry.resolve(&backend, &kind),
            Err(BackendError::Rejected(_))
        ));
        assert!(registry.resolve(&backend, &kind).is_err());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn display_forms() {
        assert_eq!(ContentKind::Text.to_string(), "text");
        assert_eq!(ContentKind::Custom("image/png".into()).to_string(), "image/png");
        assert_eq!(FormatId::Numeric(13).to_string(), "#13");
        assert_eq!(FormatId::Named("UTF8_STRING".into()).to_string(), "UTF8_STRING");
    }
}
