//! Public error taxonomy for clipboard operations.
//!
//! Platform error codes never reach this type directly: each backend
//! reports a [`BackendError`](crate::backend::BackendError), and the
//! clipboard handle translates it into one of these variants.

/// Outcome of a failed clipboard operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClipboardError {
    /// The clipboard subsystem is unreachable or stayed locked past the
    /// retry budget. Transient; callers may retry later.
    #[error("clipboard unavailable after {attempts} attempt(s): {reason}")]
    AcquireFailed { attempts: u32, reason: String },

    /// The clipboard holds nothing in a text-compatible format.
    #[error("clipboard holds no text")]
    NoTextAvailable,

    /// The clipboard holds nothing in the requested custom format.
    #[error("clipboard holds no data in format {0}")]
    FormatUnavailable(String),

    /// The platform refused the new content.
    #[error("clipboard write rejected: {0}")]
    WriteFailed(String),

    /// Content could not be converted to or from canonical text.
    #[error("clipboard encoding error: {0}")]
    EncodingError(String),
}

impl ClipboardError {
    /// Whether a caller-level retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::AcquireFailed { .. })
    }
}
