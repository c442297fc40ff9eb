//! Transfer buffers: marshalling text between canonical and native form.
//!
//! Canonical text is a Rust `String` with LF line endings. Native text is
//! whatever byte layout a backend's format expects: an [`Encoding`] for the
//! code units plus a [`TextConvention`] for line endings and termination.
//!
//! Buffers always carry an explicit length. A terminator is appended on
//! write when the platform requires one and cut on read, but nothing here
//! relies on it to find the end of the data.

use std::borrow::Cow;

use crate::error::ClipboardError;

/// Byte encoding of a native clipboard format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Utf8,
    /// Little-endian UTF-16 (Win32 `CF_UNICODETEXT`).
    Utf16Le,
    /// ISO 8859-1, used by the X11 `STRING` target.
    Latin1,
    /// Not text. Custom formats carry their bytes untouched.
    Opaque,
}

impl Encoding {
    /// Width in bytes of one code unit (and of the terminator).
    fn unit_width(self) -> usize {
        match self {
            Self::Utf16Le => 2,
            Self::Utf8 | Self::Latin1 | Self::Opaque => 1,
        }
    }
}

/// Line-ending convention of a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

/// How a platform lays out text beyond its encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextConvention {
    pub line_ending: LineEnding,
    /// Text is followed by one NUL code unit.
    pub terminated: bool,
}

impl TextConvention {
    /// X11, Wayland and helper tools: LF, length-delimited.
    pub const UNIX: Self = Self {
        line_ending: LineEnding::Lf,
        terminated: false,
    };

    /// Win32: CRLF, NUL-terminated.
    pub const WINDOWS: Self = Self {
        line_ending: LineEnding::CrLf,
        terminated: true,
    };
}

/// Bytes crossing the backend boundary, tagged with their encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferBuffer {
    bytes: Vec<u8>,
    encoding: Encoding,
}

impl TransferBuffer {
    pub fn new(bytes: Vec<u8>, encoding: Encoding) -> Self {
        Self { bytes, encoding }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Encode canonical text into the native layout for `encoding`.
///
/// Line endings are normalised first, so `"a\r\nb"` and `"a\nb"` encode
/// identically. Text containing NUL is refused when the convention uses
/// NUL as a terminator, since a reader would silently truncate it.
pub fn encode_text(
    text: &str,
    encoding: Encoding,
    convention: TextConvention,
) -> Result<TransferBuffer, ClipboardError> {
    if convention.terminated && text.contains('\0') {
        return Err(ClipboardError::EncodingError(
            "text contains NUL, which this platform uses as a terminator".into(),
        ));
    }

    let canonical = normalize_newlines(text);
    let native: Cow<'_, str> = match convention.line_ending {
        LineEnding::Lf => canonical,
        LineEnding::CrLf => Cow::Owned(canonical.replace('\n', "\r\n")),
    };

    let mut bytes = match encoding {
        Encoding::Utf8 => native.into_owned().into_bytes(),
        Encoding::Utf16Le => native.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        Encoding::Latin1 => native
            .chars()
            .map(|c| {
                u8::try_from(u32::from(c)).map_err(|_| {
                    ClipboardError::EncodingError(format!(
                        "character U+{:04X} has no Latin-1 representation",
                        u32::from(c)
                    ))
                })
            })
            .collect::<Result<Vec<u8>, _>>()?,
        Encoding::Opaque => {
            return Err(ClipboardError::EncodingError(
                "opaque format cannot carry text".into(),
            ));
        }
    };

    if convention.terminated {
        bytes.resize(bytes.len() + encoding.unit_width(), 0);
    }

    Ok(TransferBuffer::new(bytes, encoding))
}

/// Decode a native buffer into canonical text.
///
/// For terminated conventions everything from the first NUL code unit on
/// is dropped; platforms are free to hand back oversized allocations.
pub fn decode_text(
    buffer: &TransferBuffer,
    convention: TextConvention,
) -> Result<String, ClipboardError> {
    let bytes = buffer.as_bytes();

    let text = match buffer.encoding() {
        Encoding::Utf8 => {
            let bytes = if convention.terminated {
                until_nul(bytes)
            } else {
                bytes
            };
            std::str::from_utf8(bytes)
                .map_err(|e| ClipboardError::EncodingError(format!("invalid UTF-8: {e}")))?
                .to_owned()
        }
        Encoding::Utf16Le => {
            if bytes.len() % 2 != 0 {
                return Err(ClipboardError::EncodingError(format!(
                    "UTF-16 data has odd length {}",
                    bytes.len()
                )));
            }
            let mut units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            if convention.terminated
                && let Some(end) = units.iter().position(|&u| u == 0)
            {
                units.truncate(end);
            }
            String::from_utf16(&units)
                .map_err(|e| ClipboardError::EncodingError(format!("invalid UTF-16: {e}")))?
        }
        Encoding::Latin1 => {
            let bytes = if convention.terminated {
                until_nul(bytes)
            } else {
                bytes
            };
            bytes.iter().map(|&b| char::from(b)).collect()
        }
        Encoding::Opaque => {
            return Err(ClipboardError::EncodingError(
                "opaque format cannot be read as text".into(),
            ));
        }
    };

    Ok(match normalize_newlines(&text) {
        Cow::Borrowed(_) => text,
        Cow::Owned(normalized) => normalized,
    })
}

/// Rewrite CRLF and lone CR line endings to LF.
pub fn normalize_newlines(text: &str) -> Cow<'_, str> {
    if !text.contains('\r') {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
}

fn until_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}
