//! C-callable boundary over the process-wide clipboard.
//!
//! See `include/clipd.h` for the C declarations. Strings handed out by
//! `clipd_get_text*` are allocated with `malloc` and must be released with
//! [`clipd_free_text`] (which calls `free`). Nothing is allocated and no
//! output is written when a call returns `false`.

use std::ffi::{CStr, c_char};
use std::ptr;

use crate::clipboard;

/// Replace the clipboard text with a NUL-terminated UTF-8 string.
///
/// Returns `false` for NULL, for invalid UTF-8, and on any clipboard
/// failure.
///
/// # Safety
///
/// `text` must be NULL or point to a NUL-terminated string that stays
/// valid for the duration of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn clipd_set_text(text: *const c_char) -> bool {
    if text.is_null() {
        return false;
    }
    // SAFETY: non-null and NUL-terminated per the caller contract.
    let text = unsafe { CStr::from_ptr(text) };
    set_bytes(text.to_bytes())
}

/// Replace the clipboard text with `len` bytes of UTF-8 at `text`.
///
/// `text` may be NULL when `len` is zero.
///
/// # Safety
///
/// When `len` is non-zero, `text` must point to at least `len` readable
/// bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn clipd_set_text_len(text: *const u8, len: usize) -> bool {
    let bytes: &[u8] = if len == 0 {
        &[]
    } else if text.is_null() {
        return false;
    } else {
        // SAFETY: non-null with `len` readable bytes per the caller contract.
        unsafe { std::slice::from_raw_parts(text, len) }
    };
    set_bytes(bytes)
}

/// Copy the clipboard text into a new NUL-terminated UTF-8 string.
///
/// Fails if the text itself contains NUL; use [`clipd_get_text_len`]
/// for such content.
///
/// # Safety
///
/// `out` must be NULL or point to writable storage for one pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn clipd_get_text(out: *mut *mut c_char) -> bool {
    if out.is_null() {
        return false;
    }
    let Some(text) = get_text() else {
        return false;
    };
    if text.contains('\0') {
        tracing::warn!("clipboard text contains NUL; not representable as a C string");
        return false;
    }
    let Some(buffer) = alloc_c_string(text.as_bytes()) else {
        return false;
    };
    // SAFETY: `out` is non-null and writable per the caller contract.
    unsafe { *out = buffer };
    true
}

/// Copy the clipboard text into a new buffer and report its length in
/// bytes, excluding the NUL terminator that is still appended.
///
/// # Safety
///
/// `out` and `len` must each be NULL or point to writable storage for
/// one value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn clipd_get_text_len(out: *mut *mut c_char, len: *mut usize) -> bool {
    if out.is_null() || len.is_null() {
        return false;
    }
    let Some(text) = get_text() else {
        return false;
    };
    let Some(buffer) = alloc_c_string(text.as_bytes()) else {
        return false;
    };
    // SAFETY: both pointers are non-null and writable per the caller contract.
    unsafe {
        *out = buffer;
        *len = text.len();
    }
    true
}

/// Whether the clipboard currently offers text.
#[unsafe(no_mangle)]
pub extern "C" fn clipd_has_text() -> bool {
    clipboard::has_text()
}

/// Release a string returned by `clipd_get_text*`. NULL is ignored.
///
/// # Safety
///
/// `text` must be NULL or a pointer obtained from this library that has
/// not been freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn clipd_free_text(text: *mut c_char) {
    if !text.is_null() {
        // SAFETY: allocated with libc::malloc in alloc_c_string.
        unsafe { libc::free(text.cast()) };
    }
}

fn set_bytes(bytes: &[u8]) -> bool {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!(error = %e, "clipd_set_text: invalid UTF-8");
            return false;
        }
    };
    match clipboard::set_text(text) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "clipd_set_text failed");
            false
        }
    }
}

fn get_text() -> Option<String> {
    clipboard::get_text()
        .map_err(|e| tracing::debug!(error = %e, "clipd_get_text failed"))
        .ok()
}

/// Copy `bytes` plus a NUL terminator into a `malloc` allocation.
fn alloc_c_string(bytes: &[u8]) -> Option<*mut c_char> {
    // SAFETY: plain allocation of a non-zero size.
    let buffer = unsafe { libc::malloc(bytes.len() + 1) }.cast::<u8>();
    if buffer.is_null() {
        tracing::warn!(bytes = bytes.len() + 1, "malloc failed");
        return None;
    }
    // SAFETY: `buffer` has room for `bytes.len() + 1` bytes and cannot
    // overlap the borrowed slice.
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), buffer, bytes.len());
        *buffer.add(bytes.len()) = 0;
    }
    Some(buffer.cast())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_arguments_are_refused_without_touching_the_clipboard() {
        unsafe {
            assert!(!clipd_set_text(ptr::null()));
            assert!(!clipd_set_text_len(ptr::null(), 4));
            assert!(!clipd_get_text(ptr::null_mut()));
            assert!(!clipd_get_text_len(ptr::null_mut(), ptr::null_mut()));
            clipd_free_text(ptr::null_mut());
        }
    }

    #[test]
    fn c_string_allocation_is_terminated_and_freeable() {
        let buffer = alloc_c_string(b"copy me").unwrap();
        unsafe {
            assert_eq!(CStr::from_ptr(buffer).to_str().unwrap(), "copy me");
            clipd_free_text(buffer);
        }

        let empty = alloc_c_string(b"").unwrap();
        unsafe {
            assert_eq!(*empty, 0);
            clipd_free_text(empty);
        }
    }

    #[test]
    fn embedded_nul_survives_explicit_length_allocation() {
        let buffer = alloc_c_string(b"a\0b").unwrap();
        unsafe {
            let bytes = std::slice::from_raw_parts(buffer.cast::<u8>(), 4);
            assert_eq!(bytes, b"a\0b\0");
            clipd_free_text(buffer);
        }
    }
}
