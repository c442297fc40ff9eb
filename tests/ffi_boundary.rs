//! C boundary against the process-wide clipboard, backed by memory.
//!
//! Kept in its own test binary: the process-wide clipboard is configured
//! once from the environment, which this test sets before first use.

use std::ffi::{CStr, c_char};
use std::ptr;

use clipd::ffi::{
    clipd_free_text, clipd_get_text, clipd_get_text_len, clipd_has_text, clipd_set_text,
    clipd_set_text_len,
};

#[test]
fn boundary_round_trip() {
    // SAFETY: the only test in this binary; no other thread reads the
    // environment yet.
    unsafe { std::env::set_var("CLIPD_BACKEND", "memory") };

    unsafe {
        let mut out: *mut c_char = ptr::null_mut();

        // Never set: no text, and the output stays untouched.
        assert!(!clipd_has_text());
        assert!(!clipd_get_text(&mut out));
        assert!(out.is_null());

        // Explicit empty string is text.
        assert!(clipd_set_text(c"".as_ptr()));
        assert!(clipd_has_text());
        assert!(clipd_get_text(&mut out));
        assert_eq!(CStr::from_ptr(out).to_bytes(), b"");
        clipd_free_text(out);

        assert!(clipd_set_text(c"line one\r\nline two".as_ptr()));
        let mut out: *mut c_char = ptr::null_mut();
        assert!(clipd_get_text(&mut out));
        assert_eq!(CStr::from_ptr(out).to_str().unwrap(), "line one\nline two");
        clipd_free_text(out);

        // Embedded NUL only crosses with an explicit length.
        let bytes = b"a\0b";
        assert!(clipd_set_text_len(bytes.as_ptr(), bytes.len()));
        let mut out: *mut c_char = ptr::null_mut();
        assert!(!clipd_get_text(&mut out));
        assert!(out.is_null());

        let mut len = 0usize;
        assert!(clipd_get_text_len(&mut out, &mut len));
        assert_eq!(len, 3);
        assert_eq!(std::slice::from_raw_parts(out.cast::<u8>(), len + 1), b"a\0b\0");
        clipd_free_text(out);

        // Invalid UTF-8 is refused and leaves the clipboard alone.
        let invalid = [0x66u8, 0xff];
        assert!(!clipd_set_text_len(invalid.as_ptr(), invalid.len()));
        let mut len = 0usize;
        let mut out: *mut c_char = ptr::null_mut();
        assert!(clipd_get_text_len(&mut out, &mut len));
        assert_eq!(len, 3);
        clipd_free_text(out);
    }
}
