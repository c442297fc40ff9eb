//! clipd: cross-platform system clipboard access.
//!
//! Three operations, [`set_text`], [`get_text`] and [`has_text`], over a
//! pluggable platform [`backend`]. Calls are synchronous and serialised
//! within the process; opening a contended clipboard is retried for a
//! bounded time. The same operations are exported to C by [`ffi`].
//!
//! ```no_run
//! clipd::set_text("copied").unwrap();
//! assert!(clipd::has_text());
//! assert_eq!(clipd::get_text().unwrap(), "copied");
//! ```

pub mod backend;
pub mod buffer;
pub mod clipboard;
pub mod config;
pub mod error;
pub mod ffi;
pub mod format;

pub use clipboard::{Clipboard, ClipboardSession, get_text, has_text, set_text, system};
pub use config::ClipboardConfig;
pub use error::ClipboardError;
pub use format::ContentKind;
