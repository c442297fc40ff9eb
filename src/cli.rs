use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use clipd::ClipboardConfig;
use clipd::backend::{BackendKind, RetryPolicy};
use clipd::config::{ENV_ATTEMPTS, ENV_BACKEND, ENV_READ_TIMEOUT_MS, ENV_RETRY_DELAY_MS};

#[derive(Parser)]
#[command(name = "clipd", about = "Read and write the system clipboard")]
pub struct Cli {
    #[command(flatten)]
    pub options: Options,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args)]
pub struct Options {
    /// Clipboard backend: auto, x11, xclip, wl-clipboard, windows, memory
    #[arg(long, global = true, env = ENV_BACKEND, default_value = "auto")]
    pub backend: BackendKind,

    /// Attempts to open a busy clipboard before giving up
    #[arg(long, global = true, env = ENV_ATTEMPTS, default_value_t = 5)]
    pub attempts: u32,

    /// Pause after the first failed open, doubled on each retry
    #[arg(long, global = true, env = ENV_RETRY_DELAY_MS, default_value_t = 10)]
    pub retry_delay_ms: u64,

    /// How long to wait for another selection owner to answer
    #[arg(long, global = true, env = ENV_READ_TIMEOUT_MS, default_value_t = 1000)]
    pub read_timeout_ms: u64,
}

impl Options {
    pub fn config(&self) -> ClipboardConfig {
        ClipboardConfig {
            backend: self.backend,
            retry: RetryPolicy {
                attempts: self.attempts,
                initial_delay: Duration::from_millis(self.retry_delay_ms),
                ..RetryPolicy::default()
            },
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Replace the clipboard text
    Set {
        /// Text to copy; read from stdin when omitted
        text: Option<String>,

        /// Exit at once even if the backend loses the content on exit
        #[arg(long)]
        no_wait: bool,
    },

    /// Print the clipboard text
    Get,

    /// Exit 0 if the clipboard holds text, 1 otherwise
    Has,

    /// Empty the clipboard
    Clear,
}
