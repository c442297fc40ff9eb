mod cli;

use std::io::{Read, Write};

use clap::Parser;
use cli::{Cli, Command};
use clipd::Clipboard;
use clipd::backend::OwnershipModel;
use tracing_subscriber::EnvFilter;

fn main() {
    // stdout carries clipboard content; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.options.config();

    let clipboard = match Clipboard::from_config(&config) {
        Ok(clipboard) => clipboard,
        Err(e) => {
            tracing::error!(error = %e, backend = %config.backend, "clipboard unavailable");
            eprintln!("clipd: {e}");
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Command::Set { text, no_wait } => set(&clipboard, text, no_wait),
        Command::Get => get(&clipboard),
        Command::Has => {
            let has = clipboard.has_text();
            println!("{has}");
            if has { 0 } else { 1 }
        }
        Command::Clear => match clipboard.clear() {
            Ok(()) => 0,
            Err(e) => fail("clear", &e),
        },
    };

    std::process::exit(code);
}

fn set(clipboard: &Clipboard, text: Option<String>, no_wait: bool) -> i32 {
    let text = match text {
        Some(text) => text,
        None => {
            let mut input = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut input) {
                tracing::error!(error = %e, "failed to read stdin");
                eprintln!("clipd set: {e}");
                return 1;
            }
            input
        }
    };

    if let Err(e) = clipboard.set_text(&text) {
        return fail("set", &e);
    }

    // Window-owned content dies with this process; keep serving it.
    if clipboard.ownership() == OwnershipModel::WindowOwned && !no_wait {
        tracing::info!("serving clipboard until another client takes ownership");
        clipboard.wait_displaced(None);
    }
    0
}

fn get(clipboard: &Clipboard) -> i32 {
    match clipboard.get_text() {
        Ok(text) => {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = stdout.write_all(text.as_bytes()).and_then(|()| stdout.flush()) {
                tracing::error!(error = %e, "failed to write stdout");
                return 1;
            }
            0
        }
        Err(e) => fail("get", &e),
    }
}

fn fail(command: &str, e: &clipd::ClipboardError) -> i32 {
    tracing::error!(error = %e, command, "clipboard operation failed");
    eprintln!("clipd {command}: {e}");
    1
}
