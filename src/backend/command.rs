//! Helper-tool clipboard: read/write by running `xclip` or `wl-clipboard`.
//!
//! The tool forks a process that keeps serving the selection after we
//! return, so from our side the clipboard is service-owned. Opening only
//! checks that the tools can be found and a display is named.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::{BackendError, ClipboardBackend, OwnershipModel};
use crate::buffer::{Encoding, TextConvention, TransferBuffer};
use crate::format::{ContentKind, FormatId, NativeFormat};

/// Which helper tool family to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperTool {
    /// `xclip -selection clipboard`.
    Xclip,
    /// `wl-copy` and `wl-paste`.
    WlClipboard,
}

impl HelperTool {
    fn copy_program(self) -> &'static str {
        match self {
            Self::Xclip => "xclip",
            Self::WlClipboard => "wl-copy",
        }
    }

    fn paste_program(self) -> &'static str {
        match self {
            Self::Xclip => "xclip",
            Self::WlClipboard => "wl-paste",
        }
    }

    /// Environment variable naming the display server the tools connect to.
    fn display_var(self) -> &'static str {
        match self {
            Self::Xclip => "DISPLAY",
            Self::WlClipboard => "WAYLAND_DISPLAY",
        }
    }

    fn list_args(self) -> Vec<String> {
        match self {
            Self::Xclip => strings(&["-selection", "clipboard", "-t", "TARGETS", "-o"]),
            Self::WlClipboard => strings(&["--list-types"]),
        }
    }

    fn read_args(self, target: &str) -> Vec<String> {
        match self {
            Self::Xclip => strings(&["-selection", "clipboard", "-t", target, "-o"]),
            Self::WlClipboard => strings(&["--no-newline", "--type", target]),
        }
    }

    fn write_args(self, target: &str) -> Vec<String> {
        match self {
            Self::Xclip => strings(&["-selection", "clipboard", "-t", target, "-i"]),
            Self::WlClipboard => strings(&["--type", target]),
        }
    }

    /// Text targets in preference order; only the first is written.
    fn text_targets(self) -> Vec<NativeFormat> {
        let utf8 = |name: &str| FormatId::Named(name.to_owned());
        match self {
            Self::Xclip => vec![
                NativeFormat::new(utf8("UTF8_STRING"), Encoding::Utf8),
                NativeFormat::read_only(utf8("text/plain;charset=utf-8"), Encoding::Utf8),
                NativeFormat::read_only(utf8("STRING"), Encoding::Latin1),
                NativeFormat::read_only(utf8("TEXT"), Encoding::Utf8),
            ],
            Self::WlClipboard => vec![
                NativeFormat::new(utf8("text/plain;charset=utf-8"), Encoding::Utf8),
                NativeFormat::read_only(utf8("UTF8_STRING"), Encoding::Utf8),
                NativeFormat::read_only(utf8("text/plain"), Encoding::Utf8),
                NativeFormat::read_only(utf8("STRING"), Encoding::Latin1),
                NativeFormat::read_only(utf8("TEXT"), Encoding::Utf8),
            ],
        }
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| (*s).to_owned()).collect()
}

/// Stderr fragments the tools print when the display server cannot be
/// reached, as opposed to there being no selection.
const UNREACHABLE_DISPLAY: &[&str] = &[
    "can't open display",
    "cannot open display",
    "failed to connect to a wayland",
    "compositor doesn't seem to implement",
    "connection refused",
];

fn unreachable_display(stderr: &[u8]) -> bool {
    let stderr = String::from_utf8_lossy(stderr).to_lowercase();
    UNREACHABLE_DISPLAY.iter().any(|needle| stderr.contains(needle))
}

/// Clipboard backend driving a helper tool.
#[derive(Debug)]
pub struct CommandBackend {
    tool: HelperTool,
    copy: PathBuf,
    paste: PathBuf,
    /// Display the tools are pointed at; `None` when the environment names
    /// none.
    display: Option<OsString>,
}

impl CommandBackend {
    /// Use the tool's programs as found on `PATH`.
    pub fn new(tool: HelperTool) -> Self {
        Self::with_programs(
            tool,
            PathBuf::from(tool.copy_program()),
            PathBuf::from(tool.paste_program()),
        )
    }

    /// Use explicit program paths that speak `tool`'s command line.
    pub fn with_programs(tool: HelperTool, copy: PathBuf, paste: PathBuf) -> Self {
        let display = std::env::var_os(tool.display_var()).filter(|d| !d.is_empty());
        Self {
            tool,
            copy,
            paste,
            display,
        }
    }

    /// Point the tools at `display` instead of the one in the environment.
    pub fn with_display(mut self, display: impl Into<OsString>) -> Self {
        self.display = Some(display.into());
        self
    }

    fn command(&self, program: &Path) -> Command {
        let mut command = Command::new(program);
        if let Some(display) = &self.display {
            command.env(self.tool.display_var(), display);
        }
        command
    }

    /// Turn a failed paste invocation into "nothing there", unless the tool
    /// says the display itself is unreachable.
    fn paste_failure(&self, stderr: &[u8]) -> Result<(), BackendError> {
        if unreachable_display(stderr) {
            return Err(BackendError::Unavailable(format!(
                "{}: {}",
                self.paste.display(),
                String::from_utf8_lossy(stderr).trim()
            )));
        }
        Ok(())
    }

    fn locate(program: &Path) -> Result<PathBuf, BackendError> {
        which::which(program).map_err(|e| {
            BackendError::Unavailable(format!("{} not found: {e}", program.display()))
        })
    }

    /// Formats the current owner advertises. No owner means none.
    fn targets(&self) -> Result<Vec<String>, BackendError> {
        let output = self
            .command(&self.paste)
            .args(self.tool.list_args())
            .stdin(Stdio::null())
            .output()
            .map_err(|e| spawn_error(&self.paste, e))?;

        if !output.status.success() {
            self.paste_failure(&output.stderr)?;
            return Ok(Vec::new());
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }

    fn target_name(format: &FormatId) -> Result<&str, BackendError> {
        match format {
            FormatId::Named(name) => Ok(name),
            FormatId::Numeric(id) => Err(BackendError::Rejected(format!(
                "helper tools address formats by name, got #{id}"
            ))),
        }
    }

    fn pipe_in(&self, args: Vec<String>, content: &[u8]) -> Result<(), BackendError> {
        let mut child = self
            .command(&self.copy)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| spawn_error(&self.copy, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            let written = stdin.write_all(content);
            // Close the pipe so the tool can finish.
            drop(stdin);
            if let Err(e) = written {
                let _ = child.kill();
                let _ = child.wait();
                return Err(BackendError::Protocol(format!(
                    "failed to write to {}: {e}",
                    self.copy.display()
                )));
            }
        }

        let status = child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(BackendError::Rejected(format!(
                "{} exited with status {status}",
                self.copy.display()
            )))
        }
    }
}

fn spawn_error(program: &Path, e: std::io::Error) -> BackendError {
    BackendError::Unavailable(format!("failed to spawn {}: {e}", program.display()))
}

impl ClipboardBackend for CommandBackend {
    fn name(&self) -> &'static str {
        match self.tool {
            HelperTool::Xclip => "xclip",
            HelperTool::WlClipboard => "wl-clipboard",
        }
    }

    fn ownership(&self) -> OwnershipModel {
        OwnershipModel::ServiceOwned
    }

    fn convention(&self) -> TextConvention {
        TextConvention::UNIX
    }

    fn resolve_format(&self, kind: &ContentKind) -> Result<Vec<NativeFormat>, BackendError> {
        Ok(match kind {
            ContentKind::Text => self.tool.text_targets(),
            ContentKind::Custom(name) => {
                vec![NativeFormat::new(FormatId::Named(name.clone()), Encoding::Opaque)]
            }
        })
    }

    fn try_open(&self) -> Result<(), BackendError> {
        if self.display.is_none() {
            return Err(BackendError::Unavailable(format!(
                "${} is not set",
                self.tool.display_var()
            )));
        }
        Self::locate(&self.copy)?;
        if self.paste != self.copy {
            Self::locate(&self.paste)?;
        }
        Ok(())
    }

    fn close(&self) {}

    fn has_format(&self, format: &FormatId) -> Result<bool, BackendError> {
        let name = Self::target_name(format)?;
        Ok(self.targets()?.iter().any(|t| t == name))
    }

    fn first_available(
        &self,
        formats: &[NativeFormat],
    ) -> Result<Option<NativeFormat>, BackendError> {
        let targets = self.targets()?;
        for format in formats {
            let name = Self::target_name(&format.id)?;
            if targets.iter().any(|t| t == name) {
                return Ok(Some(format.clone()));
            }
        }
        Ok(None)
    }

    fn read(&self, format: &NativeFormat) -> Result<Option<TransferBuffer>, BackendError> {
        let name = Self::target_name(&format.id)?;
        let output = self
            .command(&self.paste)
            .args(self.tool.read_args(name))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| spawn_error(&self.paste, e))?;

        if output.status.success() {
            Ok(Some(TransferBuffer::new(output.stdout, format.encoding)))
        } else {
            self.paste_failure(&output.stderr)?;
            tracing::debug!(
                program = %self.paste.display(),
                target = name,
                status = %output.status,
                "helper tool could not convert selection"
            );
            Ok(None)
        }
    }

    fn write(&self, items: Vec<(NativeFormat, TransferBuffer)>) -> Result<(), BackendError> {
        // One tool invocation serves one target.
        let Some((format, buffer)) = items.into_iter().next() else {
            return Err(BackendError::Rejected("nothing to write".into()));
        };
        let name = Self::target_name(&format.id)?;
        self.pipe_in(self.tool.write_args(name), buffer.as_bytes())
    }

    fn clear(&self) -> Result<(), BackendError> {
        match self.tool {
            HelperTool::WlClipboard => self.pipe_in(strings(&["--clear"]), &[]),
            HelperTool::Xclip => Err(BackendError::Rejected(
                "xclip cannot release the selection without replacing it".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::sync::{Mutex, PoisonError};

    use super::*;
    use crate::backend::RetryPolicy;
    use crate::{Clipboard, ClipboardError};

    /// Minimal stand-in for `xclip` that keeps the selection in files
    /// next to the script.
    const FAKE_XCLIP: &str = r#"#!/bin/sh
store="$(dirname "$0")/store"
target=""
mode=in
while [ $# -gt 0 ]; do
  case "$1" in
    -selection) shift ;;
    -t) shift; target="$1" ;;
    -o) mode=out ;;
    -i) mode=in ;;
  esac
  shift
done
if [ "$mode" = out ]; then
  [ -f "$store" ] || exit 1
  if [ "$target" = TARGETS ]; then
    printf 'TARGETS\n%s\n' "$(cat "$store.target")"
    exit 0
  fi
  [ "$target" = "$(cat "$store.target")" ] || exit 1
  cat "$store"
else
  cat > "$store"
  printf '%s' "$target" > "$store.target"
fi
"#;

    /// Serialises tests that write and then run scripts, so no concurrent
    /// fork inherits a script still open for writing (ETXTBSY).
    static SCRIPTS: Mutex<()> = Mutex::new(());

    fn fake_xclip(dir: &Path, body: &str) -> CommandBackend {
        let script = dir.join("xclip");
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        CommandBackend::with_programs(HelperTool::Xclip, script.clone(), script).with_display(":0")
    }

    #[test]
    fn fake_xclip_round_trip() {
        let _scripts = SCRIPTS.lock().unwrap_or_else(PoisonError::into_inner);
        let dir = tempfile::tempdir().unwrap();
        let clipboard = Clipboard::new(Box::new(fake_xclip(dir.path(), FAKE_XCLIP)));

        assert!(!clipboard.has_text());
        assert_eq!(clipboard.get_text(), Err(ClipboardError::NoTextAvailable));

        clipboard.set_text("first line\nsecond line").unwrap();
        assert!(clipboard.has_text());
        assert_eq!(clipboard.get_text().unwrap(), "first line\nsecond line");

        clipboard.set_text("").unwrap();
        assert!(clipboard.has_text());
        assert_eq!(clipboard.get_text().unwrap(), "");

        let kind = ContentKind::Custom("application/x-clipd".into());
        clipboard.set_contents(&kind, b"\x01\x02").unwrap();
        assert!(!clipboard.has_text());
        assert_eq!(clipboard.get_contents(&kind).unwrap(), b"\x01\x02");

        assert!(matches!(
            clipboard.clear(),
            Err(ClipboardError::WriteFailed(_))
        ));
    }

    #[test]
    fn unreachable_display_is_acquire_failed() {
        let _scripts = SCRIPTS.lock().unwrap_or_else(PoisonError::into_inner);
        let dir = tempfile::tempdir().unwrap();
        let backend = fake_xclip(
            dir.path(),
            "#!/bin/sh\necho \"Error: Can't open display: :0\" >&2\nexit 1\n",
        );
        let clipboard = Clipboard::new(Box::new(backend));

        assert!(matches!(
            clipboard.get_text(),
            Err(ClipboardError::AcquireFailed { .. })
        ));
        assert!(!clipboard.has_text());
    }

    #[test]
    fn tool_that_stops_reading_fails_the_write() {
        let _scripts = SCRIPTS.lock().unwrap_or_else(PoisonError::into_inner);
        let dir = tempfile::tempdir().unwrap();
        let backend = fake_xclip(dir.path(), "#!/bin/sh\nexit 0\n");
        let clipboard = Clipboard::new(Box::new(backend));

        let large = "x".repeat(1 << 20);
        assert!(matches!(
            clipboard.set_text(&large),
            Err(ClipboardError::WriteFailed(_))
        ));
    }

    #[test]
    fn no_display_fails_on_open() {
        let backend = CommandBackend {
            display: None,
            ..CommandBackend::new(HelperTool::WlClipboard)
        };
        match backend.try_open() {
            Err(BackendError::Unavailable(reason)) => assert!(reason.contains("WAYLAND_DISPLAY")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn display_errors_are_told_apart_from_empty_selections() {
        assert!(unreachable_display(b"Error: Can't open display: (null)\n"));
        assert!(unreachable_display(
            b"Failed to connect to a Wayland server: No such file or directory\n"
        ));
        assert!(!unreachable_display(b"Error: target TARGETS not available\n"));
        assert!(!unreachable_display(b"No selection\n"));
    }

    #[test]
    fn missing_tool_fails_without_retry() {
        let missing = PathBuf::from("/nonexistent/clipd/xclip");
        let backend = CommandBackend::with_programs(HelperTool::Xclip, missing.clone(), missing)
            .with_display(":0");
        let clipboard = Clipboard::new(Box::new(backend)).with_retry(RetryPolicy {
            attempts: 5,
            ..RetryPolicy::default()
        });

        match clipboard.get_text() {
            Err(ClipboardError::AcquireFailed { attempts, .. }) => assert_eq!(attempts, 1),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!clipboard.has_text());
    }

    #[test]
    fn wl_clipboard_arguments() {
        let tool = HelperTool::WlClipboard;
        assert_eq!(tool.list_args(), vec!["--list-types"]);
        assert_eq!(
            tool.read_args("text/plain;charset=utf-8"),
            vec!["--no-newline", "--type", "text/plain;charset=utf-8"]
        );
        assert_eq!(tool.write_args("image/png"), vec!["--type", "image/png"]);
        assert!(tool.text_targets()[0].writable);
        assert!(tool.text_targets()[1..].iter().all(|f| !f.writable));
    }

    #[test]
    fn numeric_formats_are_rejected() {
        let backend = CommandBackend::new(HelperTool::Xclip);
        assert!(matches!(
            backend.has_format(&FormatId::Numeric(31)),
            Err(BackendError::Rejected(_))
        ));
    }
}
