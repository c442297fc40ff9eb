//! Native X11 clipboard: this process becomes the `CLIPBOARD` selection
//! owner through a hidden surrogate window.
//!
//! X11 keeps no clipboard data of its own: the owner answers every
//! `SelectionRequest` for as long as it lives. An event-pump thread does
//! that answering (see [`pump`]), and forwards the replies to our own
//! conversions back to the calling thread (see [`transfer`]).
//!
//! Content written here disappears when the backend is dropped, unless a
//! clipboard manager copied it first.

mod pump;
mod transfer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::Event;
use x11rb::protocol::xproto::{
    self, Atom, ClientMessageEvent, CreateWindowAux, EventMask, Window, WindowClass,
};
use x11rb::rust_connection::RustConnection;

use super::{BackendError, ClipboardBackend, OwnershipModel};
use crate::buffer::{Encoding, TextConvention, TransferBuffer};
use crate::format::{ContentKind, FormatId, NativeFormat};
use pump::Selection;

/// ChangeProperty request header, subtracted from the request size limit.
const CHANGE_PROPERTY_HEADER: usize = 24;

/// Pre-interned atoms.
#[derive(Debug, Clone, Copy)]
pub(super) struct Atoms {
    pub clipboard: Atom,
    pub targets: Atom,
    pub utf8_string: Atom,
    pub text_plain_utf8: Atom,
    pub string: Atom,
    pub text: Atom,
    pub incr: Atom,
    /// Property on our window that conversions are delivered into. Also
    /// the type of the wake-up message sent to the pump on shutdown.
    pub transfer: Atom,
    /// Property touched to obtain a server timestamp.
    pub timestamp: Atom,
}

impl Atoms {
    fn intern(conn: &RustConnection) -> Result<Self, BackendError> {
        Ok(Self {
            clipboard: intern(conn, b"CLIPBOARD")?,
            targets: intern(conn, b"TARGETS")?,
            utf8_string: intern(conn, b"UTF8_STRING")?,
            text_plain_utf8: intern(conn, b"text/plain;charset=utf-8")?,
            string: xproto::AtomEnum::STRING.into(),
            text: intern(conn, b"TEXT")?,
            incr: intern(conn, b"INCR")?,
            transfer: intern(conn, b"CLIPD_TRANSFER")?,
            timestamp: intern(conn, b"CLIPD_TIMESTAMP")?,
        })
    }
}

fn intern(conn: &RustConnection, name: &[u8]) -> Result<Atom, BackendError> {
    Ok(xproto::intern_atom(conn, false, name)
        .map_err(protocol("intern_atom"))?
        .reply()
        .map_err(protocol("intern_atom reply"))?
        .atom)
}

/// Wrap an x11rb error with the request it came from.
pub(super) fn protocol<E: std::fmt::Display>(
    request: &'static str,
) -> impl FnOnce(E) -> BackendError {
    move |e| BackendError::Protocol(format!("{request}: {e}"))
}

/// X11 implementation of [`ClipboardBackend`].
pub struct X11Backend {
    conn: Arc<RustConnection>,
    window: Window,
    atoms: Atoms,
    selection: Arc<Selection>,
    /// `SelectionNotify` / `PropertyNotify` events forwarded by the pump.
    notifications: Mutex<Receiver<Event>>,
    read_timeout: Duration,
    stop: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

impl X11Backend {
    /// Connect to the display named by `$DISPLAY`, create the surrogate
    /// window and start the event pump.
    ///
    /// `read_timeout` bounds each wait for another owner's answer.
    pub fn connect(read_timeout: Duration) -> Result<Self, BackendError> {
        let (conn, screen_num) = RustConnection::connect(None)
            .map_err(|e| BackendError::Unavailable(format!("X11 connect failed: {e}")))?;

        let root = conn.setup().roots[screen_num].root;
        let window = conn.generate_id().map_err(protocol("generate_id"))?;

        // Never mapped; only exists to own the selection and receive
        // property changes.
        xproto::create_window(
            &conn,
            x11rb::COPY_DEPTH_FROM_PARENT,
            window,
            root,
            0,
            0,
            1,
            1,
            0,
            WindowClass::INPUT_ONLY,
            x11rb::COPY_FROM_PARENT,
            &CreateWindowAux::new().event_mask(EventMask::PROPERTY_CHANGE),
        )
        .map_err(protocol("create_window"))?;

        let atoms = Atoms::intern(&conn)?;
        conn.flush().map_err(protocol("flush"))?;

        let conn = Arc::new(conn);
        let selection = Arc::new(Selection::new());
        let stop = Arc::new(AtomicBool::new(false));
        let (notifications, pump) = pump::spawn_event_pump(
            Arc::clone(&conn),
            window,
            atoms,
            Arc::clone(&selection),
            Arc::clone(&stop),
        )?;

        tracing::debug!(screen = screen_num, window, "X11 clipboard window created");

        Ok(Self {
            conn,
            window,
            atoms,
            selection,
            notifications: Mutex::new(notifications),
            read_timeout,
            stop,
            pump: Some(pump),
        })
    }

    fn atom_of(format: &FormatId) -> Result<Atom, BackendError> {
        match format {
            FormatId::Numeric(atom) => Ok(*atom),
            FormatId::Named(name) => Err(BackendError::Rejected(format!(
                "X11 formats are atoms, got name {name:?}"
            ))),
        }
    }

    /// Formats on offer: our own when we own the selection, otherwise
    /// whatever the current owner lists under `TARGETS`.
    fn advertised(&self) -> Result<Vec<Atom>, BackendError> {
        match self
            .selection
            .with_owned(|items| items.iter().map(|(atom, _)| *atom).collect())
        {
            Some(atoms) => Ok(atoms),
            None => self.remote_targets(),
        }
    }

    /// Take ownership of `CLIPBOARD` with `items` as the content.
    ///
    /// The claim carries a real server timestamp so the pump can tell a
    /// `SelectionClear` for this claim from one queued before it.
    fn claim(&self, items: Vec<(Atom, Vec<u8>)>) -> Result<(), BackendError> {
        let since = self.server_time()?;

        // Content must be in place before the first request can arrive.
        self.selection.take_ownership(items, since);

        let conn = &*self.conn;
        let owner = xproto::set_selection_owner(conn, self.window, self.atoms.clipboard, since)
        .map_err(protocol("set_selection_owner"))
        .and_then(|_| {
            xproto::get_selection_owner(conn, self.atoms.clipboard)
                .map_err(protocol("get_selection_owner"))
        })
        .and_then(|cookie| cookie.reply().map_err(protocol("get_selection_owner reply")));

        match owner {
            Ok(reply) if reply.owner == self.window => Ok(()),
            Ok(reply) => {
                self.selection.release();
                Err(BackendError::Rejected(format!(
                    "selection owner is still window 0x{:x}",
                    reply.owner
                )))
            }
            Err(e) => {
                self.selection.release();
                Err(e)
            }
        }
    }
}

impl ClipboardBackend for X11Backend {
    fn name(&self) -> &'static str {
        "x11"
    }

    fn ownership(&self) -> OwnershipModel {
        OwnershipModel::WindowOwned
    }

    fn convention(&self) -> TextConvention {
        TextConvention::UNIX
    }

    fn resolve_format(&self, kind: &ContentKind) -> Result<Vec<NativeFormat>, BackendError> {
        let atom = |a: Atom| FormatId::Numeric(a);
        Ok(match kind {
            ContentKind::Text => vec![
                NativeFormat::new(atom(self.atoms.utf8_string), Encoding::Utf8),
                NativeFormat::new(atom(self.atoms.text_plain_utf8), Encoding::Utf8),
                NativeFormat::read_only(atom(self.atoms.string), Encoding::Latin1),
                NativeFormat::read_only(atom(self.atoms.text), Encoding::Utf8),
            ],
            ContentKind::Custom(name) => vec![NativeFormat::new(
                atom(intern(&self.conn, name.as_bytes())?),
                Encoding::Opaque,
            )],
        })
    }

    /// Selections need no locking; opening only checks the pump is alive.
    fn try_open(&self) -> Result<(), BackendError> {
        if self.selection.is_alive() {
            Ok(())
        } else {
            Err(BackendError::Unavailable("X11 connection lost".into()))
        }
    }

    fn close(&self) {}

    fn has_format(&self, format: &FormatId) -> Result<bool, BackendError> {
        let atom = Self::atom_of(format)?;
        Ok(self.advertised()?.contains(&atom))
    }

    fn first_available(
        &self,
        formats: &[NativeFormat],
    ) -> Result<Option<NativeFormat>, BackendError> {
        let advertised = self.advertised()?;
        for format in formats {
            if advertised.contains(&Self::atom_of(&format.id)?) {
                return Ok(Some(format.clone()));
            }
        }
        Ok(None)
    }

    fn read(&self, format: &NativeFormat) -> Result<Option<TransferBuffer>, BackendError> {
        let atom = Self::atom_of(&format.id)?;

        let bytes = match self.selection.with_owned(|items| {
            items
                .iter()
                .find(|(a, _)| *a == atom)
                .map(|(_, data)| data.clone())
        }) {
            Some(local) => local,
            None => match self.convert(atom)? {
                Some((type_, bytes))
                    if transfer::reply_matches(&self.atoms, atom, format.encoding, type_) =>
                {
                    Some(bytes)
                }
                Some((type_, _)) => {
                    tracing::debug!(target = atom, type_, "owner answered with another type");
                    None
                }
                None => None,
            },
        };

        Ok(bytes.map(|bytes| TransferBuffer::new(bytes, format.encoding)))
    }

    fn write(&self, items: Vec<(NativeFormat, TransferBuffer)>) -> Result<(), BackendError> {
        let limit = self
            .conn
            .maximum_request_bytes()
            .saturating_sub(CHANGE_PROPERTY_HEADER);

        let mut content = Vec::with_capacity(items.len());
        for (format, buffer) in items {
            // Content is served in one ChangeProperty; INCR sending is not
            // supported.
            if buffer.len() > limit {
                return Err(BackendError::Rejected(format!(
                    "{} bytes exceeds the X11 request limit of {limit} bytes",
                    buffer.len()
                )));
            }
            content.push((Self::atom_of(&format.id)?, buffer.into_bytes()));
        }

        self.claim(content)
    }

    fn clear(&self) -> Result<(), BackendError> {
        self.claim(Vec::new())
    }

    fn wait_displaced(&self, timeout: Option<Duration>) -> bool {
        self.selection.wait_released(timeout)
    }
}

impl Drop for X11Backend {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);

        // Wake the pump out of wait_for_event.
        let wake = ClientMessageEvent::new(32, self.window, self.atoms.transfer, [0u32; 5]);
        let conn = &*self.conn;
        let _ = xproto::send_event(conn, false, self.window, EventMask::NO_EVENT, wake);
        let _ = xproto::destroy_window(conn, self.window);
        let _ = conn.flush();

        if let Some(pump) = self.pump.take()
            && pump.join().is_err()
        {
            tracing::warn!("X11 event pump panicked");
        }
    }
}
