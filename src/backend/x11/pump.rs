//! Event pump: answers selection requests while we own `CLIPBOARD`.
//!
//! Runs on a dedicated thread blocked in `wait_for_event`. Requests from
//! other clients are served from [`Selection`]; `SelectionNotify` and
//! `PropertyNotify` events belong to conversions started by the reading
//! thread and are forwarded to it over a channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::{
    self, Atom, AtomEnum, EventMask, PropMode, SELECTION_NOTIFY_EVENT, SelectionClearEvent,
    SelectionNotifyEvent, SelectionRequestEvent, Timestamp, Window,
};
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use super::Atoms;

/// Content we serve, one entry per advertised target, and the server
/// time at which we claimed the selection for it.
#[derive(Debug)]
struct Owned {
    items: Vec<(Atom, Vec<u8>)>,
    since: Timestamp,
}

/// Selection state shared between the backend and its pump.
#[derive(Debug)]
pub(super) struct Selection {
    /// `Some` while we own `CLIPBOARD`.
    owned: Mutex<Option<Owned>>,
    changed: Condvar,
    alive: AtomicBool,
}

impl Selection {
    pub(super) fn new() -> Self {
        Self {
            owned: Mutex::new(None),
            changed: Condvar::new(),
            alive: AtomicBool::new(true),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Owned>> {
        self.owned.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn take_ownership(&self, items: Vec<(Atom, Vec<u8>)>, since: Timestamp) {
        *self.lock() = Some(Owned { items, since });
        self.changed.notify_all();
    }

    /// Another client took the selection at server time `time`. Content
    /// claimed after that time is kept: the clear is left over from an
    /// earlier claim. Returns whether ownership was released.
    pub(super) fn superseded(&self, time: Timestamp) -> bool {
        let mut owned = self.lock();
        let stale = owned
            .as_ref()
            .is_some_and(|owned| time != x11rb::CURRENT_TIME && is_before(time, owned.since));
        if stale || owned.is_none() {
            return false;
        }
        *owned = None;
        self.changed.notify_all();
        true
    }

    /// Forget owned content, waking anyone in [`Self::wait_released`].
    pub(super) fn release(&self) {
        *self.lock() = None;
        self.changed.notify_all();
    }

    /// The pump has exited; nothing can be served any more.
    pub(super) fn shut_down(&self) {
        self.alive.store(false, Ordering::Release);
        self.release();
    }

    pub(super) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Run `f` over the owned content, or return `None` if we are not the
    /// owner.
    pub(super) fn with_owned<R>(&self, f: impl FnOnce(&[(Atom, Vec<u8>)]) -> R) -> Option<R> {
        self.lock().as_ref().map(|owned| f(&owned.items))
    }

    /// Block until ownership is lost or `timeout` elapses. Returns `true`
    /// if we no longer own the selection.
    pub(super) fn wait_released(&self, timeout: Option<Duration>) -> bool {
        let guard = self.lock();
        match timeout {
            None => {
                let _guard = self
                    .changed
                    .wait_while(guard, |owned| owned.is_some())
                    .unwrap_or_else(PoisonError::into_inner);
                true
            }
            Some(timeout) => {
                let (guard, _) = self
                    .changed
                    .wait_timeout_while(guard, timeout, |owned| owned.is_some())
                    .unwrap_or_else(PoisonError::into_inner);
                guard.is_none()
            }
        }
    }
}

/// X timestamps are 32-bit milliseconds that wrap; compare them as a
/// signed distance.
fn is_before(a: Timestamp, b: Timestamp) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Spawn the pump thread for `window`. The returned receiver yields the
/// events meant for the reading side.
pub(super) fn spawn_event_pump(
    conn: Arc<RustConnection>,
    window: Window,
    atoms: Atoms,
    selection: Arc<Selection>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<(Receiver<Event>, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel();

    let handle = std::thread::Builder::new()
        .name("x11-clipboard".into())
        .spawn(move || {
            pump_events(&conn, window, &atoms, &selection, &stop, &tx);
            selection.shut_down();
        })?;

    Ok((rx, handle))
}

fn pump_events(
    conn: &RustConnection,
    window: Window,
    atoms: &Atoms,
    selection: &Selection,
    stop: &AtomicBool,
    tx: &Sender<Event>,
) {
    loop {
        let event = match conn.wait_for_event() {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "X11 connection error");
                return;
            }
        };

        if stop.load(Ordering::Acquire) {
            return;
        }

        match event {
            Event::SelectionRequest(request) => serve_request(conn, atoms, selection, &request),
            Event::SelectionClear(clear) => handle_clear(window, atoms, selection, &clear),
            Event::SelectionNotify(_) | Event::PropertyNotify(_) => {
                if tx.send(event).is_err() {
                    // Backend dropped.
                    return;
                }
            }
            Event::Error(e) => {
                tracing::debug!(error = ?e, "X11 request error");
            }
            _ => {}
        }
    }
}

fn handle_clear(
    window: Window,
    atoms: &Atoms,
    selection: &Selection,
    clear: &SelectionClearEvent,
) {
    if clear.selection != atoms.clipboard || clear.owner != window {
        return;
    }
    if selection.superseded(clear.time) {
        tracing::debug!(new_owner_time = clear.time, "clipboard ownership taken over");
    } else {
        tracing::debug!(time = clear.time, "ignoring selection clear older than our claim");
    }
}

/// Answer one `SelectionRequest`, refusing anything we cannot serve.
fn serve_request(
    conn: &RustConnection,
    atoms: &Atoms,
    selection: &Selection,
    request: &SelectionRequestEvent,
) {
    // Obsolete clients leave the property unset and expect the target
    // atom to be used instead.
    let property = if request.property == x11rb::NONE {
        request.target
    } else {
        request.property
    };

    let served = request.selection == atoms.clipboard
        && selection
            .with_owned(|items| store_target(conn, atoms, items, request, property))
            .unwrap_or(false);

    tracing::trace!(
        requestor = request.requestor,
        target = request.target,
        served,
        "selection request"
    );

    let notify = SelectionNotifyEvent {
        response_type: SELECTION_NOTIFY_EVENT,
        sequence: 0,
        time: request.time,
        requestor: request.requestor,
        selection: request.selection,
        target: request.target,
        property: if served { property } else { x11rb::NONE },
    };

    let sent = xproto::send_event(conn, false, request.requestor, EventMask::NO_EVENT, notify)
        .and_then(|_| conn.flush());
    if let Err(e) = sent {
        tracing::warn!(requestor = request.requestor, error = %e, "failed to answer selection request");
    }
}

/// Write the requested target onto the requestor's property.
fn store_target(
    conn: &RustConnection,
    atoms: &Atoms,
    items: &[(Atom, Vec<u8>)],
    request: &SelectionRequestEvent,
    property: Atom,
) -> bool {
    let result = if request.target == atoms.targets {
        conn.change_property32(
            PropMode::REPLACE,
            request.requestor,
            property,
            AtomEnum::ATOM,
            &advertised_targets(atoms, items),
        )
    } else if let Some((target, data)) = items.iter().find(|(a, _)| *a == request.target) {
        conn.change_property8(PropMode::REPLACE, request.requestor, property, *target, data)
    } else {
        return false;
    };
    result.is_ok()
}

/// `TARGETS` answer: the meta-target itself plus every owned format.
fn advertised_targets(atoms: &Atoms, items: &[(Atom, Vec<u8>)]) -> Vec<Atom> {
    std::iter::once(atoms.targets)
        .chain(items.iter().map(|(atom, _)| *atom))
        .collect()
}
