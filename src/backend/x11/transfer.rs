//! Reading from another selection owner: `ConvertSelection` and `INCR`.

use std::sync::PoisonError;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Instant;

use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::{
    self, Atom, AtomEnum, GetPropertyReply, PropMode, Property, Timestamp,
};

use super::{Atoms, X11Backend, protocol};
use crate::backend::BackendError;
use crate::buffer::Encoding;

/// A converted selection: the type the owner labelled it with, and the
/// bytes.
pub(super) type Converted = (Atom, Vec<u8>);

impl X11Backend {
    /// Ask the current owner for `target` and collect the answer.
    ///
    /// Returns `None` when the owner refuses the conversion. Each wait
    /// for the owner is bounded by the backend's read timeout.
    pub(super) fn convert(&self, target: Atom) -> Result<Option<Converted>, BackendError> {
        let notifications = self
            .notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Leftovers from an earlier conversion that timed out.
        while notifications.try_recv().is_ok() {}

        let conn = &*self.conn;
        xproto::delete_property(conn, self.window, self.atoms.transfer)
            .map_err(protocol("delete_property"))?;
        xproto::convert_selection(
            conn,
            self.window,
            self.atoms.clipboard,
            target,
            self.atoms.transfer,
            x11rb::CURRENT_TIME,
        )
        .map_err(protocol("convert_selection"))?;
        conn.flush().map_err(protocol("flush"))?;

        let property = self.wait_for(&notifications, |event| match event {
            Event::SelectionNotify(notify)
                if notify.requestor == self.window && notify.selection == self.atoms.clipboard =>
            {
                Some(notify.property)
            }
            _ => None,
        })?;

        if property == x11rb::NONE {
            return Ok(None);
        }

        let reply = self.take_property()?;
        if reply.type_ == self.atoms.incr {
            tracing::debug!(target, "incremental selection transfer");
            return self.receive_incremental(&notifications).map(Some);
        }
        Ok(Some((reply.type_, reply.value)))
    }

    /// Current server time, read off the `PropertyNotify` for a zero-length
    /// append to our own window.
    pub(super) fn server_time(&self) -> Result<Timestamp, BackendError> {
        let notifications = self
            .notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while notifications.try_recv().is_ok() {}

        let conn = &*self.conn;
        xproto::change_property(
            conn,
            PropMode::APPEND,
            self.window,
            self.atoms.timestamp,
            AtomEnum::STRING,
            8,
            0,
            &[],
        )
        .map_err(protocol("change_property"))?;
        conn.flush().map_err(protocol("flush"))?;

        self.wait_for(&notifications, |event| match event {
            Event::PropertyNotify(change)
                if change.window == self.window && change.atom == self.atoms.timestamp =>
            {
                Some(change.time)
            }
            _ => None,
        })
    }

    /// Targets advertised by the current owner; empty when there is none
    /// or it does not answer `TARGETS`.
    pub(super) fn remote_targets(&self) -> Result<Vec<Atom>, BackendError> {
        let owner = xproto::get_selection_owner(&*self.conn, self.atoms.clipboard)
            .map_err(protocol("get_selection_owner"))?
            .reply()
            .map_err(protocol("get_selection_owner reply"))?
            .owner;

        if owner == x11rb::NONE {
            return Ok(Vec::new());
        }

        let atom_list =
            |type_: Atom| type_ == Atom::from(AtomEnum::ATOM) || type_ == self.atoms.targets;
        Ok(match self.convert(self.atoms.targets)? {
            Some((type_, bytes)) if atom_list(type_) => atoms_from_bytes(&bytes),
            Some((type_, _)) => {
                tracing::debug!(type_, "TARGETS answered with a non-atom type");
                Vec::new()
            }
            None => Vec::new(),
        })
    }

    /// Collect an `INCR` transfer: each new value of the property is one
    /// chunk, and an empty value ends the transfer. The chunks carry the
    /// real type.
    fn receive_incremental(
        &self,
        notifications: &Receiver<Event>,
    ) -> Result<Converted, BackendError> {
        let mut type_ = x11rb::NONE;
        let mut data = Vec::new();
        loop {
            self.wait_for(notifications, |event| match event {
                Event::PropertyNotify(change)
                    if change.window == self.window
                        && change.atom == self.atoms.transfer
                        && change.state == Property::NEW_VALUE =>
                {
                    Some(())
                }
                _ => None,
            })?;

            let chunk = self.take_property()?;
            if chunk.value.is_empty() {
                return Ok((type_, data));
            }
            if type_ == x11rb::NONE {
                type_ = chunk.type_;
            }
            data.extend_from_slice(&chunk.value);
        }
    }

    /// Read and delete the transfer property. Deleting is what tells an
    /// `INCR` sender to deliver the next chunk.
    fn take_property(&self) -> Result<GetPropertyReply, BackendError> {
        xproto::get_property(
            &*self.conn,
            true,
            self.window,
            self.atoms.transfer,
            AtomEnum::ANY,
            0,
            u32::MAX / 4,
        )
        .map_err(protocol("get_property"))?
        .reply()
        .map_err(protocol("get_property reply"))
    }

    /// Wait for a forwarded event `accept` recognises, up to the read
    /// timeout.
    fn wait_for<T>(
        &self,
        notifications: &Receiver<Event>,
        mut accept: impl FnMut(&Event) -> Option<T>,
    ) -> Result<T, BackendError> {
        let deadline = Instant::now() + self.read_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match notifications.recv_timeout(remaining) {
                Ok(event) => {
                    if let Some(found) = accept(&event) {
                        return Ok(found);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(BackendError::Protocol(format!(
                        "selection owner did not answer within {} ms",
                        self.read_timeout.as_millis()
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(BackendError::Unavailable("X11 event pump stopped".into()));
                }
            }
        }
    }
}

/// Whether an owner's answer of type `reply_type` can be decoded as the
/// requested `target` in `encoding`. Opaque formats take whatever the
/// owner sends; `TEXT` lets the owner pick, and only a UTF-8 pick fits.
pub(super) fn reply_matches(
    atoms: &Atoms,
    target: Atom,
    encoding: Encoding,
    reply_type: Atom,
) -> bool {
    match encoding {
        Encoding::Opaque => true,
        _ if target == atoms.text => reply_type == atoms.utf8_string,
        _ => reply_type == target,
    }
}

/// Decode a format-32 `ATOM` list as delivered in native byte order.
fn atoms_from_bytes(bytes: &[u8]) -> Vec<Atom> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atoms() -> Atoms {
        Atoms {
            clipboard: 100,
            targets: 101,
            utf8_string: 102,
            text_plain_utf8: 103,
            string: 31,
            text: 104,
            incr: 105,
            transfer: 106,
            timestamp: 107,
        }
    }

    #[test]
    fn text_target_only_accepts_utf8_answers() {
        let atoms = atoms();
        let compound_text = 200;
        assert!(reply_matches(&atoms, atoms.text, Encoding::Utf8, atoms.utf8_string));
        assert!(!reply_matches(&atoms, atoms.text, Encoding::Utf8, compound_text));
        assert!(!reply_matches(&atoms, atoms.text, Encoding::Utf8, atoms.string));
    }

    #[test]
    fn typed_targets_must_answer_in_kind() {
        let atoms = atoms();
        assert!(reply_matches(&atoms, atoms.utf8_string, Encoding::Utf8, atoms.utf8_string));
        assert!(!reply_matches(&atoms, atoms.utf8_string, Encoding::Utf8, atoms.string));
        assert!(reply_matches(&atoms, atoms.string, Encoding::Latin1, atoms.string));
        assert!(reply_matches(&atoms, 300, Encoding::Opaque, 301));
    }

    #[test]
    fn atom_list_decoding() {
        let bytes: Vec<u8> = [101u32, 102, 31].iter().flat_map(|a| a.to_ne_bytes()).collect();
        assert_eq!(atoms_from_bytes(&bytes), vec![101, 102, 31]);
    }

    #[test]
    fn trailing_partial_atom_is_ignored() {
        let mut bytes = 7u32.to_ne_bytes().to_vec();
        bytes.push(0xff);
        assert_eq!(atoms_from_bytes(&bytes), vec![7]);
        assert!(atoms_from_bytes(&[]).is_empty());
    }
}
