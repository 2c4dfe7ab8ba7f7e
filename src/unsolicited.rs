//! Unsolicited result codes and their dispatch.
//!
//! A channel forwards every unsolicited group to exactly one
//! [`UnsolicitedHandler`]. [`UrcRegistry`] is the usual handler: a table from
//! URC prefix (e.g. `+CREG`) to a closure, filled in at construction.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::command::right_hand_side;

/// An unsolicited group: the header line, plus the PDU line if the header
/// announced one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsolicited {
    lines: Vec<String>,
}

impl Unsolicited {
    /// Creates an unsolicited group from its lines.
    #[must_use]
    pub const fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    /// Returns all lines.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Returns the header line.
    #[must_use]
    pub fn header(&self) -> &str {
        self.lines.first().map_or("", String::as_str)
    }

    /// Returns the identifier before the colon, e.g. `+CREG`.
    ///
    /// Headers without a colon (`RING`) are their own prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        let header = self.header();
        header.split_once(':').map_or(header, |(prefix, _)| prefix).trim()
    }

    /// Returns the value list after the colon.
    #[must_use]
    pub fn right_hand_side(&self) -> &str {
        right_hand_side(self.header())
    }

    /// Returns the PDU line, if present.
    #[must_use]
    pub fn pdu(&self) -> Option<&str> {
        self.lines.get(1).map(String::as_str)
    }

    /// Decodes the hex-encoded PDU line.
    pub fn pdu_bytes(&self) -> Result<Option<Vec<u8>>> {
        self.pdu()
            .map(|pdu| {
                hex::decode(pdu.trim()).map_err(|e| Error::Protocol {
                    message: format!("invalid PDU {pdu:?}: {e}"),
                })
            })
            .transpose()
    }
}

/// The delegate a channel hands unsolicited groups to.
pub trait UnsolicitedHandler: Send {
    /// Handles one unsolicited group.
    fn handle_unsolicited(&mut self, urc: Unsolicited);
}

impl UnsolicitedHandler for mpsc::UnboundedSender<Unsolicited> {
    fn handle_unsolicited(&mut self, urc: Unsolicited) {
        if self.send(urc).is_err() {
            tracing::debug!("unsolicited receiver dropped");
        }
    }
}

/// Discards everything (after logging it).
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreUnsolicited;

impl UnsolicitedHandler for IgnoreUnsolicited {
    fn handle_unsolicited(&mut self, urc: Unsolicited) {
        tracing::debug!("ignoring unsolicited {:?}", urc.lines());
    }
}

type UrcFn = Box<dyn FnMut(&Unsolicited) + Send>;

/// Prefix-to-handler table for unsolicited result codes.
#[derive(Default)]
pub struct UrcRegistry {
    handlers: HashMap<String, UrcFn>,
    fallback: Option<UrcFn>,
}

impl UrcRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a prefix such as `+CREG` or `RING`.
    #[must_use]
    pub fn on<F>(mut self, prefix: impl Into<String>, handler: F) -> Self
    where
        F: FnMut(&Unsolicited) + Send + 'static,
    {
        self.handlers.insert(prefix.into(), Box::new(handler));
        self
    }

    /// Sets the handler for groups no prefix matches.
    #[must_use]
    pub fn fallback<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&Unsolicited) + Send + 'static,
    {
        self.fallback = Some(Box::new(handler));
        self
    }

    /// Returns true if a handler is registered for exactly this prefix.
    #[must_use]
    pub fn contains(&self, prefix: &str) -> bool {
        self.handlers.contains_key(prefix)
    }

    /// Dispatches a group. Returns false if nothing handled it.
    ///
    /// Looks up the exact prefix first, then the longest registered prefix the
    /// header starts with.
    pub fn dispatch(&mut self, urc: &Unsolicited) -> bool {
        let key = if self.handlers.contains_key(urc.prefix()) {
            Some(urc.prefix().to_owned())
        } else {
            let header = urc.header();
            self.handlers
                .keys()
                .filter(|prefix| header.starts_with(prefix.as_str()))
                .max_by_key(|prefix| prefix.len())
                .cloned()
        };

        if let Some(handler) = key.and_then(|key| self.handlers.get_mut(&key)) {
            handler(urc);
            return true;
        }
        if let Some(fallback) = self.fallback.as_mut() {
            fallback(urc);
            return true;
        }
        tracing::warn!("unhandled unsolicited response {:?}", urc.lines());
        false
    }
}

impl UnsolicitedHandler for UrcRegistry {
    fn handle_unsolicited(&mut self, urc: Unsolicited) {
        self.dispatch(&urc);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn urc(lines: &[&str]) -> Unsolicited {
        Unsolicited::new(lines.iter().map(|&l| l.to_owned()).collect())
    }

    #[test]
    fn test_accessors() {
        let creg = urc(&["+CREG: 1,\"000F\",\"032F\""]);
        assert_eq!(creg.prefix(), "+CREG");
        assert_eq!(creg.right_hand_side(), "1,\"000F\",\"032F");
        assert_eq!(creg.pdu(), None);

        let ring = urc(&["RING"]);
        assert_eq!(ring.prefix(), "RING");
    }

    #[test]
    fn test_pdu_bytes() {
        let cmt = urc(&["+CMT: ,3", "0011FF"]);
        assert_eq!(cmt.pdu_bytes().unwrap(), Some(vec![0x00, 0x11, 0xff]));

        let bad = urc(&["+CMT: ,3", "XYZ"]);
        assert!(bad.pdu_bytes().is_err());
    }

    #[test]
    fn test_registry_dispatch() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let creg_seen = Arc::clone(&seen);
        let fallback_seen = Arc::clone(&seen);

        let mut registry = UrcRegistry::new()
            .on("+CREG", move |u| {
                creg_seen.lock().unwrap().push(format!("creg {}", u.right_hand_side()));
            })
            .fallback(move |u| {
                fallback_seen.lock().unwrap().push(format!("other {}", u.header()));
            });

        assert!(registry.dispatch(&urc(&["+CREG: 1"])));
        assert!(registry.dispatch(&urc(&["+CSQ: 20,99"])));
        assert_eq!(*seen.lock().unwrap(), ["creg 1", "other +CSQ: 20,99"]);
    }

    #[test]
    fn test_registry_longest_prefix() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let short = Arc::clone(&seen);
        let long = Arc::clone(&seen);

        let mut registry = UrcRegistry::new()
            .on("%C", move |_| short.lock().unwrap().push("short"))
            .on("%CPI", move |_| long.lock().unwrap().push("long"));

        assert!(registry.dispatch(&urc(&["%CPI 1,2,0"])));
        assert!(registry.dispatch(&urc(&["%CSTAT: PHB,1"])));
        assert!(!registry.dispatch(&urc(&["+CRING: VOICE"])));
        assert_eq!(*seen.lock().unwrap(), ["long", "short"]);
    }

    #[tokio::test]
    async fn test_channel_handler() {
        let (mut tx, mut rx) = mpsc::unbounded_channel();
        tx.handle_unsolicited(urc(&["RING"]));
        assert_eq!(rx.recv().await, Some(urc(&["RING"])));
    }
}
