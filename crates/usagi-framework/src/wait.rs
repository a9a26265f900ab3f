//! Per-party wait slots for conversational continuation.
//!
//! A handler that needs the user's *next* message arms a [`WaitTable`] slot
//! keyed by the conversational party. The dispatcher consults the table
//! before the handler registry, so a delivered event bypasses normal
//! dispatch entirely for that one message.
//!
//! At most one slot may be armed per party. Arming a second one supersedes
//! the first: the old waiter's sender is dropped and it observes "no
//! answer". Each slot carries a token so a superseded waiter timing out
//! cannot disarm its successor.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use usagi_core::{MessageEvent, PartyKey};

/// An armed slot's handle, needed to disarm it on timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitToken(u64);

struct Slot {
    token: WaitToken,
    sender: oneshot::Sender<MessageEvent>,
}

/// Process-wide table of armed wait slots.
#[derive(Default)]
pub struct WaitTable {
    slots: Mutex<HashMap<PartyKey, Slot>>,
    counter: Mutex<u64>,
}

impl WaitTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a slot for the party, superseding any existing one.
    pub fn arm(&self, party: PartyKey) -> (WaitToken, oneshot::Receiver<MessageEvent>) {
        let token = {
            let mut counter = self.counter.lock();
            *counter += 1;
            WaitToken(*counter)
        };
        let (tx, rx) = oneshot::channel();
        let superseded = self.slots.lock().insert(
            party,
            Slot {
                token,
                sender: tx,
            },
        );
        if superseded.is_some() {
            debug!(?party, "armed wait slot supersedes an existing one");
        }
        (token, rx)
    }

    /// Disarms the party's slot, but only if it still belongs to `token`.
    pub fn disarm(&self, party: PartyKey, token: WaitToken) {
        let mut slots = self.slots.lock();
        if slots.get(&party).is_some_and(|slot| slot.token == token) {
            slots.remove(&party);
        }
    }

    /// Delivers an event to the party's armed slot, if any.
    ///
    /// Returns the event back when nobody is waiting (or the waiter has
    /// already gone away), so the caller can fall through to normal
    /// dispatch.
    pub fn deliver(&self, event: MessageEvent) -> Option<MessageEvent> {
        let slot = self.slots.lock().remove(&event.party());
        match slot {
            Some(slot) => match slot.sender.send(event) {
                Ok(()) => None,
                // Waiter timed out between lookup and send.
                Err(event) => Some(event),
            },
            None => Some(event),
        }
    }

    /// Whether a slot is armed for the party.
    pub fn is_armed(&self, party: &PartyKey) -> bool {
        self.slots.lock().contains_key(party)
    }

    /// Number of armed slots.
    pub fn armed_count(&self) -> usize {
        self.slots.lock().len()
    }
}
