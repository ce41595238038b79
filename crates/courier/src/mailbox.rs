//! Correlation registry holding one reply slot per outstanding request.
//!
//! Callers [`prepare`](CorrelationRegistry::prepare) a slot before the
//! request hits the wire, the read loop [`place`](CorrelationRegistry::place)s
//! the matching reply, and the caller blocks in
//! [`retrieve`](CorrelationRegistry::retrieve) until the reply arrives or the
//! timeout elapses. Lock order is always the slot map first, then a slot.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use crate::correlation::CorrelationKey;
use crate::message::Message;

pub(crate) const MAILBOX_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::mailbox");

#[derive(Debug, Default)]
struct Slot {
    reply: Mutex<Option<Message>>,
    arrived: Condvar,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, Option<Message>> {
        self.reply.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Thread-safe map from correlation keys to pending reply slots.
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    slots: Mutex<HashMap<CorrelationKey, Arc<Slot>>>,
}

impl CorrelationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves an empty slot for `key`.
    ///
    /// Preparing a key that already has a slot keeps the existing slot, so a
    /// reply placed in between is not lost.
    pub fn prepare(&self, key: &CorrelationKey) {
        let mut slots = self.slots();
        if slots.contains_key(key) {
            debug!(target: MAILBOX_TARGET, key = %key, "slot already prepared");
            return;
        }
        slots.insert(key.clone(), Arc::default());
    }

    /// Deposits `reply` into the slot for `key` and wakes the waiting caller.
    ///
    /// Returns `false` when nobody waits for `key`; the reply is discarded.
    /// A second reply for an occupied slot replaces the first.
    pub fn place(&self, key: &CorrelationKey, reply: Message) -> bool {
        let slots = self.slots();
        let Some(slot) = slots.get(key) else {
            warn!(target: MAILBOX_TARGET, key = %key, "discarded stale response");
            return false;
        };
        let mut held = slot.lock();
        if held.is_some() {
            warn!(
                target: MAILBOX_TARGET,
                key = %key,
                "duplicate response replaces the undelivered one"
            );
        }
        *held = Some(reply);
        slot.arrived.notify_all();
        true
    }

    /// Waits up to `timeout` for the reply to `key`, removing the slot.
    ///
    /// Returns `None` when `key` was never prepared or no reply arrived in
    /// time. A reply landing after the timeout is discarded by
    /// [`place`](Self::place).
    pub fn retrieve(&self, key: &CorrelationKey, timeout: Duration) -> Option<Message> {
        let Some(slot) = self.slots().get(key).cloned() else {
            warn!(target: MAILBOX_TARGET, key = %key, "retrieve for unprepared key");
            return None;
        };

        let delivered = {
            let held = slot.lock();
            let (mut held, _) = slot
                .arrived
                .wait_timeout_while(held, timeout, |reply| reply.is_none())
                .unwrap_or_else(PoisonError::into_inner);
            held.take()
        };

        // Removing the slot under the map lock closes the window for `place`;
        // anything it deposited before the removal is still collected here.
        let late = self.remove_slot(key, &slot);
        match (delivered, late) {
            (Some(reply), None) => Some(reply),
            (Some(reply), Some(_)) => {
                warn!(target: MAILBOX_TARGET, key = %key, "discarded duplicate response");
                Some(reply)
            }
            (None, Some(reply)) => Some(reply),
            (None, None) => {
                warn!(
                    target: MAILBOX_TARGET,
                    key = %key,
                    timeout_ms = timeout.as_millis(),
                    "no response before timeout"
                );
                None
            }
        }
    }

    /// Returns `true` while a slot for `key` exists.
    #[must_use]
    pub fn is_waiting_for(&self, key: &CorrelationKey) -> bool {
        self.slots().contains_key(key)
    }

    /// Number of outstanding slots.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.slots().len()
    }

    fn remove_slot(&self, key: &CorrelationKey, slot: &Arc<Slot>) -> Option<Message> {
        let mut slots = self.slots();
        if slots.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(key);
        }
        let late = slot.lock().take();
        drop(slots);
        late
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<CorrelationKey, Arc<Slot>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
