//! Fan-out dispatcher between the capture loop and its consumers.
//!
//! Each subscriber gets a named, bounded queue. `publish` copies the
//! message into every live queue with a non-blocking send, so a slow or
//! stuck consumer can never stall capture - its queue fills up, further
//! events are dropped for that subscriber only, and every drop is
//! counted and logged. The terminal [`BusMessage::Disconnected`] is the
//! one message that is never dropped: it is delivered asynchronously
//! even to a full queue.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::event::InputEvent;

/// Messages fanned out to bus subscribers.
#[derive(Debug, Clone)]
pub enum BusMessage {
    /// A live normalized input event.
    Input(InputEvent),
    /// The input source is gone. Terminal; no further messages follow.
    Disconnected,
}

/// Opaque subscriber identity, used for deregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberId(u64);

struct SubscriberSlot {
    id: SubscriberId,
    name: String,
    sender: mpsc::Sender<BusMessage>,
    dropped: u64,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    slots: Vec<SubscriberSlot>,
}

/// Fan-out event dispatcher.
///
/// Cheap to clone; all clones share the subscriber registry.
/// Registration and deregistration are safe at any time, including
/// between dispatches of back-to-back events.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

/// A subscriber's receiving end.
pub struct Subscription {
    id: SubscriberId,
    name: String,
    receiver: mpsc::Receiver<BusMessage>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber with its own bounded backlog.
    pub fn subscribe(&self, name: &str, backlog: usize) -> Subscription {
        let (sender, receiver) = mpsc::channel(backlog.max(1));
        let mut inner = self.inner.lock().expect("bus registry poisoned");
        let id = SubscriberId(inner.next_id);
        inner.next_id += 1;
        inner.slots.push(SubscriberSlot {
            id,
            name: name.to_string(),
            sender,
            dropped: 0,
        });
        info!("Bus subscriber '{}' registered (backlog {})", name, backlog);
        Subscription {
            id,
            name: name.to_string(),
            receiver,
        }
    }

    /// Remove a subscriber. Dropping the [`Subscription`] works too;
    /// the slot is then pruned on the next publish.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut inner = self.inner.lock().expect("bus registry poisoned");
        if let Some(pos) = inner.slots.iter().position(|s| s.id == id) {
            let slot = inner.slots.remove(pos);
            info!(
                "Bus subscriber '{}' deregistered ({} events dropped in its lifetime)",
                slot.name, slot.dropped
            );
        }
    }

    /// Deliver a message to every live subscriber without blocking.
    ///
    /// A full queue drops the message for that subscriber and counts
    /// the overflow - except for [`BusMessage::Disconnected`], which is
    /// handed to a detached send so even a backed-up subscriber sees
    /// the terminal signal once it drains.
    pub fn publish(&self, message: BusMessage) {
        let mut inner = self.inner.lock().expect("bus registry poisoned");
        inner.slots.retain(|slot| {
            if slot.sender.is_closed() {
                debug!("Pruning closed bus subscriber '{}'", slot.name);
                return false;
            }
            true
        });

        match &message {
            BusMessage::Input(_) => {
                for slot in inner.slots.iter_mut() {
                    match slot.sender.try_send(message.clone()) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            slot.dropped += 1;
                            warn!(
                                "Bus overflow: subscriber '{}' backlog full, event dropped \
                                 ({} dropped total)",
                                slot.name, slot.dropped
                            );
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            debug!("Subscriber '{}' closed mid-dispatch", slot.name);
                        }
                    }
                }
            }
            BusMessage::Disconnected => {
                for slot in inner.slots.iter() {
                    let sender = slot.sender.clone();
                    let name = slot.name.clone();
                    tokio::spawn(async move {
                        if sender.send(BusMessage::Disconnected).await.is_err() {
                            debug!("Subscriber '{}' gone before disconnect delivery", name);
                        }
                    });
                }
            }
        }
    }

    /// Per-subscriber overflow counts: `(name, events dropped)`.
    ///
    /// Overflow is a reported metric, never a silent condition.
    pub fn overflow_report(&self) -> Vec<(String, u64)> {
        let inner = self.inner.lock().expect("bus registry poisoned");
        inner
            .slots
            .iter()
            .map(|slot| (slot.name.clone(), slot.dropped))
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("bus registry poisoned").slots.len()
    }
}
