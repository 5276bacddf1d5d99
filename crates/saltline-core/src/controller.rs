//! The controlling principal of a connection.
//!
//! Every connection is owned by exactly one [`Controller`]: the sink for
//! asynchronous deliveries and the liveness anchor. The connection holds a
//! [`ControllerHandle`] (a one-way observation, not shared ownership) and
//! closes itself when the controller's event receiver is dropped.
//! Ownership is transferable; only the current controller may reassign it.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

static NEXT_CONTROLLER_ID: AtomicU64 = AtomicU64::new(1);

/// Asynchronous notification delivered to a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A message matched a pending subscription.
    Message {
        /// Id of the delivering connection.
        connection: u64,
        /// The decrypted application payload.
        payload: Vec<u8>,
    },
    /// A subscription's deadline expired before a message arrived.
    ReceiveTimeout {
        /// Id of the connection.
        connection: u64,
        /// The subscription ref that timed out.
        subscription: u64,
    },
    /// The connection is gone. Posted at most once per connection, and
    /// only if a subscription was pending when it died.
    Closed {
        /// Id of the connection.
        connection: u64,
    },
}

/// Receives a connection's asynchronous events and anchors its lifetime.
///
/// Dropping the controller closes every connection it owns.
pub struct Controller {
    handle: ControllerHandle,
    events: mpsc::UnboundedReceiver<Event>,
}

impl Controller {
    /// Create a fresh controller.
    #[must_use]
    pub fn new() -> Self {
        let (sender, events) = mpsc::unbounded_channel();
        let id = NEXT_CONTROLLER_ID.fetch_add(1, Ordering::Relaxed);
        Self { handle: ControllerHandle { id, sender }, events }
    }

    /// Handle to give to connections (and to prove ownership when
    /// transferring it).
    #[must_use]
    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    /// Await the next event from any owned connection. Returns `None` only
    /// if every handle is gone, which cannot happen while `self` exists.
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Non-blocking poll for a pending event.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.events.try_recv().ok()
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable address of a [`Controller`].
#[derive(Clone)]
pub struct ControllerHandle {
    id: u64,
    sender: mpsc::UnboundedSender<Event>,
}

impl ControllerHandle {
    /// Identity of the controller behind this handle.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Post an event; silently dropped if the controller is already gone
    /// (the connection will notice through the liveness watch).
    pub(crate) fn post(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    /// Resolves when the controller's receiver has been dropped.
    pub(crate) async fn gone(&self) {
        self.sender.closed().await;
    }
}
