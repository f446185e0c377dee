//! Typed connector event bus
//!
//! Observers subscribe with a callback and get back a token that guarantees
//! unsubscription on teardown. Events are emitted from the thread driving
//! `periodic_process`, always after the state they describe has been applied,
//! so a callback never observes a half-updated connector.

use crate::command::CommandStatus;
use crate::device::DeviceKey;

/// Notifications emitted by a connector
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorEvent {
    /// The connector started and is waiting for or establishing a connection
    Activated,
    /// The connector stopped
    Deactivated,
    /// A socket-level connection was established
    Connected,
    /// The peer went away (the connector may keep retrying)
    Disconnected,
    /// A device was created for a previously unseen key
    NewDevice(DeviceKey),
    /// A device's content was updated from the wire
    DeviceContentModified(DeviceKey),
    /// The peer sent a command addressed to this side
    CommandReceived {
        /// Device the command arrived on
        device: String,
        /// Command ID assigned by the peer
        command_id: u32,
        /// Command name
        name: String,
    },
    /// A response to one of our outstanding commands arrived
    CommandResponseReceived {
        /// Device the response arrived on
        device: String,
        /// ID of the answered command
        command_id: u32,
    },
    /// An outstanding command reached a terminal state
    ///
    /// Fired exactly once per query, for success, failure, expiry and
    /// cancellation alike.
    CommandCompleted {
        /// ID of the completed command
        command_id: u32,
        /// Terminal status
        status: CommandStatus,
    },
}

/// Subscription handle returned by [`EventBus::subscribe`]
pub type EventToken = u64;

type Callback = Box<dyn FnMut(&ConnectorEvent) + Send>;

/// Callback list with token-based unsubscription
#[derive(Default)]
pub struct EventBus {
    next_token: EventToken,
    subscribers: Vec<(EventToken, Callback)>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback; the token removes exactly this subscription
    pub fn subscribe<F>(&mut self, callback: F) -> EventToken
    where
        F: FnMut(&ConnectorEvent) + Send + 'static,
    {
        let token = self.next_token;
        self.next_token += 1;
        self.subscribers.push((token, Box::new(callback)));
        token
    }

    /// Remove a subscription; `false` when the token is unknown
    pub fn unsubscribe(&mut self, token: EventToken) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(t, _)| *t != token);
        self.subscribers.len() != before
    }

    /// Deliver an event to every subscriber in registration order
    pub fn emit(&mut self, event: &ConnectorEvent) {
        for (_, callback) in &mut self.subscribers {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_subscribe_emit_unsubscribe() {
        let mut bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        let token = bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&ConnectorEvent::Connected);
        bus.emit(&ConnectorEvent::Disconnected);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        assert!(bus.unsubscribe(token));
        bus.emit(&ConnectorEvent::Connected);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // Second unsubscribe is a no-op
        assert!(!bus.unsubscribe(token));
    }

    #[test]
    fn test_tokens_are_independent() {
        let mut bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let a = {
            let hits = hits.clone();
            bus.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        let _b = {
            let hits = hits.clone();
            bus.subscribe(move |_| {
                hits.fetch_add(10, Ordering::SeqCst);
            })
        };

        bus.unsubscribe(a);
        bus.emit(&ConnectorEvent::Activated);
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_event_payload() {
        let mut bus = EventBus::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let sink = seen.clone();
        bus.subscribe(move |event| {
            sink.lock().unwrap().push(event.clone());
        });

        let key = DeviceKey::new("IMAGE", "Probe");
        bus.emit(&ConnectorEvent::NewDevice(key.clone()));

        let events = seen.lock().unwrap();
        assert_eq!(events.as_slice(), &[ConnectorEvent::NewDevice(key)]);
    }
}
