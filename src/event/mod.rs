//! Event system for outward notifications.
//!
//! Channels, resources and the modem service publish what they observe here;
//! any number of subscribers can listen. This stands in for the signals the
//! daemon would emit on the service bus.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::resource::ResourceStatus;
use crate::unsolicited::Unsolicited;

/// Event types that can be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A channel finished its handshake.
    ChannelOpened { channel: String },
    /// A channel released its byte source.
    ChannelClosed { channel: String },
    /// A resource changed status.
    ResourceStatus {
        resource: String,
        status: ResourceStatus,
    },
    /// An unsolicited group that no handler consumed.
    Unsolicited(Unsolicited),
    /// A named service signal with its arguments.
    Signal { name: String, args: Vec<String> },
}

/// Discriminant of [`Event`], used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ChannelOpened,
    ChannelClosed,
    ResourceStatus,
    Unsolicited,
    Signal,
}

impl Event {
    /// Creates a signal event.
    #[must_use]
    pub fn signal<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Signal {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::ChannelOpened { .. } => EventKind::ChannelOpened,
            Self::ChannelClosed { .. } => EventKind::ChannelClosed,
            Self::ResourceStatus { .. } => EventKind::ResourceStatus,
            Self::Unsolicited(_) => EventKind::Unsolicited,
            Self::Signal { .. } => EventKind::Signal,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event, or `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("subscription lagged, {n} events lost");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}

/// Subscription filter for specific event types.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by event kinds.
    pub kinds: Option<Vec<EventKind>>,
    /// Filter by resource, channel or signal name.
    pub name: Option<String>,
}

impl EventFilter {
    /// Creates a filter for specific kinds.
    #[must_use]
    pub const fn kinds(kinds: Vec<EventKind>) -> Self {
        Self {
            kinds: Some(kinds),
            name: None,
        }
    }

    /// Creates a filter for one named signal.
    #[must_use]
    pub fn signal(name: impl Into<String>) -> Self {
        Self {
            kinds: Some(vec![EventKind::Signal]),
            name: Some(name.into()),
        }
    }

    /// Creates a filter for status changes of one resource.
    #[must_use]
    pub fn resource(name: impl Into<String>) -> Self {
        Self {
            kinds: Some(vec![EventKind::ResourceStatus]),
            name: Some(name.into()),
        }
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }

        if let Some(ref expected) = self.name {
            let name = match event {
                Event::ChannelOpened { channel } | Event::ChannelClosed { channel } => channel,
                Event::ResourceStatus { resource, .. } => resource,
                Event::Signal { name, .. } => name,
                Event::Unsolicited(_) => return false,
            };
            if name != expected {
                return false;
            }
        }

        true
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        tracing::trace!("dispatching {event:?}");
        // no receivers is fine
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to all events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let receiver = self.inner.sender.subscribe();
        Subscription { receiver }
    }

    /// Waits for an event matching the filter with timeout.
    ///
    /// Returns `None` if the timeout expires or the dispatcher is gone.
    pub async fn wait_for(&self, filter: EventFilter, timeout: Duration) -> Option<Event> {
        let mut subscription = self.subscribe();

        tokio::select! {
            biased;
            result = async {
                loop {
                    if let Some(event) = subscription.recv().await {
                        if filter.matches(&event) {
                            return Some(event);
                        }
                    } else {
                        return None;
                    }
                }
            } => result,
            () = tokio::time::sleep(timeout) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_dispatch() {
        let dispatcher = EventDispatcher::new(16);
        let mut sub = dispatcher.subscribe();

        dispatcher.dispatch(Event::ChannelOpened {
            channel: "misc".into(),
        });

        let event = tokio::time::timeout(Duration::from_millis(100), sub.recv())
            .await
            .unwrap();

        assert!(matches!(event, Some(Event::ChannelOpened { .. })));
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::kinds(vec![EventKind::ChannelOpened, EventKind::ChannelClosed]);

        assert!(filter.matches(&Event::ChannelClosed {
            channel: "misc".into()
        }));
        assert!(!filter.matches(&Event::signal("Status", ["1"])));
    }

    #[test]
    fn test_named_filter() {
        let filter = EventFilter::signal("AuthStatus");

        assert!(filter.matches(&Event::signal("AuthStatus", ["READY"])));
        assert!(!filter.matches(&Event::signal("Status", ["1"])));
        assert!(!filter.matches(&Event::ResourceStatus {
            resource: "AuthStatus".into(),
            status: ResourceStatus::Enabled,
        }));
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let dispatcher = EventDispatcher::new(16);
        let event = dispatcher
            .wait_for(EventFilter::signal("Never"), Duration::from_millis(10))
            .await;
        assert!(event.is_none());
    }
}
