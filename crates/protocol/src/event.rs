use crate::{GroupId, GroupInfo, KeyshareRecord, PartyId, ProtocolMessage, RoundNumber};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Lifecycle and protocol events dispatched by a session and its
/// sub-components.
///
/// Modeled as a typed variant rather than a stringly-keyed payload so
/// subscribers pattern-match instead of downcasting; [`Event::name`]
/// still gives each variant the name used for subscription filtering,
/// matching the named-event contract of the [`EventBus`].
#[derive(Debug, Clone)]
pub enum Event {
    /// The session's crypto core and stores have come up.
    Initialized,
    /// The relay transport reached the `Open` state.
    Connected,
    /// The relay transport returned to `Disconnected`.
    Disconnected,
    /// `register()` completed; carries the assigned party id.
    Registered(PartyId),
    /// `create_group()` completed.
    GroupCreated(GroupInfo),
    /// `join_group()` completed.
    GroupJoined(GroupInfo),
    /// A keygen driver has been installed and started.
    KeygenStarted(GroupId),
    /// Keygen finished after `END:SUCCESS`.
    KeygenComplete(KeyshareRecord),
    /// A sign driver has been installed and started.
    SigningStarted(GroupId),
    /// Signing finished after `END:SUCCESS`; carries the `(r, s)` pair.
    SigningComplete {
        /// `r` component of the ECDSA signature.
        r: Vec<u8>,
        /// `s` component of the ECDSA signature.
        s: Vec<u8>,
    },
    /// A round was fully processed; carries the messages it produced.
    RoundComplete {
        /// The round that completed.
        round: RoundNumber,
        /// Outbound messages produced while finishing the round.
        messages: Vec<ProtocolMessage>,
    },
    /// Something failed; carries a human-readable message.
    Error(String),
}

impl Event {
    /// The name used to subscribe to this event kind.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Initialized => "initialized",
            Event::Connected => "connected",
            Event::Disconnected => "disconnected",
            Event::Registered(_) => "registered",
            Event::GroupCreated(_) => "group-created",
            Event::GroupJoined(_) => "group-joined",
            Event::KeygenStarted(_) => "keygen-started",
            Event::KeygenComplete(_) => "keygen-complete",
            Event::SigningStarted(_) => "signing-started",
            Event::SigningComplete { .. } => "signing-complete",
            Event::RoundComplete { .. } => "round-complete",
            Event::Error(_) => "error",
        }
    }
}

type SyncHandler = Box<dyn FnMut(&Event) + Send>;
type AsyncHandler =
    Box<dyn Fn(&Event) -> BoxFuture<'static, ()> + Send + Sync>;

struct Subscription {
    name: String,
    once: bool,
    handler: SyncHandler,
}

struct AsyncSubscription {
    name: String,
    handler: AsyncHandler,
}

/// Opaque handle returned by [`EventBus::on`]; pass to
/// [`EventBus::off`] to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// In-process, multi-subscriber publisher for [`Event`]s.
///
/// `emit` is fire-and-forget and isolates subscriber panics (logs and
/// continues); `emit_async` runs every async subscriber to completion
/// and returns their outcomes.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscriptions: Mutex<HashMap<u64, Subscription>>,
    async_subscriptions: Mutex<HashMap<u64, AsyncSubscription>>,
}

impl EventBus {
    /// Create an empty event bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every delivery of events named `name`.
    pub fn on<F>(&self, name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.insert(name.into(), false, Box::new(handler))
    }

    /// Subscribe to at most one delivery of events named `name`.
    pub fn once<F>(&self, name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.insert(name.into(), true, Box::new(handler))
    }

    /// Subscribe an async handler to every delivery of events named
    /// `name`; driven only by [`EventBus::emit_async`].
    pub fn on_async<F>(&self, name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.async_subscriptions.lock().unwrap().insert(
            id,
            AsyncSubscription { name: name.into(), handler: Box::new(handler) },
        );
        SubscriptionId(id)
    }

    fn insert(&self, name: String, once: bool, handler: SyncHandler) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions
            .lock()
            .unwrap()
            .insert(id, Subscription { name, once, handler });
        SubscriptionId(id)
    }

    /// Revoke a single subscription (sync or async).
    pub fn off(&self, id: SubscriptionId) {
        self.subscriptions.lock().unwrap().remove(&id.0);
        self.async_subscriptions.lock().unwrap().remove(&id.0);
    }

    /// Revoke every subscription.
    pub fn clear(&self) {
        self.subscriptions.lock().unwrap().clear();
        self.async_subscriptions.lock().unwrap().clear();
    }

    /// Publish an event to every matching synchronous subscriber.
    ///
    /// Subscriber panics are caught and logged rather than allowed to
    /// unwind into the caller; `once` subscribers are removed after
    /// firing.
    pub fn emit(&self, event: &Event) {
        let name = event.name();
        let mut once_fired = Vec::new();
        let mut subs = self.subscriptions.lock().unwrap();
        for (id, sub) in subs.iter_mut() {
            if sub.name != name {
                continue;
            }
            let handler = &mut sub.handler;
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler(event);
            }));
            if let Err(panic) = result {
                tracing::error!(
                    event = name,
                    "event subscriber panicked: {:?}",
                    panic
                );
            }
            if sub.once {
                once_fired.push(*id);
            }
        }
        for id in once_fired {
            subs.remove(&id);
        }
    }

    /// Publish an event to every matching async subscriber, awaiting
    /// them all and returning the count that ran.
    pub async fn emit_async(&self, event: &Event) -> usize {
        let name = event.name();
        let futures: Vec<_> = {
            let subs = self.async_subscriptions.lock().unwrap();
            subs.values()
                .filter(|s| s.name == name)
                .map(|s| (s.handler)(event))
                .collect()
        };
        let count = futures.len();
        futures::future::join_all(futures).await;
        count
    }
}
