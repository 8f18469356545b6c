//! Event broadcaster: typed publish/subscribe for server-originated events.
//!
//! Listeners are plain callbacks invoked on the reader task, in registration
//! order. A panicking listener is logged and skipped; it never stops delivery
//! to the ones after it. Disposal flips the subscription's flag before removing
//! it from the registry, so a disposed listener is never invoked again, even
//! by an emit that already took its snapshot.

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tether_types::{Disposable, ServerCapabilities};
use tokio::sync::oneshot;

use crate::protocol::ResponseError;

/// Everything the server side can tell a listener.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Handshake received. The snapshot is the one now held by the analyzer.
    Connected {
        version: String,
        pid: Option<u32>,
        capabilities: Arc<ServerCapabilities>,
    },
    /// A subsystem (e.g. `"analysis"`) became busy or idle.
    StatusChanged { subsystem: String, busy: bool },
    /// A request's response carried an error payload.
    RequestError { method: String, error: ResponseError },
    /// The process is gone. Every pending request was already failed.
    ProcessExited {
        code: Option<i32>,
        signal: Option<i32>,
        /// `true` when the exit followed a stop request.
        expected: bool,
    },
    /// The server reported an internal error.
    ServerError { fatal: bool, message: String },
    /// Any other server notification.
    Notification {
        event: String,
        params: serde_json::Value,
    },
    /// An inbound frame could not be parsed and was dropped.
    ParseError { error: String },
}

/// Fieldless discriminant of [`ServerEvent`], used for registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    StatusChanged,
    RequestError,
    ProcessExited,
    ServerError,
    Notification,
    ParseError,
}

impl ServerEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected { .. } => EventKind::Connected,
            Self::StatusChanged { .. } => EventKind::StatusChanged,
            Self::RequestError { .. } => EventKind::RequestError,
            Self::ProcessExited { .. } => EventKind::ProcessExited,
            Self::ServerError { .. } => EventKind::ServerError,
            Self::Notification { .. } => EventKind::Notification,
            Self::ParseError { .. } => EventKind::ParseError,
        }
    }
}

type Listener = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

struct Entry {
    id: u64,
    kinds: Vec<EventKind>,
    active: Arc<AtomicBool>,
    listener: Listener,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Entry>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle returned by every registration. Cloning shares the same subscription.
#[derive(Clone)]
#[must_use = "a subscription that is never disposed keeps its listener alive"]
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Stop deliveries to this listener. Safe to call more than once.
    pub fn dispose(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).entries.retain(|entry| entry.id != self.id);
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Disposable for Subscription {
    fn dispose(&mut self) -> anyhow::Result<()> {
        Subscription::dispose(self);
        Ok(())
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Disposes the wrapped subscription when dropped.
struct DisposeOnDrop(Subscription);

impl Drop for DisposeOnDrop {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

/// Cheaply cloneable registry of listeners.
#[derive(Clone, Default)]
pub struct EventBroadcaster {
    registry: Arc<Mutex<Registry>>,
}

impl EventBroadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for every event of `kind`.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.on_kinds(&[kind], listener)
    }

    /// Register one listener for several kinds under a single subscription.
    pub fn on_kinds<F>(&self, kinds: &[EventKind], listener: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let handle = self.reserve();
        self.insert(kinds, &handle, Arc::new(listener));
        handle
    }

    /// Register a listener that fires on the first matching event, then disposes itself.
    pub fn once<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: FnOnce(&ServerEvent) + Send + 'static,
    {
        self.once_where(&[kind], |_| true, listener)
    }

    /// Single-fire variant with a predicate; non-matching events are ignored.
    pub fn once_where<P, F>(&self, kinds: &[EventKind], predicate: P, listener: F) -> Subscription
    where
        P: Fn(&ServerEvent) -> bool + Send + Sync + 'static,
        F: FnOnce(&ServerEvent) + Send + 'static,
    {
        let handle = self.reserve();
        let own = handle.clone();
        let slot = Mutex::new(Some(listener));
        self.insert(
            kinds,
            &handle,
            Arc::new(move |event: &ServerEvent| {
                if !predicate(event) {
                    return;
                }
                own.dispose();
                let listener = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(listener) = listener {
                    listener(event);
                }
            }),
        );
        handle
    }

    /// Resolve with the first event of `kinds` that satisfies `predicate`.
    ///
    /// Yields `None` if the broadcaster goes away first. Dropping the future
    /// disposes the underlying subscription.
    pub fn next_where<P>(
        &self,
        kinds: &[EventKind],
        predicate: P,
    ) -> impl Future<Output = Option<ServerEvent>> + Send + 'static
    where
        P: Fn(&ServerEvent) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let subscription = self.once_where(kinds, predicate, move |event| {
            let _ = tx.send(event.clone());
        });
        let guard = DisposeOnDrop(subscription);
        async move {
            let event = rx.await.ok();
            drop(guard);
            event
        }
    }

    /// Deliver `event` to every active listener for its kind, in registration order.
    pub(crate) fn emit(&self, event: &ServerEvent) {
        let kind = event.kind();
        let snapshot: Vec<(Arc<AtomicBool>, Listener)> = lock(&self.registry)
            .entries
            .iter()
            .filter(|entry| entry.kinds.contains(&kind))
            .map(|entry| (Arc::clone(&entry.active), Arc::clone(&entry.listener)))
            .collect();

        for (active, listener) in snapshot {
            if !active.load(Ordering::SeqCst) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!(?kind, "event listener panicked; continuing delivery");
            }
        }
    }

    /// Number of active listeners registered for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        lock(&self.registry)
            .entries
            .iter()
            .filter(|entry| entry.kinds.contains(&kind))
            .count()
    }

    fn reserve(&self) -> Subscription {
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        Subscription {
            id,
            active: Arc::new(AtomicBool::new(true)),
            registry: Arc::downgrade(&self.registry),
        }
    }

    fn insert(&self, kinds: &[EventKind], handle: &Subscription, listener: Listener) {
        lock(&self.registry).entries.push(Entry {
            id: handle.id,
            kinds: kinds.to_vec(),
            active: Arc::clone(&handle.active),
            listener,
        });
    }
}
