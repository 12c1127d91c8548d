//! Change notifications for observers of the store.
//!
//! Mutations enqueue a [`Notification`] while still holding the store's write lock, so the queue
//! order is the commit order. A dedicated thread drains the queue and invokes the listeners,
//! which means slow listeners never block a writer.
//!
//! Delivery policy:
//!
//! - Every notification is delivered to every listener, in commit order. Nothing is coalesced.
//! - A listener receives the notifications published after it was added, even if older ones are still queued.
//!   Listeners added from within a callback therefore start with the next notification.
//!   Listeners removed from within a callback are not invoked again, not even for the in-flight notification.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use tunnel_model::{ResourceView, Route, TunnelConfig, TunnelState};

use crate::Key;

/// An observer of the store, e.g. the network extension or a view-model.
pub trait Listener: Send + Sync {
    fn on_change(&self, notification: &Notification);
}

impl<F> Listener for F
where
    F: Fn(&Notification) + Send + Sync,
{
    fn on_change(&self, notification: &Notification) {
        (self)(notification)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Position of this change in the commit order of the store, starting at 1.
    pub seq: u64,
    #[serde(flatten)]
    pub change: Change,
}

/// What changed and its new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", content = "value", rename_all = "snake_case")]
pub enum Change {
    Config(TunnelConfig),
    State(TunnelState),
    Resources(Vec<ResourceView>),
    RouteAdded(Route),
    RouteRemoved(Route),
    /// All keys were removed at once.
    Cleared,
}

impl Change {
    /// The keys whose value changed.
    pub fn keys(&self) -> &'static [Key] {
        match self {
            Change::Config(_) => &[Key::Config],
            Change::State(_) => &[Key::State],
            Change::Resources(_) => &[Key::Resources],
            Change::RouteAdded(_) | Change::RouteRemoved(_) => &[Key::Routes],
            Change::Cleared => &Key::ALL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Entry {
    listener: Box<dyn Listener>,
    active: AtomicBool,
    /// Sequence number of the first notification this listener receives.
    since: u64,
}

type Listeners = Arc<Mutex<BTreeMap<ListenerId, Arc<Entry>>>>;

enum Command {
    Notify(Notification),
    Flush(flume::Sender<()>),
}

pub(crate) struct ListenerRegistry {
    listeners: Listeners,
    queue: flume::Sender<Command>,
    dispatcher: ThreadId,
    next_id: AtomicU64,
    next_seq: AtomicU64,
}

impl ListenerRegistry {
    pub(crate) fn new() -> std::io::Result<Self> {
        let listeners = Listeners::default();
        let (queue, rx) = flume::unbounded();

        let handle = thread::Builder::new()
            .name("tunnel-store-notify".to_owned())
            .spawn({
                let listeners = listeners.clone();

                move || dispatch(rx, listeners)
            })?;

        Ok(Self {
            listeners,
            queue,
            dispatcher: handle.thread().id(),
            next_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(1),
        })
    }

    pub(crate) fn add(&self, listener: impl Listener + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let since = self.next_seq.load(Ordering::SeqCst);

        self.listeners.lock().insert(
            id,
            Arc::new(Entry {
                listener: Box::new(listener),
                active: AtomicBool::new(true),
                since,
            }),
        );

        tracing::debug!(%id, %since, "Added listener");

        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let Some(entry) = self.listeners.lock().remove(&id) else {
            return false;
        };
        entry.active.store(false, Ordering::SeqCst);

        tracing::debug!(%id, "Removed listener");

        true
    }

    pub(crate) fn subscribe(&self) -> (ListenerId, flume::Receiver<Notification>) {
        let (tx, rx) = flume::unbounded();
        let id = self.add(ChannelListener::new(tx));

        (id, rx)
    }

    /// Enqueues a notification for `change`.
    ///
    /// Must be called while holding the store's write lock, otherwise the queue order is not the commit order.
    pub(crate) fn publish(&self, change: Change) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);

        tracing::trace!(%seq, keys = ?change.keys(), "Publishing change");

        if self
            .queue
            .send(Command::Notify(Notification { seq, change }))
            .is_err()
        {
            tracing::error!(%seq, "Notification dispatcher is gone; dropping notification");
        }
    }

    /// Blocks until all notifications published so far have been delivered.
    ///
    /// Returns immediately when called from within a listener: the dispatcher would wait on itself.
    pub(crate) fn flush(&self) {
        if thread::current().id() == self.dispatcher {
            tracing::debug!("Ignoring flush from within a listener");
            return;
        }

        let (tx, rx) = flume::bounded(1);

        if self.queue.send(Command::Flush(tx)).is_err() {
            return;
        }

        let _ = rx.recv();
    }
}

fn dispatch(rx: flume::Receiver<Command>, listeners: Listeners) {
    for command in rx.iter() {
        match command {
            Command::Notify(notification) => {
                let snapshot = listeners
                    .lock()
                    .iter()
                    .map(|(id, entry)| (*id, entry.clone()))
                    .collect::<Vec<_>>();

                for (id, entry) in snapshot {
                    if !entry.active.load(Ordering::SeqCst) || notification.seq < entry.since {
                        continue;
                    }

                    let result =
                        catch_unwind(AssertUnwindSafe(|| entry.listener.on_change(&notification)));

                    if result.is_err() {
                        tracing::error!(%id, seq = %notification.seq, "Listener panicked");
                    }
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    tracing::debug!("Notification dispatcher stopped");
}

/// Forwards notifications into a channel, for observers that prefer message passing over callbacks.
///
/// Stays registered after the receiver is dropped until it is removed via its [`ListenerId`].
struct ChannelListener {
    tx: flume::Sender<Notification>,
    disconnected: AtomicBool,
}

impl ChannelListener {
    fn new(tx: flume::Sender<Notification>) -> Self {
        Self {
            tx,
            disconnected: AtomicBool::new(false),
        }
    }
}

impl Listener for ChannelListener {
    fn on_change(&self, notification: &Notification) {
        if self.tx.send(notification.clone()).is_ok() {
            return;
        }

        if !self.disconnected.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                seq = %notification.seq,
                "Subscriber dropped its receiver without removing the listener"
            );
        }
    }
}
