//! Update listeners and the notifier that feeds them.
//!
//! After every successful write the store hands a snapshot of the mapping to
//! the [`Notifier`], which fans it out to one delivery thread per listener:
//! - each listener receives its own copy,
//! - listener errors and panics are logged and contained,
//! - a slow or stuck listener only delays its own queue,
//! - each listener sees snapshots in the order their writes completed.
//!
//! # Example
//!
//! ```ignore
//! let (channel, updates) = SnapshotChannel::bounded(16);
//! store.register_listener(channel)?;
//!
//! store.register("u1".into(), binding)?;
//! let users = updates.recv()?;
//! ```

use crate::error::ListenerError;
use crate::types::{Registrations, SubscriberRecord};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::RwLock;
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Receives the full mapping whenever the persisted state changes.
pub trait UpdateListener: Send + Sync {
    fn handle_update(&self, users: Registrations) -> Result<(), ListenerError>;
}

impl<F> UpdateListener for F
where
    F: Fn(Registrations) -> Result<(), ListenerError> + Send + Sync,
{
    fn handle_update(&self, users: Registrations) -> Result<(), ListenerError> {
        self(users)
    }
}

/// Queue and thread serving a single listener.
struct Delivery {
    sender: Sender<Registrations>,
    worker: JoinHandle<()>,
}

/// Delivers snapshots to registered listeners off the write path.
pub(crate) struct Notifier {
    deliveries: RwLock<Vec<Delivery>>,
    /// Each delivery thread holds a clone; all dropped means all threads exited.
    exited_tx: Option<Sender<()>>,
    exited_rx: Receiver<()>,
    /// How long dropping waits for queued snapshots to be delivered.
    drain_timeout: Duration,
}

impl Notifier {
    pub(crate) fn new(drain_timeout: Duration) -> Self {
        let (exited_tx, exited_rx) = bounded(0);
        Self {
            deliveries: RwLock::new(Vec::new()),
            exited_tx: Some(exited_tx),
            exited_rx,
            drain_timeout,
        }
    }

    /// Start a delivery thread for `listener`.
    pub(crate) fn register(&self, listener: Arc<dyn UpdateListener>) -> io::Result<()> {
        let mut deliveries = self.deliveries.write();
        let index = deliveries.len();
        let (sender, receiver) = unbounded::<Registrations>();
        let exited = self.exited_tx.clone();

        let worker = thread::Builder::new()
            .name(format!("registration-listener-{}", index))
            .spawn(move || {
                let _exited = exited;
                for snapshot in receiver {
                    invoke(index, listener.as_ref(), snapshot);
                }
                tracing::trace!(listener = index, "Listener queue closed, stopping");
            })?;

        deliveries.push(Delivery { sender, worker });
        Ok(())
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.deliveries.read().len()
    }

    /// Queue a copy of `snapshot` for every listener. Never blocks on listeners.
    pub(crate) fn publish(&self, snapshot: Registrations) {
        let deliveries = self.deliveries.read();
        let Some((last, rest)) = deliveries.split_last() else {
            return;
        };

        for (index, delivery) in rest.iter().enumerate() {
            send(index, &delivery.sender, snapshot.deep_copy());
        }
        send(rest.len(), &last.sender, snapshot);
    }
}

fn send(index: usize, sender: &Sender<Registrations>, snapshot: Registrations) {
    if sender.send(snapshot).is_err() {
        tracing::error!(listener = index, "Listener thread is gone, update not delivered");
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        let deliveries = std::mem::take(self.deliveries.get_mut());
        if deliveries.is_empty() {
            return;
        }

        // A listener holding the last reference would otherwise wait on itself.
        let current = thread::current().id();
        let on_worker = deliveries.iter().any(|d| d.worker.thread().id() == current);

        // Closing the queues lets each thread drain what is queued and exit.
        let workers: Vec<JoinHandle<()>> = deliveries.into_iter().map(|d| d.worker).collect();
        drop(self.exited_tx.take());
        if on_worker {
            return;
        }

        let deadline = Instant::now() + self.drain_timeout;
        match self.exited_rx.recv_deadline(deadline) {
            Err(RecvTimeoutError::Disconnected) => {
                for worker in workers {
                    let _ = worker.join();
                }
            }
            Ok(()) | Err(RecvTimeoutError::Timeout) => {
                let stuck = workers.iter().filter(|w| !w.is_finished()).count();
                tracing::warn!(
                    stuck,
                    timeout_ms = self.drain_timeout.as_millis() as u64,
                    "Listeners still busy at shutdown, detaching"
                );
            }
        }
    }
}

fn invoke(index: usize, listener: &dyn UpdateListener, users: Registrations) {
    match panic::catch_unwind(AssertUnwindSafe(|| listener.handle_update(users))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(listener = index, error = %e, "Update listener failed");
        }
        Err(payload) => {
            tracing::warn!(
                listener = index,
                panic = panic_message(payload.as_ref()),
                "Update listener panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}

/// Forwards snapshots over a bounded channel.
///
/// A full buffer drops the snapshot and reports a listener error; later
/// snapshots are still attempted, and each one is a complete mapping.
pub struct SnapshotChannel {
    sender: Sender<Registrations>,
}

impl SnapshotChannel {
    pub fn bounded(capacity: usize) -> (Self, Receiver<Registrations>) {
        let (sender, receiver) = bounded(capacity);
        (Self { sender }, receiver)
    }
}

impl UpdateListener for SnapshotChannel {
    fn handle_update(&self, users: Registrations) -> Result<(), ListenerError> {
        match self.sender.try_send(users) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err("snapshot channel is full".into()),
            Err(TrySendError::Disconnected(_)) => Err("snapshot receiver was dropped".into()),
        }
    }
}

/// Latest delivered mapping, for collaborators that need lookups.
///
/// Cloning the view shares the underlying snapshot.
#[derive(Clone, Default)]
pub struct RegistrationView {
    latest: Arc<RwLock<Registrations>>,
}

impl RegistrationView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<SubscriberRecord> {
        self.latest.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.latest.read().contains(key)
    }

    pub fn len(&self) -> usize {
        self.latest.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.read().is_empty()
    }

    /// Copy of the latest mapping.
    pub fn snapshot(&self) -> Registrations {
        self.latest.read().deep_copy()
    }
}

impl UpdateListener for RegistrationView {
    fn handle_update(&self, users: Registrations) -> Result<(), ListenerError> {
        *self.latest.write() = users;
        Ok(())
    }
}
