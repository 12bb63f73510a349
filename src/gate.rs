//! FIFO write gate.
//!
//! Callers draw a ticket and are admitted strictly in the order the tickets
//! were drawn. The gate owns the resource it protects, so the only way to reach
//! it is through a [`GateGuard`], and dropping the guard admits the next ticket.
//!
//! Drawing a ticket and entering later is crate-internal: a ticket that is
//! never entered stalls the gate, so outside callers only get [`WriteGate::acquire`].
//!
//! ```compile_fail
//! let gate = registration_store::WriteGate::new(());
//! let ticket = gate.ticket();
//! ```

use parking_lot::{Condvar, Mutex};
use std::ops::{Deref, DerefMut};

/// A place in the gate's queue.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
#[must_use = "a drawn ticket blocks every later ticket until it is used"]
pub(crate) struct Ticket(u64);

impl Ticket {
    #[cfg(test)]
    pub(crate) fn number(&self) -> u64 {
        self.0
    }
}

struct Turns {
    /// Next ticket number to hand out.
    next: u64,
    /// Ticket currently allowed through.
    serving: u64,
}

/// Mutual exclusion with first-come, first-served admission.
pub struct WriteGate<T> {
    turns: Mutex<Turns>,
    admitted: Condvar,
    resource: Mutex<T>,
}

impl<T> WriteGate<T> {
    pub fn new(resource: T) -> Self {
        Self {
            turns: Mutex::new(Turns { next: 0, serving: 0 }),
            admitted: Condvar::new(),
            resource: Mutex::new(resource),
        }
    }

    /// Reserve a place in line without waiting.
    pub(crate) fn ticket(&self) -> Ticket {
        let mut turns = self.turns.lock();
        let ticket = Ticket(turns.next);
        turns.next += 1;
        ticket
    }

    /// Block until `ticket` is served. The ticket must come from this gate.
    pub(crate) fn enter(&self, ticket: Ticket) -> GateGuard<'_, T> {
        {
            let mut turns = self.turns.lock();
            while turns.serving != ticket.0 {
                self.admitted.wait(&mut turns);
            }
        }

        // Only the serving ticket reaches this point, so the lock is free.
        let resource = self.resource.lock();
        GateGuard {
            gate: self,
            resource: Some(resource),
        }
    }

    /// Draw a ticket and wait for it.
    pub fn acquire(&self) -> GateGuard<'_, T> {
        let ticket = self.ticket();
        self.enter(ticket)
    }

    /// Number of tickets drawn but not yet released.
    pub fn pending(&self) -> u64 {
        let turns = self.turns.lock();
        turns.next - turns.serving
    }

    fn release(&self) {
        let mut turns = self.turns.lock();
        turns.serving += 1;
        self.admitted.notify_all();
    }
}

/// Exclusive access to the gated resource. Admits the next ticket on drop.
pub struct GateGuard<'a, T> {
    gate: &'a WriteGate<T>,
    resource: Option<parking_lot::MutexGuard<'a, T>>,
}

impl<T> Deref for GateGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only taken in drop.
        self.resource.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl<T> DerefMut for GateGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.resource.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T> Drop for GateGuard<'_, T> {
    fn drop(&mut self) {
        drop(self.resource.take());
        self.gate.release();
    }
}
