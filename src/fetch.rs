//! "Is this still the active request" bookkeeping.
//!
//! Every fetch takes a [`Ticket`] when it starts. Starting another fetch or
//! invalidating the guard makes older tickets stale, and results carrying a
//! stale ticket are dropped instead of being applied.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

#[derive(Clone, Debug, Default)]
pub struct RequestGuard {
    latest: Arc<AtomicU64>,
}

impl RequestGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a request, superseding every earlier ticket.
    pub fn begin(&self) -> Ticket {
        Ticket(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.latest.load(Ordering::SeqCst) == ticket.0
    }

    /// Teardown: nothing in flight may apply its result anymore.
    pub fn invalidate(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
    }

    /// Awaits `fut`, started under `ticket`; `None` if superseded meanwhile.
    ///
    /// Take the ticket with [`begin`](Self::begin) before spawning, so the
    /// order of tickets is the order of user input.
    pub async fn run<F, T>(&self, ticket: Ticket, fut: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let out = fut.await;
        self.accept(ticket, out)
    }

    pub fn accept<T>(&self, ticket: Ticket, value: T) -> Option<T> {
        if self.is_current(ticket) {
            Some(value)
        } else {
            debug!(?ticket, "discarding stale response");
            None
        }
    }
}

/// A result tagged with the ticket it was requested under.
#[derive(Debug)]
pub struct Tagged<T> {
    pub ticket: Ticket,
    pub value: T,
}
