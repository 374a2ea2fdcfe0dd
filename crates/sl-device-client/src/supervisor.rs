//! Reconnect supervision.
//!
//! The `ReconnectSupervisor` tracks the connection lifecycle of one client:
//!
//! ```text
//! Idle -> Connecting -> Connected -> Disconnected -> Connecting -> ...
//! ```
//!
//! Transitions are made under a mutex. Entering `Connecting` is a
//! compare-and-transition, so however many disconnect events race each other,
//! only one reconnect cycle is ever in flight for a client.

use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use sl_protocol::DisconnectReason;

use crate::backoff::Backoff;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug)]
pub struct ReconnectSupervisor {
    state: Mutex<ConnectionState>,
    backoff: Mutex<Backoff>,
    cycles: AtomicUsize,
}

impl ReconnectSupervisor {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: Mutex::new(ConnectionState::Idle),
            backoff: Mutex::new(backoff),
            cycles: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enter `Connecting` unless a connection attempt is already in flight.
    pub fn begin_connect(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == ConnectionState::Connecting {
            return false;
        }
        *state = ConnectionState::Connecting;
        true
    }

    /// A session is up; the next failure starts the backoff schedule over.
    pub fn connected(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = ConnectionState::Connected;
        self.backoff.lock().unwrap_or_else(|e| e.into_inner()).reset();
    }

    pub fn disconnected(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = ConnectionState::Disconnected;
    }

    /// Delay before the next connection attempt.
    pub fn next_delay(&self) -> Duration {
        self.backoff.lock().unwrap_or_else(|e| e.into_inner()).next_sleep()
    }

    /// Number of reconnect cycles started.
    pub fn cycles(&self) -> usize {
        self.cycles.load(Ordering::SeqCst)
    }

    /// React to a lost session.
    ///
    /// Spawns `reconnect` when `reason` calls for it and no cycle is already
    /// running. Returns whether a cycle was started. The cycle must end with
    /// [`connected`](Self::connected) or [`disconnected`](Self::disconnected).
    pub fn on_disconnect<F, Fut>(&self, reason: DisconnectReason, reconnect: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if !reason.triggers_reconnect() {
            self.disconnected();
            tracing::info!(reason = %reason, "session closed, not reconnecting");
            return false;
        }
        if !self.begin_connect() {
            tracing::debug!(reason = %reason, "reconnect already in flight");
            return false;
        }

        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(reason = %reason, cycle, "session lost, reconnecting");
        tokio::spawn(reconnect());
        true
    }
}
