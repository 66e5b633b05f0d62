//! Reconnection controller.
//!
//! ```text
//!                 ┌──────────── retry after base·2^(n-1) ───────────┐
//!                 ▼                                                 │
//! Disconnected ─► Connecting ──ok──► Connected ──lost──► (failure) ─┤
//!                     │                                             │
//!                     └──────────── failure ────────────────────────┤
//!                                                                   │
//!                                     attempt > max_attempts ──► Simulated
//! ```
//!
//! The controller is a plain state machine: it never sleeps or touches the
//! network. The link driver feeds it outcomes and acts on the returned
//! [`Decision`]. `Simulated` is terminal for the session, and so is an
//! explicit local close.

use serde::Serialize;
use std::time::Duration;

use crate::protocol::ConnectionMode;
use crate::transport::TransportError;

/// Retry limits and timings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Retries allowed after the first failure before falling back.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles with every further attempt.
    pub base_delay: Duration,
    /// Upper bound on a single connection attempt.
    pub open_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            open_timeout: Duration::from_millis(1500),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Longest single backoff, before the last retry.
    pub fn max_backoff(&self) -> Duration {
        self.delay_for(self.max_attempts)
    }

    /// Promised upper bound on the time to simulation fallback: every
    /// attempt waits at most the longest backoff, plus one open timeout.
    pub fn fallback_bound(&self) -> Duration {
        self.max_backoff()
            .saturating_mul(self.max_attempts)
            .saturating_add(self.open_timeout)
    }

    /// Worst-case time from session start to simulation fallback when every
    /// attempt runs into the open timeout.
    pub fn fallback_deadline(&self) -> Duration {
        let backoff: Duration = (1..=self.max_attempts).map(|n| self.delay_for(n)).sum();
        backoff + self.open_timeout.saturating_mul(self.max_attempts + 1)
    }
}

/// Coarse connection state exposed to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Simulated,
}

/// Snapshot of the session's connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub state: ConnectionState,
    pub attempt: u32,
    pub last_error: Option<String>,
}

impl Connection {
    pub fn mode(&self) -> ConnectionMode {
        match self.state {
            ConnectionState::Simulated => ConnectionMode::Simulated,
            _ => ConnectionMode::Real,
        }
    }

    pub fn is_simulated(&self) -> bool {
        self.state == ConnectionState::Simulated
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempt: 0,
            last_error: None,
        }
    }
}

/// Which side currently answers requests.
#[derive(Debug)]
pub enum Link<R, S> {
    Real(R),
    Simulated(S),
}

impl<R, S> Link<R, S> {
    pub fn mode(&self) -> ConnectionMode {
        match self {
            Link::Real(_) => ConnectionMode::Real,
            Link::Simulated(_) => ConnectionMode::Simulated,
        }
    }
}

/// What the driver should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Wait, then open again.
    Retry(Duration),
    /// Give up on the backend for the rest of the session.
    Simulate,
    /// Nothing to do: the session is closed or already simulated.
    Stop,
}

/// Connection lifecycle state machine.
#[derive(Debug)]
pub struct ReconnectController {
    policy: ReconnectPolicy,
    connection: Connection,
    closed: bool,
}

impl ReconnectController {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            connection: Connection::default(),
            closed: false,
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// An open attempt is starting. Returns `false` if attempts are no longer
    /// allowed.
    pub fn begin_attempt(&mut self) -> bool {
        if self.closed || self.is_terminal() {
            return false;
        }
        self.connection.state = ConnectionState::Connecting;
        true
    }

    /// The open attempt succeeded.
    pub fn on_connected(&mut self) {
        if self.closed || self.is_terminal() {
            return;
        }
        self.connection.state = ConnectionState::Connected;
        self.connection.attempt = 0;
        self.connection.last_error = None;
    }

    /// An attempt failed, or a connected link was lost without a local close.
    pub fn on_failure(&mut self, error: &TransportError) -> Decision {
        if self.closed || self.is_terminal() {
            return Decision::Stop;
        }

        self.connection.attempt += 1;
        self.connection.last_error = Some(error.to_string());

        if self.connection.attempt <= self.policy.max_attempts {
            self.connection.state = ConnectionState::Connecting;
            Decision::Retry(self.policy.delay_for(self.connection.attempt))
        } else {
            self.enter_simulated();
            Decision::Simulate
        }
    }

    /// Switch to simulation. Idempotent.
    pub fn enter_simulated(&mut self) {
        if self.closed {
            return;
        }
        self.connection.state = ConnectionState::Simulated;
    }

    /// Explicit local close. Terminal; suppresses every later transition.
    pub fn on_local_close(&mut self) {
        self.closed = true;
        self.connection.state = ConnectionState::Disconnected;
    }

    fn is_terminal(&self) -> bool {
        self.connection.state == ConnectionState::Simulated
    }
}
