//! Heartbeat / Liveness State Machine
//!
//! The relay context can die without a farewell message (aborted, starved,
//! wedged). The proxy learns about it only by counting pings that went
//! unanswered.
//!
//! # Protocol
//!
//! 1. After `connect`, the proxy sends `ping` every `interval`
//! 2. Every `pong` resets the unanswered count to zero
//! 3. Once the count exceeds `max_unanswered_pings`, the relay is declared dead
//!
//! ```text
//!   Idle ──connect──► Monitoring ──count > max──► Dead
//!    ▲                   │  ▲                      │
//!    └───disconnect──────┘  └──────connect─────────┘
//! ```
//!
//! [`Heartbeat`] holds only the state; the proxy event loop owns the timer
//! and performs the side effects of each [`HeartbeatTick`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default period between pings
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of pings that may go unanswered before the relay is dead
pub const DEFAULT_MAX_UNANSWERED: u32 = 5;

/// Configuration for heartbeat behavior
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between ping messages (default: 1 second)
    pub interval: Duration,
    /// Unanswered pings tolerated before declaring the relay dead (default: 5)
    pub max_unanswered_pings: u32,
    /// Whether heartbeat is enabled (can be disabled for testing)
    pub enabled: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_unanswered_pings: DEFAULT_MAX_UNANSWERED,
            enabled: true,
        }
    }
}

impl HeartbeatConfig {
    /// Create a new config with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config with heartbeat disabled (for testing)
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Set the ping interval
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the unanswered ping threshold
    #[must_use]
    pub fn with_max_unanswered(mut self, max_unanswered: u32) -> Self {
        self.max_unanswered_pings = max_unanswered;
        self
    }

    /// Create a config suitable for testing (shorter intervals)
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_unanswered_pings: 2,
            enabled: true,
        }
    }
}

/// Liveness of the relay as seen by the proxy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    /// No connection attempted, or disconnected on request
    #[default]
    Idle,
    /// Pinging the relay
    Monitoring,
    /// The relay stopped answering and was discarded
    Dead,
}

impl std::fmt::Display for Liveness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Monitoring => write!(f, "monitoring"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

/// What the event loop must do after a timer tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatTick {
    /// Send a ping and keep going
    Ping,
    /// Send a ping, then stop the timer and discard the relay
    Expired,
}

/// Heartbeat state for one proxy
#[derive(Debug, Clone)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    liveness: Liveness,
    unanswered: u32,
}

impl Heartbeat {
    /// Create an idle heartbeat
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            liveness: Liveness::Idle,
            unanswered: 0,
        }
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// Current liveness
    #[must_use]
    pub fn liveness(&self) -> Liveness {
        self.liveness
    }

    /// Pings sent since the last pong
    #[must_use]
    pub fn unanswered_pings(&self) -> u32 {
        self.unanswered
    }

    /// Enter `Monitoring`
    ///
    /// Returns `true` when a timer must be started. Already monitoring, or a
    /// disabled heartbeat, returns `false`.
    pub fn start(&mut self) -> bool {
        if !self.config.enabled || self.liveness == Liveness::Monitoring {
            return false;
        }

        tracing::debug!(from = %self.liveness, "Heartbeat monitoring started");
        self.liveness = Liveness::Monitoring;
        self.unanswered = 0;
        true
    }

    /// Advance one timer period
    ///
    /// Returns `None` when not monitoring, in which case the timer should be
    /// dropped.
    pub fn tick(&mut self) -> Option<HeartbeatTick> {
        if self.liveness != Liveness::Monitoring {
            return None;
        }

        self.unanswered = self.unanswered.saturating_add(1);
        if self.unanswered > self.config.max_unanswered_pings {
            self.liveness = Liveness::Dead;
            return Some(HeartbeatTick::Expired);
        }
        Some(HeartbeatTick::Ping)
    }

    /// A pong arrived
    pub fn record_pong(&mut self) {
        self.unanswered = 0;
    }

    /// Return to `Idle`
    pub fn stop(&mut self) {
        self.liveness = Liveness::Idle;
        self.unanswered = 0;
    }
}
