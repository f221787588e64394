//! Per-hostname warm-up state
//!
//! The sentinel runs once per hostname before any of its tasks are released.
//! It records the health-check outcome and the DNS answers gathered along the
//! way so that later tasks can reuse them.

use crate::state::DnsRecord;
use crate::FetchError;
use std::fmt;

/// Lifecycle of a hostname's sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SentinelState {
    #[default]
    NotStarted,
    InProgress,
    Done,
}

impl SentinelState {
    /// Valid transitions are `NotStarted -> InProgress -> Done`; nothing is ever re-run
    pub fn can_transition_to(&self, next: SentinelState) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::InProgress) | (Self::InProgress, Self::Done)
        )
    }
}

impl fmt::Display for SentinelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        };
        write!(f, "{}", s)
    }
}

/// Sentinel record for one hostname
#[derive(Debug, Clone, Default)]
pub struct Sentinel {
    state: SentinelState,
    /// Error of the health-check fetch, if it failed
    pub health: Option<FetchError>,
    pub dns_records: Vec<DnsRecord>,
}

impl Sentinel {
    pub fn state(&self) -> SentinelState {
        self.state
    }

    /// Moves to `next`, returning false if the transition is not allowed
    pub fn advance(&mut self, next: SentinelState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }

    /// Error every task of this hostname inherits without touching the network
    ///
    /// DNS and TCP failures apply to all tasks; a TLS failure only to https ones.
    pub fn short_circuit(&self, scheme: &str) -> Option<FetchError> {
        match &self.health {
            Some(err @ (FetchError::Dns(_) | FetchError::Tcp(_))) => Some(err.clone()),
            Some(err @ FetchError::Tls(_)) if scheme == "https" => Some(err.clone()),
            _ => None,
        }
    }
}
