//! Connection lifecycle of a single provider adapter
//!
//! ```text
//!   Disconnected ──initialize──> Connecting ──────> Connected <─────┐
//!                                    │                 │            │ self-heal
//!                                    │                 ▼            │
//!                                    │             Suspended ───────┘
//!                                    │                 │
//!                                    └───> Failed <────┘ (also from Connected)
//! ```
//!
//! `Failed` is terminal for an adapter instance. Invalid transitions are
//! logged and ignored: they indicate out-of-order backend events, not a
//! caller bug.
//!
//! # Example
//!
//! ```
//! use locus_core_failover::connection_state::{ConnectionStateMachine, ServiceConnectionState};
//!
//! let mut state = ConnectionStateMachine::new("fused");
//! assert!(state.on_suspended().is_none()); // not connected yet
//!
//! state.on_initialize();
//! state.on_connected();
//! assert_eq!(state.state(), ServiceConnectionState::Connected);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Instant, SystemTime};
use tracing::{debug, warn};

/// Connection state of one backend instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Suspended,
    Failed,
}

impl ServiceConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceConnectionState::Disconnected => "disconnected",
            ServiceConnectionState::Connecting => "connecting",
            ServiceConnectionState::Connected => "connected",
            ServiceConnectionState::Suspended => "suspended",
            ServiceConnectionState::Failed => "failed",
        }
    }

    /// Whether moving from `self` to `to` is a legal transition
    pub fn can_transition_to(&self, to: ServiceConnectionState) -> bool {
        use ServiceConnectionState::*;
        matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connected, Suspended)
                | (Connected, Failed)
                | (Connecting, Failed)
                | (Suspended, Connected)
                | (Suspended, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceConnectionState::Failed)
    }
}

impl fmt::Display for ServiceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded state change
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub provider: String,
    pub from: ServiceConnectionState,
    pub to: ServiceConnectionState,
    pub timestamp: SystemTime,
}

/// Validating state machine for one adapter instance
#[derive(Debug)]
pub struct ConnectionStateMachine {
    provider: String,
    state: ServiceConnectionState,
    state_entered_at: Instant,
    history: Vec<StateTransition>,
}

impl ConnectionStateMachine {
    /// Create a new machine in the `Disconnected` state
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            state: ServiceConnectionState::Disconnected,
            state_entered_at: Instant::now(),
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> ServiceConnectionState {
        self.state
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn is_connected(&self) -> bool {
        self.state == ServiceConnectionState::Connected
    }

    pub fn time_in_state(&self) -> std::time::Duration {
        self.state_entered_at.elapsed()
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Disconnected → Connecting
    pub fn on_initialize(&mut self) -> Option<StateTransition> {
        self.transition(ServiceConnectionState::Connecting)
    }

    /// Connecting/Suspended → Connected
    pub fn on_connected(&mut self) -> Option<StateTransition> {
        self.transition(ServiceConnectionState::Connected)
    }

    /// Connected → Suspended
    pub fn on_suspended(&mut self) -> Option<StateTransition> {
        self.transition(ServiceConnectionState::Suspended)
    }

    /// Connecting/Connected/Suspended → Failed
    pub fn on_failed(&mut self) -> Option<StateTransition> {
        self.transition(ServiceConnectionState::Failed)
    }

    /// Request a transition. Returns `None` and logs when the move is not
    /// allowed from the current state.
    pub fn transition(&mut self, to: ServiceConnectionState) -> Option<StateTransition> {
        if !self.state.can_transition_to(to) {
            warn!(
                provider = %self.provider,
                from = %self.state,
                to = %to,
                "Ignoring invalid connection state transition"
            );
            return None;
        }

        let event = StateTransition {
            provider: self.provider.clone(),
            from: self.state,
            to,
            timestamp: SystemTime::now(),
        };
        debug!(provider = %self.provider, from = %self.state, to = %to, "Connection state changed");

        self.state = to;
        self.state_entered_at = Instant::now();
        self.history.push(event.clone());
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ServiceConnectionState::*;

    #[test]
    fn test_happy_path() {
        let mut sm = ConnectionStateMachine::new("gms");
        assert_eq!(sm.state(), Disconnected);
        assert!(sm.on_initialize().is_some());
        assert!(sm.on_connected().is_some());
        assert!(sm.is_connected());
        assert_eq!(sm.history().len(), 2);
    }

    #[test]
    fn test_suspend_and_self_heal() {
        let mut sm = ConnectionStateMachine::new("gms");
        sm.on_initialize();
        sm.on_connected();
        let event = sm.on_suspended().unwrap();
        assert_eq!(event.from, Connected);
        assert_eq!(event.to, Suspended);
        assert!(sm.on_connected().is_some());
        assert_eq!(sm.state(), Connected);
    }

    #[test]
    fn test_invalid_transition_is_ignored() {
        let mut sm = ConnectionStateMachine::new("gms");
        assert!(sm.on_suspended().is_none());
        assert!(sm.on_failed().is_none());
        assert!(sm.on_connected().is_none());
        assert_eq!(sm.state(), Disconnected);
        assert!(sm.history().is_empty());
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut sm = ConnectionStateMachine::new("gms");
        sm.on_initialize();
        sm.on_failed();
        assert!(sm.state().is_terminal());
        for to in [Disconnected, Connecting, Connected, Suspended, Failed] {
            assert!(!Failed.can_transition_to(to));
        }
        assert!(sm.on_connected().is_none());
        assert_eq!(sm.state(), Failed);
    }

    #[test]
    fn test_transition_table() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(!Disconnected.can_transition_to(Suspended));
        assert!(Connecting.can_transition_to(Failed));
        assert!(!Connecting.can_transition_to(Suspended));
        assert!(Suspended.can_transition_to(Failed));
    }
}
