//! The streaming connection's lifecycle as an explicit state machine.
//!
//! [`ConnectionManager`] knows nothing about sockets or timers.  Each input (a user-requested
//! connect or close, the socket opening or closing, the reconnect timer firing) moves it to its
//! next state and returns the [`ConnectionAction`]s the host must perform.  The async driver in
//! [`crate::socket`] performs them with real sockets and tokio timers; tests drive the machine
//! with synthetic events.
//!
//! Reconnection uses a fixed delay with no growth and no attempt cap.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::ChatIdentity;

/// Delay between an unintentional close and the reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Where the connection is in its lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket.
    Disconnected,
    /// A socket is being opened.
    Connecting,
    /// The socket is open and frames may be sent.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// The chat a connection serves.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionScope {
    /// A conversation that has not been persisted yet.
    Draft,
    /// An existing chat.
    Chat(ChatIdentity),
}

impl ConnectionScope {
    /// The scope for an optional identity.
    pub fn for_identity(identity: Option<&ChatIdentity>) -> Self {
        match identity {
            Some(identity) => ConnectionScope::Chat(identity.clone()),
            None => ConnectionScope::Draft,
        }
    }
}

impl fmt::Display for ConnectionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionScope::Draft => write!(f, "new"),
            ConnectionScope::Chat(identity) => write!(f, "{identity}"),
        }
    }
}

/// Work the host must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionAction {
    /// Open a socket for `scope`; report the outcome with `generation`.
    Open {
        /// The chat the socket serves.
        scope: ConnectionScope,
        /// Tag for events belonging to this socket.
        generation: u64,
    },
    /// Close the current socket.
    CloseSocket,
    /// Start the reconnect timer.
    ScheduleReconnect(Duration),
    /// Cancel the pending reconnect timer.
    CancelReconnect,
}

/// The connection state machine.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    state: ConnectionState,
    closing_intentionally: bool,
    reconnect_pending: bool,
    scope: Option<ConnectionScope>,
    generation: u64,
    reconnect_delay: Duration,
    reconnects: u64,
}

impl ConnectionManager {
    /// Creates a disconnected manager.
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            closing_intentionally: false,
            reconnect_pending: false,
            scope: None,
            generation: 0,
            reconnect_delay,
            reconnects: 0,
        }
    }

    /// The current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns true if frames may be sent.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Returns true if the last close was requested.
    pub fn is_closing_intentionally(&self) -> bool {
        self.closing_intentionally
    }

    /// Returns true while the reconnect timer runs.
    pub fn is_reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// The scope of the current or most recent socket.
    pub fn scope(&self) -> Option<&ConnectionScope> {
        self.scope.as_ref()
    }

    /// The generation of the current or most recent socket.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// How many reconnect attempts have been started.
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Opens a socket for `scope`, replacing any socket or pending reconnect.
    pub fn connect(&mut self, scope: ConnectionScope) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        if self.reconnect_pending {
            self.reconnect_pending = false;
            actions.push(ConnectionAction::CancelReconnect);
        }
        if self.state != ConnectionState::Disconnected {
            actions.push(ConnectionAction::CloseSocket);
        }
        self.closing_intentionally = false;
        actions.push(self.open(scope));
        actions
    }

    /// Closes the socket without reconnecting.
    ///
    /// The closure is marked intentional before the timer is cancelled and the socket closed, so
    /// the close that follows never schedules a reconnect.
    pub fn close(&mut self) -> Vec<ConnectionAction> {
        self.closing_intentionally = true;
        let mut actions = Vec::new();
        if self.reconnect_pending {
            self.reconnect_pending = false;
            actions.push(ConnectionAction::CancelReconnect);
        }
        if self.state != ConnectionState::Disconnected {
            self.state = ConnectionState::Disconnected;
            actions.push(ConnectionAction::CloseSocket);
        }
        actions
    }

    /// The socket of `generation` opened.
    ///
    /// Returns false for a stale generation or a socket that was closed meanwhile.
    pub fn on_opened(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Connected;
        true
    }

    /// The socket of `generation` closed, or failed to open.
    pub fn on_closed(&mut self, generation: u64) -> Vec<ConnectionAction> {
        if generation != self.generation || self.state == ConnectionState::Disconnected {
            return Vec::new();
        }
        self.state = ConnectionState::Disconnected;
        if self.closing_intentionally || self.reconnect_pending {
            return Vec::new();
        }
        self.reconnect_pending = true;
        vec![ConnectionAction::ScheduleReconnect(self.reconnect_delay)]
    }

    /// The reconnect timer fired.
    pub fn on_reconnect_timer(&mut self) -> Vec<ConnectionAction> {
        if !self.reconnect_pending || self.closing_intentionally {
            return Vec::new();
        }
        self.reconnect_pending = false;
        let Some(scope) = self.scope.clone() else {
            return Vec::new();
        };
        self.reconnects += 1;
        vec![self.open(scope)]
    }

    /// Checks that a frame may be sent.
    pub fn check_send(&self) -> Result<()> {
        match self.state {
            ConnectionState::Connected => Ok(()),
            state => Err(Error::not_connected(format!(
                "cannot send while {state}"
            ))),
        }
    }

    fn open(&mut self, scope: ConnectionScope) -> ConnectionAction {
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        self.scope = Some(scope.clone());
        ConnectionAction::Open {
            scope,
            generation: self.generation,
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(scope: ConnectionScope) -> ConnectionManager {
        let mut manager = ConnectionManager::default();
        manager.connect(scope);
        assert!(manager.on_opened(manager.generation()));
        manager
    }

    #[test]
    fn connect_opens_draft() {
        let mut manager = ConnectionManager::default();
        let actions = manager.connect(ConnectionScope::Draft);
        assert_eq!(
            actions,
            vec![ConnectionAction::Open {
                scope: ConnectionScope::Draft,
                generation: 1
            }]
        );
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(manager.check_send().unwrap_err().is_not_connected());
        assert!(manager.on_opened(1));
        assert!(manager.is_connected());
        assert!(manager.check_send().is_ok());
    }

    #[test]
    fn unintentional_close_schedules_exactly_one_reconnect() {
        let mut manager = connected(ConnectionScope::Draft);
        assert_eq!(
            manager.on_closed(1),
            vec![ConnectionAction::ScheduleReconnect(DEFAULT_RECONNECT_DELAY)]
        );
        assert!(manager.on_closed(1).is_empty());
        assert!(manager.is_reconnect_pending());
        assert_eq!(
            manager.on_reconnect_timer(),
            vec![ConnectionAction::Open {
                scope: ConnectionScope::Draft,
                generation: 2
            }]
        );
        assert_eq!(manager.reconnects(), 1);
        assert!(manager.on_reconnect_timer().is_empty());
    }

    #[test]
    fn close_cancels_pending_reconnect() {
        let mut manager = connected(ConnectionScope::Draft);
        manager.on_closed(1);
        assert_eq!(manager.close(), vec![ConnectionAction::CancelReconnect]);
        assert!(manager.on_reconnect_timer().is_empty());
        assert_eq!(manager.reconnects(), 0);
    }

    #[test]
    fn intentional_close_does_not_reconnect() {
        let mut manager = connected(ConnectionScope::Draft);
        assert_eq!(manager.close(), vec![ConnectionAction::CloseSocket]);
        assert!(manager.is_closing_intentionally());
        assert!(manager.on_closed(1).is_empty());
        assert!(!manager.is_reconnect_pending());
    }

    #[test]
    fn failed_open_counts_as_unintentional_close() {
        let mut manager = ConnectionManager::new(Duration::from_millis(10));
        manager.connect(ConnectionScope::Draft);
        assert_eq!(
            manager.on_closed(1),
            vec![ConnectionAction::ScheduleReconnect(Duration::from_millis(10))]
        );
    }

    #[test]
    fn reconnect_retries_without_limit_or_backoff() {
        let mut manager = ConnectionManager::default();
        manager.connect(ConnectionScope::Draft);
        for attempt in 1..=20 {
            let generation = manager.generation();
            assert_eq!(
                manager.on_closed(generation),
                vec![ConnectionAction::ScheduleReconnect(DEFAULT_RECONNECT_DELAY)]
            );
            manager.on_reconnect_timer();
            assert_eq!(manager.reconnects(), attempt);
        }
    }

    #[test]
    fn switching_scope_replaces_socket() {
        let mut manager = connected(ConnectionScope::Draft);
        let identity = ChatIdentity::new("b", 2.0);
        let actions = manager.connect(ConnectionScope::Chat(identity.clone()));
        assert_eq!(
            actions,
            vec![
                ConnectionAction::CloseSocket,
                ConnectionAction::Open {
                    scope: ConnectionScope::Chat(identity.clone()),
                    generation: 2
                }
            ]
        );
        // The replaced socket reporting its close must not disturb the new one.
        assert!(manager.on_closed(1).is_empty());
        assert!(!manager.on_opened(1));
        assert!(manager.on_opened(2));
        assert_eq!(manager.scope(), Some(&ConnectionScope::Chat(identity)));
    }

    #[test]
    fn connect_cancels_pending_reconnect() {
        let mut manager = connected(ConnectionScope::Draft);
        manager.on_closed(1);
        let actions = manager.connect(ConnectionScope::Draft);
        assert_eq!(actions[0], ConnectionAction::CancelReconnect);
        assert!(!manager.is_reconnect_pending());
        assert!(manager.on_reconnect_timer().is_empty());
    }

    #[test]
    fn connect_after_close_clears_intentional_flag() {
        let mut manager = connected(ConnectionScope::Draft);
        manager.close();
        manager.connect(ConnectionScope::Draft);
        assert!(!manager.is_closing_intentionally());
        let generation = manager.generation();
        assert!(!manager.on_closed(generation).is_empty());
    }
}
