//! Logging trait for session traffic.
//!
//! This module provides the [`ClientLogger`] trait that allows users to capture every frame a
//! [`SessionController`](crate::SessionController) sends or receives, and every chat it loads.

use crate::types::{ChatIdentity, ChatRecord, ProtocolEvent, SendFrame};

/// A trait for logging session traffic.
///
/// # Example
///
/// ```rust,ignore
/// use parley::{ClientLogger, ChatIdentity, ChatRecord, ProtocolEvent, SendFrame};
/// use std::io::Write;
/// use std::sync::Mutex;
///
/// struct FileLogger {
///     file: Mutex<std::fs::File>,
/// }
///
/// impl ClientLogger for FileLogger {
///     fn log_send(&self, frame: &SendFrame) {
///         let mut file = self.file.lock().unwrap();
///         writeln!(file, "send: {}", serde_json::to_string(frame).unwrap()).unwrap();
///     }
///
///     fn log_event(&self, identity: Option<&ChatIdentity>, event: &ProtocolEvent) {
///         let mut file = self.file.lock().unwrap();
///         writeln!(file, "recv: {}", serde_json::to_string(event).unwrap()).unwrap();
///     }
///
///     fn log_history(&self, record: &ChatRecord) {
///         let mut file = self.file.lock().unwrap();
///         writeln!(file, "history: {} messages", record.messages.len()).unwrap();
///     }
/// }
/// ```
pub trait ClientLogger: Send + Sync {
    /// Log an outbound frame.
    ///
    /// Called once per frame accepted by the connection.
    fn log_send(&self, frame: &SendFrame);

    /// Log an inbound event.
    ///
    /// Called for every event the session applies, with the identity the session was bound to
    /// when the event arrived.  Events from a chat the session has left are not logged.
    fn log_event(&self, identity: Option<&ChatIdentity>, event: &ProtocolEvent);

    /// Log a chat loaded by `select_chat`.
    fn log_history(&self, record: &ChatRecord);
}
