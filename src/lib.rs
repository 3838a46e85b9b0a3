// Public modules
pub mod backend;
pub mod chat;
pub mod client;
pub mod client_logger;
pub mod config;
pub mod connection;
pub mod error;
pub mod history;
pub mod observability;
pub mod reducer;
pub mod session;
pub mod socket;
pub mod types;
pub mod uploads;

// Re-exports
pub use backend::Backend;
pub use client::ApiClient;
pub use client_logger::ClientLogger;
pub use config::{ClientConfig, Environment, IdentityMode, SessionConfig};
pub use connection::{ConnectionAction, ConnectionManager, ConnectionScope, ConnectionState};
pub use error::{Error, Result};
pub use history::HistoryController;
pub use observability::register_biometrics;
pub use reducer::{Applied, Conversation, STREAM_ERROR_FALLBACK};
pub use session::{SessionController, SessionUpdate};
pub use socket::{
    Connection, Connector, InboundEvent, InboundFrame, WebSocketConnector, WireChannel,
};
pub use types::*;
pub use uploads::{MediaUploadCoordinator, UploadBatch};
