//! Network transport layer for the usagi bot.
//!
//! - [`correlation`] — matching asynchronous replies back to their callers;
//! - [`gateway`] — the persistent WebSocket connection with reconnect;
//! - [`http`] — the HTTP collaborator for media uploads and roster reads.

pub mod correlation;
pub mod gateway;
pub mod http;

pub use correlation::CorrelationTable;
pub use gateway::{EventSink, Gateway, GatewayConfig, ReconnectConfig};
pub use http::{MiraiHttpClient, SessionKeyFn};
