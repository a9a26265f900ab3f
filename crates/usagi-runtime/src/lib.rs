//! Runtime orchestration for the usagi bot.
//!
//! This crate assembles the other layers into a running process:
//!
//! - [`config`] — TOML + environment configuration loading;
//! - [`logging`] — `tracing` subscriber setup;
//! - [`bot`] — the outbound [`Bot`] surface over a gateway connection;
//! - [`runtime`] — the [`UsagiRuntime`] that wires gateway, resolver,
//!   dispatcher, and signal handling together.
//!
//! ```ignore
//! use usagi_framework::HandlerRegistry;
//! use usagi_runtime::UsagiRuntime;
//!
//! #[tokio::main]
//! async fn main() -> usagi_runtime::RuntimeResult<()> {
//!     let registry = HandlerRegistry::builder().build();
//!     UsagiRuntime::builder().registry(registry).run().await
//! }
//! ```

pub mod bot;
pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use bot::Bot;
pub use config::{ConfigError, ConfigLoader, ConfigResult, UsagiConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use runtime::{RuntimeBuilder, Services, UsagiRuntime};
