//! # usagi
//!
//! A message-chain bot core for mirai-api-http gateways.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐ push ┌────────────┐ select ┌───────────────────────────────┐
//! │ Gateway  │─────▶│ Dispatcher │───────▶│ handler (own task, own context)│──▶ Chain
//! │ (ws+http)│      │ wait table │        │ wait_for_reply suspends here   │
//! └──────────┘      └────────────┘        └───────────────────────────────┘
//!       ▲                                                 │
//!       └───────────── resolved + encoded frames ◀────────┘
//! ```
//!
//! - **usagi-core**: the [`Chain`](core::Chain) builder, media resolution,
//!   and the inbound [`MessageEvent`](core::MessageEvent) model
//! - **usagi-transport**: the correlated WebSocket gateway connection and
//!   the HTTP upload surface
//! - **usagi-framework**: handler registration, priority dispatch, and
//!   conversational waits
//! - **usagi-runtime**: config, logging, and process wiring
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use usagi::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> RuntimeResult<()> {
//!     let registry = HandlerRegistry::builder()
//!         .on_keywords("ping", &["ping"], 1, |ctx: HandlerContext| async move {
//!             Ok(Some(ctx.chain().text("pong")))
//!         })
//!         .build();
//!
//!     UsagiRuntime::builder()
//!         .config_file("usagi.toml")
//!         .registry(registry)
//!         .run()
//!         .await
//! }
//! ```

pub use usagi_core as core;
pub use usagi_framework as framework;
pub use usagi_runtime as runtime;
pub use usagi_transport as transport;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use usagi::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use usagi_runtime::{RuntimeResult, UsagiRuntime};

    // Handler registration and dispatch
    pub use usagi_framework::{
        Dispatcher, HandlerContext, HandlerRegistry, Outbound, RegistryBuilder, Verdict,
    };

    // Chain construction and the event model
    pub use usagi_core::{
        Chain, ChainSettings, Element, HandlerError, HandlerResult, MediaRef, MessageEvent,
        TextOptions,
    };

    // Logging macros
    pub use tracing::{debug, error, info, trace, warn};
}

// Re-export tracing so applications share the runtime's version.
pub use tracing;
