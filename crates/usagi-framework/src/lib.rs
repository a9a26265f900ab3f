//! Handler registration and event dispatch for the usagi bot.
//!
//! - [`registry`] — the frozen handler table with verify predicates and
//!   normalized [`Verdict`]s;
//! - [`wait`] — per-party wait slots for conversational continuation;
//! - [`context`] — the per-invocation [`HandlerContext`] with
//!   `wait_for_reply`;
//! - [`dispatcher`] — routing of inbound events.

pub mod context;
pub mod dispatcher;
pub mod registry;
pub mod wait;

pub use context::{HandlerContext, Outbound};
pub use dispatcher::Dispatcher;
pub use registry::{HandlerRegistry, Registration, RegistryBuilder, Verdict};
pub use wait::{WaitTable, WaitToken};
