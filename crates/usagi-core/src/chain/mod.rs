//! Outbound message chains: elements and the builder.

pub mod builder;
pub mod element;

pub use builder::{Chain, ChainSettings, TextOptions};
pub use element::{Element, MediaRef, MediaSlot};
