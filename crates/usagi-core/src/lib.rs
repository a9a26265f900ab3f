//! Core data model and message-chain engine for the usagi bot.
//!
//! This crate owns the pieces every other layer builds on:
//!
//! - [`event`] — the immutable inbound [`MessageEvent`] model parsed from
//!   gateway push frames;
//! - [`chain`] — outbound [`Chain`] construction and mirai-api-http wire
//!   encoding;
//! - [`resolver`] — the [`ResourceResolver`] and the collaborator traits for
//!   media upload, voice transcoding, card rendering, and roster lookups;
//! - [`error`] — the shared error taxonomy.
//!
//! Nothing here touches the network; transports and HTTP collaborators live
//! in `usagi-transport`, dispatching in `usagi-framework`.

pub mod chain;
pub mod error;
pub mod event;
pub mod resolver;

pub use chain::{Chain, ChainSettings, Element, MediaRef, MediaSlot, TextOptions};
pub use error::{
    ApiError, ApiResult, HandlerError, HandlerResult, ResolveError, ResolveResult, TransportError,
    TransportResult,
};
pub use event::{ConversationKind, MessageEvent, PartyKey};
pub use resolver::{
    MediaUploader, PassthroughCodec, RenderImage, RenderRequest, ResourceResolver, RosterService,
    TextRenderer, VoiceCodec,
};
