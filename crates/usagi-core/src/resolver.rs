//! Media resolution: turning local references into gateway resource ids.
//!
//! Uploading, transcoding, and text rasterization are external collaborators;
//! this module owns only the traits the core needs from them and the
//! [`ResourceResolver`] that drives a resolve on demand. Results are not
//! cached here: each pending chain element is resolved at most once within
//! one build, and any cross-call caching belongs to the collaborator.

use std::fs;

use async_trait::async_trait;
use tracing::debug;

use crate::chain::element::MediaRef;
use crate::error::{ResolveError, ResolveResult};
use crate::event::ConversationKind;

// =============================================================================
// Collaborator traits
// =============================================================================

/// Media upload collaborator (mirai-api-http `uploadImage`/`uploadVoice`).
#[async_trait]
pub trait MediaUploader: Send + Sync {
    /// Uploads image bytes and returns the assigned image id.
    async fn upload_image(&self, bytes: Vec<u8>, kind: ConversationKind) -> ResolveResult<String>;

    /// Uploads already-encoded voice bytes and returns the assigned voice id.
    async fn upload_voice(&self, bytes: Vec<u8>, kind: ConversationKind) -> ResolveResult<String>;
}

/// Voice transcoding collaborator.
///
/// The gateway only accepts silk-encoded audio; raw clips go through this
/// codec before upload.
#[async_trait]
pub trait VoiceCodec: Send + Sync {
    /// Encodes the referenced audio into the gateway's voice codec.
    async fn encode(&self, source: &MediaRef) -> ResolveResult<Vec<u8>>;
}

/// An image placed onto a rendered text card.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderImage {
    /// Image source.
    pub source: MediaRef,
    /// Square size in pixels.
    pub size: u32,
    /// Position; negative coordinates are offsets from the far edge.
    pub pos: (i32, i32),
}

/// A text-to-image rendering request.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    /// The text to rasterize.
    pub text: String,
    /// Images overlaid on the card.
    pub images: Vec<RenderImage>,
    /// Canvas width in pixels.
    pub width: u32,
    /// Fixed height; `None` sizes to content.
    pub height: Option<u32>,
    /// Inner padding in pixels.
    pub padding: u32,
    /// Maximum text seat width in pixels.
    pub seat_width: u32,
    /// Background color, `#RRGGBB`.
    pub background: String,
}

/// Text-to-image rendering collaborator.
#[async_trait]
pub trait TextRenderer: Send + Sync {
    /// Renders the request into encoded image bytes.
    async fn render(&self, request: RenderRequest) -> ResolveResult<Vec<u8>>;
}

/// Read-only group roster lookups used by handlers.
///
/// The dispatch and protocol layers never touch this; it exists so handlers
/// can ask "who is in this group" without owning an HTTP client.
#[async_trait]
pub trait RosterService: Send + Sync {
    /// Lists the groups the bot account has joined, as `(id, name)` pairs.
    async fn group_list(&self) -> ResolveResult<Vec<(i64, String)>>;

    /// Looks up a member's display name within a group.
    async fn member_name(&self, group: i64, member: i64) -> ResolveResult<Option<String>>;
}

// =============================================================================
// ResourceResolver
// =============================================================================

/// Resolves media references to gateway resource ids on demand.
pub struct ResourceResolver {
    uploader: std::sync::Arc<dyn MediaUploader>,
    codec: std::sync::Arc<dyn VoiceCodec>,
    renderer: std::sync::Arc<dyn TextRenderer>,
}

impl ResourceResolver {
    /// Creates a resolver over the given collaborators.
    pub fn new(
        uploader: std::sync::Arc<dyn MediaUploader>,
        codec: std::sync::Arc<dyn VoiceCodec>,
        renderer: std::sync::Arc<dyn TextRenderer>,
    ) -> Self {
        Self {
            uploader,
            codec,
            renderer,
        }
    }

    /// Resolves an image reference to an image id.
    ///
    /// Card references are rasterized through the renderer first; paths are
    /// read from disk; bytes upload as-is.
    pub async fn resolve_image(
        &self,
        source: &MediaRef,
        kind: ConversationKind,
    ) -> ResolveResult<String> {
        let bytes = match source {
            MediaRef::Card(request) => self.renderer.render((**request).clone()).await?,
            other => read_media(other)?,
        };
        debug!(len = bytes.len(), kind = kind.upload_type(), "uploading image");
        self.uploader.upload_image(bytes, kind).await
    }

    /// Resolves a voice reference to a voice id, transcoding first.
    pub async fn resolve_voice(
        &self,
        source: &MediaRef,
        kind: ConversationKind,
    ) -> ResolveResult<String> {
        let encoded = self.codec.encode(source).await?;
        debug!(len = encoded.len(), kind = kind.upload_type(), "uploading voice");
        self.uploader.upload_voice(encoded, kind).await
    }
}

/// Reads a media reference into bytes. Paths are read synchronously.
fn read_media(source: &MediaRef) -> ResolveResult<Vec<u8>> {
    match source {
        MediaRef::Bytes(bytes) => Ok(bytes.clone()),
        MediaRef::Path(path) => fs::read(path).map_err(|e| ResolveError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
        MediaRef::Card(_) => Err(ResolveError::Render(
            "card reference carries no raw bytes".to_string(),
        )),
    }
}

/// A codec that passes bytes through unchanged.
///
/// For deployments where voice assets are already silk-encoded on disk.
pub struct PassthroughCodec;

#[async_trait]
impl VoiceCodec for PassthroughCodec {
    async fn encode(&self, source: &MediaRef) -> ResolveResult<Vec<u8>> {
        read_media(source)
    }
}
