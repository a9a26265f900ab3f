//! Outbound chain element types.
//!
//! An [`Element`] is a single unit of outbound content. Media elements
//! (images and voice) start out holding a local reference and transition
//! exactly once to holding the protocol resource id assigned by the gateway;
//! they are never serialized while unresolved and never resolved twice.

use std::path::PathBuf;

use serde_json::{Value, json};

use crate::error::{ResolveError, ResolveResult};
use crate::resolver::RenderRequest;

/// A raw media reference, before the gateway has assigned a resource id.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaRef {
    /// Filesystem path, read as bytes at resolve time.
    Path(PathBuf),
    /// Raw bytes supplied directly.
    Bytes(Vec<u8>),
    /// A text card rendered to image bytes at resolve time.
    Card(Box<RenderRequest>),
}

impl From<&str> for MediaRef {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<String> for MediaRef {
    fn from(path: String) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<PathBuf> for MediaRef {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<Vec<u8>> for MediaRef {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

/// Resolution state of one media element.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSlot {
    /// Not yet uploaded; holds the local reference.
    Pending(MediaRef),
    /// Uploaded; holds the gateway-assigned resource id.
    Resolved(String),
}

impl MediaSlot {
    /// Whether this slot already holds a resource id.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// The pending reference, if any.
    pub fn pending(&self) -> Option<&MediaRef> {
        match self {
            Self::Pending(r) => Some(r),
            Self::Resolved(_) => None,
        }
    }

    /// Transitions the slot to resolved. Resolving twice is a logic error.
    pub fn fulfil(&mut self, id: String) {
        debug_assert!(!self.is_resolved(), "media slot resolved twice");
        *self = Self::Resolved(id);
    }
}

/// One unit of outbound message content.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// Plain text.
    Plain(String),
    /// Built-in emoji face by id.
    Face(i64),
    /// Mention of a group member.
    At(i64),
    /// Image, possibly awaiting upload.
    Image(MediaSlot),
    /// Voice clip, possibly awaiting transcode and upload.
    Voice(MediaSlot),
}

impl Element {
    /// Creates a pending image element from any media reference.
    pub fn image(source: impl Into<MediaRef>) -> Self {
        Self::Image(MediaSlot::Pending(source.into()))
    }

    /// Creates a pending voice element from any media reference.
    pub fn voice(source: impl Into<MediaRef>) -> Self {
        Self::Voice(MediaSlot::Pending(source.into()))
    }

    /// Serializes the element into its wire representation.
    ///
    /// # Errors
    /// Returns [`ResolveError::Unresolved`] if a media element has not been
    /// resolved yet; the build path guarantees this cannot happen.
    pub fn to_wire(&self) -> ResolveResult<Value> {
        match self {
            Self::Plain(text) => Ok(json!({ "type": "Plain", "text": text })),
            Self::Face(id) => Ok(json!({ "type": "Face", "faceId": id })),
            Self::At(target) => Ok(json!({ "type": "At", "target": target })),
            Self::Image(slot) => match slot {
                MediaSlot::Resolved(id) => Ok(json!({ "type": "Image", "imageId": id })),
                MediaSlot::Pending(_) => Err(ResolveError::Unresolved),
            },
            Self::Voice(slot) => match slot {
                MediaSlot::Resolved(id) => Ok(json!({ "type": "Voice", "voiceId": id })),
                MediaSlot::Pending(_) => Err(ResolveError::Unresolved),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_face_wire_format() {
        assert_eq!(
            Element::Plain("hi".into()).to_wire().unwrap(),
            json!({ "type": "Plain", "text": "hi" })
        );
        assert_eq!(
            Element::Face(7).to_wire().unwrap(),
            json!({ "type": "Face", "faceId": 7 })
        );
    }

    #[test]
    fn unresolved_media_refuses_serialization() {
        let element = Element::image("a.png");
        assert!(matches!(element.to_wire(), Err(ResolveError::Unresolved)));
    }

    #[test]
    fn resolved_media_serializes_id() {
        let mut slot = MediaSlot::Pending(MediaRef::from("a.png"));
        slot.fulfil("{ABC}.png".into());
        let element = Element::Image(slot);
        assert_eq!(
            element.to_wire().unwrap(),
            json!({ "type": "Image", "imageId": "{ABC}.png" })
        );
    }
}
