//! Outbound chain construction and wire encoding.
//!
//! A [`Chain`] accumulates an ordered list of content elements plus routing
//! metadata, then [`Chain::build`] resolves every pending media slot through
//! the [`ResourceResolver`] and encodes the mirai-api-http frame:
//!
//! ```json
//! { "syncId": 7, "command": "sendGroupMessage", "subCommand": null,
//!   "content": { "target": 1, "sessionKey": "s", "messageChain": [...] } }
//! ```
//!
//! Voice elements are kept on a separate list and transmitted as their own
//! frames; the gateway does not accept voice mixed into a message chain.

use std::fmt;
use std::sync::LazyLock;

use futures::future::try_join_all;
use regex::Regex;
use serde_json::{Value, json};

use crate::chain::element::{Element, MediaRef, MediaSlot};
use crate::error::ResolveResult;
use crate::event::{ConversationKind, MessageEvent};
use crate::resolver::{RenderImage, RenderRequest, ResourceResolver};

/// Inline face marker, e.g. `[face:7]`.
static FACE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[face:(\d+)\]").expect("face marker regex"));

/// Embedded card marker, e.g. `[cl text@#color cle]`.
static CARD_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[cl\s(.*?)@#(.*?)\scle\]").expect("card marker regex"));

/// Chain-level rendering and conversion settings.
#[derive(Debug, Clone)]
pub struct ChainSettings {
    /// Text at or beyond this length is auto-converted to an image.
    pub convert_length: usize,
    /// Card canvas width in pixels.
    pub image_width: u32,
    /// Card inner padding in pixels.
    pub padding: u32,
    /// Card background color.
    pub background: String,
    /// Optional watermark placed on every rendered card.
    pub logo: Option<RenderImage>,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            convert_length: 100,
            image_width: 700,
            padding: 10,
            background: "#F5F5F5".to_string(),
            logo: None,
        }
    }
}

impl ChainSettings {
    fn seat_width(&self) -> u32 {
        // Clamp rather than underflow when padding eats the whole canvas.
        self.image_width.saturating_sub(self.padding.saturating_mul(2))
    }
}

/// Options for [`Chain::text_with`].
#[derive(Debug, Clone, Copy)]
pub struct TextOptions {
    /// Append a newline after the text.
    pub enter: bool,
    /// Convert over-length text to an image.
    pub auto_convert: bool,
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            enter: false,
            auto_convert: true,
        }
    }
}

/// An outbound message under construction.
///
/// Created by the handler that owns it, mutated only by that handler, and
/// immutable once handed to the transport.
#[derive(Debug, Clone)]
pub struct Chain {
    command: &'static str,
    kind: ConversationKind,
    target: i64,
    quote: Option<i64>,
    elements: Vec<Element>,
    voices: Vec<Element>,
    settings: ChainSettings,
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.command, self.target)
    }
}

impl Chain {
    /// Creates a reply chain for the given event.
    ///
    /// Group replies mention the sender on their own line; pass `at = false`
    /// to suppress that, `quote = true` to quote the triggering message.
    pub fn reply(event: &MessageEvent, settings: ChainSettings, at: bool, quote: bool) -> Self {
        let mut chain = match event.kind {
            ConversationKind::Direct => Self::direct(event.sender_id, settings),
            ConversationKind::Group => Self::group(event.group_id.unwrap_or_default(), settings),
        };

        if event.kind == ConversationKind::Group {
            if quote {
                chain.quote = Some(event.message_id);
            }
            if at {
                chain = chain.at(event.sender_id).text_with(
                    "\n",
                    TextOptions {
                        enter: false,
                        auto_convert: false,
                    },
                );
            }
        }

        chain
    }

    /// Creates a chain targeting a friend, without a triggering event.
    pub fn direct(target: i64, settings: ChainSettings) -> Self {
        Self {
            command: "sendFriendMessage",
            kind: ConversationKind::Direct,
            target,
            quote: None,
            elements: Vec::new(),
            voices: Vec::new(),
            settings,
        }
    }

    /// Creates a chain targeting a group, without a triggering event.
    pub fn group(target: i64, settings: ChainSettings) -> Self {
        Self {
            command: "sendGroupMessage",
            kind: ConversationKind::Group,
            target,
            quote: None,
            elements: Vec::new(),
            voices: Vec::new(),
            settings,
        }
    }

    /// The wire command name.
    pub fn command(&self) -> &'static str {
        self.command
    }

    /// The target id (friend or group).
    pub fn target(&self) -> i64 {
        self.target
    }

    /// The conversation kind this chain is routed to.
    pub fn kind(&self) -> ConversationKind {
        self.kind
    }

    /// The accumulated chain elements.
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// The accumulated voice elements.
    pub fn voices(&self) -> &[Element] {
        &self.voices
    }

    /// Whether the chain carries no content at all.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.voices.is_empty()
    }

    /// Appends a mention of the given member.
    pub fn at(mut self, target: i64) -> Self {
        self.elements.push(Element::At(target));
        self
    }

    /// Appends text with default options (no newline, auto-convert on).
    pub fn text(self, text: impl AsRef<str>) -> Self {
        self.text_with(text, TextOptions::default())
    }

    /// Appends text.
    ///
    /// Three special cases, in order of precedence:
    /// 1. a card marker anywhere in the text routes the entire call to the
    ///    image path, ignoring every other text rule;
    /// 2. inline `[face:<id>]` markers split into interleaved plain/face
    ///    elements;
    /// 3. with `auto_convert`, text at or beyond the configured length is
    ///    rendered to an image instead of sent as plain text.
    pub fn text_with(mut self, text: impl AsRef<str>, options: TextOptions) -> Self {
        let raw = text.as_ref();

        if CARD_MARKER.is_match(raw) {
            return self.text_image(raw, Vec::new());
        }

        // Trim trailing newlines unless the text is nothing but newlines.
        let trimmed = raw.trim_end_matches('\n');
        let text = if trimmed.is_empty() { raw } else { trimmed };

        if FACE_MARKER.is_match(text) {
            self.append_with_faces(text);
        } else if options.auto_convert && text.chars().count() >= self.settings.convert_length {
            self = self.text_image(text, Vec::new());
        } else {
            self.elements.push(Element::Plain(text.to_string()));
        }

        if options.enter {
            return self.text_with(
                "\n",
                TextOptions {
                    enter: false,
                    auto_convert: false,
                },
            );
        }
        self
    }

    /// Splits `[face:<id>]` markers into interleaved plain/face elements,
    /// preserving surrounding text order.
    fn append_with_faces(&mut self, text: &str) {
        let mut cursor = 0;
        for capture in FACE_MARKER.captures_iter(text) {
            let marker = capture.get(0).expect("match group 0");
            let leading = &text[cursor..marker.start()];
            if !leading.is_empty() {
                self.elements.push(Element::Plain(leading.to_string()));
            }
            match capture[1].parse::<i64>() {
                Ok(id) => self.elements.push(Element::Face(id)),
                // An id too large for the wire stays visible as plain text.
                Err(_) => self
                    .elements
                    .push(Element::Plain(marker.as_str().to_string())),
            }
            cursor = marker.end();
        }
        let trailing = &text[cursor..];
        if !trailing.is_empty() {
            self.elements.push(Element::Plain(trailing.to_string()));
        }
    }

    /// Renders text (plus overlay images) to a card image element.
    pub fn text_image(mut self, text: impl Into<String>, mut images: Vec<RenderImage>) -> Self {
        if let Some(logo) = self.settings.logo.clone() {
            images.push(logo);
        }
        let request = RenderRequest {
            text: text.into(),
            images,
            width: self.settings.image_width,
            height: None,
            padding: self.settings.padding,
            seat_width: self.settings.seat_width(),
            background: self.settings.background.clone(),
        };
        self.elements
            .push(Element::Image(MediaSlot::Pending(MediaRef::Card(
                Box::new(request),
            ))));
        self
    }

    /// Appends one image element.
    pub fn image(mut self, source: impl Into<MediaRef>) -> Self {
        self.elements.push(Element::image(source));
        self
    }

    /// Appends one image element per source.
    pub fn images<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<MediaRef>,
    {
        for source in sources {
            self = self.image(source);
        }
        self
    }

    /// Appends one voice element to the separate voice list.
    pub fn voice(mut self, source: impl Into<MediaRef>) -> Self {
        self.voices.push(Element::voice(source));
        self
    }

    /// Appends one voice element per source.
    pub fn voice_list<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<MediaRef>,
    {
        for source in sources {
            self = self.voice(source);
        }
        self
    }

    // =========================================================================
    // Build
    // =========================================================================

    /// Resolves every pending media slot, concurrently.
    ///
    /// Already-resolved slots are left untouched, so calling this (or
    /// [`build`](Self::build)) twice never re-uploads. A single resolution
    /// failure aborts the whole build.
    pub async fn resolve(&mut self, resolver: &ResourceResolver) -> ResolveResult<()> {
        let kind = self.kind;
        let jobs: Vec<(usize, bool, bool, MediaRef)> = self
            .elements
            .iter()
            .enumerate()
            .map(|(i, e)| (i, true, e))
            .chain(self.voices.iter().enumerate().map(|(i, e)| (i, false, e)))
            .filter_map(|(i, main, element)| {
                let (is_image, slot) = match element {
                    Element::Image(slot) => (true, slot),
                    Element::Voice(slot) => (false, slot),
                    _ => return None,
                };
                slot.pending()
                    .map(|source| (i, main, is_image, source.clone()))
            })
            .collect();

        let resolved = try_join_all(jobs.into_iter().map(|(i, main, is_image, source)| {
            async move {
                let id = if is_image {
                    resolver.resolve_image(&source, kind).await?
                } else {
                    resolver.resolve_voice(&source, kind).await?
                };
                Ok::<_, crate::error::ResolveError>((i, main, id))
            }
        }))
        .await?;

        for (i, main, id) in resolved {
            let list = if main { &mut self.elements } else { &mut self.voices };
            match &mut list[i] {
                Element::Image(slot) | Element::Voice(slot) => slot.fulfil(id),
                _ => unreachable!("resolve job indexed a non-media element"),
            }
        }
        Ok(())
    }

    /// Resolves pending media and encodes the main message frame.
    pub async fn build(
        &mut self,
        resolver: &ResourceResolver,
        session_key: &str,
        sync_id: i64,
    ) -> ResolveResult<Value> {
        self.resolve(resolver).await?;
        self.frame(session_key, sync_id)
    }

    /// Encodes the main message frame from already-resolved elements.
    pub fn frame(&self, session_key: &str, sync_id: i64) -> ResolveResult<Value> {
        self.frame_for(&self.elements, session_key, sync_id)
    }

    /// Encodes one frame per voice element.
    ///
    /// `next_id` supplies a fresh correlation id for each frame.
    pub fn voice_frames(
        &self,
        session_key: &str,
        mut next_id: impl FnMut() -> i64,
    ) -> ResolveResult<Vec<Value>> {
        self.voices
            .iter()
            .map(|voice| {
                self.frame_for(std::slice::from_ref(voice), session_key, next_id())
            })
            .collect()
    }

    /// Number of stand-alone voice elements awaiting their own frames.
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Encodes the frame for one voice element.
    ///
    /// `index` must be below [`voice_count`](Self::voice_count).
    pub fn voice_frame(
        &self,
        index: usize,
        session_key: &str,
        sync_id: i64,
    ) -> ResolveResult<Value> {
        self.frame_for(std::slice::from_ref(&self.voices[index]), session_key, sync_id)
    }

    fn frame_for(
        &self,
        elements: &[Element],
        session_key: &str,
        sync_id: i64,
    ) -> ResolveResult<Value> {
        let chain: Vec<Value> = elements
            .iter()
            .map(Element::to_wire)
            .collect::<ResolveResult<_>>()?;

        let mut content = json!({
            "target": self.target,
            "sessionKey": session_key,
            "messageChain": chain,
        });
        if let Some(quote) = self.quote {
            content["quote"] = json!(quote);
        }

        Ok(json!({
            "syncId": sync_id,
            "command": self.command,
            "subCommand": null,
            "content": content,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{MediaUploader, PassthroughCodec, TextRenderer, VoiceCodec};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingUploader {
        uploads: AtomicUsize,
    }

    #[async_trait]
    impl MediaUploader for CountingUploader {
        async fn upload_image(
            &self,
            _bytes: Vec<u8>,
            _kind: ConversationKind,
        ) -> ResolveResult<String> {
            let n = self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(format!("img-{n}"))
        }

        async fn upload_voice(
            &self,
            _bytes: Vec<u8>,
            _kind: ConversationKind,
        ) -> ResolveResult<String> {
            let n = self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(format!("voc-{n}"))
        }
    }

    struct StubRenderer;

    #[async_trait]
    impl TextRenderer for StubRenderer {
        async fn render(&self, request: RenderRequest) -> ResolveResult<Vec<u8>> {
            Ok(request.text.into_bytes())
        }
    }

    fn test_resolver() -> (Arc<CountingUploader>, ResourceResolver) {
        let uploader = Arc::new(CountingUploader {
            uploads: AtomicUsize::new(0),
        });
        let codec: Arc<dyn VoiceCodec> = Arc::new(PassthroughCodec);
        let resolver = ResourceResolver::new(uploader.clone(), codec, Arc::new(StubRenderer));
        (uploader, resolver)
    }

    fn settings() -> ChainSettings {
        ChainSettings::default()
    }

    #[test]
    fn face_markers_split_preserving_order() {
        let chain = Chain::group(1, settings()).text("hi[face:7]bye");
        assert_eq!(
            chain.elements(),
            &[
                Element::Plain("hi".into()),
                Element::Face(7),
                Element::Plain("bye".into()),
            ]
        );
    }

    #[test]
    fn adjacent_face_markers() {
        let chain = Chain::group(1, settings()).text("[face:1][face:2]x");
        assert_eq!(
            chain.elements(),
            &[
                Element::Face(1),
                Element::Face(2),
                Element::Plain("x".into()),
            ]
        );
    }

    #[test]
    fn face_id_overflow_keeps_the_marker_as_text() {
        let chain = Chain::group(1, settings()).text("[face:99999999999999999999]x");
        assert_eq!(
            chain.elements(),
            &[
                Element::Plain("[face:99999999999999999999]".into()),
                Element::Plain("x".into()),
            ]
        );
    }

    #[test]
    fn oversized_padding_clamps_seat_width() {
        let settings = ChainSettings {
            image_width: 10,
            padding: 20,
            ..ChainSettings::default()
        };
        let chain = Chain::group(1, settings).text_image("x", Vec::new());
        let Element::Image(MediaSlot::Pending(MediaRef::Card(request))) = &chain.elements()[0]
        else {
            panic!("expected a pending card");
        };
        assert_eq!(request.seat_width, 0);
    }

    #[test]
    fn over_length_text_becomes_single_image() {
        let long = "好".repeat(120);
        let chain = Chain::group(1, settings()).text(&long);
        assert_eq!(chain.elements().len(), 1);
        assert!(matches!(chain.elements()[0], Element::Image(_)));
    }

    #[test]
    fn auto_convert_off_keeps_plain() {
        let long = "好".repeat(120);
        let chain = Chain::group(1, settings()).text_with(
            &long,
            TextOptions {
                enter: false,
                auto_convert: false,
            },
        );
        assert!(matches!(chain.elements()[0], Element::Plain(_)));
    }

    #[test]
    fn card_marker_takes_image_path_exclusively() {
        let chain = Chain::group(1, settings()).text("before [cl title@#ff0000 cle] after");
        assert_eq!(chain.elements().len(), 1);
        assert!(matches!(chain.elements()[0], Element::Image(_)));
    }

    #[test]
    fn trailing_newlines_trimmed_before_split() {
        let chain = Chain::group(1, settings()).text("hey[face:3]\n\n");
        assert_eq!(
            chain.elements(),
            &[Element::Plain("hey".into()), Element::Face(3)]
        );
    }

    #[test]
    fn group_reply_prepends_mention() {
        let event = MessageEvent {
            kind: ConversationKind::Group,
            sender_id: 42,
            sender_name: "doc".into(),
            group_id: Some(9),
            text: "hello".into(),
            message_id: 77,
            timestamp: 0,
            at_bot: false,
        };
        let chain = Chain::reply(&event, settings(), true, true).text("ok");
        assert_eq!(chain.target(), 9);
        assert_eq!(chain.quote, Some(77));
        assert_eq!(
            chain.elements(),
            &[
                Element::At(42),
                Element::Plain("\n".into()),
                Element::Plain("ok".into()),
            ]
        );
    }

    #[tokio::test]
    async fn build_resolves_media_and_encodes_frame() {
        let (_uploader, resolver) = test_resolver();
        let mut chain = Chain::group(9, settings())
            .text("look")
            .image(vec![1u8, 2, 3]);
        let frame = chain.build(&resolver, "sess", 41).await.unwrap();

        assert_eq!(frame["syncId"], 41);
        assert_eq!(frame["command"], "sendGroupMessage");
        assert_eq!(frame["content"]["sessionKey"], "sess");
        assert_eq!(frame["content"]["target"], 9);
        let wire_chain = frame["content"]["messageChain"].as_array().unwrap();
        assert_eq!(wire_chain[1]["type"], "Image");
        assert_eq!(wire_chain[1]["imageId"], "img-0");
    }

    #[tokio::test]
    async fn building_twice_does_not_reupload() {
        let (uploader, resolver) = test_resolver();
        let mut chain = Chain::group(9, settings()).image(vec![1u8]);
        chain.build(&resolver, "sess", 1).await.unwrap();
        chain.build(&resolver, "sess", 2).await.unwrap();
        assert_eq!(uploader.uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn voices_build_as_separate_frames() {
        let (_uploader, resolver) = test_resolver();
        let mut chain = Chain::direct(5, settings())
            .text("voice incoming")
            .voice(vec![9u8, 9]);
        chain.resolve(&resolver).await.unwrap();

        let mut next = 100;
        let frames = chain
            .voice_frames("sess", || {
                next += 1;
                next
            })
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["syncId"], 101);
        let wire_chain = frames[0]["content"]["messageChain"].as_array().unwrap();
        assert_eq!(wire_chain.len(), 1);
        assert_eq!(wire_chain[0]["type"], "Voice");
    }
}
