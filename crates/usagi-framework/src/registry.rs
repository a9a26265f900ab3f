//! Static handler registration.
//!
//! A [`HandlerRegistry`] is built once at startup and frozen; no ambient
//! global table. Each registration pairs a verify predicate with a handler
//! and a stable function id. Verification returns a normalized
//! [`Verdict`] — matched plus an explicit priority — so there is no
//! ambiguity at the call site about what "matched" means.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use usagi_core::{Chain, HandlerResult, MessageEvent};

use crate::context::HandlerContext;

/// Outcome of a verify predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the handler wants this event.
    pub matched: bool,
    /// Selection priority; higher wins, ties go to registration order.
    pub priority: i32,
}

impl Verdict {
    /// Default priority for a plain match.
    pub const DEFAULT_PRIORITY: i32 = 1;

    /// A match at the given priority.
    pub fn hit(priority: i32) -> Self {
        Self {
            matched: true,
            priority,
        }
    }

    /// A match at the default priority.
    pub fn hit_default() -> Self {
        Self::hit(Self::DEFAULT_PRIORITY)
    }

    /// No match.
    pub fn miss() -> Self {
        Self {
            matched: false,
            priority: 0,
        }
    }
}

/// Type-erased verify predicate.
pub type VerifyFn = Arc<dyn Fn(&MessageEvent) -> Verdict + Send + Sync>;

/// Future returned by a handler body.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult<Option<Chain>>> + Send>>;

/// Type-erased handler body.
pub type HandlerFn = Arc<dyn Fn(HandlerContext) -> HandlerFuture + Send + Sync>;

/// One registered handler.
pub struct Registration {
    id: String,
    verify: VerifyFn,
    handler: HandlerFn,
}

impl Registration {
    /// The stable function id, used in logs.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runs the verify predicate against an event.
    pub fn verify(&self, event: &MessageEvent) -> Verdict {
        (self.verify)(event)
    }

    /// Invokes the handler body.
    pub fn call(&self, ctx: HandlerContext) -> HandlerFuture {
        (self.handler)(ctx)
    }

    /// Clones out the handler body for execution in a spawned task.
    pub(crate) fn handler_fn(&self) -> HandlerFn {
        Arc::clone(&self.handler)
    }
}

/// The frozen handler table.
///
/// Registrations are evaluated in insertion order; selection is fully
/// deterministic for a fixed event and registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    registrations: Vec<Registration>,
}

impl HandlerRegistry {
    /// Starts building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Selects the handler for an event.
    ///
    /// Every registration's verify runs; among matches the highest priority
    /// wins and ties are broken by registration order (first wins).
    pub fn select(&self, event: &MessageEvent) -> Option<&Registration> {
        let mut best: Option<(i32, &Registration)> = None;
        for registration in &self.registrations {
            let verdict = registration.verify(event);
            if !verdict.matched {
                continue;
            }
            // Strictly-greater keeps the earliest registration on ties.
            if best.is_none_or(|(priority, _)| verdict.priority > priority) {
                best = Some((verdict.priority, registration));
            }
        }
        best.map(|(_, registration)| registration)
    }
}

/// Builder for [`HandlerRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    registrations: Vec<Registration>,
}

impl RegistryBuilder {
    /// Registers a handler with its verify predicate.
    pub fn on<V, H, Fut>(mut self, id: impl Into<String>, verify: V, handler: H) -> Self
    where
        V: Fn(&MessageEvent) -> Verdict + Send + Sync + 'static,
        H: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Option<Chain>>> + Send + 'static,
    {
        self.registrations.push(Registration {
            id: id.into(),
            verify: Arc::new(verify),
            handler: Arc::new(move |ctx| Box::pin(handler(ctx))),
        });
        self
    }

    /// Registers a handler matching any message whose text contains one of
    /// the keywords, at the given priority.
    pub fn on_keywords<H, Fut>(
        self,
        id: impl Into<String>,
        keywords: &[&str],
        priority: i32,
        handler: H,
    ) -> Self
    where
        H: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Option<Chain>>> + Send + 'static,
    {
        let keywords: Vec<String> = keywords.iter().map(|k| k.to_string()).collect();
        self.on(
            id,
            move |event| {
                if keywords.iter().any(|k| event.text.contains(k.as_str())) {
                    Verdict::hit(priority)
                } else {
                    Verdict::miss()
                }
            },
            handler,
        )
    }

    /// Freezes the registry.
    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            registrations: self.registrations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usagi_core::ConversationKind;

    fn event(text: &str) -> MessageEvent {
        MessageEvent {
            kind: ConversationKind::Group,
            sender_id: 1,
            sender_name: "t".into(),
            group_id: Some(2),
            text: text.into(),
            message_id: 3,
            timestamp: 4,
            at_bot: false,
        }
    }

    fn noop() -> impl Fn(HandlerContext) -> std::future::Ready<HandlerResult<Option<Chain>>> {
        |_ctx| std::future::ready(Ok(None))
    }

    #[test]
    fn highest_priority_wins() {
        let registry = HandlerRegistry::builder()
            .on("low", |_| Verdict::hit(1), noop())
            .on("high", |_| Verdict::hit(3), noop())
            .build();
        assert_eq!(registry.select(&event("x")).unwrap().id(), "high");
    }

    #[test]
    fn ties_break_by_registration_order() {
        let registry = HandlerRegistry::builder()
            .on("first", |_| Verdict::hit(2), noop())
            .on("second", |_| Verdict::hit(2), noop())
            .build();
        for _ in 0..10 {
            assert_eq!(registry.select(&event("x")).unwrap().id(), "first");
        }
    }

    #[test]
    fn misses_are_never_selected() {
        let registry = HandlerRegistry::builder()
            .on("never", |_| Verdict::miss(), noop())
            .build();
        assert!(registry.select(&event("x")).is_none());
    }

    #[test]
    fn keyword_helper_matches_substrings() {
        let registry = HandlerRegistry::builder()
            .on_keywords("enemy", &["敌人", "敌方"], 3, noop())
            .build();
        assert!(registry.select(&event("查查敌人资料")).is_some());
        assert!(registry.select(&event("你好")).is_none());
    }
}
