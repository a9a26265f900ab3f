//! The execution context handed to each handler invocation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::debug;

use usagi_core::{Chain, ChainSettings, HandlerResult, MessageEvent};

use crate::wait::WaitTable;

/// Outbound message channel the framework sends through.
///
/// Implemented over the gateway in the runtime crate; tests substitute a
/// recording mock.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Resolves, encodes, and transmits a chain; returns the message id the
    /// gateway assigned.
    async fn push(&self, chain: Chain) -> HandlerResult<i64>;

    /// Chain settings (auto-convert threshold, card geometry) for replies.
    fn chain_settings(&self) -> ChainSettings;
}

/// Per-invocation context: the event plus the capabilities a handler needs.
#[derive(Clone)]
pub struct HandlerContext {
    event: Arc<MessageEvent>,
    outbound: Arc<dyn Outbound>,
    waits: Arc<WaitTable>,
}

impl HandlerContext {
    pub(crate) fn new(
        event: Arc<MessageEvent>,
        outbound: Arc<dyn Outbound>,
        waits: Arc<WaitTable>,
    ) -> Self {
        Self {
            event,
            outbound,
            waits,
        }
    }

    /// The event being handled.
    pub fn event(&self) -> &MessageEvent {
        &self.event
    }

    /// Starts a reply chain for the current event (mention on, quote off).
    pub fn chain(&self) -> Chain {
        Chain::reply(&self.event, self.outbound.chain_settings(), true, false)
    }

    /// Starts a reply chain with explicit mention/quote flags.
    pub fn chain_with(&self, at: bool, quote: bool) -> Chain {
        Chain::reply(&self.event, self.outbound.chain_settings(), at, quote)
    }

    /// Sends a chain immediately, without ending the handler.
    pub async fn send(&self, chain: Chain) -> HandlerResult<i64> {
        self.outbound.push(chain).await
    }

    /// Sends the prompt (if given) and suspends until the party's next
    /// message or the deadline.
    ///
    /// Returns `None` on timeout or when a later `wait_for_reply` for the
    /// same party supersedes this one. The wait slot is removed on every
    /// exit path.
    pub async fn wait_for_reply(
        &self,
        prompt: Option<Chain>,
        deadline: Duration,
    ) -> HandlerResult<Option<MessageEvent>> {
        if let Some(prompt) = prompt {
            self.outbound.push(prompt).await?;
        }

        let party = self.event.party();
        let (token, rx) = self.waits.arm(party);

        match timeout(deadline, rx).await {
            Ok(Ok(event)) => Ok(Some(event)),
            Ok(Err(_)) => {
                // Superseded by a newer wait for the same party.
                debug!(?party, "wait slot superseded");
                Ok(None)
            }
            Err(_) => {
                self.waits.disarm(party, token);
                debug!(?party, "wait slot timed out");
                Ok(None)
            }
        }
    }
}
