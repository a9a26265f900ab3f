//! Event dispatch.
//!
//! On each inbound event the [`Dispatcher`]:
//!
//! 1. offers it to the wait table — an armed slot for the event's party
//!    consumes it and the handler registry is bypassed for that message;
//! 2. otherwise runs every registration's verify, selects the
//!    highest-priority match (ties to the earliest registration), and runs
//!    that handler in its own task;
//! 3. catches and logs handler failures so they never affect other handlers
//!    or the connection.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use usagi_core::MessageEvent;

use crate::context::{HandlerContext, Outbound};
use crate::registry::HandlerRegistry;
use crate::wait::WaitTable;

/// The central event dispatcher.
///
/// Holds the frozen handler registry and the per-party wait table; safe to
/// share across tasks.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    waits: Arc<WaitTable>,
    outbound: Arc<dyn Outbound>,
    bot_account: i64,
}

impl Dispatcher {
    /// Creates a dispatcher over a frozen registry.
    pub fn new(
        registry: Arc<HandlerRegistry>,
        outbound: Arc<dyn Outbound>,
        bot_account: i64,
    ) -> Self {
        Self {
            registry,
            waits: Arc::new(WaitTable::new()),
            outbound,
            bot_account,
        }
    }

    /// The wait table shared with handler contexts.
    pub fn waits(&self) -> &Arc<WaitTable> {
        &self.waits
    }

    /// Parses a gateway push payload and dispatches it.
    ///
    /// Non-message pushes (notices, meta events) are ignored.
    pub async fn on_push(&self, payload: Value) {
        match MessageEvent::from_push(&payload, self.bot_account) {
            Some(event) => {
                info!(
                    sender = event.sender_id,
                    group = ?event.group_id,
                    message_id = event.message_id,
                    "received message"
                );
                self.dispatch(event).await;
            }
            None => {
                trace!(kind = ?payload.get("type"), "ignoring non-message push");
            }
        }
    }

    /// Routes one event: waiting handler first, then the registry.
    pub async fn dispatch(&self, event: MessageEvent) {
        // A waiting conversational handler intercepts the party's next
        // message before the registry is consulted.
        let event = match self.waits.deliver(event) {
            None => {
                debug!("event delivered to waiting handler");
                return;
            }
            Some(event) => event,
        };

        let Some(registration) = self.registry.select(&event) else {
            trace!(text = %event.text, "no handler matched");
            return;
        };

        let id = registration.id().to_string();
        let handler = registration.handler_fn();
        debug!(handler = %id, "handler selected");

        let ctx = HandlerContext::new(
            Arc::new(event),
            Arc::clone(&self.outbound),
            Arc::clone(&self.waits),
        );
        let outbound = Arc::clone(&self.outbound);

        // Each handler runs to completion in its own task; failures are
        // contained here.
        tokio::spawn(async move {
            match handler(ctx).await {
                Ok(Some(chain)) => {
                    if let Err(e) = outbound.push(chain).await {
                        warn!(handler = %id, error = %e, "failed to send handler reply");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(handler = %id, error = %e, "handler failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Verdict;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use usagi_core::{Chain, ChainSettings, ConversationKind, Element, HandlerError, HandlerResult};

    struct MockOutbound {
        sent: Mutex<Vec<Chain>>,
    }

    #[async_trait]
    impl Outbound for MockOutbound {
        async fn push(&self, chain: Chain) -> HandlerResult<i64> {
            let mut sent = self.sent.lock().await;
            sent.push(chain);
            Ok(sent.len() as i64)
        }

        fn chain_settings(&self) -> ChainSettings {
            ChainSettings::default()
        }
    }

    fn outbound() -> Arc<MockOutbound> {
        Arc::new(MockOutbound {
            sent: Mutex::new(Vec::new()),
        })
    }

    fn group_event(sender: i64, text: &str) -> MessageEvent {
        MessageEvent {
            kind: ConversationKind::Group,
            sender_id: sender,
            sender_name: "doctor".into(),
            group_id: Some(600),
            text: text.into(),
            message_id: 41,
            timestamp: 0,
            at_bot: false,
        }
    }

    fn plain_text(chain: &Chain) -> String {
        chain
            .elements()
            .iter()
            .filter_map(|e| match e {
                Element::Plain(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    async fn wait_for_sends(outbound: &MockOutbound, count: usize) -> Vec<Chain> {
        for _ in 0..200 {
            {
                let sent = outbound.sent.lock().await;
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} sends, got {}", outbound.sent.lock().await.len());
    }

    #[tokio::test]
    async fn matched_handler_reply_is_sent() {
        let registry = HandlerRegistry::builder()
            .on(
                "echo",
                |_| Verdict::hit_default(),
                |ctx: HandlerContext| async move {
                    let text = ctx.event().text.clone();
                    Ok(Some(ctx.chain_with(false, false).text(text)))
                },
            )
            .build();
        let out = outbound();
        let dispatcher = Dispatcher::new(Arc::new(registry), out.clone(), 900);

        dispatcher.dispatch(group_event(1, "hello")).await;
        let sent = wait_for_sends(&out, 1).await;
        assert_eq!(plain_text(&sent[0]), "hello");
    }

    #[tokio::test]
    async fn armed_wait_slot_bypasses_registry() {
        let registry = HandlerRegistry::builder()
            .on(
                "never",
                |_| Verdict::hit(100),
                |ctx: HandlerContext| async move {
                    Ok(Some(ctx.chain_with(false, false).text("should not run")))
                },
            )
            .build();
        let out = outbound();
        let dispatcher = Dispatcher::new(Arc::new(registry), out.clone(), 900);

        let event = group_event(9, "2");
        let (_token, rx) = dispatcher.waits().arm(event.party());

        dispatcher.dispatch(event).await;

        // Delivered to the waiter, not the (higher-priority) registry match.
        assert_eq!(rx.await.unwrap().text, "2");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(out.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn handler_failure_does_not_poison_dispatch() {
        let registry = HandlerRegistry::builder()
            .on(
                "faulty",
                |event: &MessageEvent| {
                    if event.text == "boom" {
                        Verdict::hit(5)
                    } else {
                        Verdict::miss()
                    }
                },
                |_ctx| async move { Err::<Option<Chain>, _>(HandlerError::other("exploded")) },
            )
            .on(
                "steady",
                |_| Verdict::hit_default(),
                |ctx: HandlerContext| async move {
                    Ok(Some(ctx.chain_with(false, false).text("still here")))
                },
            )
            .build();
        let out = outbound();
        let dispatcher = Dispatcher::new(Arc::new(registry), out.clone(), 900);

        dispatcher.dispatch(group_event(1, "boom")).await;
        dispatcher.dispatch(group_event(1, "fine")).await;

        let sent = wait_for_sends(&out, 1).await;
        assert_eq!(plain_text(&sent[0]), "still here");
    }

    #[tokio::test]
    async fn disambiguation_round_trip_picks_second_candidate() {
        const CANDIDATES: [&str; 3] = ["源石虫", "酸液源石虫", "凶悍源石虫"];

        let registry = HandlerRegistry::builder()
            .on_keywords("enemy", &["敌人", "敌方"], 3, |ctx: HandlerContext| {
                async move {
                    let mut text = String::from("为您搜索到以下敌方单位：\n");
                    for (i, name) in CANDIDATES.iter().enumerate() {
                        text.push_str(&format!("[{}] {}\n", i + 1, name));
                    }
                    text.push_str("\n回复序号查询对应资料");

                    let prompt = ctx.chain_with(false, false).text(text);
                    let reply = ctx
                        .wait_for_reply(Some(prompt), Duration::from_secs(2))
                        .await?;

                    let Some(reply) = reply else { return Ok(None) };
                    let Some(digit) = reply
                        .text_digits()
                        .chars()
                        .find_map(|c| c.to_digit(10))
                    else {
                        return Ok(None);
                    };
                    let index = (digit as usize).saturating_sub(1).min(CANDIDATES.len() - 1);
                    Ok(Some(
                        ctx.chain_with(false, false)
                            .text(format!("敌方档案：{}", CANDIDATES[index])),
                    ))
                }
            })
            .build();

        let out = outbound();
        let dispatcher = Dispatcher::new(Arc::new(registry), out.clone(), 900);

        let party = group_event(77, "").party();
        dispatcher.dispatch(group_event(77, "敌人 源石虫")).await;
        wait_for_sends(&out, 1).await;
        while !dispatcher.waits().is_armed(&party) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // The reply from the same party is routed to the waiting handler.
        dispatcher.dispatch(group_event(77, "2")).await;
        let sent = wait_for_sends(&out, 2).await;
        assert!(plain_text(&sent[1]).contains("酸液源石虫"));
    }

    #[tokio::test]
    async fn wait_timeout_releases_the_slot() {
        let registry = HandlerRegistry::builder()
            .on(
                "patient",
                |_| Verdict::hit_default(),
                |ctx: HandlerContext| async move {
                    let reply = ctx
                        .wait_for_reply(None, Duration::from_millis(30))
                        .await?;
                    assert!(reply.is_none());
                    Ok(None)
                },
            )
            .build();
        let out = outbound();
        let dispatcher = Dispatcher::new(Arc::new(registry), out.clone(), 900);

        let event = group_event(5, "wait");
        let party = event.party();
        dispatcher.dispatch(event).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!dispatcher.waits().is_armed(&party));
    }
}
