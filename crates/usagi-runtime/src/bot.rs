//! The outbound bot surface over a live gateway connection.
//!
//! [`Bot`] is the runtime's [`Outbound`] implementation: it resolves a
//! chain's media, encodes the main frame plus one frame per voice element,
//! and sends each as a correlated command on the gateway.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use usagi_core::{ApiError, ApiResult, Chain, ChainSettings, HandlerResult, ResourceResolver};
use usagi_framework::Outbound;
use usagi_transport::Gateway;

/// One bot account bound to one gateway connection.
pub struct Bot {
    gateway: Gateway,
    resolver: Arc<ResourceResolver>,
    settings: ChainSettings,
}

impl Bot {
    /// Creates the outbound surface over a connected gateway.
    pub fn new(gateway: Gateway, resolver: Arc<ResourceResolver>, settings: ChainSettings) -> Self {
        Self {
            gateway,
            resolver,
            settings,
        }
    }

    /// The underlying gateway handle.
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Resolves and sends a chain; returns the main frame's message id.
    ///
    /// Voice elements go out as separate frames after the main one, in
    /// order. A voice frame that fails, whether rejected by the gateway or
    /// lost to a transport error, is logged and skipped so it cannot
    /// retract the already-sent main message.
    pub async fn send(&self, mut chain: Chain) -> HandlerResult<i64> {
        chain.resolve(&self.resolver).await?;
        let session = self.gateway.session_key();

        let reply = self
            .gateway
            .send_and_await(|id| {
                chain
                    .frame(&session, id)
                    .map_err(|e| ApiError::Protocol(e.to_string()))
            })
            .await?;
        let message_id = message_id_from(&reply)?;
        debug!(message_id, command = chain.command(), "message sent");

        for index in 0..chain.voice_count() {
            let outcome = self
                .gateway
                .send_and_await(|id| {
                    chain
                        .voice_frame(index, &session, id)
                        .map_err(|e| ApiError::Protocol(e.to_string()))
                })
                .await;
            settle_voice_frame(index, outcome);
        }

        Ok(message_id)
    }
}

#[async_trait]
impl Outbound for Bot {
    async fn push(&self, chain: Chain) -> HandlerResult<i64> {
        self.send(chain).await
    }

    fn chain_settings(&self) -> ChainSettings {
        self.settings.clone()
    }
}

/// Settles one voice frame's outcome.
///
/// The main frame is already out by the time voices go, so a failed voice
/// frame, transport error or gateway rejection alike, is logged and
/// absorbed rather than surfaced to the caller.
fn settle_voice_frame(index: usize, outcome: ApiResult<Value>) {
    match outcome.and_then(|reply| message_id_from(&reply)) {
        Ok(message_id) => debug!(index, message_id, "voice frame sent"),
        Err(e) => warn!(index, error = %e, "voice frame not delivered"),
    }
}

/// Checks a send reply's status code and extracts the assigned message id.
fn message_id_from(reply: &Value) -> ApiResult<i64> {
    if let Some(code) = reply["code"].as_i64()
        && code != 0
    {
        return Err(ApiError::Protocol(format!(
            "gateway returned code {code}: {}",
            reply["msg"].as_str().unwrap_or("no message")
        )));
    }
    Ok(reply["messageId"].as_i64().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use serde_json::json;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;
    use usagi_core::{
        ConversationKind, MediaUploader, PassthroughCodec, RenderRequest, ResolveResult,
        TextRenderer,
    };
    use usagi_transport::{EventSink, GatewayConfig, ReconnectConfig};

    struct NullSink;

    #[async_trait]
    impl EventSink for NullSink {
        async fn on_event(&self, _payload: Value) {}
    }

    struct StaticUploader;

    #[async_trait]
    impl MediaUploader for StaticUploader {
        async fn upload_image(
            &self,
            _bytes: Vec<u8>,
            _kind: ConversationKind,
        ) -> ResolveResult<String> {
            Ok("image-id".to_string())
        }

        async fn upload_voice(
            &self,
            _bytes: Vec<u8>,
            _kind: ConversationKind,
        ) -> ResolveResult<String> {
            Ok("voice-id".to_string())
        }
    }

    struct StubRenderer;

    #[async_trait]
    impl TextRenderer for StubRenderer {
        async fn render(&self, request: RenderRequest) -> ResolveResult<Vec<u8>> {
            Ok(request.text.into_bytes())
        }
    }

    fn resolver() -> Arc<ResourceResolver> {
        Arc::new(ResourceResolver::new(
            Arc::new(StaticUploader),
            Arc::new(PassthroughCodec),
            Arc::new(StubRenderer),
        ))
    }

    /// Serves one session: handshake, one answered frame, then hangs up.
    async fn serve_one_reply(listener: TcpListener) {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(
            json!({ "syncId": "", "data": { "code": 0, "session": "sess" } })
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

        while let Some(Ok(frame)) = ws.next().await {
            let Message::Text(text) = frame else { continue };
            let value: Value = serde_json::from_str(&text).unwrap();
            let sync_id = value["syncId"].as_i64().unwrap();
            let reply = json!({
                "syncId": sync_id.to_string(),
                "data": { "code": 0, "msg": "success", "messageId": 777 },
            });
            ws.send(Message::Text(reply.to_string().into()))
                .await
                .unwrap();
            break;
        }
        // Dropping the socket severs the connection before any voice frame
        // can be answered.
    }

    #[tokio::test]
    async fn connection_loss_on_voice_frames_keeps_main_message_id() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_one_reply(listener));

        let config = GatewayConfig {
            url: format!("ws://{addr}"),
            verify_key: "vk".to_string(),
            account: 900,
            auto_reconnect: false,
            reconnect: ReconnectConfig::default(),
            api_timeout: Duration::from_millis(300),
        };
        let gateway = Gateway::connect(config, Arc::new(NullSink)).await.unwrap();
        let bot = Bot::new(gateway, resolver(), ChainSettings::default());

        let chain = Chain::direct(5, ChainSettings::default())
            .text("hello")
            .voice(vec![1u8, 2, 3]);

        // The main frame is acknowledged with id 777; the voice frame can
        // only fail. The send must still report the main id.
        let message_id = bot.send(chain).await.unwrap();
        assert_eq!(message_id, 777);
    }

    #[test]
    fn voice_frame_failures_are_absorbed() {
        settle_voice_frame(0, Err(ApiError::NotConnected));
        settle_voice_frame(1, Ok(json!({ "code": 500, "msg": "rejected" })));
        settle_voice_frame(2, Ok(json!({ "code": 0, "messageId": 9 })));
    }

    #[test]
    fn successful_reply_yields_message_id() {
        let reply = json!({ "code": 0, "msg": "success", "messageId": 1234 });
        assert_eq!(message_id_from(&reply).unwrap(), 1234);
    }

    #[test]
    fn nonzero_code_is_a_protocol_error() {
        let reply = json!({ "code": 5, "msg": "target not found" });
        let err = message_id_from(&reply).unwrap_err();
        assert!(matches!(err, ApiError::Protocol(_)));
        assert!(err.to_string().contains("target not found"));
    }

    #[test]
    fn missing_message_id_defaults_to_zero() {
        // Some commands acknowledge without assigning an id.
        let reply = json!({ "code": 0, "msg": "success" });
        assert_eq!(message_id_from(&reply).unwrap(), 0);
    }
}
