//! Runtime assembly: config, logging, gateway, and dispatcher wiring.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use usagi_runtime::UsagiRuntime;
//!
//! let registry = HandlerRegistry::builder()
//!     .on_keywords("hello", &["hello"], 1, |ctx| async move {
//!         Ok(Some(ctx.chain().text("hi")))
//!     })
//!     .build();
//!
//! UsagiRuntime::builder()
//!     .config_file("usagi.toml")
//!     .registry(registry)
//!     .run()
//!     .await?;
//! ```

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::signal;
use tracing::{info, trace, warn};

use usagi_core::{
    PassthroughCodec, RenderRequest, ResolveError, ResolveResult, ResourceResolver, RosterService,
    TextRenderer, VoiceCodec,
};
use usagi_framework::{Dispatcher, HandlerRegistry};
use usagi_transport::{EventSink, Gateway, MiraiHttpClient};

use crate::bot::Bot;
use crate::config::{ConfigLoader, UsagiConfig};
use crate::error::RuntimeResult;
use crate::logging;

/// Collaborators available when building the handler registry.
///
/// Handed to a [`RuntimeBuilder::registry_with`] factory so handlers can
/// capture them at registration time.
pub struct Services {
    /// Group roster lookups, backed by the gateway's HTTP surface.
    pub roster: Arc<dyn RosterService>,
}

type RegistryFactory = Box<dyn FnOnce(&Services) -> HandlerRegistry + Send>;

/// Bridges gateway pushes to the dispatcher.
///
/// The gateway must be connected before the dispatcher can exist (the
/// dispatcher's outbound needs the connection), so the sink starts empty and
/// is attached once wiring completes. Pushes arriving in that window are
/// dropped.
#[derive(Default)]
struct DispatchSink {
    dispatcher: OnceLock<Arc<Dispatcher>>,
}

impl DispatchSink {
    fn attach(&self, dispatcher: Arc<Dispatcher>) {
        let _ = self.dispatcher.set(dispatcher);
    }
}

#[async_trait]
impl EventSink for DispatchSink {
    async fn on_event(&self, payload: Value) {
        match self.dispatcher.get() {
            Some(dispatcher) => dispatcher.on_push(payload).await,
            None => trace!("push received before wiring completed, dropped"),
        }
    }

    async fn on_disconnect(&self) {
        warn!("gateway connection lost");
    }
}

/// Placeholder renderer for deployments without a card rasterizer.
///
/// Chains that need a card fail their build with a resolve error; plain
/// chains are unaffected.
struct DisabledRenderer;

#[async_trait]
impl TextRenderer for DisabledRenderer {
    async fn render(&self, _request: RenderRequest) -> ResolveResult<Vec<u8>> {
        Err(ResolveError::Render(
            "no text renderer configured".to_string(),
        ))
    }
}

/// The assembled runtime, ready to run.
pub struct UsagiRuntime {
    config: UsagiConfig,
    registry: RegistryFactory,
    codec: Arc<dyn VoiceCodec>,
    renderer: Arc<dyn TextRenderer>,
}

impl UsagiRuntime {
    /// Starts a runtime builder.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// The loaded configuration.
    pub fn config(&self) -> &UsagiConfig {
        &self.config
    }

    /// Connects and runs until Ctrl+C.
    pub async fn run(self) -> RuntimeResult<()> {
        logging::init_from_config(&self.config.logging);

        let sink = Arc::new(DispatchSink::default());
        let gateway =
            Gateway::connect(self.config.gateway.to_gateway_config(), sink.clone()).await?;

        let http = Arc::new(MiraiHttpClient::new(self.config.gateway.http_url.clone(), {
            let gateway = gateway.clone();
            Arc::new(move || gateway.session_key())
        }));
        let resolver = Arc::new(ResourceResolver::new(
            http.clone(),
            self.codec,
            self.renderer,
        ));
        let bot = Arc::new(Bot::new(
            gateway.clone(),
            resolver,
            self.config.chain.to_settings(),
        ));

        let services = Services { roster: http };
        let registry = Arc::new((self.registry)(&services));
        info!(handlers = registry.len(), "handler registry frozen");

        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            bot,
            self.config.gateway.account,
        ));
        sink.attach(dispatcher);

        info!("runtime started, press Ctrl+C to stop");
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for shutdown signal");
        }

        info!("shutting down");
        gateway.shutdown();
        Ok(())
    }
}

/// Builder for [`UsagiRuntime`].
pub struct RuntimeBuilder {
    config_file: Option<PathBuf>,
    config: Option<UsagiConfig>,
    registry: Option<RegistryFactory>,
    codec: Arc<dyn VoiceCodec>,
    renderer: Arc<dyn TextRenderer>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    /// Creates a builder with default collaborators.
    pub fn new() -> Self {
        Self {
            config_file: None,
            config: None,
            registry: None,
            codec: Arc::new(PassthroughCodec),
            renderer: Arc::new(DisabledRenderer),
        }
    }

    /// Loads configuration from a specific file instead of searching.
    pub fn config_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Uses a pre-built configuration, skipping file and env loading.
    pub fn config(mut self, config: UsagiConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Uses a pre-built handler registry.
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(Box::new(move |_| registry));
        self
    }

    /// Builds the registry through a factory that receives the runtime's
    /// [`Services`].
    pub fn registry_with<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(&Services) -> HandlerRegistry + Send + 'static,
    {
        self.registry = Some(Box::new(factory));
        self
    }

    /// Overrides the voice codec (default: [`PassthroughCodec`]).
    pub fn codec(mut self, codec: Arc<dyn VoiceCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Installs a card renderer; without one, card builds fail.
    pub fn renderer(mut self, renderer: Arc<dyn TextRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Loads configuration and assembles the runtime.
    pub fn build(self) -> RuntimeResult<UsagiRuntime> {
        let config = match self.config {
            Some(config) => config,
            None => {
                let mut loader = ConfigLoader::new();
                if let Some(path) = self.config_file {
                    loader = loader.file(path);
                }
                loader.load()?
            }
        };

        Ok(UsagiRuntime {
            config,
            registry: self
                .registry
                .unwrap_or_else(|| Box::new(|_| HandlerRegistry::builder().build())),
            codec: self.codec,
            renderer: self.renderer,
        })
    }

    /// Builds and runs in one step.
    pub async fn run(self) -> RuntimeResult<()> {
        self.build()?.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn pushes_before_wiring_are_dropped() {
        let sink = DispatchSink::default();
        // Must not panic or block with no dispatcher attached.
        sink.on_event(json!({ "type": "GroupMessage" })).await;
    }

    #[tokio::test]
    async fn disabled_renderer_rejects_requests() {
        let renderer = DisabledRenderer;
        let request = RenderRequest {
            text: "card".to_string(),
            images: Vec::new(),
            width: 700,
            height: None,
            padding: 10,
            seat_width: 680,
            background: "#F5F5F5".to_string(),
        };
        assert!(matches!(
            renderer.render(request).await,
            Err(ResolveError::Render(_))
        ));
    }

    #[test]
    fn explicit_config_skips_loading() {
        let mut config = UsagiConfig::default();
        config.gateway.account = 42;

        let runtime = UsagiRuntime::builder()
            .config(config)
            .registry(HandlerRegistry::builder().build())
            .build()
            .unwrap();
        assert_eq!(runtime.config().gateway.account, 42);
    }
}
