//! HTTP collaborator for media uploads and roster lookups.
//!
//! mirai-api-http exposes a plain HTTP surface next to the WebSocket one;
//! media uploads (multipart) and roster reads go through it. The session key
//! is borrowed from the WebSocket session via a provider closure so a
//! reconnect transparently refreshes it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, ClientBuilder};
use serde_json::Value;
use tracing::debug;

use usagi_core::{ConversationKind, MediaUploader, ResolveError, ResolveResult, RosterService};

/// Supplies the current session key; backed by the gateway session.
pub type SessionKeyFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Client for the gateway's HTTP API.
pub struct MiraiHttpClient {
    client: Client,
    base_url: String,
    session_key: SessionKeyFn,
}

impl MiraiHttpClient {
    /// Creates a client for the given base URL, e.g. `http://127.0.0.1:8080`.
    pub fn new(base_url: impl Into<String>, session_key: SessionKeyFn) -> Self {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn upload(
        &self,
        path: &str,
        field: &str,
        bytes: Vec<u8>,
        kind: ConversationKind,
        id_field: &str,
    ) -> ResolveResult<String> {
        let form = Form::new()
            .text("sessionKey", (self.session_key)())
            .text("type", kind.upload_type())
            .part(field.to_string(), Part::bytes(bytes).file_name("media"));

        let response = self
            .client
            .post(self.url(path))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ResolveError::Upload(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ResolveError::Upload(format!("HTTP {status}: {body}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ResolveError::Upload(e.to_string()))?;
        debug!(path, id = %body[id_field], "media uploaded");

        body[id_field]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ResolveError::Upload(format!("response missing {id_field}: {body}")))
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> ResolveResult<Value> {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|e| ResolveError::Upload(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| ResolveError::Upload(e.to_string()))
    }
}

#[async_trait]
impl MediaUploader for MiraiHttpClient {
    async fn upload_image(&self, bytes: Vec<u8>, kind: ConversationKind) -> ResolveResult<String> {
        self.upload("uploadImage", "img", bytes, kind, "imageId").await
    }

    async fn upload_voice(&self, bytes: Vec<u8>, kind: ConversationKind) -> ResolveResult<String> {
        self.upload("uploadVoice", "voice", bytes, kind, "voiceId").await
    }
}

#[async_trait]
impl RosterService for MiraiHttpClient {
    async fn group_list(&self) -> ResolveResult<Vec<(i64, String)>> {
        let body = self
            .get("groupList", &[("sessionKey", (self.session_key)())])
            .await?;
        let groups = body["data"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .filter_map(|g| {
                Some((
                    g["id"].as_i64()?,
                    g["name"].as_str().unwrap_or_default().to_string(),
                ))
            })
            .collect();
        Ok(groups)
    }

    async fn member_name(&self, group: i64, member: i64) -> ResolveResult<Option<String>> {
        let body = self
            .get(
                "memberList",
                &[
                    ("sessionKey", (self.session_key)()),
                    ("target", group.to_string()),
                ],
            )
            .await?;
        let name = body["data"].as_array().and_then(|members| {
            members.iter().find_map(|m| {
                (m["id"].as_i64() == Some(member))
                    .then(|| m["memberName"].as_str().unwrap_or_default().to_string())
            })
        });
        Ok(name)
    }
}
