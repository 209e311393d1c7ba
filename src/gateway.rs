use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::observability;

/// Marks a slash reply as publicly visible in the channel.
pub const RESPONSE_IN_CHANNEL: &str = "in_channel";

const SLACK_API_BASE: &str = "https://slack.com/api";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_CAPACITY: usize = 64;

/// How often the session task re-checks that the chat API still answers.
const SESSION_PROBE_INTERVAL: Duration = Duration::from_secs(30);

// ── Render-ready message types ───────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    pub value: String,
    pub short: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mrkdwn_in: Vec<String>,
}

/// A fully rendered outbound message. Every dispatcher branch produces one of
/// these; raw provider payloads never reach the chat surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,
}

/// Everything the chat session can report, as a closed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    Connected,
    Disconnected,
    Message {
        channel: String,
        user: String,
        text: String,
    },
    Error(String),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug)]
pub enum ChatDeliveryError {
    Http(String),
    /// The gateway answered but refused the call.
    Api(String),
}

impl fmt::Display for ChatDeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatDeliveryError::Http(e) => write!(f, "chat request failed: {e}"),
            ChatDeliveryError::Api(e) => write!(f, "chat API error: {e}"),
        }
    }
}

impl std::error::Error for ChatDeliveryError {}

// ── Gateway contract ─────────────────────────────────────

/// Outbound chat surface plus the session event feed.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn post_message(
        &self,
        channel: &str,
        message: &Message,
    ) -> Result<(), ChatDeliveryError>;

    async fn set_topic(&self, channel: &str, topic: &str) -> Result<(), ChatDeliveryError>;

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>, ChatDeliveryError>;

    /// Subscribe to session events. Every subscriber sees the same feed.
    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent>;
}

/// Post to every channel, best-effort: individual failures are logged and
/// counted, the rest of the fan-out continues.
pub async fn broadcast_message(gateway: &dyn ChatGateway, message: &Message) {
    let channels = match gateway.list_channels().await {
        Ok(channels) => channels,
        Err(e) => {
            warn!("broadcast: cannot list channels: {e}");
            metrics::counter!(observability::CHAT_DELIVERY_FAILURES_TOTAL).increment(1);
            return;
        }
    };

    let posts = channels.iter().map(|c| gateway.post_message(&c.id, message));
    for (channel, result) in channels.iter().zip(join_all(posts).await) {
        if let Err(e) = result {
            warn!("broadcast to {} failed: {e}", channel.id);
            metrics::counter!(observability::CHAT_DELIVERY_FAILURES_TOTAL).increment(1);
        }
    }
}

/// Pushes a topic across all channels, remembering the last topic written per
/// channel so unchanged topics are not re-set on every sync.
#[derive(Default)]
pub struct TopicWriter {
    last: DashMap<String, String>,
}

impl TopicWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_all(&self, gateway: &dyn ChatGateway, topic: &str) {
        let channels = match gateway.list_channels().await {
            Ok(channels) => channels,
            Err(e) => {
                warn!("topic update: cannot list channels: {e}");
                metrics::counter!(observability::CHAT_DELIVERY_FAILURES_TOTAL).increment(1);
                return;
            }
        };

        for channel in &channels {
            if self
                .last
                .get(&channel.id)
                .is_some_and(|t| t.value().as_str() == topic)
            {
                continue;
            }
            match gateway.set_topic(&channel.id, topic).await {
                Ok(()) => {
                    self.last.insert(channel.id.clone(), topic.to_string());
                    metrics::counter!(observability::TOPIC_UPDATES_TOTAL).increment(1);
                }
                Err(e) => {
                    warn!("topic update on {} failed: {e}", channel.id);
                    metrics::counter!(observability::CHAT_DELIVERY_FAILURES_TOTAL).increment(1);
                }
            }
        }
    }
}

// ── Slack implementation ─────────────────────────────────

pub struct SlackGateway {
    http: reqwest::Client,
    base_url: String,
    token: String,
    events: broadcast::Sender<GatewayEvent>,
}

/// Envelope every Slack Web API call answers with.
#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channels: Option<Vec<ChannelInfo>>,
}

impl SlackGateway {
    pub fn new(token: String) -> Result<Self, ChatDeliveryError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChatDeliveryError::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: SLACK_API_BASE.to_string(),
            token,
            events: broadcast::channel(EVENT_CAPACITY).0,
        })
    }

    /// Point the client at a different API root (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn call(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<SlackResponse, ChatDeliveryError> {
        let response = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatDeliveryError::Http(e.to_string()))?;
        let decoded: SlackResponse = response
            .json()
            .await
            .map_err(|e| ChatDeliveryError::Http(e.to_string()))?;
        if !decoded.ok {
            return Err(ChatDeliveryError::Api(
                decoded.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(decoded)
    }

    /// Drive the session: probe the API and emit connected/disconnected
    /// edges. Runs until the process shuts down.
    pub async fn run_session(self: Arc<Self>) {
        let mut interval = tokio::time::interval(SESSION_PROBE_INTERVAL);
        let mut connected = false;
        loop {
            interval.tick().await;
            match self.call("auth.test", json!({})).await {
                Ok(_) => {
                    if !connected {
                        connected = true;
                        info!("chat gateway reachable");
                        let _ = self.events.send(GatewayEvent::Connected);
                    }
                }
                Err(e) => {
                    if connected {
                        connected = false;
                        let _ = self.events.send(GatewayEvent::Disconnected);
                    }
                    let _ = self.events.send(GatewayEvent::Error(e.to_string()));
                }
            }
        }
    }
}

#[async_trait]
impl ChatGateway for SlackGateway {
    async fn post_message(
        &self,
        channel: &str,
        message: &Message,
    ) -> Result<(), ChatDeliveryError> {
        self.call(
            "chat.postMessage",
            json!({
                "channel": channel,
                "text": message.text,
                "attachments": message.attachments,
                "as_user": true,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn set_topic(&self, channel: &str, topic: &str) -> Result<(), ChatDeliveryError> {
        self.call(
            "conversations.setTopic",
            json!({ "channel": channel, "topic": topic }),
        )
        .await
        .map(|_| ())
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>, ChatDeliveryError> {
        let response = self
            .call("conversations.list", json!({ "exclude_archived": true }))
            .await?;
        Ok(response.channels.unwrap_or_default())
    }

    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }
}
