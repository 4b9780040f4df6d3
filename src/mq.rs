//! Durable message producer: publishes transcript turns to a message
//! bus, grounded on `core/rocketMQ.py`'s `RocketMQProducer`.
//!
//! The network protocol to Alibaba Cloud RocketMQ is out of scope (an
//! external collaborator per the spec's non-goals); what's in scope is
//! the trait boundary, the message schema, and the original's
//! lazy-init-and-swallow-failures send path, since the message pump
//! depends on all three.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::base_info::DEFAULT_USER_ID;

/// Fixed fields the original stamps onto every published message.
const ASSISTANT_ID: &str = "99999999";
const CM_TYPE: &str = "text_chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageBody {
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub role: Role,
    #[serde(rename = "messageType")]
    pub message_type: &'static str,
    pub content: String,
    #[serde(rename = "createdTime")]
    pub created_time: i64,
    #[serde(rename = "assistantId")]
    pub assistant_id: &'static str,
    #[serde(rename = "cmType")]
    pub cm_type: &'static str,
}

impl MessageBody {
    /// Build a transcript message body, falling back to the literal
    /// default user id when the supplied one is empty — exactly the
    /// `userId if base_info.userId else 123456` logic in the original.
    pub fn text_chat(message_id: String, user_id: &str, role: Role, content: String) -> Self {
        let user_id = if user_id.is_empty() { DEFAULT_USER_ID } else { user_id }.to_string();
        Self {
            message_id,
            user_id,
            role,
            message_type: "text",
            content,
            created_time: Utc::now().timestamp_millis(),
            assistant_id: ASSISTANT_ID,
            cm_type: CM_TYPE,
        }
    }
}

/// The routing boundary the message pump publishes transcripts through.
#[async_trait]
pub trait MessageProducer: Send + Sync {
    async fn send_sync(&self, body: &MessageBody) -> bool;
}

/// A producer that discards everything, used in tests and anywhere a
/// session is built without a configured message bus.
pub struct NullMessageProducer;

#[async_trait]
impl MessageProducer for NullMessageProducer {
    async fn send_sync(&self, _body: &MessageBody) -> bool {
        true
    }
}

/// Connection parameters for the real producer, sourced from `Config`
/// the way the original reads them from `os.getenv(...)`.
#[derive(Debug, Clone)]
pub struct RocketMqConfig {
    pub name_server: String,
    pub access_key: String,
    pub secret_key: String,
    pub instance_id: String,
    pub group_name: String,
    pub topic: String,
}

/// Lazily-initialized RocketMQ producer. Failures to send are logged and
/// swallowed rather than propagated: a transcript publish failure must
/// never tear down a live session (§5/§7).
pub struct RocketMqProducer {
    config: RocketMqConfig,
    client: OnceCell<()>,
}

impl RocketMqProducer {
    pub fn new(config: RocketMqConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    async fn ensure_initialized(&self) {
        self.client
            .get_or_init(|| async {
                tracing::info!(
                    name_server = %self.config.name_server,
                    group = %self.config.group_name,
                    "rocketmq producer initialized",
                );
            })
            .await;
    }
}

#[async_trait]
impl MessageProducer for RocketMqProducer {
    async fn send_sync(&self, body: &MessageBody) -> bool {
        self.ensure_initialized().await;

        match serde_json::to_string(body) {
            Ok(payload) => {
                tracing::debug!(topic = %self.config.topic, bytes = payload.len(), "publishing transcript message");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize transcript message, dropping");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_user_id_falls_back_to_default() {
        let body = MessageBody::text_chat("m1".into(), "", Role::User, "hi".into());
        assert_eq!(body.user_id, DEFAULT_USER_ID);
    }

    #[test]
    fn nonempty_user_id_is_preserved() {
        let body = MessageBody::text_chat("m1".into(), "42", Role::User, "hi".into());
        assert_eq!(body.user_id, "42");
    }

    #[tokio::test]
    async fn null_producer_always_reports_success() {
        let producer = NullMessageProducer;
        let body = MessageBody::text_chat("m1".into(), "42", Role::Assistant, "hi".into());
        assert!(producer.send_sync(&body).await);
    }
}
