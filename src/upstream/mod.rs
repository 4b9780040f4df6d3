//! Upstream Live API client: the opaque "session handle" the rest of the
//! crate programs against.
//!
//! `UpstreamSession` is the trait boundary (§6's external collaborator),
//! `gemini::GeminiLiveSession` the real tokio-tungstenite-backed
//! implementation, and `factory::UpstreamFactory` the vertex/development
//! switch the warmup pool calls into — grounded on `core/gemini_client.py`'s
//! `create_gsession`.

pub mod factory;
pub mod gemini;
pub mod types;

use async_trait::async_trait;
use serde_json::Value;

pub use factory::{UpstreamFactory, UpstreamMode};
pub use types::{FunctionCall, GenerationConfig, GoAway, ServerContent, ToolCallEnvelope, TurnPart, UpstreamEvent};

use crate::error::UpstreamError;

/// A single function response to hand back to the model, mirroring
/// `types.FunctionResponse(name, id, response={"result": "ok"})` in the
/// original's `process_tool_queue`.
#[derive(Debug, Clone)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

/// One live connection to the upstream generative model.
///
/// Implementors own the underlying transport; `send_*` calls push client
/// input, `recv` pulls the next decoded server event. A session is used
/// by exactly one pump at a time, but is boxed and moved across a
/// reconnect, so it must be `Send`.
#[async_trait]
pub trait UpstreamSession: Send + Sync {
    async fn send_audio(&mut self, pcm: &[u8]) -> Result<(), UpstreamError>;
    async fn send_image(&mut self, jpeg: &[u8]) -> Result<(), UpstreamError>;
    async fn send_text(&mut self, text: &str) -> Result<(), UpstreamError>;
    async fn send_tool_responses(&mut self, responses: Vec<FunctionResponse>) -> Result<(), UpstreamError>;
    /// Re-issue the setup handshake over the existing connection for a
    /// different client's `GenerationConfig`. Used when a pooled session,
    /// warmed up with a placeholder config, is handed to a real client.
    async fn reconfigure(&mut self, config: &GenerationConfig) -> Result<(), UpstreamError>;
    async fn recv(&mut self) -> Result<UpstreamEvent, UpstreamError>;
    async fn close(&mut self);
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use tokio::sync::mpsc;

    /// An in-memory stand-in for a live upstream connection, used by
    /// session/pool/pump unit tests so they don't need a real socket.
    pub struct FakeUpstreamSession {
        pub sent_audio: Vec<Vec<u8>>,
        pub sent_text: Vec<String>,
        pub reconfigured_with: Vec<String>,
        events: mpsc::UnboundedReceiver<UpstreamEvent>,
        events_tx: mpsc::UnboundedSender<UpstreamEvent>,
        pub closed: bool,
    }

    impl FakeUpstreamSession {
        pub fn new() -> Self {
            let (events_tx, events) = mpsc::unbounded_channel();
            Self {
                sent_audio: Vec::new(),
                sent_text: Vec::new(),
                reconfigured_with: Vec::new(),
                events,
                events_tx,
                closed: false,
            }
        }

        /// Queue an event to be returned by the next `recv()`.
        pub fn push_event(&self, event: UpstreamEvent) {
            let _ = self.events_tx.send(event);
        }
    }

    #[async_trait]
    impl UpstreamSession for FakeUpstreamSession {
        async fn send_audio(&mut self, pcm: &[u8]) -> Result<(), UpstreamError> {
            self.sent_audio.push(pcm.to_vec());
            Ok(())
        }

        async fn send_image(&mut self, _jpeg: &[u8]) -> Result<(), UpstreamError> {
            Ok(())
        }

        async fn send_text(&mut self, text: &str) -> Result<(), UpstreamError> {
            self.sent_text.push(text.to_string());
            Ok(())
        }

        async fn send_tool_responses(&mut self, _responses: Vec<FunctionResponse>) -> Result<(), UpstreamError> {
            Ok(())
        }

        async fn reconfigure(&mut self, config: &GenerationConfig) -> Result<(), UpstreamError> {
            self.reconfigured_with.push(config.voice_name.clone());
            Ok(())
        }

        async fn recv(&mut self) -> Result<UpstreamEvent, UpstreamError> {
            self.events
                .recv()
                .await
                .ok_or(UpstreamError::ConnectionClosedOk)
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }
}
