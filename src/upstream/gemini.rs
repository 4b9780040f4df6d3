//! tokio-tungstenite-backed implementation of `UpstreamSession` against
//! the Gemini Live WebSocket endpoint.
//!
//! Grounded on `core/gemini_client.py`'s `client.aio.live.connect(...)`
//! for the message shapes (`realtime_input`, `client_content`,
//! `tool_response`) and on `remotemedia-webrtc`'s use of
//! tokio-tungstenite for the split-socket read/write pattern.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::error::UpstreamError;

use super::types::{
    FunctionCall, GoAway, ServerContent, SessionResumptionUpdate, ToolCallEnvelope, TurnPart,
    UpstreamEvent,
};
use super::{FunctionResponse, GenerationConfig, UpstreamSession};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A live connection to the Gemini Live API.
pub struct GeminiLiveSession {
    socket: WsStream,
}

impl GeminiLiveSession {
    /// Open the socket and send the initial setup frame carrying the
    /// generation config (modalities, voice, VAD, tools, ...).
    pub async fn connect(endpoint: &str, config: &GenerationConfig) -> Result<Self, UpstreamError> {
        let (socket, _response) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| UpstreamError::Connect(e.to_string()))?;

        let mut session = Self { socket };
        session.send_setup(config).await?;
        Ok(session)
    }

    async fn send_setup(&mut self, config: &GenerationConfig) -> Result<(), UpstreamError> {
        let setup = json!({ "setup": config_to_wire(config) });
        self.send_json(&setup).await
    }

    async fn send_json(&mut self, value: &Value) -> Result<(), UpstreamError> {
        let text = serde_json::to_string(value).map_err(|e| UpstreamError::Protocol(e.to_string()))?;
        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|e| UpstreamError::Protocol(e.to_string()))
    }
}

fn config_to_wire(config: &GenerationConfig) -> Value {
    json!({
        "response_modalities": config.response_modalities,
        "speech_config": {
            "voice_config": { "prebuilt_voice_config": { "voice_name": config.voice_name } },
        },
        "system_instruction": config.system_instruction,
        "session_resumption": { "transparent": config.session_resumption_transparent },
        "realtime_input_config": {
            "automatic_activity_detection": {
                "start_of_speech_sensitivity": config.vad.start_sensitivity,
                "end_of_speech_sensitivity": config.vad.end_sensitivity,
                "prefix_padding_ms": config.vad.prefix_padding_ms,
                "silence_duration_ms": config.vad.silence_duration_ms,
            },
        },
        "input_audio_transcription": config.input_audio_transcription,
        "output_audio_transcription": config.output_audio_transcription,
        "context_window_compression": {
            "trigger_tokens": config.context_window_trigger_tokens,
            "sliding_window": { "target_tokens": config.context_window_target_tokens },
        },
    })
}

#[async_trait]
impl UpstreamSession for GeminiLiveSession {
    async fn send_audio(&mut self, pcm: &[u8]) -> Result<(), UpstreamError> {
        let frame = json!({
            "realtime_input": { "data": STANDARD.encode(pcm), "mime_type": "audio/pcm" },
        });
        self.send_json(&frame).await
    }

    async fn send_image(&mut self, jpeg: &[u8]) -> Result<(), UpstreamError> {
        let frame = json!({
            "realtime_input": { "data": STANDARD.encode(jpeg), "mime_type": "image/jpeg" },
        });
        self.send_json(&frame).await
    }

    async fn send_text(&mut self, text: &str) -> Result<(), UpstreamError> {
        let frame = json!({
            "client_content": {
                "turns": [{ "role": "user", "parts": [{ "text": text }] }],
                "turn_complete": true,
            },
        });
        self.send_json(&frame).await
    }

    async fn send_tool_responses(&mut self, responses: Vec<FunctionResponse>) -> Result<(), UpstreamError> {
        let function_responses: Vec<Value> = responses
            .into_iter()
            .map(|r| json!({ "id": r.id, "name": r.name, "response": r.response }))
            .collect();
        let frame = json!({ "tool_response": { "function_responses": function_responses } });
        self.send_json(&frame).await
    }

    async fn reconfigure(&mut self, config: &GenerationConfig) -> Result<(), UpstreamError> {
        self.send_setup(config).await
    }

    async fn recv(&mut self) -> Result<UpstreamEvent, UpstreamError> {
        loop {
            let msg = self
                .socket
                .next()
                .await
                .ok_or(UpstreamError::ConnectionClosedOk)?
                .map_err(classify_ws_error)?;

            match msg {
                Message::Text(text) => return decode_event(&text),
                Message::Binary(bytes) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    return decode_event(&text);
                }
                Message::Close(_) => return Err(UpstreamError::ConnectionClosedOk),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.socket.close(None).await;
    }
}

/// Distinguish an abnormal close (what triggers reconnection, §4.3) from
/// any other transport-level failure.
fn classify_ws_error(err: tokio_tungstenite::tungstenite::Error) -> UpstreamError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Protocol(_) | WsError::Io(_) => {
            UpstreamError::ConnectionClosedError
        }
        other => UpstreamError::Protocol(other.to_string()),
    }
}

fn decode_event(text: &str) -> Result<UpstreamEvent, UpstreamError> {
    let value: Value = serde_json::from_str(text).map_err(|e| UpstreamError::Protocol(e.to_string()))?;

    if let Some(tool_call) = value.get("tool_call") {
        let function_calls: Vec<FunctionCall> = tool_call
            .get("function_calls")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        return Ok(UpstreamEvent::ToolCall(ToolCallEnvelope { function_calls }));
    }

    if let Some(update) = value.get("session_resumption_update") {
        let update: SessionResumptionUpdate = serde_json::from_value(update.clone()).unwrap_or_default();
        return Ok(UpstreamEvent::SessionResumptionUpdate(update));
    }

    if let Some(go_away) = value.get("go_away") {
        let go_away: GoAway = serde_json::from_value(go_away.clone()).unwrap_or_default();
        return Ok(UpstreamEvent::GoAway(go_away));
    }

    if let Some(content) = value.get("server_content") {
        return Ok(UpstreamEvent::ServerContent(decode_server_content(content)));
    }

    Err(UpstreamError::Protocol(format!("unrecognized server message: {text}")))
}

fn decode_server_content(content: &Value) -> ServerContent {
    let interrupted = content.get("interrupted").and_then(Value::as_bool).unwrap_or(false);
    let turn_complete = content.get("turn_complete").and_then(Value::as_bool).unwrap_or(false);

    let model_turn = content
        .get("model_turn")
        .and_then(|t| t.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| parts.iter().filter_map(decode_turn_part).collect())
        .unwrap_or_default();

    let input_transcription = content
        .get("input_transcription")
        .and_then(|t| t.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let output_transcription = content
        .get("output_transcription")
        .and_then(|t| t.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string);

    ServerContent {
        interrupted,
        model_turn,
        turn_complete,
        input_transcription,
        output_transcription,
    }
}

fn decode_turn_part(part: &Value) -> Option<TurnPart> {
    if let Some(inline) = part.get("inline_data").and_then(|d| d.get("data")).and_then(Value::as_str) {
        return STANDARD.decode(inline).ok().map(|bytes| TurnPart::Audio { inline_data: bytes });
    }
    if let Some(text) = part.get("text").and_then(Value::as_str) {
        return Some(TurnPart::Text { text: text.to_string() });
    }
    None
}
