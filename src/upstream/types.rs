//! Wire types for the upstream Live API connection.
//!
//! Field names and defaults are carried from `config/config.py`'s
//! `CONFIG` dict and `core/gemini_client.py`'s per-mode overrides.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::base_info::BaseInfo;

pub const MODEL_VERTEX: &str = "gemini-2.0-flash-live-preview-04-09";
pub const MODEL_DEVELOPMENT: &str = "gemini-2.0-flash-exp";

/// Tokens at which the Live API compresses its context window, keeping
/// the tail `target_tokens` and discarding the rest once the session
/// crosses `trigger_tokens`.
pub const CONTEXT_WINDOW_TRIGGER_TOKENS: u32 = 12_800;
pub const CONTEXT_WINDOW_TARGET_TOKENS: u32 = 10_240;

const SYSTEM_INSTRUCTION_TEMPLATE: &str = "Current time: {Time}. Current location: {Location}.";

/// Voice activity detection thresholds (realtime_input_config in the
/// original), biased toward staying in "listening" rather than cutting
/// the user off mid-sentence.
#[derive(Debug, Clone, Serialize)]
pub struct VadConfig {
    pub start_sensitivity: &'static str,
    pub end_sensitivity: &'static str,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            start_sensitivity: "START_SENSITIVITY_LOW",
            end_sensitivity: "END_SENSITIVITY_HIGH",
            prefix_padding_ms: 0,
            silence_duration_ms: 1000,
        }
    }
}

/// The live-session generation config sent at connect time.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationConfig {
    pub response_modalities: Vec<&'static str>,
    pub voice_name: String,
    pub system_instruction: String,
    pub session_resumption_transparent: bool,
    pub vad: VadConfig,
    pub input_audio_transcription: bool,
    pub output_audio_transcription: bool,
    pub context_window_trigger_tokens: u32,
    pub context_window_target_tokens: u32,
    pub tools: Vec<Tool>,
}

/// A tool made available to the model. Only `google_search` is enabled
/// by default; the commented-out function declarations in the original
/// (`pauseOrResumeChat`, `startLiveVideoChat`, `switchToSpeechChat`,
/// `endChat`, `pay`) are modeled as named tools callers can opt into.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum Tool {
    GoogleSearch,
    Function { name: String, description: String, parameters: Value },
}

impl GenerationConfig {
    pub fn new(voice: &str, location: &str, date: &str) -> Self {
        let system_instruction = SYSTEM_INSTRUCTION_TEMPLATE
            .replace("{Time}", date)
            .replace("{Location}", location);

        Self {
            response_modalities: vec!["AUDIO"],
            voice_name: voice.to_string(),
            system_instruction,
            session_resumption_transparent: true,
            vad: VadConfig::default(),
            input_audio_transcription: true,
            output_audio_transcription: true,
            context_window_trigger_tokens: CONTEXT_WINDOW_TRIGGER_TOKENS,
            context_window_target_tokens: CONTEXT_WINDOW_TARGET_TOKENS,
            tools: vec![Tool::GoogleSearch],
        }
    }

    /// Build the config for a given client, the same way for a fresh
    /// connect or a pooled session reconfigured at hand-off time.
    pub fn from_base_info(base_info: &BaseInfo) -> Self {
        let date = base_info.date.format("%Y-%m-%d %H:%M:%S").to_string();
        Self::new(&base_info.voice, &base_info.location, &date)
    }
}

/// A single function call requested by the model within a `tool_call`.
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// A `tool_call` event: zero or more function calls to run in order.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolCallEnvelope {
    pub function_calls: Vec<FunctionCall>,
}

/// A `go_away` notice. Only a truthy `time_left` triggers reconnection
/// (§9, resolved): a present-but-zero/empty value does not.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GoAway {
    pub time_left: Option<String>,
}

impl GoAway {
    pub fn requires_reconnect(&self) -> bool {
        matches!(&self.time_left, Some(v) if !v.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SessionResumptionUpdate {
    pub resumable: bool,
    pub new_handle: Option<String>,
}

/// A single part of a `model_turn`: either transcript text or an audio
/// chunk, matching the `inline_data` / `text` part kinds in the
/// original's `process_server_content`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TurnPart {
    Audio { inline_data: Vec<u8> },
    Text { text: String },
}

#[derive(Debug, Clone, Default)]
pub struct ServerContent {
    pub interrupted: bool,
    pub model_turn: Vec<TurnPart>,
    pub turn_complete: bool,
    pub input_transcription: Option<String>,
    pub output_transcription: Option<String>,
}

/// One decoded event off the upstream receive stream.
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    ToolCall(ToolCallEnvelope),
    SessionResumptionUpdate(SessionResumptionUpdate),
    GoAway(GoAway),
    ServerContent(ServerContent),
}
