//! Client<->server JSON frame schemas for the WebSocket pipe.
//!
//! These mirror the ad-hoc `{"type": ..., "data": ...}` dictionaries the
//! original builds by hand in `handle_client_messages` /
//! `process_server_content`; giving them real types means the pump can't
//! typo a field name or skip one on a refactor.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A frame arriving from the client over the WebSocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Audio { data: String },
    Image { data: String },
    Text { data: String },
    End,
    State { data: ClientState },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientState {
    Stop,
    Reconnect,
}

/// A frame sent to the client over the WebSocket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Ready {
        ready: bool,
        session_id: String,
    },
    Audio {
        data: String,
    },
    Text {
        data: String,
    },
    Interrupted {
        data: InterruptedPayload,
    },
    TurnComplete,
    FunctionCall {
        data: FunctionCallPayload,
    },
    FunctionResponse {
        data: Value,
    },
    State {
        data: String,
    },
    #[serde(rename = "reconnect")]
    Reconnected {
        reconnect: bool,
        data: String,
    },
    Error {
        data: ErrorPayload,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct InterruptedPayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionCallPayload {
    pub name: String,
    pub args: Value,
}

/// Structured error surfaced to the client, classified by kind so the
/// client can decide whether to retry (mirrors the original's four
/// hand-written error dicts: quota, connection_closed, timeout, general).
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Quota,
    ConnectionClosed,
    Timeout,
    General,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_text_frame() {
        let json = r#"{"type":"text","data":"hello"}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        matches!(frame, ClientFrame::Text { data } if data == "hello");
    }

    #[test]
    fn decodes_state_reconnect_frame() {
        let json = r#"{"type":"state","data":"reconnect"}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        match frame {
            ClientFrame::State { data } => assert_eq!(data, ClientState::Reconnect),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn ready_frame_serializes_with_tag() {
        let frame = ServerFrame::Ready {
            ready: true,
            session_id: "abc".into(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"ready\""));
        assert!(json.contains("\"session_id\":\"abc\""));
    }
}
