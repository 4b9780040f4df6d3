//! The bidirectional message pump: client frames flow to upstream,
//! upstream events flow to the client, and a one-shot transparent
//! reconnect swaps the upstream session in place without dropping the
//! client's WebSocket.
//!
//! Grounded on `core/websocket_handler.py`'s `handle_messages` /
//! `handle_client_messages` / `handle_gemini_responses` /
//! `process_server_content`. The original models the reconnect as an
//! exception (`ReconnectionCompleted`) that unwinds an `asyncio.TaskGroup`;
//! here it's the explicit `PumpOutcome::Reconnect` variant §9 calls for.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{PumpError, UpstreamError};
use crate::frames::{ClientFrame, ClientState, ErrorKind, ErrorPayload, InterruptedPayload, ServerFrame};
use crate::mq::{MessageBody, MessageProducer, Role};
use crate::session::Session;
use crate::text_norm::{clean_unbalanced_or_extra_quotes, smart_clean_spaces};
use crate::tool_dispatch::{self, ToolExecutor};
use crate::upstream::{GoAway, ServerContent, TurnPart, UpstreamEvent, UpstreamFactory, UpstreamSession};

/// Why a pump iteration ended.
#[derive(Debug)]
pub enum PumpOutcome {
    Exit(CloseInfo),
    Reconnect,
}

#[derive(Debug)]
pub struct CloseInfo {
    pub reason: String,
    pub error: Option<PumpError>,
}

impl CloseInfo {
    fn ok(reason: &str) -> Self {
        Self { reason: reason.to_string(), error: None }
    }

    fn err(error: PumpError) -> Self {
        Self { reason: error.to_string(), error: Some(error) }
    }
}

/// Drive a session until the client disconnects or an unrecoverable
/// error occurs, transparently looping through any number of
/// reconnects along the way.
pub async fn run(
    session: Arc<Session>,
    mut from_client: mpsc::UnboundedReceiver<ClientFrame>,
    to_client: mpsc::UnboundedSender<ServerFrame>,
    executor: Arc<dyn ToolExecutor>,
    factory: Arc<UpstreamFactory>,
) -> CloseInfo {
    loop {
        let outcome = run_iteration(&session, &mut from_client, &to_client, executor.as_ref(), &factory).await;
        match outcome {
            PumpOutcome::Exit(info) => return info,
            PumpOutcome::Reconnect => {
                tracing::info!(session_id = %session.id, "transparent reconnect completed, resuming pump");
                continue;
            }
        }
    }
}

async fn run_iteration(
    session: &Arc<Session>,
    from_client: &mut mpsc::UnboundedReceiver<ClientFrame>,
    to_client: &mpsc::UnboundedSender<ServerFrame>,
    executor: &dyn ToolExecutor,
    factory: &UpstreamFactory,
) -> PumpOutcome {
    tokio::select! {
        outcome = client_pump(session, from_client, to_client, factory) => outcome,
        outcome = response_pump(session, to_client, executor, factory) => outcome,
    }
}

/// The `data` payload of a client frame, for the empty-payload check
/// below. Frames with no `data` field (`End`, `State`) are exempt.
fn frame_data(frame: &ClientFrame) -> Option<&str> {
    match frame {
        ClientFrame::Audio { data } | ClientFrame::Image { data } | ClientFrame::Text { data } => Some(data),
        ClientFrame::End | ClientFrame::State { .. } => None,
    }
}

/// Client -> upstream direction. Also owns the client-initiated
/// reconnect request (`{"type":"state","data":"reconnect"}`).
async fn client_pump(
    session: &Arc<Session>,
    from_client: &mut mpsc::UnboundedReceiver<ClientFrame>,
    to_client: &mpsc::UnboundedSender<ServerFrame>,
    factory: &UpstreamFactory,
) -> PumpOutcome {
    loop {
        let Some(frame) = from_client.recv().await else {
            return PumpOutcome::Exit(CloseInfo::ok("client disconnected"));
        };

        if matches!(frame_data(&frame), Some(data) if data.is_empty()) {
            let _ = to_client.send(ServerFrame::Text { data: "data is null".to_string() });
            return PumpOutcome::Exit(CloseInfo::ok("empty client payload"));
        }

        let send_result = match frame {
            ClientFrame::Audio { data } => match STANDARD.decode(&data) {
                Ok(bytes) => session.upstream.lock().await.send_audio(&bytes).await,
                Err(_) => continue,
            },
            ClientFrame::Image { data } => match STANDARD.decode(&data) {
                Ok(bytes) => session.upstream.lock().await.send_image(&bytes).await,
                Err(_) => continue,
            },
            ClientFrame::Text { data } => session.upstream.lock().await.send_text(&data).await,
            ClientFrame::End => continue,
            ClientFrame::State { data: ClientState::Stop } => {
                session.upstream.lock().await.close().await;
                return PumpOutcome::Exit(CloseInfo::ok("client requested stop"));
            }
            ClientFrame::State { data: ClientState::Reconnect } => {
                return reconnect(session, to_client, factory).await;
            }
        };

        if let Err(e) = send_result {
            return PumpOutcome::Exit(CloseInfo::err(PumpError::Upstream(e)));
        }
    }
}

/// Upstream -> client direction, plus tool dispatch and the
/// upstream-initiated reconnect paths (`go_away`, abrupt close).
async fn response_pump(
    session: &Arc<Session>,
    to_client: &mpsc::UnboundedSender<ServerFrame>,
    executor: &dyn ToolExecutor,
    factory: &UpstreamFactory,
) -> PumpOutcome {
    let mut input_transcript = String::new();
    let mut output_transcript = String::new();

    loop {
        let event = {
            let mut upstream = session.upstream.lock().await;
            upstream.recv().await
        };

        let event = match event {
            Ok(event) => event,
            Err(UpstreamError::ConnectionClosedError) => return reconnect(session, to_client, factory).await,
            Err(UpstreamError::ConnectionClosedOk) => return PumpOutcome::Exit(CloseInfo::ok("upstream closed normally")),
            Err(e) if is_quota_error(&e) => {
                let _ = to_client.send(ServerFrame::Error {
                    data: ErrorPayload { kind: ErrorKind::Quota, message: e.to_string() },
                });
                let _ = to_client.send(ServerFrame::Text {
                    data: "⚠ You've reached your usage limit, please try again later".to_string(),
                });
                return PumpOutcome::Exit(CloseInfo::err(PumpError::QuotaExceeded));
            }
            Err(e) => return PumpOutcome::Exit(CloseInfo::err(PumpError::Upstream(e))),
        };

        match event {
            UpstreamEvent::ToolCall(envelope) => {
                if let Err(e) = tool_dispatch::dispatch(session, envelope, executor, to_client).await {
                    return PumpOutcome::Exit(CloseInfo::err(e));
                }
            }
            UpstreamEvent::SessionResumptionUpdate(update) => {
                if update.resumable && update.new_handle.is_some() {
                    tracing::debug!(session_id = %session.id, "session resumption handle refreshed");
                }
            }
            UpstreamEvent::GoAway(go_away) => {
                if go_away.requires_reconnect() {
                    return reconnect(session, to_client, factory).await;
                }
            }
            UpstreamEvent::ServerContent(content) => {
                if let Some(outcome) = handle_server_content(
                    session,
                    to_client,
                    content,
                    &mut input_transcript,
                    &mut output_transcript,
                )
                .await
                {
                    return outcome;
                }
            }
        }
    }
}

fn is_quota_error(e: &UpstreamError) -> bool {
    matches!(e, UpstreamError::Protocol(msg) if msg.to_lowercase().contains("quota"))
}

async fn handle_server_content(
    session: &Arc<Session>,
    to_client: &mpsc::UnboundedSender<ServerFrame>,
    content: ServerContent,
    input_transcript: &mut String,
    output_transcript: &mut String,
) -> Option<PumpOutcome> {
    if content.interrupted {
        let _ = to_client.send(ServerFrame::Interrupted {
            data: InterruptedPayload { message: "Response interrupted by user input".to_string() },
        });
        return None;
    }

    for part in content.model_turn {
        match part {
            TurnPart::Audio { inline_data } => {
                let cleaned = clean_unbalanced_or_extra_quotes(&STANDARD.encode(&inline_data));
                let _ = to_client.send(ServerFrame::Audio { data: cleaned });
            }
            TurnPart::Text { text } => {
                let cleaned = clean_unbalanced_or_extra_quotes(&smart_clean_spaces(&text));
                let _ = to_client.send(ServerFrame::Text { data: cleaned });
            }
        }
    }

    if let Some(text) = content.input_transcription {
        input_transcript.push_str(&smart_clean_spaces(&text));
    }

    if let Some(text) = content.output_transcription {
        let cleaned = smart_clean_spaces(&text);
        let _ = to_client.send(ServerFrame::Text { data: cleaned.clone() });
        output_transcript.push_str(&cleaned);
    }

    if content.turn_complete {
        let _ = to_client.send(ServerFrame::TurnComplete);
        publish_turn(session, input_transcript, Role::User).await;
        publish_turn(session, output_transcript, Role::Assistant).await;
        input_transcript.clear();
        output_transcript.clear();
    }

    None
}

async fn publish_turn(session: &Arc<Session>, text: &str, role: Role) {
    if text.is_empty() {
        return;
    }
    let body = MessageBody::text_chat(
        Uuid::new_v4().to_string(),
        session.base_info.publication_user_id(),
        role,
        text.to_string(),
    );
    let _ = session.mq_producer.send_sync(&body).await;
}

/// Close the current upstream session, open a fresh one with the
/// session's original `BaseInfo`, swap it in, and tell the client before
/// and after, per the documented reconnect handshake.
async fn reconnect(
    session: &Arc<Session>,
    to_client: &mpsc::UnboundedSender<ServerFrame>,
    factory: &UpstreamFactory,
) -> PumpOutcome {
    tracing::info!(session_id = %session.id, "starting transparent reconnect");
    let _ = to_client.send(ServerFrame::State { data: "start reconnect".to_string() });

    {
        let mut upstream = session.upstream.lock().await;
        upstream.close().await;
    }

    match factory.create(&session.base_info).await {
        Ok(new_session) => {
            session.replace_upstream(new_session).await;
            let _ = to_client.send(ServerFrame::Reconnected {
                reconnect: true,
                data: "reconnected successfully".to_string(),
            });
            PumpOutcome::Reconnect
        }
        Err(e) => PumpOutcome::Exit(CloseInfo::err(PumpError::Upstream(e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_info::BaseInfo;
    use crate::mq::NullMessageProducer;
    use crate::upstream::test_support::FakeUpstreamSession;
    use crate::upstream::types::{FunctionCall, ToolCallEnvelope};

    fn session_with_fake() -> Arc<Session> {
        Arc::new(Session::new(
            "s1".into(),
            BaseInfo::default(),
            Box::new(FakeUpstreamSession::new()),
            Arc::new(NullMessageProducer),
        ))
    }

    #[tokio::test]
    async fn empty_client_payload_is_rejected_and_ends_the_pump() {
        use crate::upstream::UpstreamMode;

        let session = session_with_fake();
        let (from_client_tx, mut from_client_rx) = mpsc::unbounded_channel();
        let (to_client, mut rx) = mpsc::unbounded_channel();
        let factory = UpstreamFactory::new(UpstreamMode::Development { api_key: "test".into() });

        from_client_tx.send(ClientFrame::Text { data: String::new() }).unwrap();

        let outcome = client_pump(&session, &mut from_client_rx, &to_client, &factory).await;

        assert!(matches!(outcome, PumpOutcome::Exit(_)));
        let frame = rx.recv().await.unwrap();
        match frame {
            ServerFrame::Text { data } => assert_eq!(data, "data is null"),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn go_away_without_time_left_does_not_reconnect() {
        let session = session_with_fake();
        let (to_client, mut rx) = mpsc::unbounded_channel();

        let go_away = GoAway { time_left: None };
        assert!(!go_away.requires_reconnect());

        // ServerContent path with no model_turn/turn_complete should be
        // a no-op that doesn't emit anything to the client.
        let mut input = String::new();
        let mut output = String::new();
        let outcome = handle_server_content(
            &session,
            &to_client,
            ServerContent::default(),
            &mut input,
            &mut output,
        )
        .await;
        assert!(outcome.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn turn_complete_with_empty_transcripts_publishes_nothing() {
        let session = session_with_fake();
        let (to_client, _rx) = mpsc::unbounded_channel();
        let mut input = String::new();
        let mut output = String::new();

        let content = ServerContent { turn_complete: true, ..Default::default() };
        handle_server_content(&session, &to_client, content, &mut input, &mut output).await;

        assert!(input.is_empty());
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn interrupted_resets_nothing_but_notifies_client() {
        let session = session_with_fake();
        let (to_client, mut rx) = mpsc::unbounded_channel();
        let mut input = String::new();
        let mut output = String::new();

        let content = ServerContent { interrupted: true, ..Default::default() };
        handle_server_content(&session, &to_client, content, &mut input, &mut output).await;

        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, ServerFrame::Interrupted { .. }));
    }

    #[tokio::test]
    async fn tool_call_with_no_functions_leaves_upstream_untouched() {
        let session = session_with_fake();
        let (to_client, _rx) = mpsc::unbounded_channel();
        let envelope = ToolCallEnvelope { function_calls: Vec::<FunctionCall>::new() };
        let result = tool_dispatch::dispatch(&session, envelope, &crate::tool_dispatch::AckToolExecutor, &to_client).await;
        assert!(result.is_ok());
    }
}
