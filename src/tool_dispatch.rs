//! Tool-call dispatch: runs the model's requested function calls in
//! order and reports results back both to the client and upstream.
//!
//! Grounded on `core/websocket_handler.py`'s `process_tool_queue`.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::PumpError;
use crate::frames::{FunctionCallPayload, ServerFrame};
use crate::session::Session;
use crate::upstream::{FunctionCall, FunctionResponse, ToolCallEnvelope, UpstreamSession};

/// The one tool name after which a batched response is withheld: a
/// live-video handoff changes the session shape enough that echoing a
/// stale tool response back upstream would be meaningless.
const SUPPRESS_RESPONSE_AFTER: &str = "startLiveVideoChat";

/// External collaborator that actually runs a named tool. Implementors
/// are expected to be infallible-in-spirit: `execute` should catch its
/// own errors and fold them into the returned value, since one failed
/// tool call must not abort the rest of the batch (mirrors the
/// original's per-call try/except that just logs and continues).
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, args: &Value) -> Value;
}

/// A `ToolExecutor` that answers every call with `{"result": "ok"}`,
/// matching tools the original never actually implements server-side
/// (most of `config.py`'s commented-out function declarations).
pub struct AckToolExecutor;

#[async_trait]
impl ToolExecutor for AckToolExecutor {
    async fn execute(&self, _name: &str, _args: &Value) -> Value {
        json!({ "result": "ok" })
    }
}

/// Run every function call in `envelope` in order, streaming
/// `function_call`/`function_response` frames to the client as each
/// completes, then push the batched responses upstream unless the last
/// call was `startLiveVideoChat`.
pub async fn dispatch(
    session: &Session,
    envelope: ToolCallEnvelope,
    executor: &dyn ToolExecutor,
    to_client: &mpsc::UnboundedSender<ServerFrame>,
) -> Result<(), PumpError> {
    let mut responses = Vec::with_capacity(envelope.function_calls.len());
    let mut last_name = String::new();

    for call in envelope.function_calls {
        let FunctionCall { id, name, args } = call;

        let _ = to_client.send(ServerFrame::FunctionCall {
            data: FunctionCallPayload {
                name: name.clone(),
                args: args.clone(),
            },
        });

        let result = executor.execute(&name, &args).await;

        let _ = to_client.send(ServerFrame::FunctionResponse { data: result.clone() });

        responses.push(FunctionResponse {
            id,
            name: name.clone(),
            response: json!({ "result": "ok" }),
        });
        last_name = name;
    }

    if !responses.is_empty() && last_name != SUPPRESS_RESPONSE_AFTER {
        let mut upstream = session.upstream.lock().await;
        if let Err(e) = upstream.send_tool_responses(responses).await {
            // A failed batched response must not tear down the session,
            // mirroring the original's swallow-and-log try/except around
            // the whole tool queue.
            tracing::warn!(session_id = %session.id, error = %e, "failed to send tool responses upstream, continuing");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_info::BaseInfo;
    use crate::mq::NullMessageProducer;
    use crate::upstream::test_support::FakeUpstreamSession;
    use std::sync::Arc;

    fn session_with_fake() -> Session {
        Session::new(
            "s1".into(),
            BaseInfo::default(),
            Box::new(FakeUpstreamSession::new()),
            Arc::new(NullMessageProducer),
        )
    }

    #[tokio::test]
    async fn empty_envelope_sends_nothing_and_never_touches_upstream() {
        let session = session_with_fake();
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatch(&session, ToolCallEnvelope::default(), &AckToolExecutor, &tx)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn emits_function_call_and_response_frames_per_call() {
        let session = session_with_fake();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let envelope = ToolCallEnvelope {
            function_calls: vec![FunctionCall {
                id: "1".into(),
                name: "pauseOrResumeChat".into(),
                args: json!({}),
            }],
        };
        dispatch(&session, envelope, &AckToolExecutor, &tx).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, ServerFrame::FunctionCall { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, ServerFrame::FunctionResponse { .. }));
    }

    #[tokio::test]
    async fn suppresses_upstream_response_after_start_live_video_chat() {
        let session = session_with_fake();
        let (tx, _rx) = mpsc::unbounded_channel();
        let envelope = ToolCallEnvelope {
            function_calls: vec![FunctionCall {
                id: "1".into(),
                name: "startLiveVideoChat".into(),
                args: json!({}),
            }],
        };
        // No panic/error even though send_tool_responses is skipped.
        dispatch(&session, envelope, &AckToolExecutor, &tx).await.unwrap();
    }
}
