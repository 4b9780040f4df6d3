//! Shared, cloneable application state handed to every axum handler.
//!
//! Grounded on `proxy/state.rs`'s struct-of-`Arc`s pattern.

use std::sync::Arc;

use crate::abuse_gate::AbuseGate;
use crate::mq::MessageProducer;
use crate::pool::WarmupPool;
use crate::readiness::ReadinessRegistry;
use crate::session::SessionRegistry;
use crate::tool_dispatch::ToolExecutor;
use crate::upstream::UpstreamFactory;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
    pub readiness: Arc<ReadinessRegistry>,
    pub pool: Arc<WarmupPool>,
    pub factory: Arc<UpstreamFactory>,
    pub abuse_gate: Arc<AbuseGate>,
    pub mq_producer: Arc<dyn MessageProducer>,
    pub tool_executor: Arc<dyn ToolExecutor>,
}
