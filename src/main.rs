mod abuse_gate;
mod base_info;
mod config;
mod error;
mod frames;
mod handshake;
mod mq;
mod pool;
mod pump;
mod readiness;
mod server;
mod session;
mod state;
mod text_norm;
mod tool_dispatch;
mod upstream;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::abuse_gate::AbuseGate;
use crate::config::Config;
use crate::mq::{MessageProducer, RocketMqProducer};
use crate::pool::WarmupPool;
use crate::readiness::ReadinessRegistry;
use crate::session::SessionRegistry;
use crate::state::AppState;
use crate::tool_dispatch::{AckToolExecutor, ToolExecutor};
use crate::upstream::UpstreamFactory;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = config::VERSION, "starting gemini-live-proxy");

    if let Err(e) = config.validate() {
        anyhow::bail!("invalid configuration: {e}");
    }

    let factory = Arc::new(UpstreamFactory::new(config.upstream_mode.clone()));
    let pool = WarmupPool::new(Arc::clone(&factory), config.pool.clone());

    pool.warmup().await;
    {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.keep_alive().await });
    }

    let mq_producer: Arc<dyn MessageProducer> = Arc::new(RocketMqProducer::new(config.mq.clone()));
    let tool_executor: Arc<dyn ToolExecutor> = Arc::new(AckToolExecutor);

    let state = AppState {
        sessions: Arc::new(SessionRegistry::new()),
        readiness: Arc::new(ReadinessRegistry::new()),
        pool: Arc::clone(&pool),
        factory,
        abuse_gate: Arc::new(AbuseGate::new()),
        mq_producer,
        tool_executor,
    };

    let shutdown_pool = Arc::clone(&pool);
    let shutdown_signal = async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, draining warmup pool");
        shutdown_pool.shutdown(true).await;
    };

    server::serve(config.bind_addr, state, shutdown_signal).await
}
