//! Vertex vs. development client construction, grounded on
//! `core/gemini_client.py`'s `create_gsession`.

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::base_info::BaseInfo;
use crate::error::UpstreamError;

use super::gemini::GeminiLiveSession;
use super::types::{GenerationConfig, MODEL_DEVELOPMENT, MODEL_VERTEX};
use super::UpstreamSession;

/// Which backend to hit. Vertex needs a GCP project + service-account
/// credentials; development talks to the public `v1alpha` endpoint with
/// an API key. Mirrors `ApiConfig.use_vertex` (`VERTEX_API` env var).
#[derive(Debug, Clone)]
pub enum UpstreamMode {
    Vertex {
        project_id: String,
        location: String,
        credentials_path: String,
    },
    Development {
        api_key: String,
    },
}

/// Loaded once per process and reused across sessions, mirroring the
/// original's module-level `_get_cached_credentials` cache — re-reading
/// and re-validating a service-account key on every connection would be
/// wasted work under the warmup pool's concurrency.
struct CredentialsCache {
    loaded: OnceCell<Arc<str>>,
}

impl CredentialsCache {
    fn new() -> Self {
        Self { loaded: OnceCell::new() }
    }

    async fn get_or_load(&self, path: &str) -> Result<Arc<str>, UpstreamError> {
        self.loaded
            .get_or_try_init(|| async {
                tokio::fs::read_to_string(path)
                    .await
                    .map(Arc::from)
                    .map_err(|e| UpstreamError::Credentials(e.to_string()))
            })
            .await
            .cloned()
    }
}

/// Builds fresh `UpstreamSession`s for the warmup pool.
pub struct UpstreamFactory {
    mode: UpstreamMode,
    credentials: CredentialsCache,
}

impl UpstreamFactory {
    pub fn new(mode: UpstreamMode) -> Self {
        Self {
            mode,
            credentials: CredentialsCache::new(),
        }
    }

    /// Open and configure a new upstream session for this `BaseInfo`.
    pub async fn create(&self, base_info: &BaseInfo) -> Result<Box<dyn UpstreamSession>, UpstreamError> {
        let config = GenerationConfig::from_base_info(base_info);

        let endpoint = match &self.mode {
            UpstreamMode::Vertex {
                project_id,
                location,
                credentials_path,
            } => {
                self.credentials.get_or_load(credentials_path).await?;
                vertex_endpoint(project_id, location)
            }
            UpstreamMode::Development { api_key } => development_endpoint(api_key),
        };

        let session = GeminiLiveSession::connect(&endpoint, &config).await?;
        Ok(Box::new(session))
    }
}

fn vertex_endpoint(project_id: &str, location: &str) -> String {
    format!(
        "wss://{location}-aiplatform.googleapis.com/ws/google.cloud.aiplatform.v1.LlmBidiService/BidiGenerateContent?project={project_id}&model={MODEL_VERTEX}"
    )
}

fn development_endpoint(api_key: &str) -> String {
    format!(
        "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent?key={api_key}&model={MODEL_DEVELOPMENT}"
    )
}
