//! Per-connection context assembled from the `param` query value.
//!
//! Mirrors `core/base_info.py` in the original service: a flat bag of
//! optional fields with stable defaults, immutable once constructed.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Default location used when the client doesn't supply one.
pub const DEFAULT_LOCATION: &str = "Beijing";
/// Default TTS voice.
pub const DEFAULT_VOICE: &str = "Aoede";
/// Default user id, also the literal fallback used by transcript
/// publication when `userId` is empty or absent (see §9 of the spec).
pub const DEFAULT_USER_ID: &str = "123456";

/// Raw shape of the base64+JSON `param` query value.
#[derive(Debug, Default, Deserialize)]
struct RawParam {
    #[serde(rename = "userId")]
    user_id: Option<String>,
    token: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    voice: Option<String>,
    location: Option<String>,
    date: Option<String>,
}

/// Per-connection context, immutable after creation.
#[derive(Debug, Clone)]
pub struct BaseInfo {
    pub user_id: String,
    pub token: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub voice: String,
    pub location: String,
    pub date: DateTime<Utc>,
}

impl Default for BaseInfo {
    fn default() -> Self {
        Self {
            user_id: DEFAULT_USER_ID.to_string(),
            token: None,
            latitude: None,
            longitude: None,
            voice: DEFAULT_VOICE.to_string(),
            location: DEFAULT_LOCATION.to_string(),
            date: Utc::now(),
        }
    }
}

impl BaseInfo {
    /// Decode the `param` query value: base64 -> UTF-8 -> JSON, applying
    /// defaults for any field that is missing or empty. Malformed input
    /// (bad base64, bad JSON) yields an all-defaults BaseInfo rather than
    /// failing the handshake — the original never rejects a connection
    /// over a bad `param`.
    pub fn from_param(param: Option<&str>) -> Self {
        let raw = param
            .and_then(|p| STANDARD.decode(p).ok())
            .and_then(|bytes| serde_json::from_slice::<RawParam>(&bytes).ok())
            .unwrap_or_default();

        let defaults = Self::default();
        Self {
            user_id: non_empty(raw.user_id).unwrap_or(defaults.user_id),
            token: non_empty(raw.token),
            latitude: raw.latitude,
            longitude: raw.longitude,
            voice: non_empty(raw.voice).unwrap_or(defaults.voice),
            location: non_empty(raw.location).unwrap_or(defaults.location),
            date: defaults.date,
        }
    }

    /// `userId` as used by transcript publication: falls back to the
    /// literal default whenever the configured id is empty, preserving
    /// the original's truthiness-test-and-fall-back-to-123456 behavior
    /// (this is test-observable, not a bug — see spec §9).
    pub fn publication_user_id(&self) -> &str {
        if self.user_id.is_empty() {
            DEFAULT_USER_ID
        } else {
            &self.user_id
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(json: &str) -> String {
        STANDARD.encode(json.as_bytes())
    }

    #[test]
    fn defaults_when_param_absent() {
        let info = BaseInfo::from_param(None);
        assert_eq!(info.location, DEFAULT_LOCATION);
        assert_eq!(info.voice, DEFAULT_VOICE);
        assert_eq!(info.user_id, DEFAULT_USER_ID);
    }

    #[test]
    fn defaults_when_param_malformed() {
        let info = BaseInfo::from_param(Some("not-base64!!!"));
        assert_eq!(info.location, DEFAULT_LOCATION);
    }

    #[test]
    fn decodes_supplied_fields() {
        let json = r#"{"voice":"Aoede","userId":"42","location":"Tokyo"}"#;
        let param = encode(json);
        let info = BaseInfo::from_param(Some(&param));
        assert_eq!(info.voice, "Aoede");
        assert_eq!(info.user_id, "42");
        assert_eq!(info.location, "Tokyo");
    }

    #[test]
    fn empty_user_id_falls_back_for_publication() {
        let json = r#"{"userId":""}"#;
        let param = encode(json);
        let info = BaseInfo::from_param(Some(&param));
        assert_eq!(info.publication_user_id(), DEFAULT_USER_ID);
    }
}
