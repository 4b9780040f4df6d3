//! Per-IP abuse control: port-scan-style attempt tracking plus WS
//! upgrade header validation.
//!
//! Grounded on `core/RobustWebSocketServerProtocol.py`'s
//! `PortScanProtector` / `robustness_middleware`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;

use crate::error::HandshakeError;

/// Window over which attempts are retained before being pruned.
pub const ATTEMPT_WINDOW: Duration = Duration::from_secs(300);
/// More than this many attempts inside the window bans the IP.
pub const SCAN_THRESHOLD: usize = 10;
/// How long a ban lasts once imposed.
pub const BAN_DURATION: Duration = Duration::from_secs(1800);

struct Record {
    attempts: Vec<Instant>,
    banned_until: Option<Instant>,
}

impl Default for Record {
    fn default() -> Self {
        Self {
            attempts: Vec::new(),
            banned_until: None,
        }
    }
}

/// Tracks connection attempts per remote IP and rejects both banned
/// clients and malformed WebSocket upgrades.
#[derive(Default)]
pub struct AbuseGate {
    records: Mutex<HashMap<String, Record>>,
}

impl AbuseGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attempt from `ip` and decide whether to accept it.
    /// Bans are lifted lazily the first time the ban window elapses.
    pub fn should_accept(&self, ip: &str) -> bool {
        let now = Instant::now();
        let mut records = self.records.lock().unwrap();
        let record = records.entry(ip.to_string()).or_default();

        if let Some(banned_until) = record.banned_until {
            if now < banned_until {
                return false;
            }
            record.banned_until = None;
        }

        record.attempts.push(now);
        record
            .attempts
            .retain(|t| now.duration_since(*t) <= ATTEMPT_WINDOW);

        if record.attempts.len() > SCAN_THRESHOLD {
            tracing::warn!(ip, attempts = record.attempts.len(), "banning ip for excess connection attempts");
            record.banned_until = Some(now + BAN_DURATION);
            return false;
        }

        true
    }

    /// Validate the upgrade headers the way `robustness_middleware` does:
    /// all four headers present, `Connection` contains "upgrade" and
    /// `Upgrade` contains "websocket", case-insensitively.
    pub fn validate_upgrade_headers(headers: &HeaderMap) -> Result<(), HandshakeError> {
        let host = headers.get(axum::http::header::HOST);
        let upgrade = headers.get(axum::http::header::UPGRADE);
        let connection = headers.get(axum::http::header::CONNECTION);
        let key = headers.get("sec-websocket-key");

        let (Some(upgrade), Some(connection), Some(_key), Some(_host)) = (upgrade, connection, key, host) else {
            return Err(HandshakeError::InvalidHeaders);
        };

        let upgrade_ok = upgrade
            .to_str()
            .map(|v| v.to_lowercase().contains("websocket"))
            .unwrap_or(false);
        let connection_ok = connection
            .to_str()
            .map(|v| v.to_lowercase().contains("upgrade"))
            .unwrap_or(false);

        if upgrade_ok && connection_ok {
            Ok(())
        } else {
            Err(HandshakeError::InvalidUpgrade)
        }
    }

    /// Full gate check for a handshake: ban status then header shape.
    pub fn admit(&self, ip: &str, headers: &HeaderMap) -> Result<(), HandshakeError> {
        if !self.should_accept(ip) {
            return Err(HandshakeError::Banned);
        }
        Self::validate_upgrade_headers(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn valid_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::HOST, HeaderValue::from_static("example.com"));
        headers.insert(axum::http::header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(axum::http::header::CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert("sec-websocket-key", HeaderValue::from_static("abc123=="));
        headers
    }

    #[test]
    fn accepts_under_threshold() {
        let gate = AbuseGate::new();
        for _ in 0..SCAN_THRESHOLD {
            assert!(gate.should_accept("1.2.3.4"));
        }
    }

    #[test]
    fn bans_after_exceeding_threshold() {
        let gate = AbuseGate::new();
        for _ in 0..SCAN_THRESHOLD {
            gate.should_accept("1.2.3.4");
        }
        assert!(!gate.should_accept("1.2.3.4"));
    }

    #[test]
    fn distinct_ips_are_tracked_independently() {
        let gate = AbuseGate::new();
        for _ in 0..SCAN_THRESHOLD {
            gate.should_accept("1.2.3.4");
        }
        assert!(gate.should_accept("5.6.7.8"));
    }

    #[test]
    fn valid_upgrade_headers_pass() {
        assert!(AbuseGate::validate_upgrade_headers(&valid_headers()).is_ok());
    }

    #[test]
    fn missing_header_is_rejected() {
        let mut headers = valid_headers();
        headers.remove(axum::http::header::HOST);
        assert!(AbuseGate::validate_upgrade_headers(&headers).is_err());
    }

    #[test]
    fn wrong_upgrade_value_is_rejected() {
        let mut headers = valid_headers();
        headers.insert(axum::http::header::UPGRADE, HeaderValue::from_static("h2c"));
        assert!(AbuseGate::validate_upgrade_headers(&headers).is_err());
    }
}
