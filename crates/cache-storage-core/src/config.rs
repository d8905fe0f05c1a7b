use crate::types::SessionId;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Emit per-request and per-completion logs.
    pub log_requests: bool,
    /// Also log requests made from ephemeral (private) sessions.
    pub log_ephemeral_sessions: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            log_requests: true,
            log_ephemeral_sessions: false,
        }
    }
}

impl BrokerConfig {
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `CACHE_STORAGE_*` variables on top of `self`. Unset or
    /// unparsable variables leave the current value.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("CACHE_STORAGE_LOG_REQUESTS") {
            self.log_requests = parse_flag(&v).unwrap_or(self.log_requests);
        }

        if let Some(v) = lookup("CACHE_STORAGE_LOG_EPHEMERAL_SESSIONS") {
            self.log_ephemeral_sessions = parse_flag(&v).unwrap_or(self.log_ephemeral_sessions);
        }

        self
    }

    /// Whether per-request logging is allowed for `session`.
    pub fn logging_allowed(&self, session: SessionId) -> bool {
        self.log_requests && (self.log_ephemeral_sessions || !session.is_ephemeral())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_sessions_are_quiet_by_default() {
        let cfg = BrokerConfig::default();
        assert!(cfg.logging_allowed(SessionId::new(1)));
        assert!(!cfg.logging_allowed(SessionId::ephemeral(1)));
    }

    #[test]
    fn test_log_requests_off_silences_everything() {
        let cfg = BrokerConfig {
            log_requests: false,
            log_ephemeral_sessions: true,
        };
        assert!(!cfg.logging_allowed(SessionId::new(1)));
        assert!(!cfg.logging_allowed(SessionId::ephemeral(1)));
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" off "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_overrides_apply_on_top_of_loaded_values() {
        let loaded = BrokerConfig {
            log_requests: false,
            log_ephemeral_sessions: false,
        };
        let cfg = loaded.with_overrides(|key| match key {
            "CACHE_STORAGE_LOG_EPHEMERAL_SESSIONS" => Some("yes".to_string()),
            "CACHE_STORAGE_LOG_REQUESTS" => Some("garbage".to_string()),
            _ => None,
        });
        assert!(!cfg.log_requests);
        assert!(cfg.log_ephemeral_sessions);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let cfg: BrokerConfig = serde_json::from_str(r#"{"log_ephemeral_sessions":true}"#).unwrap();
        assert!(cfg.log_requests);
        assert!(cfg.log_ephemeral_sessions);
    }
}
