//! Client and server configuration

use convoy_events::EventFilter;
use serde::{Deserialize, Serialize};

use crate::auth::SignaturePolicy;

/// Client-side knobs; the defaults match the documented wire behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RpcClientConfig {
    /// Per-request deadline.
    pub request_timeout_ms: u64,
    /// Deadline for any single directory call during target resolution.
    pub directory_timeout_ms: u64,
    /// What outgoing request signatures cover; must match the server.
    pub signature_policy: SignaturePolicy,
    /// Reopen links that close unintentionally.
    pub auto_reconnect: bool,
    pub reconnect_initial_ms: u64,
    pub reconnect_factor: u32,
    pub reconnect_max_ms: u64,
    pub reconnect_max_attempts: u32,
    /// Event-stream filters sent on every (re)opened link.
    pub subscriptions: Vec<EventFilter>,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            directory_timeout_ms: 5_000,
            signature_policy: SignaturePolicy::default(),
            auto_reconnect: false,
            reconnect_initial_ms: 1_000,
            reconnect_factor: 2,
            reconnect_max_ms: 30_000,
            reconnect_max_attempts: 5,
            subscriptions: Vec::new(),
        }
    }
}

/// Server-side knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RpcServerConfig {
    /// Reject requests without a verifying `auth` block.
    pub require_auth: bool,
    /// What inbound request signatures must cover.
    pub signature_policy: SignaturePolicy,
    /// Probe connections every this many milliseconds; `None` disables
    /// heartbeats and silent peers are never forcibly terminated.
    pub heartbeat_interval_ms: Option<u64>,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            signature_policy: SignaturePolicy::default(),
            heartbeat_interval_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let client = RpcClientConfig::default();
        assert_eq!(client.request_timeout_ms, 30_000);
        assert_eq!(client.directory_timeout_ms, 5_000);
        assert!(!client.auto_reconnect);
        assert_eq!(client.reconnect_initial_ms, 1_000);
        assert_eq!(client.reconnect_factor, 2);
        assert_eq!(client.reconnect_max_ms, 30_000);
        assert_eq!(client.reconnect_max_attempts, 5);

        let server = RpcServerConfig::default();
        assert!(server.require_auth);
        assert_eq!(server.signature_policy, SignaturePolicy::PayloadOnly);
        assert!(server.heartbeat_interval_ms.is_none());
    }

    #[test]
    fn config_files_parse_with_partial_keys() {
        let client: RpcClientConfig =
            serde_json::from_str(r#"{"auto_reconnect": true, "reconnect_max_attempts": 3}"#)
                .unwrap();
        assert!(client.auto_reconnect);
        assert_eq!(client.reconnect_max_attempts, 3);
        assert_eq!(client.request_timeout_ms, 30_000);

        let server: RpcServerConfig =
            serde_json::from_str(r#"{"require_auth": false, "heartbeat_interval_ms": 500}"#)
                .unwrap();
        assert!(!server.require_auth);
        assert_eq!(server.heartbeat_interval_ms, Some(500));
    }

    #[test]
    fn unknown_config_keys_rejected() {
        assert!(serde_json::from_str::<RpcServerConfig>(r#"{"requireAuth": true}"#).is_err());
    }
}
