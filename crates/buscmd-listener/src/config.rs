use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ListenerError, Result};

/// What to do with a frame that fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Discard silently.
    Drop,
    /// Post an `UNKNOWN` response.
    RespondUnknown,
}

/// What to do with a command no handler recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownCommandPolicy {
    /// Post nothing.
    Ignore,
    /// Post an `UNKNOWN` response.
    RespondUnknown,
}

/// Controls listener behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Number of deferred-response slots. Must be `1..=255`.
    pub registry_capacity: usize,
    /// Lifetime of an unresolved deferred entry, in milliseconds.
    /// `None` keeps entries until they are resolved.
    pub deferred_ttl_ms: Option<u64>,
    /// Handling of oversized or malformed frames.
    pub malformed_policy: MalformedPolicy,
    /// Handling of unrecognized command codes.
    pub unknown_command_policy: UnknownCommandPolicy,
    /// Decides whether a command rejected for contention gets a `BUSY`
    /// answer. Runs on the receive path, so it must be cheap.
    #[serde(skip, default = "default_response_expected")]
    pub response_expected: fn(u8) -> bool,
}

fn default_response_expected() -> fn(u8) -> bool {
    buscmd_frame::expects_response
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            registry_capacity: 5,
            deferred_ttl_ms: Some(60_000),
            malformed_policy: MalformedPolicy::RespondUnknown,
            unknown_command_policy: UnknownCommandPolicy::Ignore,
            response_expected: default_response_expected(),
        }
    }
}

impl ListenerConfig {
    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges.
    pub fn validate(&self) -> Result<()> {
        if !(1..=255).contains(&self.registry_capacity) {
            return Err(ListenerError::InvalidConfig(format!(
                "registry_capacity must be 1..=255, got {}",
                self.registry_capacity
            )));
        }
        if self.deferred_ttl_ms == Some(0) {
            return Err(ListenerError::InvalidConfig(
                "deferred_ttl_ms must be positive (use null to disable expiry)".to_string(),
            ));
        }
        Ok(())
    }

    /// Deferred entry lifetime.
    pub fn deferred_ttl(&self) -> Option<Duration> {
        self.deferred_ttl_ms.map(Duration::from_millis)
    }
}

/// Per-device identity and behavior, owned by one listener.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    /// The identifier reported for `CMD_QUERY_ID`.
    pub device_id: u8,
    /// Listener behavior.
    pub config: ListenerConfig,
}

impl DeviceContext {
    /// A device with default behavior.
    pub fn new(device_id: u8) -> Self {
        Self {
            device_id,
            config: ListenerConfig::default(),
        }
    }

    /// Override the listener config.
    pub fn with_config(mut self, config: ListenerConfig) -> Self {
        self.config = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ListenerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.deferred_ttl(), Some(Duration::from_secs(60)));
        assert!((config.response_expected)(buscmd_frame::CMD_ECHO));
        assert!(!(config.response_expected)(buscmd_frame::CMD_RESET));
    }

    #[test]
    fn json_fills_missing_fields() {
        let config = ListenerConfig::from_json(
            r#"{"registry_capacity": 2, "unknown_command_policy": "respond_unknown"}"#,
        )
        .unwrap();
        assert_eq!(config.registry_capacity, 2);
        assert_eq!(
            config.unknown_command_policy,
            UnknownCommandPolicy::RespondUnknown
        );
        assert_eq!(config.malformed_policy, MalformedPolicy::RespondUnknown);
        assert_eq!(config.deferred_ttl_ms, Some(60_000));
    }

    #[test]
    fn null_ttl_disables_expiry() {
        let config = ListenerConfig::from_json(r#"{"deferred_ttl_ms": null}"#).unwrap();
        assert_eq!(config.deferred_ttl(), None);
    }

    #[test]
    fn out_of_range_capacity_is_rejected() {
        let err = ListenerConfig::from_json(r#"{"registry_capacity": 0}"#).unwrap_err();
        assert!(matches!(err, ListenerError::InvalidConfig(_)));
        let err = ListenerConfig::from_json(r#"{"registry_capacity": 300}"#).unwrap_err();
        assert!(matches!(err, ListenerError::InvalidConfig(_)));
    }

    #[test]
    fn unknown_policy_value_is_a_json_error() {
        let err = ListenerConfig::from_json(r#"{"malformed_policy": "explode"}"#).unwrap_err();
        assert!(matches!(err, ListenerError::Json(_)));
    }
}
