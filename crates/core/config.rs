//! Configuration for the tube-set endpoint.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TubesetError};

/// Tube watched when no tubes are configured.
pub const DEFAULT_TUBE: &str = "default";

/// Configuration for a [`TubesetEndpoint`](crate::TubesetEndpoint).
///
/// The string fields mirror the loose configuration map an endpoint is
/// usually built from; see [`EndpointConfig::from_value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Queue server address (`host:port`).
    pub server: String,
    /// Tubes to reserve from.
    #[serde(alias = "tubesets")]
    pub tubes: Vec<String>,
    /// Schedule expression: cron syntax or `@every <duration>`.
    pub interval: String,
    /// Reservation timeout, parsed on every poll.
    pub timeout: String,
    /// Bound on dialing the server.
    #[serde(skip)]
    pub setup_timeout: Duration,
    /// Bound on a single router dispatch.
    #[serde(skip)]
    pub dispatch_timeout: Duration,
    /// Dial at init instead of on first use.
    #[serde(alias = "connectOnInit")]
    pub connect_on_init: bool,
    /// Withhold dispatch when the job could not be deleted.
    #[serde(alias = "requireDelete")]
    pub require_delete: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:11300".to_string(),
            tubes: vec![DEFAULT_TUBE.to_string()],
            interval: "@every 5s".to_string(),
            timeout: "5m".to_string(),
            setup_timeout: Duration::from_secs(4),
            dispatch_timeout: Duration::from_secs(2),
            connect_on_init: true,
            require_delete: false,
        }
    }
}

impl EndpointConfig {
    /// Create a new builder.
    pub fn builder() -> EndpointConfigBuilder {
        EndpointConfigBuilder::new()
    }

    /// Build a configuration from a loose JSON map, filling in defaults.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let config: EndpointConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the fields that must hold before an endpoint can start.
    ///
    /// The schedule and timeout strings are not checked here: a bad schedule
    /// fails `start`, a bad timeout fails each poll.
    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            return Err(TubesetError::Config("server address is empty".to_string()));
        }
        if self.tubes.is_empty() {
            return Err(TubesetError::Config("tube list is empty".to_string()));
        }
        if let Some(tube) = self.tubes.iter().find(|t| t.trim().is_empty()) {
            return Err(TubesetError::Config(format!("invalid tube name {:?}", tube)));
        }
        Ok(())
    }

    /// Parse the reservation timeout.
    pub fn reserve_timeout(&self) -> Result<Duration> {
        parse_duration(&self.timeout)
    }
}

/// Parse a duration string such as `5m`, `2s` or `1h 30m`.
pub fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s.trim())
        .map_err(|e| TubesetError::BadDuration(format!("{:?}: {}", s, e)))
}

/// Builder for EndpointConfig.
#[derive(Debug, Default)]
pub struct EndpointConfigBuilder {
    config: EndpointConfig,
}

impl EndpointConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server address.
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.config.server = server.into();
        self
    }

    /// Set the tubes to reserve from.
    pub fn tubes<I, S>(mut self, tubes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.tubes = tubes.into_iter().map(Into::into).collect();
        self
    }

    /// Set the schedule expression.
    pub fn interval(mut self, interval: impl Into<String>) -> Self {
        self.config.interval = interval.into();
        self
    }

    /// Set the reservation timeout string.
    pub fn timeout(mut self, timeout: impl Into<String>) -> Self {
        self.config.timeout = timeout.into();
        self
    }

    /// Set the dial timeout.
    pub fn setup_timeout(mut self, timeout: Duration) -> Self {
        self.config.setup_timeout = timeout;
        self
    }

    /// Set the dispatch timeout.
    pub fn dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.config.dispatch_timeout = timeout;
        self
    }

    /// Dial at init (`true`) or on first use (`false`).
    pub fn connect_on_init(mut self, eager: bool) -> Self {
        self.config.connect_on_init = eager;
        self
    }

    /// Withhold dispatch when delete fails.
    pub fn require_delete(mut self, require: bool) -> Self {
        self.config.require_delete = require;
        self
    }

    /// Build the EndpointConfig.
    pub fn build(self) -> EndpointConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = EndpointConfig::default();
        assert_eq!(config.server, "127.0.0.1:11300");
        assert_eq!(config.tubes, vec!["default".to_string()]);
        assert_eq!(config.interval, "@every 5s");
        assert_eq!(config.reserve_timeout().unwrap(), Duration::from_secs(300));
        assert_eq!(config.setup_timeout, Duration::from_secs(4));
        assert_eq!(config.dispatch_timeout, Duration::from_secs(2));
        assert!(config.connect_on_init);
        assert!(!config.require_delete);
    }

    #[test]
    fn test_from_value_partial() {
        let config = EndpointConfig::from_value(json!({
            "server": "q:11300",
            "tubesets": ["orders", "refunds"],
        }))
        .unwrap();
        assert_eq!(config.server, "q:11300");
        assert_eq!(config.tubes, vec!["orders", "refunds"]);
        assert_eq!(config.interval, "@every 5s");
        assert_eq!(config.timeout, "5m");
        assert_eq!(config.dispatch_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_from_value_rejects_empty_tubes() {
        let err = EndpointConfig::from_value(json!({ "tubes": [] })).unwrap_err();
        assert!(matches!(err, TubesetError::Config(_)));
    }

    #[test]
    fn test_from_value_rejects_wrong_type() {
        let err = EndpointConfig::from_value(json!({ "tubes": "orders" })).unwrap_err();
        assert!(matches!(err, TubesetError::Serialization(_)));
    }

    #[test]
    fn test_bad_timeout_is_accepted_until_used() {
        let config = EndpointConfig::from_value(json!({ "timeout": "soon" })).unwrap();
        let err = config.reserve_timeout().unwrap_err();
        assert!(matches!(err, TubesetError::BadDuration(_)));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration(" 1h 30m ").unwrap(), Duration::from_secs(5400));
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_builder() {
        let config = EndpointConfig::builder()
            .server("q:11300")
            .tubes(["orders"])
            .interval("@every 1s")
            .timeout("2s")
            .dispatch_timeout(Duration::from_millis(500))
            .connect_on_init(false)
            .require_delete(true)
            .build();
        assert_eq!(config.server, "q:11300");
        assert_eq!(config.tubes, vec!["orders"]);
        assert_eq!(config.reserve_timeout().unwrap(), Duration::from_secs(2));
        assert_eq!(config.dispatch_timeout, Duration::from_millis(500));
        assert!(!config.connect_on_init);
        assert!(config.require_delete);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_blank_server() {
        let config = EndpointConfig::builder().server("  ").build();
        assert!(matches!(config.validate(), Err(TubesetError::Config(_))));
    }
}
