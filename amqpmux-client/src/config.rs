//! Connection configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via AMQPMUX_CONFIG)
//! 3. Environment variables

use crate::auth::{AuthMechanism, PlainAuth};
use amqpmux_protocol::method::{
    ChannelClose, ChannelCloseOk, ChannelOpen, ChannelOpenOk, ConnectionClose, ConnectionCloseOk,
    ConnectionOpen, ConnectionOpenOk, ConnectionStart, ConnectionStartOk, ConnectionTune,
    ConnectionTuneOk,
};
use amqpmux_protocol::{
    FieldTable, FieldValue, MethodId, MethodKind, MethodRegistry, DEFAULT_FRAME_MAX, DEFAULT_PORT,
    FRAME_MIN_SIZE,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default heartbeat interval proposed to the broker, in seconds.
pub const DEFAULT_HEARTBEAT_SECS: u16 = 60;

/// Default bound of the outbound frame queue.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 100;

/// Methods a connection cannot negotiate, open channels or close without.
const REQUIRED_METHODS: [MethodId; 12] = [
    ConnectionStart::ID,
    ConnectionStartOk::ID,
    ConnectionTune::ID,
    ConnectionTuneOk::ID,
    ConnectionOpen::ID,
    ConnectionOpenOk::ID,
    ConnectionClose::ID,
    ConnectionCloseOk::ID,
    ChannelOpen::ID,
    ChannelOpenOk::ID,
    ChannelClose::ID,
    ChannelCloseOk::ID,
];

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    Parse(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Connection configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Broker endpoints tried in order, as `host` or `host:port`.
    pub endpoints: Vec<String>,
    pub virtual_host: String,
    pub username: String,
    pub password: String,
    pub locale: String,
    /// Largest frame proposed to the broker, in bytes.
    pub frame_max: u32,
    /// Highest channel number proposed to the broker. 0 means no limit.
    pub channel_max: u16,
    /// Heartbeat interval proposed to the broker. 0 disables heartbeats.
    pub heartbeat_secs: u16,
    pub connect_timeout_secs: u64,
    /// Bound for the whole negotiation, from protocol header to open-ok.
    pub handshake_timeout_secs: u64,
    pub outbound_queue_capacity: usize,
    /// Free buffers kept by the frame buffer pool.
    pub buffer_pool_capacity: usize,
    /// Client name reported in the `connection_name` property.
    pub connection_name: Option<String>,
    /// Extra string properties sent in start-ok.
    pub client_properties: BTreeMap<String, String>,
    /// Mechanism used instead of `PLAIN` with username and password.
    #[serde(skip)]
    pub auth: Option<Arc<dyn AuthMechanism>>,
    /// Methods the connection can send and receive. Defaults to every
    /// method this crate defines; frames of unregistered methods fail
    /// their channel.
    #[serde(skip)]
    pub registry: Option<Arc<MethodRegistry>>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![format!("localhost:{}", DEFAULT_PORT)],
            virtual_host: "/".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            locale: "en_US".to_string(),
            frame_max: DEFAULT_FRAME_MAX,
            channel_max: 2047,
            heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
            connect_timeout_secs: 10,
            handshake_timeout_secs: 10,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            buffer_pool_capacity: crate::buffer::DEFAULT_POOL_CAPACITY,
            connection_name: None,
            client_properties: BTreeMap::new(),
            auth: None,
            registry: None,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoints", &self.endpoints)
            .field("virtual_host", &self.virtual_host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("locale", &self.locale)
            .field("frame_max", &self.frame_max)
            .field("channel_max", &self.channel_max)
            .field("heartbeat_secs", &self.heartbeat_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("handshake_timeout_secs", &self.handshake_timeout_secs)
            .field("outbound_queue_capacity", &self.outbound_queue_capacity)
            .field("auth", &self.auth)
            .field("registry", &self.registry.as_ref().map(|r| r.len()))
            .finish()
    }
}

impl ConnectionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoints: vec![endpoint.into()],
            ..Self::default()
        }
    }

    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("AMQPMUX_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let mut config: ConnectionConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        config.clamp();
        Ok(config)
    }

    /// Applies `AMQPMUX_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides read through `lookup`, keyed by environment
    /// variable name. Unparsable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoints) = lookup("AMQPMUX_ENDPOINTS") {
            let parsed: Vec<String> = endpoints
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(String::from)
                .collect();
            if !parsed.is_empty() {
                self.endpoints = parsed;
            }
        }

        if let Some(vhost) = lookup("AMQPMUX_VHOST") {
            self.virtual_host = vhost;
        }

        if let Some(user) = lookup("AMQPMUX_USER") {
            self.username = user;
        }

        if let Some(password) = lookup("AMQPMUX_PASSWORD") {
            self.password = password;
        }

        if let Some(Ok(n)) = lookup("AMQPMUX_FRAME_MAX").map(|v| v.parse::<u32>()) {
            self.frame_max = n;
        }

        if let Some(Ok(n)) = lookup("AMQPMUX_CHANNEL_MAX").map(|v| v.parse::<u16>()) {
            self.channel_max = n;
        }

        if let Some(Ok(secs)) = lookup("AMQPMUX_HEARTBEAT").map(|v| v.parse::<u16>()) {
            self.heartbeat_secs = secs;
        }

        if let Some(Ok(secs)) = lookup("AMQPMUX_CONNECT_TIMEOUT").map(|v| v.parse::<u64>()) {
            self.connect_timeout_secs = secs;
        }

        if let Some(Ok(secs)) = lookup("AMQPMUX_HANDSHAKE_TIMEOUT").map(|v| v.parse::<u64>()) {
            self.handshake_timeout_secs = secs;
        }

        self.clamp();
    }

    fn clamp(&mut self) {
        self.frame_max = self.frame_max.max(FRAME_MIN_SIZE);
        self.outbound_queue_capacity = self.outbound_queue_capacity.max(1);
    }

    /// Checks values that cannot be clamped into range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::Validation("no endpoints configured".into()));
        }
        if self.handshake_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "handshake_timeout_secs must be positive".into(),
            ));
        }
        if let Some(registry) = &self.registry {
            if let Some(missing) = REQUIRED_METHODS.iter().find(|id| !registry.contains(**id)) {
                return Err(ConfigError::Validation(format!(
                    "method registry lacks {}",
                    missing
                )));
            }
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Ok(())
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    pub fn with_virtual_host(mut self, vhost: impl Into<String>) -> Self {
        self.virtual_host = vhost.into();
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthMechanism>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_registry(mut self, registry: Arc<MethodRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn with_frame_max(mut self, frame_max: u32) -> Self {
        self.frame_max = frame_max.max(FRAME_MIN_SIZE);
        self
    }

    pub fn with_channel_max(mut self, channel_max: u16) -> Self {
        self.channel_max = channel_max;
        self
    }

    pub fn with_heartbeat(mut self, secs: u16) -> Self {
        self.heartbeat_secs = secs;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_queue_capacity = capacity.max(1);
        self
    }

    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }

    pub fn with_client_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.client_properties.insert(name.into(), value.into());
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// The configured mechanism, or `PLAIN` with the configured credentials.
    pub fn auth_mechanism(&self) -> Arc<dyn AuthMechanism> {
        match &self.auth {
            Some(auth) => auth.clone(),
            None => Arc::new(PlainAuth::new(&self.username, &self.password)),
        }
    }

    /// The configured registry, or one with every known method.
    pub fn method_registry(&self) -> Arc<MethodRegistry> {
        match &self.registry {
            Some(registry) => registry.clone(),
            None => Arc::new(MethodRegistry::amqp()),
        }
    }

    /// Properties sent to the broker in start-ok.
    pub fn client_properties_table(&self) -> FieldTable {
        let mut capabilities = FieldTable::new();
        for name in [
            "authentication_failure_close",
            "connection.blocked",
            "publisher_confirms",
            "consumer_cancel_notify",
            "basic.nack",
        ] {
            capabilities.insert(name.to_string(), FieldValue::Bool(true));
        }

        let mut table = FieldTable::new();
        table.insert("product".into(), "amqpmux".into());
        table.insert("version".into(), env!("CARGO_PKG_VERSION").into());
        table.insert("platform".into(), "Rust".into());
        table.insert("capabilities".into(), capabilities.into());
        if let Some(name) = &self.connection_name {
            table.insert("connection_name".into(), name.as_str().into());
        }
        for (name, value) in &self.client_properties {
            table.insert(name.clone(), value.as_str().into());
        }
        table
    }
}

/// Resolves an endpoint to `host:port`, adding the default port when
/// none is given.
pub fn endpoint_address(endpoint: &str) -> String {
    let has_port = endpoint
        .rsplit_once(':')
        .map(|(host, port)| !host.is_empty() && !host.ends_with(':') && port.parse::<u16>().is_ok())
        .unwrap_or(false);
    if has_port {
        endpoint.to_string()
    } else {
        format!("{}:{}", endpoint, DEFAULT_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.endpoints, vec!["localhost:5672".to_string()]);
        assert_eq!(config.virtual_host, "/");
        assert_eq!(config.frame_max, DEFAULT_FRAME_MAX);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(config.outbound_queue_capacity, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_frame_max_clamping() {
        let config = ConnectionConfig::new("broker:5672").with_frame_max(100);
        assert_eq!(config.frame_max, FRAME_MIN_SIZE);

        let mut config = ConnectionConfig::default();
        let env: HashMap<&str, &str> = [("AMQPMUX_FRAME_MAX", "10")].into();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.frame_max, FRAME_MIN_SIZE);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("AMQPMUX_ENDPOINTS", "rabbit-a:5672, rabbit-b"),
            ("AMQPMUX_VHOST", "prod"),
            ("AMQPMUX_USER", "svc"),
            ("AMQPMUX_PASSWORD", "pw"),
            ("AMQPMUX_CHANNEL_MAX", "64"),
            ("AMQPMUX_HEARTBEAT", "not-a-number"),
            ("AMQPMUX_HANDSHAKE_TIMEOUT", "3"),
        ]
        .into();

        let mut config = ConnectionConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.endpoints, vec!["rabbit-a:5672", "rabbit-b"]);
        assert_eq!(config.virtual_host, "prod");
        assert_eq!(config.username, "svc");
        assert_eq!(config.password, "pw");
        assert_eq!(config.channel_max, 64);
        assert_eq!(config.heartbeat_secs, DEFAULT_HEARTBEAT_SECS);
        assert_eq!(config.handshake_timeout_secs, 3);
    }

    #[test]
    fn test_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "endpoints: [\"mq1:5673\", \"mq2\"]\nvirtual_host: staging\nframe_max: 1024\nclient_properties:\n  team: payments"
        )
        .unwrap();

        let config = ConnectionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.virtual_host, "staging");
        assert_eq!(config.frame_max, FRAME_MIN_SIZE);
        assert_eq!(config.heartbeat_secs, DEFAULT_HEARTBEAT_SECS);
        assert_eq!(config.client_properties["team"], "payments");
    }

    #[test]
    fn test_yaml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("amqpmux.yaml");
        let config = ConnectionConfig::new("mq:5672").with_heartbeat(15);
        config.save(&path).unwrap();

        let loaded = ConnectionConfig::from_file(&path).unwrap();
        assert_eq!(loaded.endpoints, config.endpoints);
        assert_eq!(loaded.heartbeat_secs, 15);
    }

    #[test]
    fn test_missing_file() {
        let result = ConnectionConfig::from_file("/nonexistent/amqpmux.yaml");
        assert!(matches!(result, Err(ConfigError::Io(..))));
    }

    #[test]
    fn test_validation() {
        let mut config = ConnectionConfig::default();
        config.endpoints.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_registry_must_cover_handshake() {
        let partial = MethodRegistry::builder()
            .register::<ConnectionStart>()
            .register::<ConnectionStartOk>()
            .build()
            .unwrap();
        let config = ConnectionConfig::default().with_registry(Arc::new(partial));
        match config.validate() {
            Err(ConfigError::Validation(message)) => assert!(message.contains("lacks")),
            other => panic!("unexpected result: {:?}", other),
        }

        let full = ConnectionConfig::default().with_registry(Arc::new(MethodRegistry::amqp()));
        assert!(full.validate().is_ok());
        assert_eq!(full.method_registry().len(), MethodRegistry::amqp().len());
    }

    #[test]
    fn test_client_properties() {
        let config = ConnectionConfig::default()
            .with_connection_name("billing-worker")
            .with_client_property("region", "eu-west-1");
        let table = config.client_properties_table();
        assert_eq!(table["product"].as_str(), Some("amqpmux"));
        assert_eq!(table["connection_name"].as_str(), Some("billing-worker"));
        assert_eq!(table["region"].as_str(), Some("eu-west-1"));

        let capabilities = table["capabilities"].as_table().unwrap();
        assert_eq!(
            capabilities["authentication_failure_close"].as_bool(),
            Some(true)
        );
        assert_eq!(capabilities["basic.nack"].as_bool(), Some(true));
    }

    #[test]
    fn test_auth_defaults_to_plain() {
        let config = ConnectionConfig::default().with_credentials("u", "p");
        let auth = config.auth_mechanism();
        assert_eq!(auth.name(), "PLAIN");
        assert_eq!(&auth.response(b"")[..], b"\0u\0p");

        let config = config.with_auth(Arc::new(crate::auth::ExternalAuth));
        assert_eq!(config.auth_mechanism().name(), "EXTERNAL");
        assert!(!format!("{:?}", config).contains("\"p\""));
    }

    #[test]
    fn test_endpoint_address() {
        assert_eq!(endpoint_address("mq"), "mq:5672");
        assert_eq!(endpoint_address("mq:5673"), "mq:5673");
        assert_eq!(endpoint_address("10.0.0.1:5671"), "10.0.0.1:5671");
    }
}
