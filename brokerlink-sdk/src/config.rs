//! Connection configuration shared by every service.
//!
//! A [`ConnectionConfig`] is built once, wrapped in an `Arc` by the client,
//! and never mutated afterwards. It can be built in code with
//! [`ConnectionConfig::builder`] or loaded from a file plus `BROKERLINK_*`
//! environment variables with [`ConnectionConfig::load`].

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_BROKERS: &str = "localhost:9092";
const DEFAULT_CLIENT_ID: &str = "brokerlink";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 5_000;

/// Prefix for environment overrides, e.g. `BROKERLINK_BROKERS`.
pub const ENV_PREFIX: &str = "BROKERLINK";

/// Errors raised while building or loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file or environment source could not be read or parsed.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    /// The values were read but are not usable.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// SASL mechanism used to authenticate with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaslMechanism {
    #[default]
    Plain,
    ScramSha256,
    ScramSha512,
}

impl SaslMechanism {
    /// Mechanism name as the broker expects it.
    pub fn as_str(&self) -> &'static str {
        match self {
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::ScramSha256 => "SCRAM-SHA-256",
            SaslMechanism::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

/// Authentication material.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub mechanism: SaslMechanism,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Immutable connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    brokers: Vec<String>,
    client_id: String,
    credentials: Option<Credentials>,
    ssl: bool,
    connect_timeout: Duration,
    drain_timeout: Duration,
}

impl ConnectionConfig {
    /// Create a builder for configuring a connection.
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// Load configuration from defaults, an optional file and the
    /// environment, in increasing order of precedence.
    ///
    /// Environment keys use the [`ENV_PREFIX`] prefix, e.g.
    /// `BROKERLINK_CLIENT_ID=orders-service`. `brokers` is a
    /// comma-separated list.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder()
            .set_default("brokers", DEFAULT_BROKERS)?
            .set_default("client_id", DEFAULT_CLIENT_ID)?
            .set_default("ssl", false)?
            .set_default("connect_timeout_ms", DEFAULT_CONNECT_TIMEOUT_MS as i64)?
            .set_default("drain_timeout_ms", DEFAULT_DRAIN_TIMEOUT_MS as i64)?;

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }

        let settings: ConnectionSettings = builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()?;

        settings.into_config()
    }

    /// Broker endpoints (`host:port`).
    pub fn brokers(&self) -> &[String] {
        &self.brokers
    }

    /// Broker endpoints joined with commas.
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Whether connections use TLS.
    pub fn ssl(&self) -> bool {
        self.ssl
    }

    /// Upper bound for the connect and subscribe handshake.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// How long a disconnect waits for in-flight listeners.
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Default consumer group for a service of this client.
    pub(crate) fn group_for(&self, role: &str) -> String {
        format!("{}-{}", self.client_id, role)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            brokers: vec![DEFAULT_BROKERS.to_string()],
            client_id: DEFAULT_CLIENT_ID.to_string(),
            credentials: None,
            ssl: false,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            drain_timeout: Duration::from_millis(DEFAULT_DRAIN_TIMEOUT_MS),
        }
    }
}

/// Builder for `ConnectionConfig`.
#[derive(Debug, Default)]
pub struct ConnectionConfigBuilder {
    brokers: Vec<String>,
    client_id: Option<String>,
    credentials: Option<Credentials>,
    ssl: bool,
    connect_timeout: Option<Duration>,
    drain_timeout: Option<Duration>,
}

impl ConnectionConfigBuilder {
    /// Add a broker endpoint. Defaults to `localhost:9092` if none are added.
    pub fn broker(mut self, broker: impl Into<String>) -> Self {
        self.brokers.push(broker.into());
        self
    }

    /// Add several broker endpoints, or a comma-separated list.
    pub fn brokers<I, S>(mut self, brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for entry in brokers {
            self.brokers.extend(split_brokers(entry.as_ref()));
        }
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Authenticate with SASL.
    pub fn credentials(
        mut self,
        mechanism: SaslMechanism,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            mechanism,
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn ssl(mut self, enabled: bool) -> Self {
        self.ssl = enabled;
        self
    }

    /// Set the connect/subscribe handshake timeout (default: 10 seconds).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the disconnect grace period (default: 5 seconds).
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = Some(timeout);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<ConnectionConfig, ConfigError> {
        let defaults = ConnectionConfig::default();
        let brokers = if self.brokers.is_empty() {
            defaults.brokers
        } else {
            self.brokers
        };

        let config = ConnectionConfig {
            brokers,
            client_id: self.client_id.unwrap_or(defaults.client_id),
            credentials: self.credentials,
            ssl: self.ssl,
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            drain_timeout: self.drain_timeout.unwrap_or(defaults.drain_timeout),
        };
        validate(&config)?;
        Ok(config)
    }
}

/// Raw shape of the layered configuration sources.
#[derive(Debug, Deserialize)]
struct ConnectionSettings {
    brokers: String,
    client_id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    sasl_mechanism: SaslMechanism,
    ssl: bool,
    connect_timeout_ms: u64,
    drain_timeout_ms: u64,
}

impl ConnectionSettings {
    fn into_config(self) -> Result<ConnectionConfig, ConfigError> {
        let credentials = match (self.username, self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                mechanism: self.sasl_mechanism,
                username,
                password,
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid(
                    "username and password must be set together".to_string(),
                ))
            }
        };

        let config = ConnectionConfig {
            brokers: split_brokers(&self.brokers).collect(),
            client_id: self.client_id,
            credentials,
            ssl: self.ssl,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
        };
        validate(&config)?;
        Ok(config)
    }
}

fn split_brokers(list: &str) -> impl Iterator<Item = String> + '_ {
    list.split(',')
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
}

fn validate(config: &ConnectionConfig) -> Result<(), ConfigError> {
    if config.brokers.is_empty() {
        return Err(ConfigError::Invalid("no brokers configured".to_string()));
    }
    if config.client_id.trim().is_empty() {
        return Err(ConfigError::Invalid("client id must not be empty".to_string()));
    }
    if config.connect_timeout.is_zero() {
        return Err(ConfigError::Invalid(
            "connect timeout must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
