//! Configuration and environment selection.
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};
use thiserror::Error;

/// KSeF environment selection for API endpoints.
/// - Test: the public test environment, invoices have no legal effect.
/// - Demo: the pre-production environment, mirrors production behaviour.
/// - Production: the live environment.
/// # Examples
/// ```rust
/// use std::str::FromStr;
/// use ksef_core::config::Environment;
///
/// let env = Environment::from_str("demo")?;
/// assert_eq!(env, Environment::Demo);
/// # Ok::<(), ksef_core::config::ConfigParseError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Test,
    Demo,
    Production,
}

/// Error returned when parsing configuration values from strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigParseError {
    #[error("invalid environment: {input}")]
    Environment { input: String },
    #[error("invalid document version: {input}")]
    DocumentVersion { input: String },
}

impl FromStr for Environment {
    type Err = ConfigParseError;
    fn from_str(env: &str) -> Result<Environment, ConfigParseError> {
        match env.to_ascii_lowercase().as_str() {
            "test" | "te" => Ok(Environment::Test),
            "demo" | "tr" => Ok(Environment::Demo),
            "production" | "prd" => Ok(Environment::Production),
            _ => Err(ConfigParseError::Environment {
                input: env.to_string(),
            }),
        }
    }
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Test => "test",
            Environment::Demo => "demo",
            Environment::Production => "production",
        }
    }

    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Test => "https://ksef-test.mf.gov.pl",
            Environment::Demo => "https://ksef-demo.mf.gov.pl",
            Environment::Production => "https://ksef.mf.gov.pl",
        }
    }
}

/// Structured invoice schema version preferred by the tenant.
///
/// Both versions produce the same document structure and the same
/// `FA (2)` system code; the platform tells them apart by validity dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DocumentVersion {
    #[default]
    #[serde(rename = "FA2")]
    Fa2,
    #[serde(rename = "FA3")]
    Fa3,
}

impl FromStr for DocumentVersion {
    type Err = ConfigParseError;
    fn from_str(value: &str) -> Result<Self, ConfigParseError> {
        let normalized: String = value
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "fa2" | "v2" => Ok(DocumentVersion::Fa2),
            "fa3" | "v3" => Ok(DocumentVersion::Fa3),
            _ => Err(ConfigParseError::DocumentVersion {
                input: value.to_string(),
            }),
        }
    }
}

impl DocumentVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentVersion::Fa2 => "FA2",
            DocumentVersion::Fa3 => "FA3",
        }
    }
}

/// Bounded retry policy for the authentication confirmation poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval: Duration::from_secs(1),
        }
    }
}

/// Whether access tokens are reused across submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TokenPolicy {
    /// Run the full handshake for every submission.
    #[default]
    Reauthenticate,
    /// Keep the redeemed token while it stays valid for longer than `margin`.
    ReuseUntilExpiry {
        #[serde(with = "millis")]
        margin: Duration,
    },
}

/// Per-tenant client configuration.
///
/// # Examples
/// ```rust
/// use ksef_core::config::{Config, Environment};
///
/// let config = Config::new(Environment::Test, "20251209-EC-ABC|nip-1234567890|XYZ");
/// assert_eq!(config.base_url(), "https://ksef-test.mf.gov.pl");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    env: Environment,
    #[serde(default)]
    base_url: Option<String>,
    ksef_token: String,
    #[serde(default)]
    document_version: DocumentVersion,
    #[serde(default = "default_timeout", with = "millis")]
    http_timeout: Duration,
    #[serde(default)]
    poll: PollPolicy,
    #[serde(default)]
    token_policy: TokenPolicy,
    #[serde(default = "default_status_delay", with = "millis")]
    status_delay: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_status_delay() -> Duration {
    Duration::from_secs(2)
}

impl Config {
    pub fn new(env: Environment, ksef_token: impl Into<String>) -> Self {
        Self {
            env,
            base_url: None,
            ksef_token: ksef_token.into(),
            document_version: DocumentVersion::default(),
            http_timeout: default_timeout(),
            poll: PollPolicy::default(),
            token_policy: TokenPolicy::default(),
            status_delay: default_status_delay(),
        }
    }

    /// Point the client at a different host, e.g. a mock server.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_document_version(mut self, version: DocumentVersion) -> Self {
        self.document_version = version;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_token_policy(mut self, policy: TokenPolicy) -> Self {
        self.token_policy = policy;
        self
    }

    pub fn with_status_delay(mut self, delay: Duration) -> Self {
        self.status_delay = delay;
        self
    }

    pub fn env(&self) -> Environment {
        self.env
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.env.base_url())
            .trim_end_matches('/')
    }

    pub fn ksef_token(&self) -> &str {
        &self.ksef_token
    }

    pub fn document_version(&self) -> DocumentVersion {
        self.document_version
    }

    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    pub fn poll(&self) -> PollPolicy {
        self.poll
    }

    pub fn token_policy(&self) -> TokenPolicy {
        self.token_policy
    }

    /// Pause between sending an invoice and asking for its status.
    pub fn status_delay(&self) -> Duration {
        self.status_delay
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S>(value: &Duration, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_aliases() {
        assert_eq!(Environment::from_str("TE").unwrap(), Environment::Test);
        assert_eq!(Environment::from_str("tr").unwrap(), Environment::Demo);
        assert_eq!(
            Environment::from_str("Production").unwrap(),
            Environment::Production
        );
        assert!(matches!(
            Environment::from_str("staging"),
            Err(ConfigParseError::Environment { .. })
        ));
    }

    #[test]
    fn document_version_parses_loose_spellings() {
        assert_eq!(DocumentVersion::from_str("FA2").unwrap(), DocumentVersion::Fa2);
        assert_eq!(DocumentVersion::from_str("fa(3)").unwrap(), DocumentVersion::Fa3);
        assert_eq!(DocumentVersion::from_str("v3").unwrap(), DocumentVersion::Fa3);
        assert!(DocumentVersion::from_str("fa4").is_err());
    }

    #[test]
    fn base_url_override_drops_trailing_slash() {
        let config = Config::new(Environment::Production, "token")
            .with_base_url("http://127.0.0.1:8080/");
        assert_eq!(config.base_url(), "http://127.0.0.1:8080");

        let config = Config::new(Environment::Demo, "token");
        assert_eq!(config.base_url(), "https://ksef-demo.mf.gov.pl");
    }

    #[test]
    fn defaults_match_platform_cadence() {
        let config = Config::new(Environment::Test, "token");
        assert_eq!(config.poll().max_attempts, 30);
        assert_eq!(config.poll().interval, Duration::from_secs(1));
        assert_eq!(config.http_timeout(), Duration::from_secs(60));
        assert_eq!(config.token_policy(), TokenPolicy::Reauthenticate);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let json = r#"{
            "env": "demo",
            "ksef_token": "a|nip-1|b",
            "document_version": "FA3",
            "token_policy": { "mode": "reuse_until_expiry", "margin": 60000 }
        }"#;
        let config: Config = serde_json::from_str(json).expect("config");
        assert_eq!(config.env(), Environment::Demo);
        assert_eq!(config.document_version(), DocumentVersion::Fa3);
        assert_eq!(config.http_timeout(), Duration::from_secs(60));
        assert_eq!(
            config.token_policy(),
            TokenPolicy::ReuseUntilExpiry {
                margin: Duration::from_secs(60)
            }
        );
    }
}
