//! Configuration manager for the buoy command API.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding the provider connection string.
pub const CONNECTION_STRING_ENV: &str = "ACS_CONNECTION_STRING";
/// Environment variable overriding the sender address.
pub const SENDER_EMAIL_ENV: &str = "SENDER_EMAIL";
/// Environment variable overriding the listening port.
pub const PORT_ENV: &str = "PORT";

pub const DEFAULT_SENDER_EMAIL: &str =
    "donotreply@your-verified-domain.azurecomm.net";

/// Errors preventing the service from starting.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error("Azure Communication Services connection string is not configured")]
    MissingConnectionString,
    #[error("invalid connection string: {0}")]
    ConnectionString(String),
    #[error("invalid value for `{key}`: {value}")]
    Env { key: &'static str, value: String },
    #[error(
        "request timeout ({request}s) must exceed delivery timeout ({delivery}s)"
    )]
    Timeout { request: u64, delivery: u64 },
    #[error("cannot create email client: {0}")]
    Provider(#[from] crate::mail::MailError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Service name.
    pub name: String,
    /// Interface to listen on.
    pub address: String,
    pub port: u16,
    /// Origins allowed to call the API from a browser.
    pub cors: Vec<String>,
    /// Related to email delivery.
    pub email: Email,
    /// Maximum time to answer a request, in seconds.
    pub request_timeout: u64,
    /// Expose Prometheus metrics on `/metrics`.
    pub metrics: bool,
    version: String,
    #[serde(skip)]
    path: PathBuf,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: "Buoy Command API".into(),
            address: "0.0.0.0".into(),
            port: 8080,
            cors: vec![
                "http://localhost:3000".into(),
                "https://zealous-water-0d99f0a0f.2.azurestaticapps.net".into(),
            ],
            email: Email::default(),
            request_timeout: 90,
            metrics: true,
            version: VERSION.to_owned(),
            path: PathBuf::default(),
        }
    }
}

/// Email provider configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Email {
    /// `endpoint=...;accesskey=...` connection string.
    #[serde(skip_serializing)]
    pub connection_string: Option<String>,
    /// Address emails are sent from.
    pub sender_email: String,
    /// Maximum wait for the provider, in seconds.
    pub delivery_timeout: u64,
    /// Delay between two status checks, in milliseconds.
    pub poll_interval: u64,
}

impl Default for Email {
    fn default() -> Self {
        Self {
            connection_string: None,
            sender_email: DEFAULT_SENDER_EMAIL.into(),
            delivery_timeout: 60,
            poll_interval: 1_000,
        }
    }
}

impl Email {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval)
    }
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Turn an origin into its serialized `scheme://host[:port]` form.
    fn normalize_origin(&self, origin: &str) -> Result<String, ConfigError> {
        let origin_with_scheme =
            if origin.starts_with("http://") || origin.starts_with("https://") {
                origin.to_string()
            } else {
                format!("https://{origin}")
            };

        let parsed_url = Url::parse(&origin_with_scheme)?;
        Ok(parsed_url.origin().ascii_serialization())
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(cs) = lookup(CONNECTION_STRING_ENV).filter(|v| !v.is_empty()) {
            self.email.connection_string = Some(cs);
        }
        if let Some(sender) = lookup(SENDER_EMAIL_ENV).filter(|v| !v.is_empty()) {
            self.email.sender_email = sender;
        }
        if let Some(port) = lookup(PORT_ENV) {
            self.port = port.parse().map_err(|_| ConfigError::Env {
                key: PORT_ENV,
                value: port,
            })?;
        }

        Ok(self)
    }

    /// Finish a freshly loaded configuration.
    fn finalize(mut self) -> Result<Self, ConfigError> {
        self.version = VERSION.to_owned();
        self.cors = self
            .cors
            .iter()
            .map(|origin| self.normalize_origin(origin))
            .collect::<Result<_, _>>()?;

        // A request cut short by the HTTP timeout gets no outcome body.
        if self.request_timeout <= self.email.delivery_timeout {
            return Err(ConfigError::Timeout {
                request: self.request_timeout,
                delivery: self.email.delivery_timeout,
            });
        }

        Ok(self)
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location, then applies environment overrides.
    pub fn read(self) -> Result<Arc<Self>, ConfigError> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        let config = match File::open(file_path) {
            Ok(file) => match serde_yaml::from_reader(file) {
                Ok(config) => config,
                Err(err) => self.error(err),
            },
            Err(err) => self.error(err),
        };

        let config = config
            .apply_env(|key| std::env::var(key).ok())?
            .finalize()?;

        Ok(Arc::new(config))
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found or invalid");
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Configuration::default().finalize().unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.email.sender_email, DEFAULT_SENDER_EMAIL);
        assert_eq!(config.email.connection_string, None);
        assert_eq!(config.email.delivery_timeout(), Duration::from_secs(60));
        assert_eq!(
            config.cors,
            vec![
                "http://localhost:3000",
                "https://zealous-water-0d99f0a0f.2.azurestaticapps.net",
            ]
        );
        assert_eq!(config.version(), VERSION);
    }

    #[test]
    fn test_yaml() {
        let config: Configuration = serde_yaml::from_str(
            r#"
port: 9000
cors:
  - example.com
  - http://localhost:3000/
email:
  connection_string: endpoint=https://acs.example.com;accesskey=c2VjcmV0
  delivery_timeout: 10
"#,
        )
        .unwrap();
        let config = config.finalize().unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.name, "Buoy Command API");
        assert_eq!(config.cors, vec!["https://example.com", "http://localhost:3000"]);
        assert_eq!(config.email.delivery_timeout, 10);
        assert_eq!(config.email.poll_interval, 1_000);
        assert_eq!(config.email.sender_email, DEFAULT_SENDER_EMAIL);
        assert!(config.email.connection_string.is_some());

        // Secrets never leave the process.
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("accesskey"));
    }

    #[test]
    fn test_env_overrides() {
        let config = Configuration::default()
            .apply_env(env(&[
                (CONNECTION_STRING_ENV, "endpoint=https://x;accesskey=eA=="),
                (SENDER_EMAIL_ENV, "buoy@example.com"),
                (PORT_ENV, "1234"),
            ]))
            .unwrap();

        assert_eq!(
            config.email.connection_string.as_deref(),
            Some("endpoint=https://x;accesskey=eA==")
        );
        assert_eq!(config.email.sender_email, "buoy@example.com");
        assert_eq!(config.port, 1234);

        // Empty values are ignored.
        let config = Configuration::default()
            .apply_env(env(&[(SENDER_EMAIL_ENV, "")]))
            .unwrap();
        assert_eq!(config.email.sender_email, DEFAULT_SENDER_EMAIL);

        assert!(matches!(
            Configuration::default().apply_env(env(&[(PORT_ENV, "http")])),
            Err(ConfigError::Env { key: PORT_ENV, .. })
        ));
    }

    #[test]
    fn test_request_timeout_exceeds_delivery() {
        let mut config = Configuration::default();
        config.request_timeout = 60;
        assert!(matches!(
            config.finalize(),
            Err(ConfigError::Timeout {
                request: 60,
                delivery: 60
            })
        ));

        let config: Configuration = serde_yaml::from_str(
            r#"
request_timeout: 1
email:
  delivery_timeout: 5
"#,
        )
        .unwrap();
        assert!(config.finalize().is_err());

        let mut config = Configuration::default();
        config.request_timeout = 11;
        config.email.delivery_timeout = 10;
        assert!(config.finalize().is_ok());
    }

    #[test]
    fn test_invalid_origin() {
        let config = Configuration {
            cors: vec!["http://[::1".into()],
            ..Default::default()
        };
        assert!(config.finalize().is_err());
    }
}
