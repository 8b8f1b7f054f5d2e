use crate::credential::CookieCredentials;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_URL: &str = "http://localhost:5000";
pub const DEFAULT_COOKIE_NAME: &str = "token";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
	#[error("unsupported url scheme in {0:?} (expected http, https, ws or wss)")]
	UnsupportedScheme(String),

	#[error("namespace must start with '/', got {0:?}")]
	InvalidNamespace(String),

	#[error("invalid value for {key}: {value:?}")]
	InvalidValue { key: &'static str, value: String },
}

/// Bounded fixed-delay reconnection for an established Connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
	pub enabled: bool,
	pub attempts: u32,
	pub delay: Duration,
}

impl Default for ReconnectConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			attempts: 5,
			delay: Duration::from_secs(1),
		}
	}
}

/// How often a missing credential is re-checked before giving up for the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRetry {
	pub attempts: u32,
	pub delay: Duration,
}

impl Default for CredentialRetry {
	fn default() -> Self {
		Self {
			attempts: 1,
			delay: Duration::from_secs(1),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
	/// Base url of the real-time server (http(s) or ws(s))
	pub url: String,
	pub path: String,
	pub namespace: String,
	/// Name of the session cookie carrying the credential
	pub cookie_name: String,
	pub reconnection: ReconnectConfig,
	pub credential_retry: CredentialRetry,
	pub handshake_timeout: Duration,
	/// Delay between the authentication notice and the login redirect
	pub auth_redirect_delay: Duration,
	pub login_path: String,
	pub command_buffer: usize,
}

impl Default for SocketConfig {
	fn default() -> Self {
		Self {
			url: DEFAULT_URL.to_string(),
			path: "/socket.io/".to_string(),
			namespace: "/".to_string(),
			cookie_name: DEFAULT_COOKIE_NAME.to_string(),
			reconnection: ReconnectConfig::default(),
			credential_retry: CredentialRetry::default(),
			handshake_timeout: Duration::from_secs(20),
			auth_redirect_delay: Duration::from_secs(2),
			login_path: "/login".to_string(),
			command_buffer: 64,
		}
	}
}

impl SocketConfig {
	pub fn new(url: impl Into<String>) -> Self {
		Self { url: url.into(), ..Self::default() }
	}

	/// Load configuration from `REALTIME_*` environment variables, falling back to defaults.
	pub fn from_env() -> Result<Self, ConfigError> {
		let defaults = Self::default();

		let config = Self {
			url: std::env::var("REALTIME_URL").ok().filter(|u| !u.trim().is_empty()).unwrap_or(defaults.url),
			path: std::env::var("REALTIME_PATH").unwrap_or(defaults.path),
			namespace: std::env::var("REALTIME_NAMESPACE").unwrap_or(defaults.namespace),
			cookie_name: std::env::var("REALTIME_COOKIE_NAME").unwrap_or(defaults.cookie_name),
			reconnection: ReconnectConfig {
				enabled: env_parse("REALTIME_RECONNECTION", defaults.reconnection.enabled)?,
				attempts: env_parse("REALTIME_RECONNECT_ATTEMPTS", defaults.reconnection.attempts)?,
				delay: env_millis("REALTIME_RECONNECT_DELAY_MS", defaults.reconnection.delay)?,
			},
			credential_retry: CredentialRetry {
				attempts: env_parse("REALTIME_CREDENTIAL_RECHECKS", defaults.credential_retry.attempts)?,
				delay: env_millis("REALTIME_CREDENTIAL_RECHECK_DELAY_MS", defaults.credential_retry.delay)?,
			},
			handshake_timeout: env_millis("REALTIME_HANDSHAKE_TIMEOUT_MS", defaults.handshake_timeout)?,
			auth_redirect_delay: env_millis("REALTIME_AUTH_REDIRECT_DELAY_MS", defaults.auth_redirect_delay)?,
			login_path: std::env::var("REALTIME_LOGIN_PATH").unwrap_or(defaults.login_path),
			command_buffer: defaults.command_buffer,
		};

		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		self.endpoint()?;

		if !self.namespace.starts_with('/') {
			return Err(ConfigError::InvalidNamespace(self.namespace.clone()));
		}
		if self.command_buffer == 0 {
			return Err(ConfigError::InvalidValue {
				key: "command_buffer",
				value: "0".to_string(),
			});
		}

		Ok(())
	}

	/// Cookie-file credential source reading this config's session cookie.
	pub fn cookie_credentials(&self, path: impl Into<PathBuf>) -> CookieCredentials {
		CookieCredentials::new(path, &self.cookie_name)
	}

	/// WebSocket endpoint for the Engine.IO v4 websocket transport.
	pub fn endpoint(&self) -> Result<String, ConfigError> {
		let base = self.url.trim().trim_end_matches('/');

		let ws_base = match base.split_once("://") {
			Some(("http" | "ws", rest)) => format!("ws://{rest}"),
			Some(("https" | "wss", rest)) => format!("wss://{rest}"),
			Some(_) => return Err(ConfigError::UnsupportedScheme(self.url.clone())),
			None => format!("ws://{base}"),
		};

		let path = format!("/{}/", self.path.trim_matches('/'));
		let path = if path == "//" { "/".to_string() } else { path };

		Ok(format!("{ws_base}{path}?EIO=4&transport=websocket"))
	}
}

fn env_parse<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
	match std::env::var(key) {
		Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue { key, value }),
		Err(_) => Ok(default),
	}
}

fn env_millis(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
	let millis = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
	env_parse(key, millis).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::credential::CredentialSource;

	#[test]
	fn test_defaults_match_documented_policy() {
		let config = SocketConfig::default();

		assert_eq!(config.url, DEFAULT_URL);
		assert_eq!(config.reconnection.attempts, 5);
		assert!(config.reconnection.enabled);
		assert_eq!(config.credential_retry.attempts, 1);
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_endpoint_maps_http_schemes_to_websocket() {
		let config = SocketConfig::new("http://api.example.com:5000/");
		assert_eq!(config.endpoint().unwrap(), "ws://api.example.com:5000/socket.io/?EIO=4&transport=websocket");

		let config = SocketConfig::new("https://api.example.com");
		assert_eq!(config.endpoint().unwrap(), "wss://api.example.com/socket.io/?EIO=4&transport=websocket");
	}

	#[test]
	fn test_endpoint_without_scheme_defaults_to_ws() {
		let config = SocketConfig::new("localhost:5000");
		assert_eq!(config.endpoint().unwrap(), "ws://localhost:5000/socket.io/?EIO=4&transport=websocket");
	}

	#[test]
	fn test_endpoint_respects_custom_path() {
		let config = SocketConfig {
			path: "realtime".to_string(),
			..SocketConfig::new("wss://chat.example.com")
		};
		assert_eq!(config.endpoint().unwrap(), "wss://chat.example.com/realtime/?EIO=4&transport=websocket");
	}

	#[test]
	fn test_unsupported_scheme_is_rejected() {
		let config = SocketConfig::new("ftp://example.com");
		assert!(matches!(config.endpoint(), Err(ConfigError::UnsupportedScheme(_))));
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_namespace_must_be_absolute() {
		let config = SocketConfig {
			namespace: "support".to_string(),
			..SocketConfig::default()
		};
		assert_eq!(config.validate(), Err(ConfigError::InvalidNamespace("support".to_string())));
	}

	// Single test so no other test observes the REALTIME_* variables mid-change
	#[test]
	fn test_from_env_overrides_and_rejects_bad_values() {
		std::env::set_var("REALTIME_URL", "https://chat.example.com");
		std::env::set_var("REALTIME_COOKIE_NAME", "session");
		std::env::set_var("REALTIME_RECONNECT_ATTEMPTS", "3");
		std::env::set_var("REALTIME_RECONNECT_DELAY_MS", "250");
		std::env::set_var("REALTIME_RECONNECTION", "false");

		let config = SocketConfig::from_env().unwrap();
		assert_eq!(config.url, "https://chat.example.com");
		assert_eq!(config.cookie_name, "session");
		assert_eq!(config.reconnection.attempts, 3);
		assert_eq!(config.reconnection.delay, Duration::from_millis(250));
		assert!(!config.reconnection.enabled);
		assert_eq!(config.handshake_timeout, Duration::from_secs(20), "unset keys keep defaults");

		std::env::set_var("REALTIME_RECONNECT_ATTEMPTS", "five");
		assert_eq!(
			SocketConfig::from_env().unwrap_err(),
			ConfigError::InvalidValue {
				key: "REALTIME_RECONNECT_ATTEMPTS",
				value: "five".to_string(),
			}
		);

		std::env::set_var("REALTIME_RECONNECT_ATTEMPTS", "3");
		std::env::set_var("REALTIME_NAMESPACE", "chat");
		assert!(matches!(SocketConfig::from_env(), Err(ConfigError::InvalidNamespace(_))));

		for key in ["REALTIME_URL", "REALTIME_COOKIE_NAME", "REALTIME_RECONNECT_ATTEMPTS", "REALTIME_RECONNECT_DELAY_MS", "REALTIME_RECONNECTION", "REALTIME_NAMESPACE"] {
			std::env::remove_var(key);
		}
	}

	#[test]
	fn test_cookie_credentials_use_configured_cookie_name() {
		let path = std::env::temp_dir().join(format!("realtime-config-{}.txt", uuid::Uuid::new_v4()));
		std::fs::write(&path, "token=wrong; session=right").unwrap();

		let config = SocketConfig {
			cookie_name: "session".to_string(),
			..SocketConfig::default()
		};
		let credential = config.cookie_credentials(&path).credential();
		std::fs::remove_file(&path).unwrap();

		assert_eq!(credential.unwrap().expose(), "right");
	}
}
