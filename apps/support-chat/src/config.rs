use clap::Parser;
use realtime_socket::{ConfigError, SocketConfig, DEFAULT_COOKIE_NAME, DEFAULT_URL};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Clone, Debug, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
pub struct Config {
	/// Use JSON formatting for tracing
	#[arg(long, env = "LOG_JSON", default_value = "false")]
	pub log_json: bool,

	/// Log filter directives
	#[arg(long, env = "RUST_LOG", default_value = "support_chat=info,realtime_socket=info")]
	pub rust_log: String,

	/// Base url of the real-time server
	#[arg(long, env = "REALTIME_URL", default_value = DEFAULT_URL)]
	pub url: String,

	/// Socket.IO namespace
	#[arg(long, env = "REALTIME_NAMESPACE", default_value = "/")]
	pub namespace: String,

	/// Session token, takes precedence over the cookie file
	#[arg(long, env = "CHAT_TOKEN", hide_env_values = true)]
	pub token: Option<String>,

	/// Cookie jar or cookie header file holding the session cookie
	#[arg(long, env = "CHAT_COOKIE_FILE")]
	pub cookie_file: Option<PathBuf>,

	/// Name of the session cookie
	#[arg(long, env = "REALTIME_COOKIE_NAME", default_value = DEFAULT_COOKIE_NAME)]
	pub cookie_name: String,

	/// Support room to join
	#[arg(long, env = "CHAT_ROOM", default_value = "support")]
	pub room: String,

	/// Display name sent with each message
	#[arg(long, env = "CHAT_SENDER")]
	pub sender: Option<String>,

	#[arg(long, env = "REALTIME_RECONNECT_ATTEMPTS", default_value = "5")]
	pub reconnect_attempts: u32,

	#[arg(long, env = "REALTIME_RECONNECT_DELAY_MS", default_value = "1000")]
	pub reconnect_delay_ms: u64,

	/// Where the user is sent after the session is rejected
	#[arg(long, env = "REALTIME_LOGIN_PATH", default_value = "/login")]
	pub login_path: String,
}

impl Config {
	pub fn socket_config(&self) -> Result<SocketConfig, ConfigError> {
		let mut socket = SocketConfig::new(&self.url);
		socket.namespace.clone_from(&self.namespace);
		socket.cookie_name.clone_from(&self.cookie_name);
		socket.login_path.clone_from(&self.login_path);
		socket.reconnection.attempts = self.reconnect_attempts;
		socket.reconnection.delay = Duration::from_millis(self.reconnect_delay_ms);

		socket.validate()?;
		Ok(socket)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults_map_onto_socket_config() {
		let config = Config::parse_from(["support-chat", "--url", "https://chat.example.com", "--reconnect-attempts", "3"]);
		let socket = config.socket_config().unwrap();

		assert_eq!(socket.url, "https://chat.example.com");
		assert_eq!(socket.reconnection.attempts, 3);
		assert_eq!(socket.reconnection.delay, Duration::from_secs(1));
		assert_eq!(config.room, "support");
	}

	#[test]
	fn test_bad_namespace_is_rejected() {
		let config = Config::parse_from(["support-chat", "--namespace", "chat"]);
		assert!(matches!(config.socket_config(), Err(ConfigError::InvalidNamespace(_))));
	}
}
