mod chat;
mod config;
mod error;
mod notifier;

use anyhow::Context;
use chat::ChatClient;
use clap::Parser;
use config::Config;
use notifier::ConsoleNotifier;
use realtime_socket::{CookieCredentials, Credential, CredentialSource, SharedCredential, SocketConfig, SocketManager};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, fmt::format::JsonFields, layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Where the session token comes from: `--token`/`CHAT_TOKEN` first, then the cookie file.
enum SessionCredentials {
	Token(SharedCredential),
	Cookie(CookieCredentials),
}

impl SessionCredentials {
	fn from_config(config: &Config, socket: &SocketConfig) -> Self {
		match (&config.token, &config.cookie_file) {
			(None, Some(path)) => Self::Cookie(socket.cookie_credentials(path)),
			(token, _) => Self::Token(token.as_deref().map_or_else(SharedCredential::new, SharedCredential::with_token)),
		}
	}
}

impl CredentialSource for SessionCredentials {
	fn credential(&self) -> Option<Credential> {
		match self {
			Self::Token(source) => source.credential(),
			Self::Cookie(source) => source.credential(),
		}
	}
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
	let filter = EnvFilter::from_str(&config.rust_log).context("invalid log filter")?;

	tracing_subscriber::registry()
		.with(if config.log_json {
			Box::new(
				tracing_subscriber::fmt::layer()
					.with_writer(std::io::stderr)
					.fmt_fields(JsonFields::default())
					.event_format(tracing_subscriber::fmt::format().json().flatten_event(true).with_span_list(false))
					.with_filter(filter),
			) as Box<dyn Layer<_> + Send + Sync>
		} else {
			Box::new(
				tracing_subscriber::fmt::layer()
					.with_writer(std::io::stderr)
					.event_format(tracing_subscriber::fmt::format().pretty())
					.with_filter(filter),
			)
		})
		.init();

	Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	dotenv::dotenv().ok();
	let config = Config::parse();
	init_tracing(&config)?;

	let shutdown = CancellationToken::new();
	let socket = config.socket_config()?;
	let credentials = SessionCredentials::from_config(&config, &socket);
	let manager = SocketManager::builder(socket, credentials)
		.notifier(ConsoleNotifier::new(shutdown.clone()))
		.build()?;
	realtime_socket::install(Arc::clone(&manager))?;
	info!(url = %config.url, room = %config.room, "starting support chat");

	let ctrl_c = shutdown.clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			ctrl_c.cancel();
		}
	});

	let client = ChatClient::new(manager, config.room, config.sender, shutdown);
	let outcome = client.run(BufReader::new(tokio::io::stdin())).await;

	// a blocked stdin read cannot be cancelled and would hold the runtime open
	match outcome {
		Ok(()) => std::process::exit(0),
		Err(e) => {
			error!(error = %e, "support chat ended");
			eprintln!("{e}");
			std::process::exit(1)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_token_takes_precedence_over_cookie_file() {
		let config = Config::parse_from(["support-chat", "--token", "abc", "--cookie-file", "/nonexistent/cookies.txt"]);
		let socket = config.socket_config().unwrap();
		let credentials = SessionCredentials::from_config(&config, &socket);

		assert!(matches!(credentials, SessionCredentials::Token(_)));
		assert_eq!(credentials.credential().unwrap().expose(), "abc");
	}

	#[test]
	fn test_cookie_file_uses_configured_cookie_name() {
		let path = std::env::temp_dir().join(format!("support-chat-cookies-{}.txt", std::process::id()));
		std::fs::write(&path, "token=other; chat_session=from-cookie").unwrap();

		let config = Config::parse_from(["support-chat", "--cookie-file", path.to_str().unwrap(), "--cookie-name", "chat_session"]);
		let socket = config.socket_config().unwrap();
		let credential = SessionCredentials::from_config(&config, &socket).credential();
		std::fs::remove_file(&path).unwrap();

		assert_eq!(credential.unwrap().expose(), "from-cookie");
	}
}
