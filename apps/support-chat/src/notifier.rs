use realtime_socket::{Notice, SessionNotifier};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Prints notices to the terminal. A login redirect ends the chat session.
#[derive(Debug, Clone)]
pub struct ConsoleNotifier {
	shutdown: CancellationToken,
}

impl ConsoleNotifier {
	pub const fn new(shutdown: CancellationToken) -> Self {
		Self { shutdown }
	}
}

impl SessionNotifier for ConsoleNotifier {
	fn notify(&self, notice: Notice) {
		eprintln!("!! {notice}");
	}

	fn redirect_to_login(&self, login_path: &str) {
		warn!(%login_path, "session rejected, leaving chat");
		eprintln!("!! Sign in again at {login_path}");
		self.shutdown.cancel();
	}
}
