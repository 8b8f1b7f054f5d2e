use crate::config::{CredentialRetry, ReconnectConfig};
use std::time::Duration;

/// Fixed-delay retry with a hard attempt cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedRetry {
	max_attempts: u32,
	delay: Duration,
	attempts: u32,
}

impl BoundedRetry {
	pub const fn new(max_attempts: u32, delay: Duration) -> Self {
		Self {
			max_attempts,
			delay,
			attempts: 0,
		}
	}

	/// Consume one attempt. `None` once the budget is spent.
	pub fn next_delay(&mut self) -> Option<Duration> {
		if self.attempts >= self.max_attempts {
			return None;
		}
		self.attempts += 1;
		Some(self.delay)
	}

	pub const fn attempts(&self) -> u32 {
		self.attempts
	}

	pub const fn max_attempts(&self) -> u32 {
		self.max_attempts
	}

	pub const fn is_exhausted(&self) -> bool {
		self.attempts >= self.max_attempts
	}

	pub fn reset(&mut self) {
		self.attempts = 0;
	}
}

impl From<&ReconnectConfig> for BoundedRetry {
	fn from(config: &ReconnectConfig) -> Self {
		let attempts = if config.enabled { config.attempts } else { 0 };
		Self::new(attempts, config.delay)
	}
}

impl From<&CredentialRetry> for BoundedRetry {
	fn from(config: &CredentialRetry) -> Self {
		Self::new(config.attempts, config.delay)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_budget_is_bounded() {
		let mut retry = BoundedRetry::new(3, Duration::from_millis(500));

		for _ in 0..3 {
			assert_eq!(retry.next_delay(), Some(Duration::from_millis(500)));
		}
		assert_eq!(retry.next_delay(), None);
		assert_eq!(retry.attempts(), 3);
		assert!(retry.is_exhausted());
	}

	#[test]
	fn test_reset_restores_budget() {
		let mut retry = BoundedRetry::new(1, Duration::from_secs(1));
		assert!(retry.next_delay().is_some());
		assert!(retry.next_delay().is_none());

		retry.reset();
		assert!(!retry.is_exhausted());
		assert!(retry.next_delay().is_some());
	}

	#[test]
	fn test_disabled_reconnection_has_no_budget() {
		let config = ReconnectConfig {
			enabled: false,
			..ReconnectConfig::default()
		};
		let mut retry = BoundedRetry::from(&config);
		assert_eq!(retry.next_delay(), None);
	}
}
