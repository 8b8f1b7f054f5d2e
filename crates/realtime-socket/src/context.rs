//! Process-wide access point for the shared manager.

use crate::manager::SocketManager;
use crate::{RealtimeError, Result};
use once_cell::sync::OnceCell;
use std::sync::Arc;

static MANAGER: OnceCell<Arc<SocketManager>> = OnceCell::new();

/// Make `manager` reachable from anywhere in the process. Only the first call wins.
pub fn install(manager: Arc<SocketManager>) -> Result<()> {
	MANAGER.set(manager).map_err(|_| RealtimeError::AlreadyInstalled)
}

pub fn global() -> Option<Arc<SocketManager>> {
	MANAGER.get().cloned()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::SocketConfig;
	use crate::credential::SharedCredential;

	#[test]
	fn test_install_only_once() {
		let first = SocketManager::builder(SocketConfig::default(), SharedCredential::new()).build().unwrap();
		let second = SocketManager::builder(SocketConfig::default(), SharedCredential::new()).build().unwrap();

		install(Arc::clone(&first)).unwrap();
		assert!(matches!(install(second), Err(RealtimeError::AlreadyInstalled)));
		assert!(Arc::ptr_eq(&global().unwrap(), &first));
	}
}
