//! Read-only access to the session credential.
//!
//! Sources are consulted on every check, so a token written to storage after
//! startup is picked up by the next lookup.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, trace};

/// Opaque session token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
	/// Returns `None` for blank tokens.
	pub fn new(token: impl Into<String>) -> Option<Self> {
		let token = token.into();
		let trimmed = token.trim();
		if trimmed.is_empty() {
			None
		} else if trimmed.len() == token.len() {
			Some(Self(token))
		} else {
			Some(Self(trimmed.to_string()))
		}
	}

	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for Credential {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("Credential(<redacted>)")
	}
}

impl fmt::Display for Credential {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

pub trait CredentialSource: Send + Sync + 'static {
	fn credential(&self) -> Option<Credential>;
}

/// Reads a named cookie from a cookie file.
///
/// The file may be a Netscape cookie jar (as written by curl or browser
/// exporters) or a single `Cookie:` header value such as `a=b; token=xyz`.
#[derive(Debug, Clone)]
pub struct CookieCredentials {
	path: PathBuf,
	cookie_name: String,
}

impl CookieCredentials {
	pub fn new(path: impl Into<PathBuf>, cookie_name: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			cookie_name: cookie_name.into(),
		}
	}
}

impl CredentialSource for CookieCredentials {
	fn credential(&self) -> Option<Credential> {
		let contents = match std::fs::read_to_string(&self.path) {
			Ok(contents) => contents,
			Err(e) => {
				debug!(path = %self.path.display(), error = %e, "cookie file not readable");
				return None;
			}
		};

		let value = find_cookie(&contents, &self.cookie_name);
		trace!(cookie = %self.cookie_name, found = value.is_some(), "cookie lookup");
		value.and_then(Credential::new)
	}
}

/// Reads the credential from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
	key: String,
}

impl EnvCredentials {
	pub fn new(key: impl Into<String>) -> Self {
		Self { key: key.into() }
	}
}

impl CredentialSource for EnvCredentials {
	fn credential(&self) -> Option<Credential> {
		std::env::var(&self.key).ok().and_then(Credential::new)
	}
}

/// Settable credential slot shared between a writer and the manager.
#[derive(Debug, Clone, Default)]
pub struct SharedCredential {
	inner: Arc<RwLock<Option<Credential>>>,
}

impl SharedCredential {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_token(token: impl Into<String>) -> Self {
		let shared = Self::new();
		shared.set(token);
		shared
	}

	pub fn set(&self, token: impl Into<String>) {
		*self.inner.write().unwrap_or_else(PoisonError::into_inner) = Credential::new(token);
	}

	pub fn clear(&self) {
		*self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
	}
}

impl CredentialSource for SharedCredential {
	fn credential(&self) -> Option<Credential> {
		self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
	}
}

/// Find `name` in either cookie-jar or header form.
pub fn find_cookie(contents: &str, name: &str) -> Option<String> {
	let mut header_lines = Vec::new();

	for line in contents.lines() {
		let line = line.trim_end_matches('\r');
		let line = line.strip_prefix("#HttpOnly_").unwrap_or(line);
		if line.trim().is_empty() || line.starts_with('#') {
			continue;
		}

		let fields: Vec<&str> = line.split('\t').collect();
		if fields.len() == 7 {
			if fields[5] == name {
				return Some(fields[6].trim().to_string());
			}
			continue;
		}

		header_lines.push(line);
	}

	header_lines.into_iter().find_map(|line| {
		let line = line.trim();
		let line = line.strip_prefix("Cookie:").or_else(|| line.strip_prefix("cookie:")).unwrap_or(line);
		line.split(';').find_map(|pair| {
			let (key, value) = pair.split_once('=')?;
			(key.trim() == name).then(|| value.trim().trim_matches('"').to_string())
		})
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn test_blank_token_is_not_a_credential() {
		assert!(Credential::new("").is_none());
		assert!(Credential::new("   ").is_none());
		assert_eq!(Credential::new(" abc ").unwrap().expose(), "abc");
	}

	#[test]
	fn test_credential_debug_is_redacted() {
		let credential = Credential::new("super-secret").unwrap();
		assert!(!format!("{credential:?}").contains("super-secret"));
		assert!(!credential.to_string().contains("super-secret"));
	}

	#[test]
	fn test_find_cookie_in_header_form() {
		let header = "theme=dark; token=abc.def.ghi; lang=en";
		assert_eq!(find_cookie(header, "token").as_deref(), Some("abc.def.ghi"));
		assert_eq!(find_cookie("Cookie: token=\"quoted\"", "token").as_deref(), Some("quoted"));
		assert_eq!(find_cookie(header, "missing"), None);
	}

	#[test]
	fn test_find_cookie_in_netscape_jar() {
		let jar = "# Netscape HTTP Cookie File\n\
			admin.example.com\tFALSE\t/\tFALSE\t0\ttheme\tdark\n\
			#HttpOnly_admin.example.com\tFALSE\t/\tTRUE\t0\ttoken\tjar-token\n";
		assert_eq!(find_cookie(jar, "token").as_deref(), Some("jar-token"));
		assert_eq!(find_cookie(jar, "theme").as_deref(), Some("dark"));
	}

	#[test]
	fn test_cookie_name_is_not_a_prefix_match() {
		assert_eq!(find_cookie("tokenized=1; token=2", "token").as_deref(), Some("2"));
	}

	#[test]
	fn test_cookie_file_is_reread_on_every_lookup() {
		let path = std::env::temp_dir().join(format!("realtime-socket-cookie-{}", uuid::Uuid::new_v4()));
		let source = CookieCredentials::new(&path, "token");

		assert!(source.credential().is_none(), "missing file means no credential");

		std::fs::File::create(&path).unwrap().write_all(b"token=").unwrap();
		assert!(source.credential().is_none(), "empty cookie value means no credential");

		std::fs::write(&path, "token=late-arrival").unwrap();
		assert_eq!(source.credential().unwrap().expose(), "late-arrival");

		std::fs::remove_file(&path).unwrap();
	}

	#[test]
	fn test_shared_credential_set_and_clear() {
		let shared = SharedCredential::new();
		assert!(shared.credential().is_none());

		let writer = shared.clone();
		writer.set("abc");
		assert_eq!(shared.credential().unwrap().expose(), "abc");

		writer.clear();
		assert!(shared.credential().is_none());
	}

	#[test]
	fn test_env_credentials_read_named_variable() {
		let key = format!("REALTIME_SOCKET_TEST_TOKEN_{}", uuid::Uuid::new_v4().simple());
		let source = EnvCredentials::new(key.as_str());
		assert!(source.credential().is_none());

		std::env::set_var(&key, "from-env");
		assert_eq!(source.credential().unwrap().expose(), "from-env");

		std::env::set_var(&key, "  ");
		assert!(source.credential().is_none(), "blank values are not credentials");
		std::env::remove_var(&key);
	}
}
