use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
	#[error("No session credential found; sign in first")]
	NoCredential,

	#[error("Session rejected by the server")]
	SessionRejected,

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}
