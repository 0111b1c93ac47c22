#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Conflict: {0}")]
	Conflict(String),
	#[error("Stored vectors have {actual} dimensions but {expected} are configured.")]
	DimensionMismatch { expected: u32, actual: u32 },
	#[error("Corrupt row: {0}")]
	Corrupt(String),
}

impl From<kb_domain::Error> for Error {
	fn from(err: kb_domain::Error) -> Self {
		Self::Corrupt(err.to_string())
	}
}
