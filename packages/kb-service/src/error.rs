use kb_domain::document::{DocumentStatus, IngestErrorCode};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid scope owners: {message}")]
	InvalidScopeOwners { message: String },
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Forbidden: {message}")]
	Forbidden { message: String },
	#[error("Conflict: {message}")]
	Conflict { message: String },
	#[error("Invalid transition from {from} to {to}.")]
	InvalidTransition { from: DocumentStatus, to: DocumentStatus },
	#[error("Payload too large: {size} bytes exceeds the {limit} byte limit.")]
	PayloadTooLarge { size: u64, limit: u64 },
	#[error("Blob unavailable: {message}")]
	BlobUnavailable { message: String },
	#[error("Unsupported format: {message}")]
	UnsupportedFormat { message: String },
	#[error("Embedding provider error: {message}")]
	EmbeddingProvider { message: String },
	#[error("Embedding dimension {actual} does not match the configured {expected}.")]
	DimensionMismatch { expected: u32, actual: u32 },
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl Error {
	/// The refusal every access check surfaces. Denial reasons stay in the logs.
	pub fn not_accessible() -> Self {
		Self::Forbidden { message: "Knowledge base is not accessible.".to_string() }
	}

	pub fn code(&self) -> &'static str {
		match self {
			Self::InvalidScopeOwners { .. } => "INVALID_SCOPE_OWNERS",
			Self::InvalidRequest { .. } => "INVALID_REQUEST",
			Self::NotFound { .. } => "NOT_FOUND",
			Self::Forbidden { .. } => "FORBIDDEN",
			Self::Conflict { .. } => "CONFLICT",
			Self::InvalidTransition { .. } => "INVALID_TRANSITION",
			Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
			Self::BlobUnavailable { .. } => IngestErrorCode::BlobUnavailable.as_str(),
			Self::UnsupportedFormat { .. } => IngestErrorCode::UnsupportedFormat.as_str(),
			Self::EmbeddingProvider { .. } => IngestErrorCode::EmbeddingProvider.as_str(),
			Self::DimensionMismatch { .. } => IngestErrorCode::DimensionMismatch.as_str(),
			Self::Storage { .. } => "STORAGE",
		}
	}

	/// Transient failures worth another attempt. `Forbidden` and configuration errors never are.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::BlobUnavailable { .. } | Self::EmbeddingProvider { .. } | Self::Storage { .. })
	}

	/// The code a document records when this error ends its processing.
	pub fn ingest_code(&self) -> Option<IngestErrorCode> {
		match self {
			Self::BlobUnavailable { .. } => Some(IngestErrorCode::BlobUnavailable),
			Self::UnsupportedFormat { .. } => Some(IngestErrorCode::UnsupportedFormat),
			Self::EmbeddingProvider { .. } => Some(IngestErrorCode::EmbeddingProvider),
			Self::DimensionMismatch { .. } => Some(IngestErrorCode::DimensionMismatch),
			_ => None,
		}
	}
}

impl From<kb_storage::Error> for Error {
	fn from(err: kb_storage::Error) -> Self {
		match err {
			kb_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			kb_storage::Error::NotFound(message) => Self::NotFound { message },
			kb_storage::Error::Conflict(message) => Self::Conflict { message },
			kb_storage::Error::DimensionMismatch { expected, actual } =>
				Self::DimensionMismatch { expected, actual },
			other => Self::Storage { message: other.to_string() },
		}
	}
}

impl From<kb_domain::Error> for Error {
	fn from(err: kb_domain::Error) -> Self {
		match err {
			kb_domain::Error::InvalidScopeOwners { message } => Self::InvalidScopeOwners { message },
			kb_domain::Error::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
			kb_domain::Error::InvalidValue { message } => Self::InvalidRequest { message },
		}
	}
}

impl From<kb_providers::Error> for Error {
	fn from(err: kb_providers::Error) -> Self {
		match err {
			kb_providers::Error::UnsupportedFormat { message } => Self::UnsupportedFormat { message },
			other => Self::EmbeddingProvider { message: other.to_string() },
		}
	}
}
