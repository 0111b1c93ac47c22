use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
	Pending,
	Processing,
	Indexed,
	Failed,
}
impl DocumentStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Processing => "processing",
			Self::Indexed => "indexed",
			Self::Failed => "failed",
		}
	}

	pub fn parse(raw: &str) -> Result<Self> {
		match raw {
			"pending" => Ok(Self::Pending),
			"processing" => Ok(Self::Processing),
			"indexed" => Ok(Self::Indexed),
			"failed" => Ok(Self::Failed),
			_ => Err(Error::InvalidValue {
				message: "status must be one of: pending, processing, indexed, failed.".to_string(),
			}),
		}
	}

	pub fn can_transition_to(self, to: Self) -> bool {
		matches!(
			(self, to),
			(Self::Pending, Self::Processing)
				| (Self::Processing, Self::Indexed)
				| (Self::Processing, Self::Failed)
				| (Self::Failed, Self::Pending)
		)
	}

	pub fn transition(self, to: Self) -> Result<Self> {
		if self.can_transition_to(to) {
			Ok(to)
		} else {
			Err(Error::InvalidTransition { from: self, to })
		}
	}
}

impl Display for DocumentStatus {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		self.as_str().fmt(f)
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestErrorCode {
	BlobUnavailable,
	UnsupportedFormat,
	EmbeddingProvider,
	DimensionMismatch,
}
impl IngestErrorCode {
	pub const ALL: [IngestErrorCode; 4] = [
		IngestErrorCode::BlobUnavailable,
		IngestErrorCode::UnsupportedFormat,
		IngestErrorCode::EmbeddingProvider,
		IngestErrorCode::DimensionMismatch,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::BlobUnavailable => "BLOB_UNAVAILABLE",
			Self::UnsupportedFormat => "UNSUPPORTED_FORMAT",
			Self::EmbeddingProvider => "EMBEDDING_PROVIDER",
			Self::DimensionMismatch => "DIMENSION_MISMATCH",
		}
	}

	pub fn parse(raw: &str) -> Result<Self> {
		match raw {
			"BLOB_UNAVAILABLE" => Ok(Self::BlobUnavailable),
			"UNSUPPORTED_FORMAT" => Ok(Self::UnsupportedFormat),
			"EMBEDDING_PROVIDER" => Ok(Self::EmbeddingProvider),
			"DIMENSION_MISMATCH" => Ok(Self::DimensionMismatch),
			_ => Err(Error::InvalidValue { message: format!("Unknown ingestion error code {raw:?}.") }),
		}
	}

	pub fn is_retryable(self) -> bool {
		matches!(self, Self::BlobUnavailable | Self::EmbeddingProvider)
	}
}

impl Display for IngestErrorCode {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		self.as_str().fmt(f)
	}
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DocumentError {
	pub code: IngestErrorCode,
	pub message: String,
}
impl DocumentError {
	pub fn new(code: IngestErrorCode, message: impl Into<String>) -> Self {
		Self { code, message: message.into() }
	}

	pub fn is_retryable(&self) -> bool {
		self.code.is_retryable()
	}
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Document {
	pub document_id: Uuid,
	pub kb_id: Uuid,
	pub filename: String,
	/// Absent only for documents rejected at intake.
	pub blob_location: Option<String>,
	pub byte_size: u64,
	pub content_type: String,
	pub status: DocumentStatus,
	pub error: Option<DocumentError>,
	pub chunk_count: u32,
	pub metadata: Value,
	pub uploaded_by: Uuid,
	pub attempts: u32,
	pub claimed_at: Option<OffsetDateTime>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
	pub deleted_at: Option<OffsetDateTime>,
}
impl Document {
	pub fn is_deleted(&self) -> bool {
		self.deleted_at.is_some()
	}
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Chunk {
	pub chunk_id: Uuid,
	pub kb_id: Uuid,
	pub document_id: Uuid,
	pub ordinal: u32,
	pub text: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub embedding: Option<Vec<f32>>,
	pub page: Option<u32>,
	pub start_offset: u32,
	pub end_offset: u32,
	pub created_at: OffsetDateTime,
}

/// Chunk ids are derived from the document and ordinal so a replayed job produces the same
/// rows.
pub fn chunk_id_for(document_id: Uuid, ordinal: u32) -> Uuid {
	let name = format!("{document_id}:{ordinal}");

	Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}
