use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use kb_domain::{
	cascade::{AccessGrant, GrantLevel},
	context::{Conversation, Organization, Workspace},
	document::{Chunk, Document, DocumentError, DocumentStatus, IngestErrorCode},
	knowledge_base::{KbConfig, KnowledgeBase, OwnerRefs, Scope, ScopeOwner, UploadPolicy},
	membership::{Membership, MembershipTarget, Role},
};

use crate::{Error, Result};

#[derive(Debug, sqlx::FromRow)]
pub struct OrganizationRow {
	pub org_id: Uuid,
	pub name: String,
}
impl From<OrganizationRow> for Organization {
	fn from(row: OrganizationRow) -> Self {
		Self { org_id: row.org_id, name: row.name }
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct WorkspaceRow {
	pub workspace_id: Uuid,
	pub org_id: Uuid,
	pub name: String,
}
impl From<WorkspaceRow> for Workspace {
	fn from(row: WorkspaceRow) -> Self {
		Self { workspace_id: row.workspace_id, org_id: row.org_id, name: row.name }
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct ConversationRow {
	pub conversation_id: Uuid,
	pub org_id: Uuid,
	pub workspace_id: Option<Uuid>,
}
impl From<ConversationRow> for Conversation {
	fn from(row: ConversationRow) -> Self {
		Self {
			conversation_id: row.conversation_id,
			org_id: row.org_id,
			workspace_id: row.workspace_id,
		}
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct MembershipRow {
	pub principal_id: Uuid,
	pub target_kind: String,
	pub target_id: Uuid,
	pub role: String,
	pub active: bool,
}
impl TryFrom<MembershipRow> for Membership {
	type Error = Error;

	fn try_from(row: MembershipRow) -> Result<Self> {
		Ok(Self {
			principal_id: row.principal_id,
			target: MembershipTarget::parse(&row.target_kind, row.target_id)?,
			role: Role::parse(&row.role)?,
			active: row.active,
		})
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct KnowledgeBaseRow {
	pub kb_id: Uuid,
	pub name: String,
	pub scope: String,
	pub org_id: Option<Uuid>,
	pub workspace_id: Option<Uuid>,
	pub conversation_id: Option<Uuid>,
	pub upload_policy: String,
	pub auto_index: bool,
	pub enabled: bool,
	pub created_by: Uuid,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
	pub deleted_at: Option<OffsetDateTime>,
}
impl TryFrom<KnowledgeBaseRow> for KnowledgeBase {
	type Error = Error;

	fn try_from(row: KnowledgeBaseRow) -> Result<Self> {
		let owner = ScopeOwner::new(
			Scope::parse(&row.scope)?,
			OwnerRefs {
				org_id: row.org_id,
				workspace_id: row.workspace_id,
				conversation_id: row.conversation_id,
			},
		)?;

		Ok(Self {
			kb_id: row.kb_id,
			name: row.name,
			owner,
			config: KbConfig {
				upload_policy: UploadPolicy::parse(&row.upload_policy)?,
				auto_index: row.auto_index,
			},
			enabled: row.enabled,
			created_by: row.created_by,
			created_at: row.created_at,
			updated_at: row.updated_at,
			deleted_at: row.deleted_at,
		})
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct AccessGrantRow {
	pub grant_id: Uuid,
	pub kb_id: Uuid,
	pub level: String,
	pub target_id: Uuid,
	pub enabled: bool,
	pub created_by: Uuid,
	pub created_at: OffsetDateTime,
	pub updated_by: Uuid,
	pub updated_at: OffsetDateTime,
}
impl TryFrom<AccessGrantRow> for AccessGrant {
	type Error = Error;

	fn try_from(row: AccessGrantRow) -> Result<Self> {
		Ok(Self {
			grant_id: row.grant_id,
			kb_id: row.kb_id,
			level: GrantLevel::parse(&row.level)?,
			target_id: row.target_id,
			enabled: row.enabled,
			created_by: row.created_by,
			created_at: row.created_at,
			updated_by: row.updated_by,
			updated_at: row.updated_at,
		})
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct DocumentRow {
	pub document_id: Uuid,
	pub kb_id: Uuid,
	pub filename: String,
	pub blob_location: Option<String>,
	pub byte_size: i64,
	pub content_type: String,
	pub status: String,
	pub error_code: Option<String>,
	pub error_message: Option<String>,
	pub chunk_count: i32,
	pub metadata: Value,
	pub uploaded_by: Uuid,
	pub attempts: i32,
	pub claim_token: Option<Uuid>,
	pub claimed_at: Option<OffsetDateTime>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
	pub deleted_at: Option<OffsetDateTime>,
}
impl TryFrom<DocumentRow> for Document {
	type Error = Error;

	fn try_from(row: DocumentRow) -> Result<Self> {
		let error = match row.error_code {
			Some(code) => Some(DocumentError {
				code: IngestErrorCode::parse(&code)?,
				message: row.error_message.unwrap_or_default(),
			}),
			None => None,
		};

		Ok(Self {
			document_id: row.document_id,
			kb_id: row.kb_id,
			filename: row.filename,
			blob_location: row.blob_location,
			byte_size: to_u64(row.byte_size, "byte_size")?,
			content_type: row.content_type,
			status: DocumentStatus::parse(&row.status)?,
			error,
			chunk_count: to_u32(row.chunk_count, "chunk_count")?,
			metadata: row.metadata,
			uploaded_by: row.uploaded_by,
			attempts: to_u32(row.attempts, "attempts")?,
			claimed_at: row.claimed_at,
			created_at: row.created_at,
			updated_at: row.updated_at,
			deleted_at: row.deleted_at,
		})
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct ChunkRow {
	pub chunk_id: Uuid,
	pub kb_id: Uuid,
	pub document_id: Uuid,
	pub ordinal: i32,
	pub text: String,
	pub embedding: Option<String>,
	pub page: Option<i32>,
	pub start_offset: i32,
	pub end_offset: i32,
	pub created_at: OffsetDateTime,
}
impl TryFrom<ChunkRow> for Chunk {
	type Error = Error;

	fn try_from(row: ChunkRow) -> Result<Self> {
		Ok(Self {
			chunk_id: row.chunk_id,
			kb_id: row.kb_id,
			document_id: row.document_id,
			ordinal: to_u32(row.ordinal, "ordinal")?,
			text: row.text,
			embedding: row.embedding.as_deref().map(parse_pg_vector).transpose()?,
			page: row.page.map(|page| to_u32(page, "page")).transpose()?,
			start_offset: to_u32(row.start_offset, "start_offset")?,
			end_offset: to_u32(row.end_offset, "end_offset")?,
			created_at: row.created_at,
		})
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct ChunkHitRow {
	#[sqlx(flatten)]
	pub chunk: ChunkRow,
	pub filename: String,
	pub scope: String,
	pub similarity: f32,
}

#[derive(Debug, sqlx::FromRow)]
pub struct OutboxRow {
	pub job_id: Uuid,
	pub document_id: Uuid,
	pub status: String,
	pub attempts: i32,
	pub last_error: Option<String>,
	pub available_at: OffsetDateTime,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

pub fn vector_to_pg(vec: &[f32]) -> String {
	let mut out = String::with_capacity(vec.len() * 8);

	out.push('[');

	for (i, value) in vec.iter().enumerate() {
		if i > 0 {
			out.push(',');
		}

		out.push_str(&value.to_string());
	}

	out.push(']');

	out
}

pub fn parse_pg_vector(text: &str) -> Result<Vec<f32>> {
	let trimmed = text.trim();
	let without_brackets = trimmed
		.strip_prefix('[')
		.and_then(|s| s.strip_suffix(']'))
		.ok_or_else(|| Error::Corrupt("Vector text is not bracketed.".to_string()))?;

	if without_brackets.trim().is_empty() {
		return Ok(Vec::new());
	}

	let mut vec = Vec::new();

	for part in without_brackets.split(',') {
		let value: f32 = part
			.trim()
			.parse()
			.map_err(|_| Error::Corrupt("Vector text contains a non-numeric value.".to_string()))?;

		vec.push(value);
	}

	Ok(vec)
}

pub(crate) fn to_u32(value: i32, column: &str) -> Result<u32> {
	u32::try_from(value).map_err(|_| Error::Corrupt(format!("{column} must not be negative.")))
}

pub(crate) fn to_u64(value: i64, column: &str) -> Result<u64> {
	u64::try_from(value).map_err(|_| Error::Corrupt(format!("{column} must not be negative.")))
}

pub(crate) fn to_i32(value: u32, column: &str) -> Result<i32> {
	i32::try_from(value).map_err(|_| Error::InvalidArgument(format!("{column} is out of range.")))
}

pub(crate) fn to_i64(value: u64, column: &str) -> Result<i64> {
	i64::try_from(value).map_err(|_| Error::InvalidArgument(format!("{column} is out of range.")))
}
