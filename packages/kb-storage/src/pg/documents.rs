use serde_json::{Map, Value};
use sqlx::PgExecutor;
use time::OffsetDateTime;
use uuid::Uuid;

use kb_domain::document::{Document, DocumentError, IngestErrorCode};

use crate::{
	Result,
	models::{self, DocumentRow},
};

const DOCUMENT_COLUMNS: &str = "\
document_id, kb_id, filename, blob_location, byte_size, content_type, status, error_code, \
error_message, chunk_count, metadata, uploaded_by, attempts, claim_token, claimed_at, created_at, \
updated_at, deleted_at";

pub async fn insert_document<'e, E>(executor: E, document: &Document) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO kb_documents (
\tdocument_id,
\tkb_id,
\tfilename,
\tblob_location,
\tbyte_size,
\tcontent_type,
\tstatus,
\terror_code,
\terror_message,
\tchunk_count,
\tmetadata,
\tuploaded_by,
\tattempts,
\tclaimed_at,
\tcreated_at,
\tupdated_at,
\tdeleted_at
)
VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)",
	)
	.bind(document.document_id)
	.bind(document.kb_id)
	.bind(document.filename.as_str())
	.bind(document.blob_location.as_deref())
	.bind(models::to_i64(document.byte_size, "byte_size")?)
	.bind(document.content_type.as_str())
	.bind(document.status.as_str())
	.bind(document.error.as_ref().map(|error| error.code.as_str()))
	.bind(document.error.as_ref().map(|error| error.message.as_str()))
	.bind(models::to_i32(document.chunk_count, "chunk_count")?)
	.bind(&document.metadata)
	.bind(document.uploaded_by)
	.bind(models::to_i32(document.attempts, "attempts")?)
	.bind(document.claimed_at)
	.bind(document.created_at)
	.bind(document.updated_at)
	.bind(document.deleted_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn get_document<'e, E>(executor: E, document_id: Uuid) -> Result<Option<Document>>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, DocumentRow>(&format!(
		"SELECT {DOCUMENT_COLUMNS} FROM kb_documents WHERE document_id = $1"
	))
	.bind(document_id)
	.fetch_optional(executor)
	.await?;

	row.map(Document::try_from).transpose()
}

pub async fn list_documents<'e, E>(executor: E, kb_id: Uuid) -> Result<Vec<Document>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, DocumentRow>(&format!(
		"\
SELECT {DOCUMENT_COLUMNS}
FROM kb_documents
WHERE kb_id = $1 AND deleted_at IS NULL
ORDER BY created_at DESC, document_id ASC"
	))
	.bind(kb_id)
	.fetch_all(executor)
	.await?;

	rows.into_iter().map(Document::try_from).collect()
}

pub async fn claim_document<'e, E>(
	executor: E,
	document_id: Uuid,
	token: Uuid,
	now: OffsetDateTime,
	stale_before: OffsetDateTime,
) -> Result<Option<Document>>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, DocumentRow>(&format!(
		"\
UPDATE kb_documents
SET status = 'processing',
\tattempts = attempts + 1,
\tclaim_token = $2,
\tclaimed_at = $3,
\tupdated_at = $3
WHERE document_id = $1
\tAND deleted_at IS NULL
\tAND (status = 'pending' OR (status = 'processing' AND claimed_at < $4))
RETURNING {DOCUMENT_COLUMNS}"
	))
	.bind(document_id)
	.bind(token)
	.bind(now)
	.bind(stale_before)
	.fetch_optional(executor)
	.await?;

	row.map(Document::try_from).transpose()
}

pub async fn fail_document<'e, E>(
	executor: E,
	document_id: Uuid,
	token: Uuid,
	error: &DocumentError,
	now: OffsetDateTime,
) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE kb_documents
SET status = 'failed',
\terror_code = $3,
\terror_message = $4,
\tclaim_token = NULL,
\tupdated_at = $5
WHERE document_id = $1 AND status = 'processing' AND claim_token = $2",
	)
	.bind(document_id)
	.bind(token)
	.bind(error.code.as_str())
	.bind(error.message.as_str())
	.bind(now)
	.execute(executor)
	.await?;

	Ok(result.rows_affected() == 1)
}

pub async fn release_claim<'e, E>(
	executor: E,
	document_id: Uuid,
	token: Uuid,
	now: OffsetDateTime,
) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE kb_documents
SET status = 'pending',
\tclaim_token = NULL,
\tclaimed_at = NULL,
\tupdated_at = $3
WHERE document_id = $1 AND status = 'processing' AND claim_token = $2",
	)
	.bind(document_id)
	.bind(token)
	.bind(now)
	.execute(executor)
	.await?;

	Ok(result.rows_affected() == 1)
}

pub async fn reset_document<'e, E>(
	executor: E,
	document_id: Uuid,
	now: OffsetDateTime,
) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE kb_documents
SET status = 'pending',
\terror_code = NULL,
\terror_message = NULL,
\tclaim_token = NULL,
\tclaimed_at = NULL,
\tupdated_at = $2
WHERE document_id = $1 AND status = 'failed' AND deleted_at IS NULL",
	)
	.bind(document_id)
	.bind(now)
	.execute(executor)
	.await?;

	Ok(result.rows_affected() == 1)
}

pub async fn mark_indexed<'e, E>(
	executor: E,
	document_id: Uuid,
	token: Uuid,
	chunk_count: u32,
	metadata: &Map<String, Value>,
	now: OffsetDateTime,
) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE kb_documents
SET status = 'indexed',
\tchunk_count = $3,
\tmetadata = metadata || $4,
\terror_code = NULL,
\terror_message = NULL,
\tclaim_token = NULL,
\tupdated_at = $5
WHERE document_id = $1 AND status = 'processing' AND claim_token = $2 AND deleted_at IS NULL",
	)
	.bind(document_id)
	.bind(token)
	.bind(models::to_i32(chunk_count, "chunk_count")?)
	.bind(sqlx::types::Json(metadata))
	.bind(now)
	.execute(executor)
	.await?;

	Ok(result.rows_affected() == 1)
}

pub async fn soft_delete_document<'e, E>(
	executor: E,
	document_id: Uuid,
	now: OffsetDateTime,
) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE kb_documents
SET deleted_at = $2, claim_token = NULL, updated_at = $2
WHERE document_id = $1 AND deleted_at IS NULL",
	)
	.bind(document_id)
	.bind(now)
	.execute(executor)
	.await?;

	Ok(result.rows_affected() == 1)
}

pub async fn failed_documents_for_retry<'e, E>(
	executor: E,
	failed_before: OffsetDateTime,
	max_attempts: u32,
	limit: u32,
) -> Result<Vec<Document>>
where
	E: PgExecutor<'e>,
{
	let retryable: Vec<&str> = IngestErrorCode::ALL
		.into_iter()
		.filter(|code| code.is_retryable())
		.map(IngestErrorCode::as_str)
		.collect();
	let rows = sqlx::query_as::<_, DocumentRow>(&format!(
		"\
SELECT {DOCUMENT_COLUMNS}
FROM kb_documents
WHERE status = 'failed'
\tAND deleted_at IS NULL
\tAND updated_at < $1
\tAND attempts <= $2
\tAND error_code = ANY($3)
ORDER BY updated_at ASC, document_id ASC
LIMIT $4"
	))
	.bind(failed_before)
	.bind(models::to_i32(max_attempts, "max_attempts")?)
	.bind(&retryable)
	.bind(i64::from(limit))
	.fetch_all(executor)
	.await?;

	rows.into_iter().map(Document::try_from).collect()
}
