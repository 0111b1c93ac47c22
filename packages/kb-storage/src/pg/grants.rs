use sqlx::PgExecutor;
use time::OffsetDateTime;
use uuid::Uuid;

use kb_domain::cascade::{AccessGrant, GrantKey};

use crate::{Result, models::AccessGrantRow};

const GRANT_COLUMNS: &str = "\
grant_id, kb_id, level, target_id, enabled, created_by, created_at, updated_by, updated_at";

pub async fn upsert_grant<'e, E>(
	executor: E,
	key: GrantKey,
	enabled: bool,
	actor: Uuid,
	now: OffsetDateTime,
) -> Result<AccessGrant>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, AccessGrantRow>(&format!(
		"\
INSERT INTO kb_access_grants (
\tgrant_id,
\tkb_id,
\tlevel,
\ttarget_id,
\tenabled,
\tcreated_by,
\tcreated_at,
\tupdated_by,
\tupdated_at
)
VALUES ($1,$2,$3,$4,$5,$6,$7,$6,$7)
ON CONFLICT (kb_id, level, target_id) DO UPDATE
SET enabled = EXCLUDED.enabled,
\tupdated_by = EXCLUDED.updated_by,
\tupdated_at = EXCLUDED.updated_at
RETURNING {GRANT_COLUMNS}"
	))
	.bind(Uuid::new_v4())
	.bind(key.kb_id)
	.bind(key.level.as_str())
	.bind(key.target_id)
	.bind(enabled)
	.bind(actor)
	.bind(now)
	.fetch_one(executor)
	.await?;

	AccessGrant::try_from(row)
}

pub async fn insert_grant_if_absent<'e, E>(
	executor: E,
	key: GrantKey,
	enabled: bool,
	actor: Uuid,
	now: OffsetDateTime,
) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
INSERT INTO kb_access_grants (
\tgrant_id,
\tkb_id,
\tlevel,
\ttarget_id,
\tenabled,
\tcreated_by,
\tcreated_at,
\tupdated_by,
\tupdated_at
)
VALUES ($1,$2,$3,$4,$5,$6,$7,$6,$7)
ON CONFLICT (kb_id, level, target_id) DO NOTHING",
	)
	.bind(Uuid::new_v4())
	.bind(key.kb_id)
	.bind(key.level.as_str())
	.bind(key.target_id)
	.bind(enabled)
	.bind(actor)
	.bind(now)
	.execute(executor)
	.await?;

	Ok(result.rows_affected() == 1)
}

pub async fn grants_for<'e, E>(
	executor: E,
	kb_ids: &[Uuid],
	target_ids: &[Uuid],
) -> Result<Vec<AccessGrant>>
where
	E: PgExecutor<'e>,
{
	if kb_ids.is_empty() || target_ids.is_empty() {
		return Ok(Vec::new());
	}

	let rows = sqlx::query_as::<_, AccessGrantRow>(&format!(
		"SELECT {GRANT_COLUMNS} FROM kb_access_grants WHERE kb_id = ANY($1) AND target_id = ANY($2)"
	))
	.bind(kb_ids)
	.bind(target_ids)
	.fetch_all(executor)
	.await?;

	rows.into_iter().map(AccessGrant::try_from).collect()
}

pub async fn list_grants<'e, E>(executor: E, kb_id: Uuid) -> Result<Vec<AccessGrant>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, AccessGrantRow>(&format!(
		"SELECT {GRANT_COLUMNS} FROM kb_access_grants WHERE kb_id = $1 ORDER BY created_at ASC, grant_id ASC"
	))
	.bind(kb_id)
	.fetch_all(executor)
	.await?;

	rows.into_iter().map(AccessGrant::try_from).collect()
}
