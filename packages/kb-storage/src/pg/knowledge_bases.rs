use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

use kb_domain::{
	context::ContextChain,
	knowledge_base::{KnowledgeBase, ScopeOwner},
};

use crate::{Error, Result, models::KnowledgeBaseRow};

const KB_COLUMNS: &str = "\
kb_id, name, scope, org_id, workspace_id, conversation_id, upload_policy, auto_index, enabled, \
created_by, created_at, updated_at, deleted_at";

pub async fn insert_kb<'e, E>(executor: E, kb: &KnowledgeBase) -> Result<()>
where
	E: PgExecutor<'e>,
{
	let result = bind_kb(
		sqlx::query(
			"\
INSERT INTO knowledge_bases (
\tkb_id,
\tname,
\tscope,
\torg_id,
\tworkspace_id,
\tconversation_id,
\towner_ref,
\tupload_policy,
\tauto_index,
\tenabled,
\tcreated_by,
\tcreated_at,
\tupdated_at,
\tdeleted_at
)
VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)",
		),
		kb,
	)
	.execute(executor)
	.await;

	match result {
		Ok(_) => Ok(()),
		Err(err) if is_unique_violation(&err) => Err(Error::Conflict(format!(
			"An active {} knowledge base already exists for this owner.",
			kb.scope()
		))),
		Err(err) => Err(err.into()),
	}
}

/// One conditional insert against the partial unique index on active owner singletons.
pub async fn insert_kb_or_get(
	conn: &mut PgConnection,
	kb: &KnowledgeBase,
) -> Result<(KnowledgeBase, bool)> {
	let Some(owner_ref) = kb.owner.owner_ref() else {
		return Err(Error::InvalidArgument(
			"Platform knowledge bases have no owner to deduplicate on.".to_string(),
		));
	};

	// A concurrent soft delete can remove the conflicting row between the two statements.
	for _ in 0..3 {
		let inserted = bind_kb(
			sqlx::query(
				"\
INSERT INTO knowledge_bases (
\tkb_id,
\tname,
\tscope,
\torg_id,
\tworkspace_id,
\tconversation_id,
\towner_ref,
\tupload_policy,
\tauto_index,
\tenabled,
\tcreated_by,
\tcreated_at,
\tupdated_at,
\tdeleted_at
)
VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
ON CONFLICT (scope, owner_ref) WHERE deleted_at IS NULL AND scope IN ('workspace', 'conversation')
DO NOTHING",
			),
			kb,
		)
		.execute(&mut *conn)
		.await?
		.rows_affected() == 1;

		if inserted {
			return Ok((kb.clone(), true));
		}

		let existing = sqlx::query_as::<_, KnowledgeBaseRow>(&format!(
			"SELECT {KB_COLUMNS} FROM knowledge_bases WHERE scope = $1 AND owner_ref = $2 AND deleted_at IS NULL"
		))
		.bind(kb.scope().as_str())
		.bind(owner_ref)
		.fetch_optional(&mut *conn)
		.await?;

		if let Some(row) = existing {
			return Ok((KnowledgeBase::try_from(row)?, false));
		}
	}

	Err(Error::Conflict("Knowledge base owner changed concurrently.".to_string()))
}

pub async fn get_kb<'e, E>(executor: E, kb_id: Uuid) -> Result<Option<KnowledgeBase>>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, KnowledgeBaseRow>(&format!(
		"SELECT {KB_COLUMNS} FROM knowledge_bases WHERE kb_id = $1"
	))
	.bind(kb_id)
	.fetch_optional(executor)
	.await?;

	row.map(KnowledgeBase::try_from).transpose()
}

pub async fn update_kb<'e, E>(executor: E, kb: &KnowledgeBase) -> Result<()>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE knowledge_bases
SET name = $2,
\tupload_policy = $3,
\tauto_index = $4,
\tenabled = $5,
\tupdated_at = $6,
\tdeleted_at = $7
WHERE kb_id = $1",
	)
	.bind(kb.kb_id)
	.bind(kb.name.as_str())
	.bind(kb.config.upload_policy.as_str())
	.bind(kb.config.auto_index)
	.bind(kb.enabled)
	.bind(kb.updated_at)
	.bind(kb.deleted_at)
	.execute(executor)
	.await?;

	if result.rows_affected() == 0 {
		return Err(Error::NotFound(format!("knowledge base {}", kb.kb_id)));
	}

	Ok(())
}

pub async fn list_kbs_for_owner<'e, E>(executor: E, owner: &ScopeOwner) -> Result<Vec<KnowledgeBase>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, KnowledgeBaseRow>(&format!(
		"\
SELECT {KB_COLUMNS}
FROM knowledge_bases
WHERE scope = $1 AND owner_ref IS NOT DISTINCT FROM $2 AND deleted_at IS NULL
ORDER BY created_at ASC, kb_id ASC"
	))
	.bind(owner.scope().as_str())
	.bind(owner.owner_ref())
	.fetch_all(executor)
	.await?;

	rows.into_iter().map(KnowledgeBase::try_from).collect()
}

pub async fn candidate_kbs<'e, E>(executor: E, chain: &ContextChain) -> Result<Vec<KnowledgeBase>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, KnowledgeBaseRow>(&format!(
		"\
SELECT {KB_COLUMNS}
FROM knowledge_bases
WHERE deleted_at IS NULL
\tAND enabled
\tAND (
\t\tscope = 'platform'
\t\tOR (scope = 'organization' AND org_id = $1)
\t\tOR (scope = 'workspace' AND workspace_id = $2)
\t\tOR (scope = 'conversation' AND conversation_id = $3)
\t)
ORDER BY created_at ASC, kb_id ASC"
	))
	.bind(chain.org_id)
	.bind(chain.workspace_id)
	.bind(chain.conversation_id)
	.fetch_all(executor)
	.await?;

	rows.into_iter().map(KnowledgeBase::try_from).collect()
}

fn bind_kb<'q>(
	query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
	kb: &'q KnowledgeBase,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
	query
		.bind(kb.kb_id)
		.bind(kb.name.as_str())
		.bind(kb.scope().as_str())
		.bind(kb.owner.org_id())
		.bind(kb.owner.workspace_id())
		.bind(kb.owner.conversation_id())
		.bind(kb.owner.owner_ref())
		.bind(kb.config.upload_policy.as_str())
		.bind(kb.config.auto_index)
		.bind(kb.enabled)
		.bind(kb.created_by)
		.bind(kb.created_at)
		.bind(kb.updated_at)
		.bind(kb.deleted_at)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
	err.as_database_error().is_some_and(|db_err| db_err.is_unique_violation())
}
