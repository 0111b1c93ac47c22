use sqlx::PgExecutor;
use uuid::Uuid;

use kb_domain::{
	context::{Conversation, Organization, Workspace},
	membership::{Membership, MembershipTarget},
};

use crate::{
	Result,
	models::{ConversationRow, MembershipRow, OrganizationRow, WorkspaceRow},
};

pub async fn upsert_organization<'e, E>(executor: E, org: &Organization) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO organizations (org_id, name)
VALUES ($1,$2)
ON CONFLICT (org_id) DO UPDATE SET name = EXCLUDED.name",
	)
	.bind(org.org_id)
	.bind(org.name.as_str())
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn upsert_workspace<'e, E>(executor: E, workspace: &Workspace) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO workspaces (workspace_id, org_id, name)
VALUES ($1,$2,$3)
ON CONFLICT (workspace_id) DO UPDATE SET name = EXCLUDED.name",
	)
	.bind(workspace.workspace_id)
	.bind(workspace.org_id)
	.bind(workspace.name.as_str())
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn upsert_conversation<'e, E>(executor: E, conversation: &Conversation) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO conversations (conversation_id, org_id, workspace_id)
VALUES ($1,$2,$3)
ON CONFLICT (conversation_id) DO NOTHING",
	)
	.bind(conversation.conversation_id)
	.bind(conversation.org_id)
	.bind(conversation.workspace_id)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn upsert_membership<'e, E>(executor: E, membership: &Membership) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO memberships (principal_id, target_kind, target_id, role, active, updated_at)
VALUES ($1,$2,$3,$4,$5,now())
ON CONFLICT (principal_id, target_kind, target_id) DO UPDATE
SET role = EXCLUDED.role,
\tactive = EXCLUDED.active,
\tupdated_at = EXCLUDED.updated_at",
	)
	.bind(membership.principal_id)
	.bind(membership.target.kind())
	.bind(membership.target.id())
	.bind(membership.role.as_str())
	.bind(membership.active)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn get_organization<'e, E>(executor: E, org_id: Uuid) -> Result<Option<Organization>>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, OrganizationRow>(
		"SELECT org_id, name FROM organizations WHERE org_id = $1",
	)
	.bind(org_id)
	.fetch_optional(executor)
	.await?;

	Ok(row.map(Organization::from))
}

pub async fn get_workspace<'e, E>(executor: E, workspace_id: Uuid) -> Result<Option<Workspace>>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, WorkspaceRow>(
		"SELECT workspace_id, org_id, name FROM workspaces WHERE workspace_id = $1",
	)
	.bind(workspace_id)
	.fetch_optional(executor)
	.await?;

	Ok(row.map(Workspace::from))
}

pub async fn get_conversation<'e, E>(
	executor: E,
	conversation_id: Uuid,
) -> Result<Option<Conversation>>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, ConversationRow>(
		"SELECT conversation_id, org_id, workspace_id FROM conversations WHERE conversation_id = $1",
	)
	.bind(conversation_id)
	.fetch_optional(executor)
	.await?;

	Ok(row.map(Conversation::from))
}

pub async fn memberships_for<'e, E>(
	executor: E,
	principal_id: Uuid,
	targets: &[MembershipTarget],
) -> Result<Vec<Membership>>
where
	E: PgExecutor<'e>,
{
	if targets.is_empty() {
		return Ok(Vec::new());
	}

	let kinds: Vec<&str> = targets.iter().map(|target| target.kind()).collect();
	let ids: Vec<Uuid> = targets.iter().map(|target| target.id()).collect();
	let rows = sqlx::query_as::<_, MembershipRow>(
		"\
SELECT m.principal_id, m.target_kind, m.target_id, m.role, m.active
FROM memberships m
JOIN UNNEST($2::text[], $3::uuid[]) AS t (target_kind, target_id)
\tON t.target_kind = m.target_kind AND t.target_id = m.target_id
WHERE m.principal_id = $1",
	)
	.bind(principal_id)
	.bind(&kinds)
	.bind(&ids)
	.fetch_all(executor)
	.await?;

	rows.into_iter().map(Membership::try_from).collect()
}
