//! Directory records the cascade is resolved against. Authentication and membership management
//! live upstream; these operations only mirror their state.

use kb_domain::{
	context::{Conversation, Organization, Workspace},
	membership::{Membership, MembershipTarget},
};

use crate::{Error, KbService, Result};

impl KbService {
	pub async fn upsert_organization(&self, org: Organization) -> Result<Organization> {
		if org.name.trim().is_empty() {
			return Err(Error::InvalidRequest {
				message: "Organization name must not be empty.".to_string(),
			});
		}

		self.store.upsert_organization(&org).await?;

		tracing::debug!(org_id = %org.org_id, "Organization upserted.");

		Ok(org)
	}

	pub async fn upsert_workspace(&self, workspace: Workspace) -> Result<Workspace> {
		if workspace.name.trim().is_empty() {
			return Err(Error::InvalidRequest {
				message: "Workspace name must not be empty.".to_string(),
			});
		}
		if self.store.get_organization(workspace.org_id).await?.is_none() {
			return Err(Error::NotFound { message: format!("organization {}", workspace.org_id) });
		}

		self.store.upsert_workspace(&workspace).await?;

		tracing::debug!(workspace_id = %workspace.workspace_id, org_id = %workspace.org_id, "Workspace upserted.");

		Ok(workspace)
	}

	/// A conversation belongs to its organization, and to a workspace of that organization when
	/// it names one.
	pub async fn upsert_conversation(&self, conversation: Conversation) -> Result<Conversation> {
		if self.store.get_organization(conversation.org_id).await?.is_none() {
			return Err(Error::NotFound { message: format!("organization {}", conversation.org_id) });
		}
		if let Some(workspace_id) = conversation.workspace_id {
			let Some(workspace) = self.store.get_workspace(workspace_id).await? else {
				return Err(Error::NotFound { message: format!("workspace {workspace_id}") });
			};

			if workspace.org_id != conversation.org_id {
				return Err(Error::InvalidScopeOwners {
					message: format!(
						"Workspace {workspace_id} does not belong to organization {}.",
						conversation.org_id
					),
				});
			}
		}

		self.store.upsert_conversation(&conversation).await?;

		tracing::debug!(conversation_id = %conversation.conversation_id, "Conversation upserted.");

		Ok(conversation)
	}

	pub async fn upsert_membership(&self, membership: Membership) -> Result<Membership> {
		let exists = match membership.target {
			MembershipTarget::Organization(org_id) =>
				self.store.get_organization(org_id).await?.is_some(),
			MembershipTarget::Workspace(workspace_id) =>
				self.store.get_workspace(workspace_id).await?.is_some(),
			MembershipTarget::Conversation(conversation_id) =>
				self.store.get_conversation(conversation_id).await?.is_some(),
		};

		if !exists {
			return Err(Error::NotFound {
				message: format!("{} {}", membership.target.kind(), membership.target.id()),
			});
		}

		self.store.upsert_membership(&membership).await?;

		tracing::debug!(
			principal = %membership.principal_id,
			target = %membership.target.id(),
			role = membership.role.as_str(),
			active = membership.active,
			"Membership upserted.",
		);

		Ok(membership)
	}
}
