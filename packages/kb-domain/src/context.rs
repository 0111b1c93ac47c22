use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{cascade::GrantLevel, knowledge_base::ScopeOwner, membership::MembershipTarget};

/// The authenticated actor. `platform_admin` comes from the authentication layer, not from
/// any membership row.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Principal {
	pub user_id: Uuid,
	#[serde(default)]
	pub platform_admin: bool,
}
impl Principal {
	pub fn user(user_id: Uuid) -> Self {
		Self { user_id, platform_admin: false }
	}

	pub fn platform_admin(user_id: Uuid) -> Self {
		Self { user_id, platform_admin: true }
	}
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Organization {
	pub org_id: Uuid,
	pub name: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Workspace {
	pub workspace_id: Uuid,
	pub org_id: Uuid,
	pub name: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Conversation {
	pub conversation_id: Uuid,
	pub org_id: Uuid,
	pub workspace_id: Option<Uuid>,
}

/// Where a request happens. Resolved against directory records into a [`ContextChain`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum AccessContext {
	Platform,
	Organization(Uuid),
	Workspace(Uuid),
	Conversation(Uuid),
}
impl AccessContext {
	/// The context a knowledge base lives in at its own scope.
	pub fn for_owner(owner: &ScopeOwner) -> Self {
		match owner {
			ScopeOwner::Platform => Self::Platform,
			ScopeOwner::Organization { org_id } => Self::Organization(*org_id),
			ScopeOwner::Workspace { workspace_id, .. } => Self::Workspace(*workspace_id),
			ScopeOwner::Conversation { conversation_id, .. } => Self::Conversation(*conversation_id),
		}
	}
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ContextChain {
	pub org_id: Option<Uuid>,
	pub workspace_id: Option<Uuid>,
	pub conversation_id: Option<Uuid>,
}
impl ContextChain {
	pub fn platform() -> Self {
		Self::default()
	}

	pub fn organization(org: &Organization) -> Self {
		Self { org_id: Some(org.org_id), ..Self::default() }
	}

	pub fn workspace(workspace: &Workspace) -> Self {
		Self {
			org_id: Some(workspace.org_id),
			workspace_id: Some(workspace.workspace_id),
			conversation_id: None,
		}
	}

	pub fn conversation(conversation: &Conversation) -> Self {
		Self {
			org_id: Some(conversation.org_id),
			workspace_id: conversation.workspace_id,
			conversation_id: Some(conversation.conversation_id),
		}
	}

	pub fn is_platform(&self) -> bool {
		self.org_id.is_none()
	}

	/// The entity a grant at `level` is keyed on in this context, if the context has one.
	pub fn target_for(&self, level: GrantLevel) -> Option<Uuid> {
		match level {
			GrantLevel::SysOrg | GrantLevel::OrgEnablement => self.org_id,
			GrantLevel::WorkspaceEnablement => self.workspace_id,
			GrantLevel::ConversationToggle => self.conversation_id,
		}
	}

	/// Every entity id a grant in this context could be keyed on.
	pub fn grant_targets(&self) -> Vec<Uuid> {
		[self.org_id, self.workspace_id, self.conversation_id].into_iter().flatten().collect()
	}

	pub fn membership_targets(&self) -> Vec<MembershipTarget> {
		let mut targets = Vec::with_capacity(3);

		if let Some(org_id) = self.org_id {
			targets.push(MembershipTarget::Organization(org_id));
		}
		if let Some(workspace_id) = self.workspace_id {
			targets.push(MembershipTarget::Workspace(workspace_id));
		}
		if let Some(conversation_id) = self.conversation_id {
			targets.push(MembershipTarget::Conversation(conversation_id));
		}

		targets
	}

	/// The narrowest entity below the organization, if any.
	pub fn narrowest(&self) -> Option<MembershipTarget> {
		if let Some(conversation_id) = self.conversation_id {
			return Some(MembershipTarget::Conversation(conversation_id));
		}

		self.workspace_id.map(MembershipTarget::Workspace)
	}

	/// Whether a knowledge base owned by `owner` is in reach of this context at all.
	pub fn reaches(&self, owner: &ScopeOwner) -> bool {
		match owner {
			ScopeOwner::Platform => true,
			ScopeOwner::Organization { org_id } => self.org_id == Some(*org_id),
			ScopeOwner::Workspace { org_id, workspace_id } =>
				self.org_id == Some(*org_id) && self.workspace_id == Some(*workspace_id),
			ScopeOwner::Conversation { org_id, conversation_id, .. } =>
				self.org_id == Some(*org_id) && self.conversation_id == Some(*conversation_id),
		}
	}
}
