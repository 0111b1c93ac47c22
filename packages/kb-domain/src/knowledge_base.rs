use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
	Platform,
	Organization,
	Workspace,
	Conversation,
}
impl Scope {
	pub const ALL: [Scope; 4] =
		[Scope::Platform, Scope::Organization, Scope::Workspace, Scope::Conversation];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Platform => "platform",
			Self::Organization => "organization",
			Self::Workspace => "workspace",
			Self::Conversation => "conversation",
		}
	}

	pub fn parse(raw: &str) -> Result<Self> {
		match raw {
			"platform" => Ok(Self::Platform),
			"organization" => Ok(Self::Organization),
			"workspace" => Ok(Self::Workspace),
			"conversation" => Ok(Self::Conversation),
			_ => Err(Error::InvalidValue {
				message: "scope must be one of: platform, organization, workspace, conversation."
					.to_string(),
			}),
		}
	}

	/// Higher is narrower. Used to prefer more specific context when scores tie.
	pub fn specificity(self) -> u8 {
		match self {
			Self::Platform => 0,
			Self::Organization => 1,
			Self::Workspace => 2,
			Self::Conversation => 3,
		}
	}

	/// Workspace and conversation knowledge bases are singletons per owning entity.
	pub fn is_owner_singleton(self) -> bool {
		matches!(self, Self::Workspace | Self::Conversation)
	}
}

impl Display for Scope {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		self.as_str().fmt(f)
	}
}

/// Loose owner references as they arrive from callers. Turned into a [`ScopeOwner`] by
/// [`ScopeOwner::new`], which is the only way to build one.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct OwnerRefs {
	pub org_id: Option<Uuid>,
	pub workspace_id: Option<Uuid>,
	pub conversation_id: Option<Uuid>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ScopeOwner {
	Platform,
	Organization { org_id: Uuid },
	Workspace { org_id: Uuid, workspace_id: Uuid },
	Conversation { org_id: Uuid, conversation_id: Uuid, workspace_id: Option<Uuid> },
}
impl ScopeOwner {
	pub fn new(scope: Scope, refs: OwnerRefs) -> Result<Self> {
		let OwnerRefs { org_id, workspace_id, conversation_id } = refs;

		match (scope, org_id, workspace_id, conversation_id) {
			(Scope::Platform, None, None, None) => Ok(Self::Platform),
			(Scope::Organization, Some(org_id), None, None) => Ok(Self::Organization { org_id }),
			(Scope::Workspace, Some(org_id), Some(workspace_id), None) =>
				Ok(Self::Workspace { org_id, workspace_id }),
			(Scope::Conversation, Some(org_id), workspace_id, Some(conversation_id)) =>
				Ok(Self::Conversation { org_id, conversation_id, workspace_id }),
			(scope, ..) => Err(Error::InvalidScopeOwners { message: expected_owners(scope) }),
		}
	}

	pub fn scope(&self) -> Scope {
		match self {
			Self::Platform => Scope::Platform,
			Self::Organization { .. } => Scope::Organization,
			Self::Workspace { .. } => Scope::Workspace,
			Self::Conversation { .. } => Scope::Conversation,
		}
	}

	pub fn org_id(&self) -> Option<Uuid> {
		match self {
			Self::Platform => None,
			Self::Organization { org_id }
			| Self::Workspace { org_id, .. }
			| Self::Conversation { org_id, .. } => Some(*org_id),
		}
	}

	pub fn workspace_id(&self) -> Option<Uuid> {
		match self {
			Self::Workspace { workspace_id, .. } => Some(*workspace_id),
			Self::Conversation { workspace_id, .. } => *workspace_id,
			_ => None,
		}
	}

	pub fn conversation_id(&self) -> Option<Uuid> {
		match self {
			Self::Conversation { conversation_id, .. } => Some(*conversation_id),
			_ => None,
		}
	}

	/// The entity whose id keys the knowledge base at its own scope.
	pub fn owner_ref(&self) -> Option<Uuid> {
		match self {
			Self::Platform => None,
			Self::Organization { org_id } => Some(*org_id),
			Self::Workspace { workspace_id, .. } => Some(*workspace_id),
			Self::Conversation { conversation_id, .. } => Some(*conversation_id),
		}
	}

	pub fn refs(&self) -> OwnerRefs {
		OwnerRefs {
			org_id: self.org_id(),
			workspace_id: self.workspace_id(),
			conversation_id: self.conversation_id(),
		}
	}
}

fn expected_owners(scope: Scope) -> String {
	let expected = match scope {
		Scope::Platform => "no owner references",
		Scope::Organization => "org_id only",
		Scope::Workspace => "org_id and workspace_id only",
		Scope::Conversation => "org_id and conversation_id, with optional workspace_id",
	};

	format!("A {scope} knowledge base requires {expected}.")
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPolicy {
	AdminsOnly,
	#[default]
	AllMembers,
}
impl UploadPolicy {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::AdminsOnly => "admins_only",
			Self::AllMembers => "all_members",
		}
	}

	pub fn parse(raw: &str) -> Result<Self> {
		match raw {
			"admins_only" => Ok(Self::AdminsOnly),
			"all_members" => Ok(Self::AllMembers),
			_ => Err(Error::InvalidValue {
				message: "upload_policy must be one of: admins_only, all_members.".to_string(),
			}),
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct KbConfig {
	pub upload_policy: UploadPolicy,
	pub auto_index: bool,
}
impl Default for KbConfig {
	fn default() -> Self {
		Self { upload_policy: UploadPolicy::AllMembers, auto_index: true }
	}
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct KnowledgeBase {
	pub kb_id: Uuid,
	pub name: String,
	pub owner: ScopeOwner,
	pub config: KbConfig,
	pub enabled: bool,
	pub created_by: Uuid,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
	pub deleted_at: Option<OffsetDateTime>,
}
impl KnowledgeBase {
	pub fn new(name: String, owner: ScopeOwner, config: KbConfig, created_by: Uuid) -> Self {
		let now = OffsetDateTime::now_utc();

		Self {
			kb_id: Uuid::new_v4(),
			name,
			owner,
			config,
			enabled: true,
			created_by,
			created_at: now,
			updated_at: now,
			deleted_at: None,
		}
	}

	pub fn scope(&self) -> Scope {
		self.owner.scope()
	}

	pub fn is_deleted(&self) -> bool {
		self.deleted_at.is_some()
	}

	/// Enabled and not soft-deleted.
	pub fn is_active(&self) -> bool {
		self.enabled && !self.is_deleted()
	}
}
