use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use kb_domain::{
	cascade::{self, GrantKey},
	context::Principal,
	knowledge_base::{KbConfig, KnowledgeBase, OwnerRefs, Scope, ScopeOwner},
	membership::{MembershipSet, MembershipTarget},
};

use crate::{Error, KbService, Result, access};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreateKbRequest {
	pub principal: Principal,
	pub name: String,
	pub scope: Scope,
	#[serde(default)]
	pub owners: OwnerRefs,
	#[serde(default)]
	pub config: KbConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UpdateKbRequest {
	pub principal: Principal,
	pub kb_id: Uuid,
	pub name: Option<String>,
	pub config: Option<KbConfig>,
	pub enabled: Option<bool>,
}

impl KbService {
	pub async fn create_kb(&self, req: CreateKbRequest) -> Result<KnowledgeBase> {
		let owner = ScopeOwner::new(req.scope, req.owners)?;
		let name = req.name.trim();

		if name.is_empty() {
			return Err(Error::InvalidRequest {
				message: "Knowledge base name must not be empty.".to_string(),
			});
		}

		self.ensure_owner_exists(&owner).await?;

		if !self.may_create(&req.principal, &owner).await? {
			return Err(Error::Forbidden {
				message: format!("Creating a {} knowledge base requires more rights.", owner.scope()),
			});
		}

		let kb = KnowledgeBase::new(name.to_string(), owner, req.config, req.principal.user_id);

		self.store.insert_kb(&kb).await?;
		self.seed_own_level(&kb).await?;

		tracing::info!(kb_id = %kb.kb_id, scope = %kb.scope(), "Knowledge base created.");

		Ok(kb)
	}

	/// Soft-deleted knowledge bases are `NotFound`.
	pub async fn get_kb(&self, kb_id: Uuid) -> Result<KnowledgeBase> {
		self.active_kb(kb_id).await
	}

	pub async fn delete_kb(&self, principal: &Principal, kb_id: Uuid) -> Result<KnowledgeBase> {
		let mut kb = self.active_kb(kb_id).await?;

		self.require_owner_admin(principal, &kb.owner).await?;

		let now = OffsetDateTime::now_utc();

		kb.deleted_at = Some(now);
		kb.updated_at = now;

		self.store.update_kb(&kb).await?;

		tracing::info!(kb_id = %kb.kb_id, actor = %principal.user_id, "Knowledge base deleted.");

		Ok(kb)
	}

	pub async fn update_kb(&self, req: UpdateKbRequest) -> Result<KnowledgeBase> {
		let mut kb = self.active_kb(req.kb_id).await?;

		self.require_owner_admin(&req.principal, &kb.owner).await?;

		if let Some(name) = req.name {
			let name = name.trim();

			if name.is_empty() {
				return Err(Error::InvalidRequest {
					message: "Knowledge base name must not be empty.".to_string(),
				});
			}

			kb.name = name.to_string();
		}
		if let Some(config) = req.config {
			kb.config = config;
		}
		if let Some(enabled) = req.enabled {
			kb.enabled = enabled;
		}

		kb.updated_at = OffsetDateTime::now_utc();

		self.store.update_kb(&kb).await?;

		tracing::info!(kb_id = %kb.kb_id, enabled = kb.enabled, "Knowledge base updated.");

		Ok(kb)
	}

	/// Live knowledge bases of one owner, disabled ones included, for its administrators.
	pub async fn list_kbs_for_owner(
		&self,
		principal: &Principal,
		owner: &ScopeOwner,
	) -> Result<Vec<KnowledgeBase>> {
		self.require_owner_admin(principal, owner).await?;

		Ok(self.store.list_kbs_for_owner(owner).await?)
	}

	/// The single knowledge base of a workspace or conversation, created on first use. Racing
	/// callers all observe the same row.
	pub async fn get_or_create_for_owner(
		&self,
		owner: ScopeOwner,
		creator: Uuid,
	) -> Result<KnowledgeBase> {
		if !owner.scope().is_owner_singleton() {
			return Err(Error::InvalidRequest {
				message: format!("A {} knowledge base is never created implicitly.", owner.scope()),
			});
		}

		let name = match owner.scope() {
			Scope::Workspace => "Workspace knowledge",
			_ => "Conversation knowledge",
		};
		let candidate = KnowledgeBase::new(name.to_string(), owner, KbConfig::default(), creator);
		let (kb, inserted) = self.store.insert_kb_or_get(&candidate).await?;

		if inserted {
			self.seed_own_level(&kb).await?;

			tracing::info!(kb_id = %kb.kb_id, scope = %kb.scope(), "Knowledge base created on first upload.");
		}

		Ok(kb)
	}

	async fn seed_own_level(&self, kb: &KnowledgeBase) -> Result<()> {
		let (Some(level), Some(target_id)) = (cascade::own_level(kb.scope()), kb.owner.owner_ref())
		else {
			return Ok(());
		};
		let key = GrantKey { kb_id: kb.kb_id, level, target_id };
		let seeded = self
			.store
			.insert_grant_if_absent(key, true, kb.created_by, OffsetDateTime::now_utc())
			.await?;

		if seeded {
			tracing::debug!(kb_id = %kb.kb_id, level = %level, "Own level seeded.");
		}

		Ok(())
	}

	/// Every referenced directory entity exists and the references agree with each other.
	async fn ensure_owner_exists(&self, owner: &ScopeOwner) -> Result<()> {
		let Some(org_id) = owner.org_id() else {
			return Ok(());
		};

		if self.store.get_organization(org_id).await?.is_none() {
			return Err(Error::NotFound { message: format!("organization {org_id}") });
		}

		match *owner {
			ScopeOwner::Workspace { org_id, workspace_id } => {
				let Some(workspace) = self.store.get_workspace(workspace_id).await? else {
					return Err(Error::NotFound { message: format!("workspace {workspace_id}") });
				};

				if workspace.org_id != org_id {
					return Err(Error::InvalidScopeOwners {
						message: format!(
							"Workspace {workspace_id} does not belong to organization {org_id}."
						),
					});
				}
			},
			ScopeOwner::Conversation { org_id, conversation_id, workspace_id } => {
				let Some(conversation) = self.store.get_conversation(conversation_id).await? else {
					return Err(Error::NotFound { message: format!("conversation {conversation_id}") });
				};

				if conversation.org_id != org_id || conversation.workspace_id != workspace_id {
					return Err(Error::InvalidScopeOwners {
						message: format!(
							"Conversation {conversation_id} does not match the given organization and workspace."
						),
					});
				}
			},
			ScopeOwner::Platform | ScopeOwner::Organization { .. } => {},
		}

		Ok(())
	}

	async fn may_create(&self, principal: &Principal, owner: &ScopeOwner) -> Result<bool> {
		let Some(target) = access::owner_admin_target(owner) else {
			return Ok(principal.platform_admin);
		};
		let memberships =
			MembershipSet::new(self.store.memberships_for(principal.user_id, &[target]).await?);

		Ok(match target {
			MembershipTarget::Conversation(_) => memberships.is_member(target),
			MembershipTarget::Organization(_) | MembershipTarget::Workspace(_) =>
				memberships.is_admin(target),
		})
	}
}
