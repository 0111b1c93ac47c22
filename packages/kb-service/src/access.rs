//! Access cascade resolution against live directory, membership and grant records.
//!
//! Nothing is cached: every decision reads the current grants, so a toggle takes effect on the
//! next call.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use kb_domain::{
	cascade::{self, AccessGrant, GrantKey, GrantLevel, GrantSet},
	context::{AccessContext, ContextChain, Principal},
	knowledge_base::{KnowledgeBase, ScopeOwner, UploadPolicy},
	membership::{MembershipSet, MembershipTarget},
};

use crate::{Error, KbService, Result};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SetGrantRequest {
	pub principal: Principal,
	pub kb_id: Uuid,
	pub level: GrantLevel,
	pub target_id: Uuid,
	pub enabled: bool,
}

/// The membership a principal needs to administer a knowledge base at its own scope. `None`
/// means platform administrators only.
pub(crate) fn owner_admin_target(owner: &ScopeOwner) -> Option<MembershipTarget> {
	match owner {
		ScopeOwner::Platform => None,
		ScopeOwner::Organization { org_id } => Some(MembershipTarget::Organization(*org_id)),
		ScopeOwner::Workspace { workspace_id, .. } => Some(MembershipTarget::Workspace(*workspace_id)),
		ScopeOwner::Conversation { conversation_id, .. } =>
			Some(MembershipTarget::Conversation(*conversation_id)),
	}
}

impl KbService {
	/// Resolves a context into its chain from directory records. `None` when any entity named
	/// by the context is unknown.
	pub async fn resolve_context(&self, context: AccessContext) -> Result<Option<ContextChain>> {
		let chain = match context {
			AccessContext::Platform => Some(ContextChain::platform()),
			AccessContext::Organization(org_id) =>
				self.store.get_organization(org_id).await?.map(|org| ContextChain::organization(&org)),
			AccessContext::Workspace(workspace_id) => self
				.store
				.get_workspace(workspace_id)
				.await?
				.map(|workspace| ContextChain::workspace(&workspace)),
			AccessContext::Conversation(conversation_id) => self
				.store
				.get_conversation(conversation_id)
				.await?
				.map(|conversation| ContextChain::conversation(&conversation)),
		};

		Ok(chain)
	}

	pub async fn can_access(
		&self,
		principal: &Principal,
		kb_id: Uuid,
		context: AccessContext,
	) -> Result<bool> {
		let Some(kb) = self.store.get_kb(kb_id).await? else {
			return Ok(false);
		};

		self.can_access_kb(principal, &kb, context).await
	}

	/// Access in the knowledge base's own owner context plus its upload policy. Platform
	/// uploads are reserved to platform administrators whatever the policy says.
	pub async fn can_upload(&self, principal: &Principal, kb_id: Uuid) -> Result<bool> {
		let Some(kb) = self.store.get_kb(kb_id).await? else {
			return Ok(false);
		};

		self.can_upload_kb(principal, &kb).await
	}

	/// Knowledge bases visible in `context`, narrowest scope first.
	pub async fn list_accessible_kbs(
		&self,
		principal: &Principal,
		context: AccessContext,
	) -> Result<Vec<KnowledgeBase>> {
		let Some(chain) = self.resolve_context(context).await? else {
			tracing::debug!(?context, "Context does not resolve. No knowledge base is accessible.");

			return Ok(Vec::new());
		};
		let memberships = self.memberships(principal, &chain).await?;

		if let Err(denial) = cascade::evaluate_membership(principal, &chain, &memberships) {
			tracing::debug!(principal = %principal.user_id, reason = %denial, "Context membership denied.");

			return Ok(Vec::new());
		}

		let candidates = self.store.candidate_kbs(&chain).await?;
		let kb_ids: Vec<Uuid> = candidates.iter().map(|kb| kb.kb_id).collect();
		let grants = GrantSet::new(self.store.grants_for(&kb_ids, &chain.grant_targets()).await?);
		let mut accessible: Vec<KnowledgeBase> = candidates
			.into_iter()
			.filter(|kb| match cascade::evaluate(principal, kb, &chain, &grants, &memberships) {
				Ok(()) => true,
				Err(denial) => {
					tracing::debug!(kb_id = %kb.kb_id, reason = %denial, "Knowledge base filtered out.");

					false
				},
			})
			.collect();

		accessible.sort_by(|a, b| {
			b.scope()
				.specificity()
				.cmp(&a.scope().specificity())
				.then_with(|| a.created_at.cmp(&b.created_at))
				.then_with(|| a.kb_id.cmp(&b.kb_id))
		});

		Ok(accessible)
	}

	/// Flips one cascade level. Repeating the same decision leaves a single row.
	pub async fn set_grant(&self, req: SetGrantRequest) -> Result<AccessGrant> {
		let kb = self.active_kb(req.kb_id).await?;

		if !cascade::levels_for(kb.scope()).contains(&req.level) {
			return Err(Error::InvalidRequest {
				message: format!("A {} knowledge base has no {} level.", kb.scope(), req.level),
			});
		}

		self.ensure_grant_target_in_reach(&kb, req.level, req.target_id).await?;

		let memberships = self
			.store
			.memberships_for(req.principal.user_id, &[req.level.target(req.target_id)])
			.await?;
		let memberships = MembershipSet::new(memberships);
		let target = req.level.target(req.target_id);
		let allowed = match req.level {
			GrantLevel::SysOrg => req.principal.platform_admin,
			GrantLevel::OrgEnablement | GrantLevel::WorkspaceEnablement =>
				memberships.is_admin(target),
			GrantLevel::ConversationToggle => memberships.is_member(target),
		};

		if !allowed {
			tracing::debug!(
				principal = %req.principal.user_id,
				kb_id = %kb.kb_id,
				level = %req.level,
				"Grant change refused.",
			);

			return Err(Error::Forbidden {
				message: format!("Changing the {} level requires more rights.", req.level),
			});
		}

		let key = GrantKey { kb_id: kb.kb_id, level: req.level, target_id: req.target_id };
		let grant = self
			.store
			.upsert_grant(key, req.enabled, req.principal.user_id, OffsetDateTime::now_utc())
			.await?;

		tracing::info!(
			kb_id = %kb.kb_id,
			level = %req.level,
			target_id = %req.target_id,
			enabled = req.enabled,
			"Grant updated.",
		);

		Ok(grant)
	}

	/// Every grant of a knowledge base, for its administrators.
	pub async fn list_grants(&self, principal: &Principal, kb_id: Uuid) -> Result<Vec<AccessGrant>> {
		let kb = self.active_kb(kb_id).await?;

		self.require_owner_admin(principal, &kb.owner).await?;

		Ok(self.store.list_grants(kb.kb_id).await?)
	}

	pub(crate) async fn can_access_kb(
		&self,
		principal: &Principal,
		kb: &KnowledgeBase,
		context: AccessContext,
	) -> Result<bool> {
		let Some(chain) = self.resolve_context(context).await? else {
			tracing::debug!(kb_id = %kb.kb_id, ?context, "Context does not resolve.");

			return Ok(false);
		};
		let memberships = self.memberships(principal, &chain).await?;
		let grants = GrantSet::new(self.store.grants_for(&[kb.kb_id], &chain.grant_targets()).await?);

		match cascade::evaluate(principal, kb, &chain, &grants, &memberships) {
			Ok(()) => Ok(true),
			Err(denial) => {
				tracing::debug!(
					principal = %principal.user_id,
					kb_id = %kb.kb_id,
					reason = %denial,
					"Access denied.",
				);

				Ok(false)
			},
		}
	}

	pub(crate) async fn can_upload_kb(
		&self,
		principal: &Principal,
		kb: &KnowledgeBase,
	) -> Result<bool> {
		if !self.can_access_kb(principal, kb, AccessContext::for_owner(&kb.owner)).await? {
			return Ok(false);
		}

		let Some(target) = owner_admin_target(&kb.owner) else {
			return Ok(principal.platform_admin);
		};

		match kb.config.upload_policy {
			UploadPolicy::AllMembers => Ok(true),
			UploadPolicy::AdminsOnly => {
				let memberships = self.store.memberships_for(principal.user_id, &[target]).await?;

				Ok(MembershipSet::new(memberships).is_admin(target))
			},
		}
	}

	/// Administrator of the owning entity, or a platform administrator for platform
	/// knowledge bases.
	pub(crate) async fn is_owner_admin(
		&self,
		principal: &Principal,
		owner: &ScopeOwner,
	) -> Result<bool> {
		let Some(target) = owner_admin_target(owner) else {
			return Ok(principal.platform_admin);
		};
		let memberships = self.store.memberships_for(principal.user_id, &[target]).await?;

		Ok(MembershipSet::new(memberships).is_admin(target))
	}

	pub(crate) async fn require_owner_admin(
		&self,
		principal: &Principal,
		owner: &ScopeOwner,
	) -> Result<()> {
		if self.is_owner_admin(principal, owner).await? {
			return Ok(());
		}

		tracing::debug!(principal = %principal.user_id, scope = %owner.scope(), "Owner administrator required.");

		Err(Error::Forbidden {
			message: format!("Administering a {} knowledge base requires admin rights.", owner.scope()),
		})
	}

	/// Live (not soft-deleted) knowledge base, enabled or not.
	pub(crate) async fn active_kb(&self, kb_id: Uuid) -> Result<KnowledgeBase> {
		match self.store.get_kb(kb_id).await? {
			Some(kb) if !kb.is_deleted() => Ok(kb),
			_ => Err(Error::NotFound { message: format!("knowledge base {kb_id}") }),
		}
	}

	pub(crate) async fn memberships(
		&self,
		principal: &Principal,
		chain: &ContextChain,
	) -> Result<MembershipSet> {
		let targets = chain.membership_targets();

		if targets.is_empty() {
			return Ok(MembershipSet::default());
		}

		Ok(MembershipSet::new(self.store.memberships_for(principal.user_id, &targets).await?))
	}

	async fn ensure_grant_target_in_reach(
		&self,
		kb: &KnowledgeBase,
		level: GrantLevel,
		target_id: Uuid,
	) -> Result<()> {
		let out_of_reach = || Error::InvalidRequest {
			message: format!("Target {target_id} is outside the reach of this knowledge base."),
		};
		let chain = match level {
			GrantLevel::SysOrg | GrantLevel::OrgEnablement => self
				.store
				.get_organization(target_id)
				.await?
				.map(|org| ContextChain::organization(&org)),
			GrantLevel::WorkspaceEnablement => self
				.store
				.get_workspace(target_id)
				.await?
				.map(|workspace| ContextChain::workspace(&workspace)),
			GrantLevel::ConversationToggle => self
				.store
				.get_conversation(target_id)
				.await?
				.map(|conversation| ContextChain::conversation(&conversation)),
		};
		let Some(chain) = chain else {
			return Err(Error::InvalidRequest {
				message: format!("Grant target {target_id} does not exist."),
			});
		};
		// A conversation outside any workspace cannot toggle a workspace knowledge base, and the
		// target chain must fall inside the knowledge base's owner.
		let in_reach = match &kb.owner {
			ScopeOwner::Platform => true,
			ScopeOwner::Organization { org_id } => chain.org_id == Some(*org_id),
			ScopeOwner::Workspace { workspace_id, .. } => chain.workspace_id == Some(*workspace_id),
			ScopeOwner::Conversation { conversation_id, .. } =>
				chain.conversation_id == Some(*conversation_id),
		};

		if in_reach { Ok(()) } else { Err(out_of_reach()) }
	}
}
