//! Cascade evaluation.
//!
//! Each knowledge base scope maps to an ordered list of grant levels. A knowledge base is
//! visible in a context only when every level that has a target in that context carries an
//! explicit enabled grant, and the principal is an active member of the context. A missing
//! grant row counts as disabled.

use std::{
	collections::HashMap,
	fmt::{Display, Formatter},
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Error, Result,
	context::{ContextChain, Principal},
	knowledge_base::{KnowledgeBase, Scope},
	membership::{MembershipSet, MembershipTarget},
};

const PLATFORM_CASCADE: [GrantLevel; 4] = [
	GrantLevel::SysOrg,
	GrantLevel::OrgEnablement,
	GrantLevel::WorkspaceEnablement,
	GrantLevel::ConversationToggle,
];
const ORGANIZATION_CASCADE: [GrantLevel; 3] = [
	GrantLevel::OrgEnablement,
	GrantLevel::WorkspaceEnablement,
	GrantLevel::ConversationToggle,
];
const WORKSPACE_CASCADE: [GrantLevel; 2] =
	[GrantLevel::WorkspaceEnablement, GrantLevel::ConversationToggle];
const CONVERSATION_CASCADE: [GrantLevel; 1] = [GrantLevel::ConversationToggle];

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantLevel {
	/// Platform administrators offering a platform knowledge base to an organization.
	SysOrg,
	OrgEnablement,
	WorkspaceEnablement,
	ConversationToggle,
}
impl GrantLevel {
	pub const ALL: [GrantLevel; 4] = PLATFORM_CASCADE;

	pub fn as_str(self) -> &'static str {
		match self {
			Self::SysOrg => "sys_org",
			Self::OrgEnablement => "org_enablement",
			Self::WorkspaceEnablement => "workspace_enablement",
			Self::ConversationToggle => "conversation_toggle",
		}
	}

	pub fn parse(raw: &str) -> Result<Self> {
		match raw {
			"sys_org" => Ok(Self::SysOrg),
			"org_enablement" => Ok(Self::OrgEnablement),
			"workspace_enablement" => Ok(Self::WorkspaceEnablement),
			"conversation_toggle" => Ok(Self::ConversationToggle),
			_ => Err(Error::InvalidValue {
				message: "grant level must be one of: sys_org, org_enablement, workspace_enablement, conversation_toggle."
					.to_string(),
			}),
		}
	}

	/// The membership target a grant at this level is keyed on.
	pub fn target(self, target_id: Uuid) -> MembershipTarget {
		match self {
			Self::SysOrg | Self::OrgEnablement => MembershipTarget::Organization(target_id),
			Self::WorkspaceEnablement => MembershipTarget::Workspace(target_id),
			Self::ConversationToggle => MembershipTarget::Conversation(target_id),
		}
	}
}

impl Display for GrantLevel {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		self.as_str().fmt(f)
	}
}

pub fn levels_for(scope: Scope) -> &'static [GrantLevel] {
	match scope {
		Scope::Platform => &PLATFORM_CASCADE,
		Scope::Organization => &ORGANIZATION_CASCADE,
		Scope::Workspace => &WORKSPACE_CASCADE,
		Scope::Conversation => &CONVERSATION_CASCADE,
	}
}

/// The level a knowledge base's own administrators decide at, if its scope has one.
pub fn own_level(scope: Scope) -> Option<GrantLevel> {
	match scope {
		Scope::Platform => None,
		Scope::Organization => Some(GrantLevel::OrgEnablement),
		Scope::Workspace => Some(GrantLevel::WorkspaceEnablement),
		Scope::Conversation => Some(GrantLevel::ConversationToggle),
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct GrantKey {
	pub kb_id: Uuid,
	pub level: GrantLevel,
	pub target_id: Uuid,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AccessGrant {
	pub grant_id: Uuid,
	pub kb_id: Uuid,
	pub level: GrantLevel,
	pub target_id: Uuid,
	pub enabled: bool,
	pub created_by: Uuid,
	pub created_at: OffsetDateTime,
	pub updated_by: Uuid,
	pub updated_at: OffsetDateTime,
}
impl AccessGrant {
	pub fn new(key: GrantKey, enabled: bool, actor: Uuid, now: OffsetDateTime) -> Self {
		Self {
			grant_id: Uuid::new_v4(),
			kb_id: key.kb_id,
			level: key.level,
			target_id: key.target_id,
			enabled,
			created_by: actor,
			created_at: now,
			updated_by: actor,
			updated_at: now,
		}
	}

	pub fn key(&self) -> GrantKey {
		GrantKey { kb_id: self.kb_id, level: self.level, target_id: self.target_id }
	}
}

#[derive(Clone, Debug, Default)]
pub struct GrantSet {
	enabled: HashMap<GrantKey, bool>,
}
impl GrantSet {
	pub fn new(grants: impl IntoIterator<Item = AccessGrant>) -> Self {
		Self { enabled: grants.into_iter().map(|grant| (grant.key(), grant.enabled)).collect() }
	}

	pub fn get(&self, key: &GrantKey) -> Option<bool> {
		self.enabled.get(key).copied()
	}
}

/// Why access was refused. For logs only; callers never see it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Denial {
	Inactive,
	OutOfReach,
	PlatformAdminRequired,
	NotMember(MembershipTarget),
	LevelMissing(GrantLevel),
	LevelDisabled(GrantLevel),
}

impl Display for Denial {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Inactive => write!(f, "knowledge base is disabled or deleted"),
			Self::OutOfReach => write!(f, "knowledge base is outside the context"),
			Self::PlatformAdminRequired => write!(f, "platform context requires a platform admin"),
			Self::NotMember(target) =>
				write!(f, "no active {} membership for {}", target.kind(), target.id()),
			Self::LevelMissing(level) => write!(f, "no {level} grant"),
			Self::LevelDisabled(level) => write!(f, "{level} grant is disabled"),
		}
	}
}

/// Walks the cascade for `kb` in `chain`, stopping at the first missing or disabled level.
pub fn evaluate_cascade(
	kb: &KnowledgeBase,
	chain: &ContextChain,
	grants: &GrantSet,
) -> Result<(), Denial> {
	for &level in levels_for(kb.scope()) {
		let Some(target_id) = chain.target_for(level) else {
			continue;
		};

		match grants.get(&GrantKey { kb_id: kb.kb_id, level, target_id }) {
			Some(true) => {},
			Some(false) => return Err(Denial::LevelDisabled(level)),
			None => return Err(Denial::LevelMissing(level)),
		}
	}

	Ok(())
}

/// Membership in the context, independent of any knowledge base.
pub fn evaluate_membership(
	principal: &Principal,
	chain: &ContextChain,
	memberships: &MembershipSet,
) -> Result<(), Denial> {
	let Some(org_id) = chain.org_id else {
		return if principal.platform_admin { Ok(()) } else { Err(Denial::PlatformAdminRequired) };
	};
	let org = MembershipTarget::Organization(org_id);

	if !memberships.is_member(org) {
		return Err(Denial::NotMember(org));
	}
	if let Some(narrowest) = chain.narrowest()
		&& !memberships.is_member(narrowest)
	{
		return Err(Denial::NotMember(narrowest));
	}

	Ok(())
}

pub fn evaluate(
	principal: &Principal,
	kb: &KnowledgeBase,
	chain: &ContextChain,
	grants: &GrantSet,
	memberships: &MembershipSet,
) -> Result<(), Denial> {
	if !kb.is_active() {
		return Err(Denial::Inactive);
	}
	if !chain.reaches(&kb.owner) {
		return Err(Denial::OutOfReach);
	}

	evaluate_membership(principal, chain, memberships)?;
	evaluate_cascade(kb, chain, grants)
}
