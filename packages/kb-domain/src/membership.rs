use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	Admin,
	Member,
}
impl Role {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Admin => "admin",
			Self::Member => "member",
		}
	}

	pub fn parse(raw: &str) -> Result<Self> {
		match raw {
			"admin" => Ok(Self::Admin),
			"member" => Ok(Self::Member),
			_ => Err(Error::InvalidValue { message: "role must be one of: admin, member.".to_string() }),
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MembershipTarget {
	Organization(Uuid),
	Workspace(Uuid),
	Conversation(Uuid),
}
impl MembershipTarget {
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Organization(_) => "organization",
			Self::Workspace(_) => "workspace",
			Self::Conversation(_) => "conversation",
		}
	}

	pub fn id(&self) -> Uuid {
		match self {
			Self::Organization(id) | Self::Workspace(id) | Self::Conversation(id) => *id,
		}
	}

	pub fn parse(kind: &str, id: Uuid) -> Result<Self> {
		match kind {
			"organization" => Ok(Self::Organization(id)),
			"workspace" => Ok(Self::Workspace(id)),
			"conversation" => Ok(Self::Conversation(id)),
			_ => Err(Error::InvalidValue {
				message: "membership target must be one of: organization, workspace, conversation."
					.to_string(),
			}),
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Membership {
	pub principal_id: Uuid,
	pub target: MembershipTarget,
	pub role: Role,
	pub active: bool,
}

/// The memberships of one principal, indexed by target.
#[derive(Clone, Debug, Default)]
pub struct MembershipSet {
	roles: HashMap<MembershipTarget, Role>,
}
impl MembershipSet {
	/// Inactive memberships are dropped; they never confer anything.
	pub fn new(memberships: impl IntoIterator<Item = Membership>) -> Self {
		let roles = memberships
			.into_iter()
			.filter(|membership| membership.active)
			.map(|membership| (membership.target, membership.role))
			.collect();

		Self { roles }
	}

	pub fn role_in(&self, target: MembershipTarget) -> Option<Role> {
		self.roles.get(&target).copied()
	}

	pub fn is_member(&self, target: MembershipTarget) -> bool {
		self.roles.contains_key(&target)
	}

	pub fn is_admin(&self, target: MembershipTarget) -> bool {
		self.role_in(target) == Some(Role::Admin)
	}
}
