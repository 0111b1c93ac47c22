use std::collections::HashSet;

use uuid::Uuid;

use kb_domain::{
	cascade::GrantLevel,
	context::{AccessContext, Organization},
	knowledge_base::{KbConfig, OwnerRefs, Scope, ScopeOwner},
};
use kb_service::{CreateKbRequest, Error, UpdateKbRequest};

use super::Fixture;

fn workspace_owner(fx: &Fixture) -> ScopeOwner {
	ScopeOwner::Workspace { org_id: fx.org.org_id, workspace_id: fx.workspace.workspace_id }
}

#[tokio::test]
async fn owner_references_must_match_the_scope() {
	let fx = Fixture::new().await;
	let request = |scope: Scope, owners: OwnerRefs| CreateKbRequest {
		principal: fx.admin,
		name: "misfiled".to_string(),
		scope,
		owners,
		config: KbConfig::default(),
	};
	let cases = [
		(Scope::Platform, OwnerRefs { org_id: Some(fx.org.org_id), ..OwnerRefs::default() }),
		(
			Scope::Organization,
			OwnerRefs {
				org_id: Some(fx.org.org_id),
				workspace_id: Some(fx.workspace.workspace_id),
				conversation_id: None,
			},
		),
		(Scope::Workspace, OwnerRefs { org_id: Some(fx.org.org_id), ..OwnerRefs::default() }),
		(
			Scope::Conversation,
			OwnerRefs { workspace_id: Some(fx.workspace.workspace_id), ..OwnerRefs::default() },
		),
	];

	for (scope, owners) in cases {
		let err = fx.service.create_kb(request(scope, owners)).await.unwrap_err();

		assert!(matches!(err, Error::InvalidScopeOwners { .. }), "{scope}: {err}");
	}

	// Well-formed references that disagree with the directory.
	let other = Organization { org_id: Uuid::new_v4(), name: "globex".to_string() };

	fx.service.upsert_organization(other.clone()).await.unwrap();

	let err = fx
		.service
		.create_kb(request(
			Scope::Workspace,
			OwnerRefs {
				org_id: Some(other.org_id),
				workspace_id: Some(fx.workspace.workspace_id),
				conversation_id: None,
			},
		))
		.await
		.unwrap_err();

	assert!(matches!(err, Error::InvalidScopeOwners { .. }));

	let err = fx
		.service
		.create_kb(request(
			Scope::Organization,
			OwnerRefs { org_id: Some(Uuid::new_v4()), ..OwnerRefs::default() },
		))
		.await
		.unwrap_err();

	assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn concurrent_first_uploads_share_one_knowledge_base() {
	let fx = Fixture::new().await;
	let owner = workspace_owner(&fx);
	let (a, b, c, d) = tokio::join!(
		fx.service.get_or_create_for_owner(owner, fx.admin.user_id),
		fx.service.get_or_create_for_owner(owner, fx.member.user_id),
		fx.service.get_or_create_for_owner(owner, fx.member.user_id),
		fx.service.get_or_create_for_owner(owner, fx.admin.user_id),
	);
	let ids: HashSet<Uuid> =
		[a.unwrap(), b.unwrap(), c.unwrap(), d.unwrap()].iter().map(|kb| kb.kb_id).collect();

	assert_eq!(ids.len(), 1);

	let listed = fx.service.list_kbs_for_owner(&fx.admin, &owner).await.unwrap();

	assert_eq!(listed.len(), 1);

	let grants = fx.service.list_grants(&fx.admin, listed[0].kb_id).await.unwrap();

	assert_eq!(grants.len(), 1);
	assert_eq!(grants[0].level, GrantLevel::WorkspaceEnablement);
	assert!(grants[0].enabled);
}

#[tokio::test]
async fn workspace_and_conversation_kbs_are_singletons() {
	let fx = Fixture::new().await;
	let owners = OwnerRefs {
		org_id: Some(fx.org.org_id),
		workspace_id: Some(fx.workspace.workspace_id),
		conversation_id: None,
	};
	let create = |name: &str| CreateKbRequest {
		principal: fx.admin,
		name: name.to_string(),
		scope: Scope::Workspace,
		owners,
		config: KbConfig::default(),
	};
	let first = fx.service.create_kb(create("research notes")).await.unwrap();
	let err = fx.service.create_kb(create("second notes")).await.unwrap_err();

	assert!(matches!(err, Error::Conflict { .. }));

	// Implicit creation finds the explicit one.
	let found =
		fx.service.get_or_create_for_owner(workspace_owner(&fx), fx.member.user_id).await.unwrap();

	assert_eq!(found.kb_id, first.kb_id);

	// A deleted singleton frees the slot.
	fx.service.delete_kb(&fx.admin, first.kb_id).await.unwrap();

	let replacement = fx.service.create_kb(create("fresh notes")).await.unwrap();

	assert_ne!(replacement.kb_id, first.kb_id);

	// Organizations may hold any number.
	let a = fx.org_kb("handbook").await;
	let b = fx.org_kb("handbook").await;

	assert_ne!(a.kb_id, b.kb_id);

	let err = fx
		.service
		.get_or_create_for_owner(ScopeOwner::Organization { org_id: fx.org.org_id }, fx.admin.user_id)
		.await
		.unwrap_err();

	assert!(matches!(err, Error::InvalidRequest { .. }));
}

#[tokio::test]
async fn creating_needs_rights_at_the_owning_scope() {
	let fx = Fixture::new().await;
	let org_owners = OwnerRefs { org_id: Some(fx.org.org_id), ..OwnerRefs::default() };
	let request = |principal, scope, owners| CreateKbRequest {
		principal,
		name: "kb".to_string(),
		scope,
		owners,
		config: KbConfig::default(),
	};

	assert!(matches!(
		fx.service
			.create_kb(request(fx.member, Scope::Organization, org_owners))
			.await
			.unwrap_err(),
		Error::Forbidden { .. }
	));
	assert!(matches!(
		fx.service
			.create_kb(request(fx.admin, Scope::Platform, OwnerRefs::default()))
			.await
			.unwrap_err(),
		Error::Forbidden { .. }
	));

	// Any participant may create their conversation's knowledge base.
	let conversation_owners = OwnerRefs {
		org_id: Some(fx.org.org_id),
		workspace_id: Some(fx.workspace.workspace_id),
		conversation_id: Some(fx.conversation.conversation_id),
	};
	let kb = fx
		.service
		.create_kb(request(fx.member, Scope::Conversation, conversation_owners))
		.await
		.unwrap();

	assert_eq!(kb.scope(), Scope::Conversation);
	assert!(
		fx.service
			.can_access(
				&fx.member,
				kb.kb_id,
				AccessContext::Conversation(fx.conversation.conversation_id)
			)
			.await
			.unwrap()
	);
	assert!(matches!(
		fx.service
			.create_kb(request(fx.outsider, Scope::Conversation, conversation_owners))
			.await
			.unwrap_err(),
		Error::Forbidden { .. }
	));
}

#[tokio::test]
async fn update_and_delete_are_reserved_to_owner_admins() {
	let fx = Fixture::new().await;
	let kb = fx.org_kb("handbook").await;
	let rename = |principal, name: &str| UpdateKbRequest {
		principal,
		kb_id: kb.kb_id,
		name: Some(name.to_string()),
		config: None,
		enabled: None,
	};

	assert!(matches!(
		fx.service.update_kb(rename(fx.member, "mine now")).await.unwrap_err(),
		Error::Forbidden { .. }
	));
	assert!(matches!(
		fx.service.update_kb(rename(fx.admin, "   ")).await.unwrap_err(),
		Error::InvalidRequest { .. }
	));

	let renamed = fx.service.update_kb(rename(fx.admin, "employee handbook")).await.unwrap();

	assert_eq!(renamed.name, "employee handbook");
	assert_eq!(fx.service.get_kb(kb.kb_id).await.unwrap().name, "employee handbook");
	assert!(matches!(
		fx.service.delete_kb(&fx.member, kb.kb_id).await.unwrap_err(),
		Error::Forbidden { .. }
	));

	let deleted = fx.service.delete_kb(&fx.admin, kb.kb_id).await.unwrap();

	assert!(deleted.deleted_at.is_some());
	assert!(matches!(fx.service.get_kb(kb.kb_id).await.unwrap_err(), Error::NotFound { .. }));
	assert!(matches!(
		fx.service.update_kb(rename(fx.admin, "again")).await.unwrap_err(),
		Error::NotFound { .. }
	));
	assert!(
		fx.service
			.list_kbs_for_owner(&fx.admin, &ScopeOwner::Organization { org_id: fx.org.org_id })
			.await
			.unwrap()
			.is_empty()
	);
}
