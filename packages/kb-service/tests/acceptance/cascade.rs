use uuid::Uuid;

use kb_domain::{
	cascade::GrantLevel,
	context::{AccessContext, Principal},
	knowledge_base::Scope,
	membership::{Membership, MembershipTarget, Role},
};
use kb_service::{Error, SetGrantRequest, UploadTarget};

use super::Fixture;

#[tokio::test]
async fn org_kb_needs_every_level_the_context_has_a_target_for() {
	let fx = Fixture::new().await;
	let kb = fx.org_kb("handbook").await;
	let org = AccessContext::Organization(fx.org.org_id);
	let workspace = AccessContext::Workspace(fx.workspace.workspace_id);
	let conversation = AccessContext::Conversation(fx.conversation.conversation_id);

	assert!(fx.service.can_access(&fx.member, kb.kb_id, org).await.unwrap());
	assert!(!fx.service.can_access(&fx.member, kb.kb_id, workspace).await.unwrap());

	fx.grant(&kb, GrantLevel::WorkspaceEnablement, true).await;

	assert!(fx.service.can_access(&fx.member, kb.kb_id, workspace).await.unwrap());
	assert!(!fx.service.can_access(&fx.member, kb.kb_id, conversation).await.unwrap());

	fx.grant(&kb, GrantLevel::ConversationToggle, true).await;

	assert!(fx.service.can_access(&fx.member, kb.kb_id, conversation).await.unwrap());
}

#[tokio::test]
async fn disabling_any_single_level_revokes_access_and_enabling_restores_it() {
	let fx = Fixture::new().await;
	let kb = fx.platform_kb("public docs").await;
	let conversation = AccessContext::Conversation(fx.conversation.conversation_id);

	fx.open_cascade(&kb).await;

	assert!(fx.service.can_access(&fx.member, kb.kb_id, conversation).await.unwrap());

	for level in GrantLevel::ALL {
		fx.grant(&kb, level, false).await;

		assert!(
			!fx.service.can_access(&fx.member, kb.kb_id, conversation).await.unwrap(),
			"{level} disabled but access granted"
		);

		fx.grant(&kb, level, true).await;

		assert!(fx.service.can_access(&fx.member, kb.kb_id, conversation).await.unwrap());
	}
}

#[tokio::test]
async fn platform_context_is_reserved_to_platform_admins() {
	let fx = Fixture::new().await;
	let kb = fx.platform_kb("public docs").await;

	assert!(fx.service.can_access(&fx.platform_admin, kb.kb_id, AccessContext::Platform).await.unwrap());
	assert!(!fx.service.can_access(&fx.member, kb.kb_id, AccessContext::Platform).await.unwrap());

	// Reaching an organization still needs the organization's consent.
	let org = AccessContext::Organization(fx.org.org_id);

	fx.grant(&kb, GrantLevel::SysOrg, true).await;

	assert!(!fx.service.can_access(&fx.member, kb.kb_id, org).await.unwrap());

	fx.grant(&kb, GrantLevel::OrgEnablement, true).await;

	assert!(fx.service.can_access(&fx.member, kb.kb_id, org).await.unwrap());
}

#[tokio::test]
async fn enablement_never_substitutes_for_membership() {
	let fx = Fixture::new().await;
	let kb = fx.org_kb("handbook").await;
	let workspace = AccessContext::Workspace(fx.workspace.workspace_id);

	fx.open_cascade(&kb).await;

	assert!(!fx.service.can_access(&fx.outsider, kb.kb_id, workspace).await.unwrap());

	fx.service
		.upsert_membership(Membership {
			principal_id: fx.member.user_id,
			target: MembershipTarget::Workspace(fx.workspace.workspace_id),
			role: Role::Member,
			active: false,
		})
		.await
		.unwrap();

	assert!(!fx.service.can_access(&fx.member, kb.kb_id, workspace).await.unwrap());
	assert!(
		fx.service
			.can_access(&fx.member, kb.kb_id, AccessContext::Organization(fx.org.org_id))
			.await
			.unwrap()
	);
}

#[tokio::test]
async fn disabled_and_deleted_kbs_are_never_accessible() {
	let fx = Fixture::new().await;
	let kb = fx.org_kb("handbook").await;
	let org = AccessContext::Organization(fx.org.org_id);

	fx.service
		.update_kb(kb_service::UpdateKbRequest {
			principal: fx.admin,
			kb_id: kb.kb_id,
			name: None,
			config: None,
			enabled: Some(false),
		})
		.await
		.unwrap();

	assert!(!fx.service.can_access(&fx.member, kb.kb_id, org).await.unwrap());

	let other = fx.org_kb("archive").await;

	fx.service.delete_kb(&fx.admin, other.kb_id).await.unwrap();

	assert!(!fx.service.can_access(&fx.member, other.kb_id, org).await.unwrap());
	assert!(fx.service.list_accessible_kbs(&fx.member, org).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_contexts_resolve_to_nothing() {
	let fx = Fixture::new().await;
	let kb = fx.org_kb("handbook").await;
	let ghost = AccessContext::Workspace(Uuid::new_v4());

	assert!(!fx.service.can_access(&fx.member, kb.kb_id, ghost).await.unwrap());
	assert!(fx.service.list_accessible_kbs(&fx.member, ghost).await.unwrap().is_empty());
	assert!(
		!fx.service
			.can_access(&fx.member, Uuid::new_v4(), AccessContext::Organization(fx.org.org_id))
			.await
			.unwrap()
	);
}

#[tokio::test]
async fn accessible_kbs_are_listed_narrowest_first() {
	let fx = Fixture::new().await;
	let platform = fx.platform_kb("public docs").await;
	let org = fx.org_kb("handbook").await;

	fx.open_cascade(&platform).await;
	fx.open_cascade(&org).await;

	let workspace_kb = fx
		.upload_text(
			&fx.member,
			UploadTarget::Owner(AccessContext::Workspace(fx.workspace.workspace_id)),
			"w.txt",
			"workspace notes",
		)
		.await
		.kb;
	let conversation_kb = fx
		.upload_text(
			&fx.member,
			UploadTarget::Owner(AccessContext::Conversation(fx.conversation.conversation_id)),
			"c.txt",
			"conversation notes",
		)
		.await
		.kb;

	fx.grant(&workspace_kb, GrantLevel::ConversationToggle, true).await;

	let listed = fx
		.service
		.list_accessible_kbs(&fx.member, AccessContext::Conversation(fx.conversation.conversation_id))
		.await
		.unwrap();
	let scopes: Vec<Scope> = listed.iter().map(|kb| kb.scope()).collect();

	assert_eq!(
		scopes,
		vec![Scope::Conversation, Scope::Workspace, Scope::Organization, Scope::Platform]
	);
	assert_eq!(listed[0].kb_id, conversation_kb.kb_id);
	assert_eq!(listed[1].kb_id, workspace_kb.kb_id);

	// The workspace context never sees a conversation's knowledge base.
	let in_workspace = fx
		.service
		.list_accessible_kbs(&fx.member, AccessContext::Workspace(fx.workspace.workspace_id))
		.await
		.unwrap();

	assert!(in_workspace.iter().all(|kb| kb.kb_id != conversation_kb.kb_id));
	assert_eq!(in_workspace.len(), 3);
}

#[tokio::test]
async fn grant_changes_are_validated_and_idempotent() {
	let fx = Fixture::new().await;
	let kb = fx.org_kb("handbook").await;
	let request = |principal: Principal, level: GrantLevel, target_id: Uuid| SetGrantRequest {
		principal,
		kb_id: kb.kb_id,
		level,
		target_id,
		enabled: true,
	};

	let err = fx
		.service
		.set_grant(request(fx.platform_admin, GrantLevel::SysOrg, fx.org.org_id))
		.await
		.unwrap_err();

	assert!(matches!(err, Error::InvalidRequest { .. }));

	let err = fx
		.service
		.set_grant(request(fx.admin, GrantLevel::WorkspaceEnablement, Uuid::new_v4()))
		.await
		.unwrap_err();

	assert!(matches!(err, Error::InvalidRequest { .. }));

	let err = fx
		.service
		.set_grant(request(fx.member, GrantLevel::WorkspaceEnablement, fx.workspace.workspace_id))
		.await
		.unwrap_err();

	assert!(matches!(err, Error::Forbidden { .. }));

	// Conversation members decide the toggle for their own conversation.
	for _ in 0..3 {
		fx.service
			.set_grant(request(
				fx.member,
				GrantLevel::ConversationToggle,
				fx.conversation.conversation_id,
			))
			.await
			.unwrap();
	}

	let grants = fx.service.list_grants(&fx.admin, kb.kb_id).await.unwrap();
	let toggles = grants.iter().filter(|grant| grant.level == GrantLevel::ConversationToggle).count();

	assert_eq!(toggles, 1);
	assert!(grants.iter().any(|grant| grant.level == GrantLevel::OrgEnablement && grant.enabled));
	assert!(matches!(
		fx.service.list_grants(&fx.member, kb.kb_id).await.unwrap_err(),
		Error::Forbidden { .. }
	));
}
