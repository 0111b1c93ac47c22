use std::{sync::Arc, time::Duration};

use uuid::Uuid;

use kb_domain::{
	cascade::GrantLevel,
	context::{AccessContext, Principal, Workspace},
	knowledge_base::Scope,
	membership::{MembershipTarget, Role},
};
use kb_service::{Error, SearchErrorCode, SearchRequest, UploadTarget};

use super::{FailingEmbedding, Fixture, SlowEmbedding};

fn search(principal: Principal, context: AccessContext, query: &str) -> SearchRequest {
	SearchRequest {
		principal,
		context,
		query: query.to_string(),
		top_k: None,
		min_similarity: None,
		timeout_ms: None,
	}
}

#[tokio::test]
async fn org_kb_reaches_a_conversation_only_when_every_level_agrees() {
	let fx = Fixture::new().await;
	let kb = fx.org_kb("handbook").await;
	let uploaded = fx
		.upload_text(&fx.admin, UploadTarget::KnowledgeBase(kb.kb_id), "leave.txt", "parental leave policy")
		.await;

	fx.drain().await;

	let conversation = AccessContext::Conversation(fx.conversation.conversation_id);
	let query = || search(fx.member, conversation, "parental leave policy");
	let response = fx.service.search(query()).await.unwrap();

	assert!(response.items.is_empty());
	assert!(response.error.is_none());

	fx.grant(&kb, GrantLevel::WorkspaceEnablement, true).await;

	assert!(fx.service.search(query()).await.unwrap().items.is_empty());

	fx.grant(&kb, GrantLevel::ConversationToggle, true).await;

	let response = fx.service.search(query()).await.unwrap();
	let [item] = response.items.as_slice() else {
		panic!("Expected one hit, got {:?}.", response.items);
	};

	assert_eq!(item.kb_id, kb.kb_id);
	assert_eq!(item.kb_name, "handbook");
	assert_eq!(item.scope, Scope::Organization);
	assert_eq!(item.document_id, uploaded.document.document_id);
	assert_eq!(item.filename, "leave.txt");
	assert_eq!(item.text, "parental leave policy");
	assert!(item.similarity > 0.99);

	// Turning the conversation toggle off hides it again on the next call.
	fx.grant(&kb, GrantLevel::ConversationToggle, false).await;

	assert!(fx.service.search(query()).await.unwrap().items.is_empty());
}

#[tokio::test]
async fn results_never_leak_from_other_workspaces() {
	let fx = Fixture::new().await;
	let other = Workspace {
		workspace_id: Uuid::new_v4(),
		org_id: fx.org.org_id,
		name: "finance".to_string(),
	};

	fx.service.upsert_workspace(other.clone()).await.unwrap();
	fx.join(&fx.admin, MembershipTarget::Workspace(other.workspace_id), Role::Admin).await;

	let ours = fx
		.upload_text(
			&fx.member,
			UploadTarget::Owner(AccessContext::Workspace(fx.workspace.workspace_id)),
			"ours.txt",
			"budget forecast",
		)
		.await;
	let theirs = fx
		.upload_text(
			&fx.admin,
			UploadTarget::Owner(AccessContext::Workspace(other.workspace_id)),
			"theirs.txt",
			"budget forecast",
		)
		.await;

	fx.drain().await;

	for principal in [fx.member, fx.admin] {
		let response = fx
			.service
			.search(search(
				principal,
				AccessContext::Workspace(fx.workspace.workspace_id),
				"budget forecast",
			))
			.await
			.unwrap();

		assert!(!response.items.is_empty());
		assert!(response.items.iter().all(|item| item.kb_id == ours.kb.kb_id));
	}

	// The member does not belong to the other workspace at all.
	let response = fx
		.service
		.search(search(fx.member, AccessContext::Workspace(other.workspace_id), "budget forecast"))
		.await
		.unwrap();

	assert!(response.items.is_empty());

	let response = fx
		.service
		.search(search(fx.admin, AccessContext::Workspace(other.workspace_id), "budget forecast"))
		.await
		.unwrap();

	assert!(response.items.iter().all(|item| item.kb_id == theirs.kb.kb_id));
	assert!(!response.items.is_empty());
}

#[tokio::test]
async fn equal_scores_prefer_narrower_scope_then_newer_chunks() {
	let fx = Fixture::new().await;
	let older = fx.org_kb("older").await;
	let newer = fx.org_kb("newer").await;

	for kb in [&older, &newer] {
		fx.grant(kb, GrantLevel::WorkspaceEnablement, true).await;
	}

	fx.upload_text(&fx.admin, UploadTarget::KnowledgeBase(older.kb_id), "a.txt", "release checklist")
		.await;
	fx.drain().await;
	tokio::time::sleep(Duration::from_millis(5)).await;
	fx.upload_text(&fx.admin, UploadTarget::KnowledgeBase(newer.kb_id), "b.txt", "release checklist")
		.await;
	fx.drain().await;
	tokio::time::sleep(Duration::from_millis(5)).await;

	let workspace_kb = fx
		.upload_text(
			&fx.member,
			UploadTarget::Owner(AccessContext::Workspace(fx.workspace.workspace_id)),
			"c.txt",
			"release checklist",
		)
		.await
		.kb;

	fx.drain().await;

	let response = fx
		.service
		.search(search(
			fx.member,
			AccessContext::Workspace(fx.workspace.workspace_id),
			"release checklist",
		))
		.await
		.unwrap();
	let order: Vec<Uuid> = response.items.iter().map(|item| item.kb_id).collect();

	assert_eq!(order, vec![workspace_kb.kb_id, newer.kb_id, older.kb_id]);

	// top_k cuts after ranking.
	let mut limited =
		search(fx.member, AccessContext::Workspace(fx.workspace.workspace_id), "release checklist");

	limited.top_k = Some(1);

	let response = fx.service.search(limited).await.unwrap();

	assert_eq!(response.items.len(), 1);
	assert_eq!(response.items[0].kb_id, workspace_kb.kb_id);
}

#[tokio::test]
async fn similarity_floor_keeps_exact_matches() {
	let fx = Fixture::new().await;
	let kb = fx.org_kb("handbook").await;

	fx.upload_text(&fx.admin, UploadTarget::KnowledgeBase(kb.kb_id), "a.txt", "alpha").await;
	fx.drain().await;

	let mut request = search(fx.member, AccessContext::Organization(fx.org.org_id), "alpha");

	request.min_similarity = Some(-1.0);

	assert_eq!(fx.service.search(request.clone()).await.unwrap().items.len(), 1);

	request.min_similarity = Some(0.5);

	assert_eq!(fx.service.search(request).await.unwrap().items.len(), 1);
}

#[tokio::test]
async fn embedding_outages_degrade_instead_of_failing() {
	let fx = Fixture::with_embedding(Arc::new(FailingEmbedding)).await;
	let kb = fx.org_kb("handbook").await;

	fx.open_cascade(&kb).await;

	let response = fx
		.service
		.search(search(fx.member, AccessContext::Organization(fx.org.org_id), "anything"))
		.await
		.unwrap();
	let degradation = response.error.expect("Response should explain the empty result.");

	assert!(response.items.is_empty());
	assert_eq!(degradation.code, SearchErrorCode::EmbeddingUnavailable);
	assert_eq!(degradation.code.as_str(), "EMBEDDING_UNAVAILABLE");
}

#[tokio::test]
async fn slow_searches_time_out_with_a_code() {
	let fx =
		Fixture::with_embedding(Arc::new(SlowEmbedding { delay: Duration::from_millis(500) })).await;
	let mut request = search(fx.member, AccessContext::Organization(fx.org.org_id), "anything");

	request.timeout_ms = Some(20);

	let response = fx.service.search(request).await.unwrap();

	assert!(response.items.is_empty());
	assert_eq!(response.error.map(|error| error.code), Some(SearchErrorCode::SearchTimeout));
}

#[tokio::test]
async fn malformed_queries_are_rejected() {
	let fx = Fixture::new().await;
	let org = AccessContext::Organization(fx.org.org_id);
	let mut requests = Vec::new();

	requests.push(search(fx.member, org, "   "));

	for top_k in [0, 21] {
		let mut request = search(fx.member, org, "alpha");

		request.top_k = Some(top_k);
		requests.push(request);
	}
	for min_similarity in [1.5, f32::NAN] {
		let mut request = search(fx.member, org, "alpha");

		request.min_similarity = Some(min_similarity);
		requests.push(request);
	}

	for request in requests {
		let err = fx.service.search(request).await.unwrap_err();

		assert!(matches!(err, Error::InvalidRequest { .. }), "{err}");
	}
}
