use kb_domain::{
	context::AccessContext,
	document::{DocumentStatus, IngestErrorCode},
	knowledge_base::{KbConfig, OwnerRefs, Scope, UploadPolicy},
};
use kb_service::{CreateKbRequest, Error, IngestOutcome, UploadRequest, UploadTarget};

use super::{Fixture, test_config};

#[tokio::test]
async fn empty_and_unsupported_uploads_fail_at_intake() {
	let fx = Fixture::new().await;
	let kb = fx.org_kb("handbook").await;
	let empty =
		fx.upload_text(&fx.member, UploadTarget::KnowledgeBase(kb.kb_id), "empty.txt", "").await;

	assert!(!empty.enqueued);
	assert_eq!(empty.document.status, DocumentStatus::Failed);
	assert_eq!(
		empty.document.error.as_ref().map(|error| error.code),
		Some(IngestErrorCode::UnsupportedFormat)
	);

	let binary = fx
		.service
		.upload(UploadRequest {
			principal: fx.member,
			target: UploadTarget::KnowledgeBase(kb.kb_id),
			filename: "setup.exe".to_string(),
			content_type: "application/x-msdownload".to_string(),
			bytes: vec![0x4d, 0x5a, 0x90, 0x00],
		})
		.await
		.unwrap();

	assert!(!binary.enqueued);
	assert_eq!(binary.document.status, DocumentStatus::Failed);
	assert_eq!(binary.document.blob_location, None);
	assert!(fx.queue.open_jobs().is_empty());

	// Both rejections stay visible to the uploader.
	let listed = fx.service.list_documents(&fx.member, kb.kb_id).await.unwrap();

	assert_eq!(listed.len(), 2);
	assert!(listed.iter().all(|document| document.status == DocumentStatus::Failed));
}

#[tokio::test]
async fn oversized_uploads_are_refused_without_a_record() {
	let fx = Fixture::new().await;
	let kb = fx.org_kb("handbook").await;
	let limit = test_config().ingestion.max_document_bytes;
	let err = fx
		.service
		.upload(UploadRequest {
			principal: fx.member,
			target: UploadTarget::KnowledgeBase(kb.kb_id),
			filename: "huge.txt".to_string(),
			content_type: "text/plain".to_string(),
			bytes: vec![b'a'; limit as usize + 1],
		})
		.await
		.unwrap_err();

	assert!(matches!(err, Error::PayloadTooLarge { size, limit: l } if size == limit + 1 && l == limit));
	assert!(fx.service.list_documents(&fx.member, kb.kb_id).await.unwrap().is_empty());
	assert!(fx.queue.open_jobs().is_empty());
}

#[tokio::test]
async fn admins_only_policy_limits_uploads_to_owner_admins() {
	let fx = Fixture::new().await;
	let kb = fx
		.service
		.create_kb(CreateKbRequest {
			principal: fx.admin,
			name: "policies".to_string(),
			scope: Scope::Organization,
			owners: OwnerRefs { org_id: Some(fx.org.org_id), ..OwnerRefs::default() },
			config: KbConfig { upload_policy: UploadPolicy::AdminsOnly, auto_index: true },
		})
		.await
		.unwrap();

	assert!(!fx.service.can_upload(&fx.member, kb.kb_id).await.unwrap());
	assert!(fx.service.can_upload(&fx.admin, kb.kb_id).await.unwrap());

	let err = fx
		.service
		.upload(UploadRequest {
			principal: fx.member,
			target: UploadTarget::KnowledgeBase(kb.kb_id),
			filename: "notes.txt".to_string(),
			content_type: "text/plain".to_string(),
			bytes: b"member notes".to_vec(),
		})
		.await
		.unwrap_err();

	assert!(matches!(err, Error::Forbidden { .. }));

	let uploaded =
		fx.upload_text(&fx.admin, UploadTarget::KnowledgeBase(kb.kb_id), "rules.txt", "house rules").await;

	assert!(uploaded.enqueued);
	assert_eq!(uploaded.document.status, DocumentStatus::Pending);

	// Readers are unaffected by the upload policy.
	assert_eq!(fx.service.list_documents(&fx.member, kb.kb_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn platform_uploads_are_reserved_to_platform_admins() {
	let fx = Fixture::new().await;
	let kb = fx.platform_kb("public docs").await;

	fx.open_cascade(&kb).await;

	assert!(!fx.service.can_upload(&fx.admin, kb.kb_id).await.unwrap());
	assert!(!fx.service.can_upload(&fx.member, kb.kb_id).await.unwrap());
	assert!(fx.service.can_upload(&fx.platform_admin, kb.kb_id).await.unwrap());

	let err = fx
		.service
		.upload(UploadRequest {
			principal: fx.admin,
			target: UploadTarget::KnowledgeBase(kb.kb_id),
			filename: "guide.txt".to_string(),
			content_type: "text/plain".to_string(),
			bytes: b"guide".to_vec(),
		})
		.await
		.unwrap_err();

	assert!(matches!(err, Error::Forbidden { .. }));

	let uploaded = fx
		.upload_text(&fx.platform_admin, UploadTarget::KnowledgeBase(kb.kb_id), "guide.txt", "guide")
		.await;

	assert_eq!(uploaded.kb.kb_id, kb.kb_id);
}

#[tokio::test]
async fn owner_uploads_reuse_a_single_knowledge_base() {
	let fx = Fixture::new().await;
	let workspace = UploadTarget::Owner(AccessContext::Workspace(fx.workspace.workspace_id));
	let first = fx.upload_text(&fx.member, workspace, "a.txt", "first").await;
	let second = fx.upload_text(&fx.admin, workspace, "b.txt", "second").await;

	assert_eq!(first.kb.kb_id, second.kb.kb_id);
	assert_eq!(first.kb.scope(), Scope::Workspace);

	let err = fx
		.service
		.upload(UploadRequest {
			principal: fx.outsider,
			target: workspace,
			filename: "c.txt".to_string(),
			content_type: "text/plain".to_string(),
			bytes: b"third".to_vec(),
		})
		.await
		.unwrap_err();

	assert!(matches!(err, Error::Forbidden { .. }));

	let err = fx
		.service
		.upload(UploadRequest {
			principal: fx.admin,
			target: UploadTarget::Owner(AccessContext::Organization(fx.org.org_id)),
			filename: "d.txt".to_string(),
			content_type: "text/plain".to_string(),
			bytes: b"fourth".to_vec(),
		})
		.await
		.unwrap_err();

	assert!(matches!(err, Error::InvalidRequest { .. }));
	assert_eq!(fx.service.list_documents(&fx.member, first.kb.kb_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn only_uploaders_and_owner_admins_edit_documents() {
	let fx = Fixture::new().await;
	let kb = fx.org_kb("handbook").await;
	let uploaded = fx
		.upload_text(&fx.member, UploadTarget::KnowledgeBase(kb.kb_id), "notes.txt", "member notes")
		.await;
	let document_id = uploaded.document.document_id;

	// The outsider can read the organization's knowledge base but did not upload this.
	assert!(fx.service.get_document(&fx.outsider, document_id).await.is_ok());
	assert!(matches!(
		fx.service.delete_document(&fx.outsider, document_id).await.unwrap_err(),
		Error::Forbidden { .. }
	));

	fx.service.delete_document(&fx.admin, document_id).await.unwrap();

	assert!(matches!(
		fx.service.get_document(&fx.member, document_id).await.unwrap_err(),
		Error::NotFound { .. }
	));
	assert!(fx.service.list_documents(&fx.member, kb.kb_id).await.unwrap().is_empty());

	// Deleting again finds nothing.
	assert!(matches!(
		fx.service.delete_document(&fx.admin, document_id).await.unwrap_err(),
		Error::NotFound { .. }
	));
}

#[tokio::test]
async fn retry_only_applies_to_failed_documents_with_content() {
	let fx = Fixture::new().await;
	let kb = fx.org_kb("handbook").await;
	let indexed =
		fx.upload_text(&fx.member, UploadTarget::KnowledgeBase(kb.kb_id), "ok.txt", "plain words").await;

	fx.drain().await;

	let err = fx.service.retry_document(&fx.member, indexed.document.document_id).await.unwrap_err();

	assert!(matches!(
		err,
		Error::InvalidTransition { from: DocumentStatus::Indexed, to: DocumentStatus::Pending }
	));

	// Rejected at intake, so there is nothing to retry with.
	let empty =
		fx.upload_text(&fx.member, UploadTarget::KnowledgeBase(kb.kb_id), "empty.txt", "").await;
	let err = fx.service.retry_document(&fx.member, empty.document.document_id).await.unwrap_err();

	assert!(matches!(err, Error::InvalidRequest { .. }));
	assert!(matches!(
		fx.service.retry_document(&fx.outsider, empty.document.document_id).await.unwrap_err(),
		Error::Forbidden { .. }
	));
}

#[tokio::test]
async fn reading_documents_requires_access_in_the_owner_context() {
	let fx = Fixture::new().await;
	let uploaded = fx
		.upload_text(
			&fx.member,
			UploadTarget::Owner(AccessContext::Workspace(fx.workspace.workspace_id)),
			"w.txt",
			"workspace notes",
		)
		.await;
	let kb_id = uploaded.kb.kb_id;

	assert_eq!(fx.service.list_documents(&fx.member, kb_id).await.unwrap().len(), 1);
	assert!(matches!(
		fx.service.list_documents(&fx.outsider, kb_id).await.unwrap_err(),
		Error::Forbidden { .. }
	));
	assert!(matches!(
		fx.service.get_document(&fx.outsider, uploaded.document.document_id).await.unwrap_err(),
		Error::Forbidden { .. }
	));
}

#[tokio::test]
async fn manual_indexing_queues_pending_documents() {
	let fx = Fixture::new().await;
	let kb = fx
		.service
		.create_kb(CreateKbRequest {
			principal: fx.admin,
			name: "drafts".to_string(),
			scope: Scope::Organization,
			owners: OwnerRefs { org_id: Some(fx.org.org_id), ..OwnerRefs::default() },
			config: KbConfig { upload_policy: UploadPolicy::AllMembers, auto_index: false },
		})
		.await
		.unwrap();
	let uploaded = fx
		.upload_text(&fx.member, UploadTarget::KnowledgeBase(kb.kb_id), "draft.txt", "draft text")
		.await;

	assert!(!uploaded.enqueued);
	assert!(fx.queue.open_jobs().is_empty());

	fx.service.index_document(&fx.member, uploaded.document.document_id).await.unwrap();

	let outcomes = fx.drain().await;

	assert!(matches!(outcomes.as_slice(), [IngestOutcome::Indexed { chunk_count: 1 }]));

	let err = fx.service.index_document(&fx.member, uploaded.document.document_id).await.unwrap_err();

	assert!(matches!(err, Error::InvalidTransition { from: DocumentStatus::Indexed, .. }));
}
