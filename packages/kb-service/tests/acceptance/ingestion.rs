use std::{
	collections::HashSet,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
};

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use kb_domain::{
	cascade::GrantLevel,
	context::AccessContext,
	document::{DocumentError, DocumentStatus, IngestErrorCode, chunk_id_for},
};
use kb_service::{Error, IngestOutcome, SearchRequest, SkipReason, UploadRequest, UploadTarget};
use kb_storage::{KbStore, queue::TaskQueue};

use super::{
	CommitFailingStore, FailingEmbedding, FixedDimensionEmbedding, Fixture, FlakyEmbedding,
	StubEmbedding, VECTOR_DIM, test_config,
};

fn long_text() -> String {
	(0..24)
		.map(|i| format!("Sentence number {i} talks about topic {i}."))
		.collect::<Vec<_>>()
		.join(" ")
}

#[tokio::test]
async fn indexing_stores_one_chunk_per_ordinal() {
	let fx = Fixture::new().await;
	let kb = fx.org_kb("handbook").await;
	let uploaded = fx
		.upload_text(&fx.member, UploadTarget::KnowledgeBase(kb.kb_id), "long.txt", &long_text())
		.await;
	let document_id = uploaded.document.document_id;
	let outcomes = fx.drain().await;
	let [IngestOutcome::Indexed { chunk_count }] = outcomes.as_slice() else {
		panic!("Unexpected outcomes: {outcomes:?}");
	};

	assert!(*chunk_count > 1);

	let chunks = fx.store.chunks_for_document(document_id).await.unwrap();
	let ordinals: Vec<u32> = chunks.iter().map(|chunk| chunk.ordinal).collect();

	assert_eq!(ordinals, (0..*chunk_count).collect::<Vec<_>>());

	for chunk in &chunks {
		assert_eq!(chunk.chunk_id, chunk_id_for(document_id, chunk.ordinal));
		assert_eq!(chunk.kb_id, kb.kb_id);
		assert_eq!(chunk.embedding.as_ref().map(Vec::len), Some(VECTOR_DIM as usize));
		assert!(chunk.start_offset < chunk.end_offset);
	}

	let document = fx.service.get_document(&fx.member, document_id).await.unwrap();

	assert_eq!(document.status, DocumentStatus::Indexed);
	assert_eq!(document.chunk_count, *chunk_count);
	assert_eq!(document.error, None);
}

#[tokio::test]
async fn redelivered_jobs_do_not_duplicate_chunks() {
	let fx = Fixture::new().await;
	let kb = fx.org_kb("handbook").await;
	let uploaded = fx
		.upload_text(&fx.member, UploadTarget::KnowledgeBase(kb.kb_id), "long.txt", &long_text())
		.await;
	let document_id = uploaded.document.document_id;

	fx.drain().await;

	let before = fx.store.chunks_for_document(document_id).await.unwrap().len();

	// At-least-once delivery: the same job arrives again.
	fx.queue.enqueue(document_id, OffsetDateTime::now_utc()).await.unwrap();

	let outcomes = fx.drain().await;

	assert_eq!(outcomes, vec![IngestOutcome::Skipped { reason: SkipReason::NotClaimable }]);
	assert_eq!(fx.store.chunks_for_document(document_id).await.unwrap().len(), before);
	assert_eq!(
		fx.service.process_document(Uuid::new_v4()).await.unwrap(),
		IngestOutcome::Skipped { reason: SkipReason::NotClaimable }
	);
}

#[tokio::test]
async fn stale_claims_are_taken_over_and_the_old_holder_loses() {
	let fx = Fixture::new().await;
	let kb = fx.org_kb("handbook").await;
	let uploaded = fx
		.upload_text(&fx.member, UploadTarget::KnowledgeBase(kb.kb_id), "notes.txt", "plain words")
		.await;
	let document_id = uploaded.document.document_id;
	let long_ago = OffsetDateTime::now_utc() - Duration::hours(1);
	let stale = fx
		.store
		.claim_document(document_id, long_ago, Duration::seconds(60))
		.await
		.unwrap()
		.expect("Document should be claimable.");

	assert!(matches!(
		fx.service.process_document(document_id).await.unwrap(),
		IngestOutcome::Indexed { chunk_count: 1 }
	));

	let error = DocumentError::new(IngestErrorCode::EmbeddingProvider, "late failure");
	let applied = fx
		.store
		.fail_document(document_id, stale.token, &error, OffsetDateTime::now_utc())
		.await
		.unwrap();

	assert!(!applied);
	assert_eq!(
		fx.service.get_document(&fx.member, document_id).await.unwrap().status,
		DocumentStatus::Indexed
	);
}

#[tokio::test]
async fn embedding_retries_resend_only_missing_items() {
	let flaky = FlakyEmbedding::new(2);
	let calls = flaky.calls.clone();
	let items_sent = flaky.items_sent.clone();
	let fx = Fixture::with_embedding(Arc::new(flaky)).await;
	let kb = fx.org_kb("handbook").await;

	fx.upload_text(&fx.member, UploadTarget::KnowledgeBase(kb.kb_id), "long.txt", &long_text())
		.await;

	let outcomes = fx.drain().await;
	let [IngestOutcome::Indexed { chunk_count }] = outcomes.as_slice() else {
		panic!("Unexpected outcomes: {outcomes:?}");
	};
	let chunk_count = *chunk_count as usize;

	assert!(chunk_count >= 4);
	// Two batches each lost one item in the first round; only those two are sent again.
	assert_eq!(items_sent.load(Ordering::SeqCst), chunk_count + 2);
	assert_eq!(calls.load(Ordering::SeqCst), chunk_count.div_ceil(2) + 1);
}

#[tokio::test]
async fn provider_failures_are_recorded_without_credentials() {
	let fx = Fixture::with_embedding(Arc::new(FailingEmbedding)).await;
	let kb = fx.org_kb("handbook").await;
	let uploaded = fx
		.upload_text(&fx.member, UploadTarget::KnowledgeBase(kb.kb_id), "notes.txt", "plain words")
		.await;
	let document_id = uploaded.document.document_id;

	assert_eq!(
		fx.drain().await,
		vec![IngestOutcome::Failed { code: IngestErrorCode::EmbeddingProvider }]
	);

	let document = fx.service.get_document(&fx.member, document_id).await.unwrap();
	let error = document.error.expect("Failed document should carry an error.");

	assert_eq!(document.status, DocumentStatus::Failed);
	assert_eq!(error.code, IngestErrorCode::EmbeddingProvider);
	assert!(!error.message.contains("sk-secret"), "{}", error.message);
	assert!(error.message.contains("[REDACTED]"), "{}", error.message);
	assert!(fx.store.chunks_for_document(document_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn lost_blobs_fail_and_are_swept_back_onto_the_queue() {
	let fx = Fixture::new().await;
	let kb = fx.org_kb("handbook").await;
	let uploaded = fx
		.upload_text(&fx.member, UploadTarget::KnowledgeBase(kb.kb_id), "notes.txt", "plain words")
		.await;
	let document_id = uploaded.document.document_id;
	let location = uploaded.document.blob_location.clone().expect("Upload should store content.");

	assert!(fx.blobs.remove(&location));
	assert_eq!(
		fx.drain().await,
		vec![IngestOutcome::Failed { code: IngestErrorCode::BlobUnavailable }]
	);

	let later = OffsetDateTime::now_utc() + Duration::seconds(1);

	assert_eq!(fx.service.sweep_failed(later).await.unwrap(), 1);

	let document = fx.service.get_document(&fx.member, document_id).await.unwrap();

	assert_eq!(document.status, DocumentStatus::Pending);
	assert_eq!(document.error, None);
	assert_eq!(fx.queue.open_jobs().len(), 1);

	// Still gone, so the second attempt fails the same way.
	assert_eq!(
		fx.drain().await,
		vec![IngestOutcome::Failed { code: IngestErrorCode::BlobUnavailable }]
	);
	assert_eq!(fx.service.get_document(&fx.member, document_id).await.unwrap().attempts, 2);
}

#[tokio::test]
async fn unsupported_content_is_never_swept() {
	let fx = Fixture::new().await;
	let kb = fx.org_kb("handbook").await;

	fx.service
		.upload(UploadRequest {
			principal: fx.member,
			target: UploadTarget::KnowledgeBase(kb.kb_id),
			filename: "broken.json".to_string(),
			content_type: "application/json".to_string(),
			bytes: b"{not json".to_vec(),
		})
		.await
		.unwrap();

	assert_eq!(
		fx.drain().await,
		vec![IngestOutcome::Failed { code: IngestErrorCode::UnsupportedFormat }]
	);

	let later = OffsetDateTime::now_utc() + Duration::seconds(1);

	assert_eq!(fx.service.sweep_failed(later).await.unwrap(), 0);
	assert!(fx.queue.open_jobs().is_empty());
}

#[tokio::test]
async fn failed_documents_can_be_retried_by_hand() {
	// Three rounds, one call each, all losing the single chunk.
	let fx = Fixture::with_embedding(Arc::new(FlakyEmbedding::new(3))).await;
	let kb = fx.org_kb("handbook").await;
	let uploaded = fx
		.upload_text(&fx.member, UploadTarget::KnowledgeBase(kb.kb_id), "notes.txt", "plain words")
		.await;
	let document_id = uploaded.document.document_id;

	assert_eq!(
		fx.drain().await,
		vec![IngestOutcome::Failed { code: IngestErrorCode::EmbeddingProvider }]
	);

	let retried = fx.service.retry_document(&fx.member, document_id).await.unwrap();

	assert_eq!(retried.status, DocumentStatus::Pending);
	assert_eq!(retried.error, None);
	assert_eq!(fx.drain().await, vec![IngestOutcome::Indexed { chunk_count: 1 }]);
}

#[tokio::test]
async fn access_changes_do_not_interrupt_ingestion() {
	let fx = Fixture::new().await;
	let kb = fx.org_kb("handbook").await;

	fx.open_cascade(&kb).await;

	let uploaded = fx
		.upload_text(&fx.member, UploadTarget::KnowledgeBase(kb.kb_id), "notes.txt", "quarterly roadmap")
		.await;

	fx.grant(&kb, GrantLevel::ConversationToggle, false).await;

	assert_eq!(fx.drain().await, vec![IngestOutcome::Indexed { chunk_count: 1 }]);

	let search = |context| SearchRequest {
		principal: fx.member,
		context,
		query: "quarterly roadmap".to_string(),
		top_k: None,
		min_similarity: None,
		timeout_ms: None,
	};
	let in_workspace = fx
		.service
		.search(search(AccessContext::Workspace(fx.workspace.workspace_id)))
		.await
		.unwrap();
	let in_conversation = fx
		.service
		.search(search(AccessContext::Conversation(fx.conversation.conversation_id)))
		.await
		.unwrap();
	let documents: HashSet<Uuid> = in_workspace.items.iter().map(|item| item.document_id).collect();

	assert!(documents.contains(&uploaded.document.document_id));
	assert!(in_conversation.items.is_empty());
	assert!(in_conversation.error.is_none());
}

#[tokio::test]
async fn storage_errors_hand_the_claim_back_for_the_next_delivery() {
	let fx = Fixture::build_with_store(
		test_config(),
		Arc::new(StubEmbedding::new(VECTOR_DIM)),
		|store| -> Arc<dyn KbStore> {
			Arc::new(CommitFailingStore { inner: store, failures: 1, commits: AtomicUsize::new(0) })
		},
	)
	.await;
	let kb = fx.org_kb("handbook").await;
	let uploaded = fx
		.upload_text(&fx.member, UploadTarget::KnowledgeBase(kb.kb_id), "notes.txt", "hello world")
		.await;
	let document_id = uploaded.document.document_id;
	let now = OffsetDateTime::now_utc();
	let job =
		fx.queue.claim(now, Duration::seconds(30)).await.unwrap().expect("Job should be queued.");
	let err = fx.service.process_document(document_id).await.unwrap_err();

	assert!(matches!(err, Error::Storage { .. }), "{err}");

	let document =
		fx.store.get_document(document_id).await.unwrap().expect("Document should exist.");

	assert_eq!(document.status, DocumentStatus::Pending);
	assert_eq!(document.claimed_at, None);
	assert_eq!(document.error, None);
	assert!(fx.store.chunks_for_document(document_id).await.unwrap().is_empty());

	// The worker puts the job back; the next delivery claims at once instead of waiting out the
	// lease.
	fx.queue.release(job.job_id, &err.to_string(), now, now).await.unwrap();

	assert_eq!(fx.drain().await, vec![IngestOutcome::Indexed { chunk_count: 1 }]);

	let document = fx.service.get_document(&fx.member, document_id).await.unwrap();

	assert_eq!(document.status, DocumentStatus::Indexed);
	assert_eq!(document.attempts, 2);
	assert!(fx.queue.open_jobs().is_empty());
}

#[tokio::test]
async fn live_claims_are_reported_with_their_expiry() {
	let fx = Fixture::new().await;
	let kb = fx.org_kb("handbook").await;
	let uploaded = fx
		.upload_text(&fx.member, UploadTarget::KnowledgeBase(kb.kb_id), "notes.txt", "plain words")
		.await;
	let document_id = uploaded.document.document_id;
	let lease = Duration::seconds(test_config().ingestion.claim_lease_seconds as i64);
	let claimed_at = OffsetDateTime::now_utc();

	fx.store
		.claim_document(document_id, claimed_at, lease)
		.await
		.unwrap()
		.expect("Document should be claimable.");

	assert_eq!(
		fx.service.process_document(document_id).await.unwrap(),
		IngestOutcome::Skipped { reason: SkipReason::ClaimHeld { until: claimed_at + lease } }
	);
	assert_eq!(
		fx.service.get_document(&fx.member, document_id).await.unwrap().status,
		DocumentStatus::Processing
	);
}

#[tokio::test]
async fn startup_check_rejects_a_provider_of_the_wrong_dimension() {
	let fx = Fixture::new().await;

	fx.service.probe_embedding_dimension().await.unwrap();

	let fx = Fixture::with_embedding(Arc::new(FixedDimensionEmbedding {
		dimensions: VECTOR_DIM as usize + 2,
	}))
	.await;
	let err = fx.service.probe_embedding_dimension().await.unwrap_err();

	let Error::DimensionMismatch { expected, actual } = err else {
		panic!("Expected a dimension mismatch, got {err}.");
	};

	assert_eq!((expected, actual), (VECTOR_DIM, VECTOR_DIM + 2));
}

#[tokio::test]
async fn wrong_dimension_vectors_fail_the_document_for_good() {
	let fx = Fixture::with_embedding(Arc::new(FixedDimensionEmbedding {
		dimensions: VECTOR_DIM as usize - 1,
	}))
	.await;
	let kb = fx.org_kb("handbook").await;
	let uploaded = fx
		.upload_text(&fx.member, UploadTarget::KnowledgeBase(kb.kb_id), "notes.txt", "plain words")
		.await;
	let document_id = uploaded.document.document_id;

	assert_eq!(
		fx.drain().await,
		vec![IngestOutcome::Failed { code: IngestErrorCode::DimensionMismatch }]
	);

	let document = fx.service.get_document(&fx.member, document_id).await.unwrap();
	let error = document.error.expect("Failed document should carry an error.");

	assert_eq!(document.status, DocumentStatus::Failed);
	assert_eq!(error.code.as_str(), "DIMENSION_MISMATCH");
	assert!(fx.store.chunks_for_document(document_id).await.unwrap().is_empty());

	let later = OffsetDateTime::now_utc() + Duration::seconds(1);

	assert_eq!(fx.service.sweep_failed(later).await.unwrap(), 0);
	assert!(fx.queue.open_jobs().is_empty());
}
