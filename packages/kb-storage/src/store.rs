use std::{future::Future, pin::Pin};

use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use kb_domain::{
	cascade::{AccessGrant, GrantKey},
	context::{ContextChain, Conversation, Organization, Workspace},
	document::{Chunk, Document, DocumentError},
	knowledge_base::{KnowledgeBase, Scope, ScopeOwner},
	membership::{Membership, MembershipTarget},
};

use crate::Result;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A document in `processing` together with the token that proves this worker owns the claim.
/// Writes that end processing are compare-and-set on the token.
#[derive(Clone, Debug)]
pub struct ClaimedDocument {
	pub document: Document,
	pub token: Uuid,
}

#[derive(Clone, Debug)]
pub struct ChunkHit {
	pub chunk: Chunk,
	pub filename: String,
	pub scope: Scope,
	pub similarity: f32,
}

/// Relational state for knowledge bases: the directory, knowledge bases, grants, documents and
/// chunks. Every conditional write is decided inside the store, never by a read followed by a
/// write in the caller.
pub trait KbStore
where
	Self: Send + Sync,
{
	fn upsert_organization<'a>(&'a self, org: &'a Organization) -> BoxFuture<'a, Result<()>>;

	fn upsert_workspace<'a>(&'a self, workspace: &'a Workspace) -> BoxFuture<'a, Result<()>>;

	fn upsert_conversation<'a>(
		&'a self,
		conversation: &'a Conversation,
	) -> BoxFuture<'a, Result<()>>;

	fn upsert_membership<'a>(&'a self, membership: &'a Membership) -> BoxFuture<'a, Result<()>>;

	fn get_organization(&self, org_id: Uuid) -> BoxFuture<'_, Result<Option<Organization>>>;

	fn get_workspace(&self, workspace_id: Uuid) -> BoxFuture<'_, Result<Option<Workspace>>>;

	fn get_conversation(
		&self,
		conversation_id: Uuid,
	) -> BoxFuture<'_, Result<Option<Conversation>>>;

	/// Memberships of `principal_id` in any of `targets`, active or not.
	fn memberships_for<'a>(
		&'a self,
		principal_id: Uuid,
		targets: &'a [MembershipTarget],
	) -> BoxFuture<'a, Result<Vec<Membership>>>;

	/// Fails with `Conflict` when the owner of a workspace or conversation knowledge base
	/// already has an active one.
	fn insert_kb<'a>(&'a self, kb: &'a KnowledgeBase) -> BoxFuture<'a, Result<()>>;

	/// Inserts `kb` unless its owner already has an active knowledge base, in which case the
	/// existing one is returned. The flag is true when `kb` was inserted.
	fn insert_kb_or_get<'a>(
		&'a self,
		kb: &'a KnowledgeBase,
	) -> BoxFuture<'a, Result<(KnowledgeBase, bool)>>;

	/// Soft-deleted knowledge bases are returned too.
	fn get_kb(&self, kb_id: Uuid) -> BoxFuture<'_, Result<Option<KnowledgeBase>>>;

	fn update_kb<'a>(&'a self, kb: &'a KnowledgeBase) -> BoxFuture<'a, Result<()>>;

	fn list_kbs_for_owner<'a>(
		&'a self,
		owner: &'a ScopeOwner,
	) -> BoxFuture<'a, Result<Vec<KnowledgeBase>>>;

	/// Active knowledge bases a context could possibly see: every platform knowledge base,
	/// those of the chain's organization, workspace and conversation.
	fn candidate_kbs<'a>(
		&'a self,
		chain: &'a ContextChain,
	) -> BoxFuture<'a, Result<Vec<KnowledgeBase>>>;

	fn upsert_grant(
		&self,
		key: GrantKey,
		enabled: bool,
		actor: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'_, Result<AccessGrant>>;

	/// Returns false when a grant already exists for `key`; the existing row is kept.
	fn insert_grant_if_absent(
		&self,
		key: GrantKey,
		enabled: bool,
		actor: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'_, Result<bool>>;

	fn grants_for<'a>(
		&'a self,
		kb_ids: &'a [Uuid],
		target_ids: &'a [Uuid],
	) -> BoxFuture<'a, Result<Vec<AccessGrant>>>;

	fn list_grants(&self, kb_id: Uuid) -> BoxFuture<'_, Result<Vec<AccessGrant>>>;

	fn insert_document<'a>(&'a self, document: &'a Document) -> BoxFuture<'a, Result<()>>;

	fn get_document(&self, document_id: Uuid) -> BoxFuture<'_, Result<Option<Document>>>;

	/// Live documents of a knowledge base, newest first.
	fn list_documents(&self, kb_id: Uuid) -> BoxFuture<'_, Result<Vec<Document>>>;

	/// Moves a live document from `pending` to `processing`, or re-takes a `processing`
	/// document whose claim is older than `lease`. Bumps the attempt counter.
	fn claim_document(
		&self,
		document_id: Uuid,
		now: OffsetDateTime,
		lease: Duration,
	) -> BoxFuture<'_, Result<Option<ClaimedDocument>>>;

	/// `processing -> failed` for the holder of `token`.
	fn fail_document<'a>(
		&'a self,
		document_id: Uuid,
		token: Uuid,
		error: &'a DocumentError,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>>;

	/// Hands a `processing` document back to `pending` for the holder of `token`, so the next
	/// delivery can claim it without waiting for the lease to run out.
	fn release_claim(
		&self,
		document_id: Uuid,
		token: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'_, Result<bool>>;

	/// `failed -> pending`, clearing the error.
	fn reset_document(
		&self,
		document_id: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'_, Result<bool>>;

	/// Persists every chunk and moves the document to `indexed` atomically, for the holder of
	/// `token`. Nothing is written when the document is no longer held.
	fn commit_indexed<'a>(
		&'a self,
		document_id: Uuid,
		token: Uuid,
		chunks: &'a [Chunk],
		metadata: &'a Map<String, Value>,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>>;

	/// Marks the document deleted and drops its chunks.
	fn soft_delete_document(
		&self,
		document_id: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'_, Result<bool>>;

	/// Live failed documents with a retryable error whose last change is older than
	/// `failed_before` and whose attempt count is at most `max_attempts`, oldest first.
	fn failed_documents_for_retry(
		&self,
		failed_before: OffsetDateTime,
		max_attempts: u32,
		limit: u32,
	) -> BoxFuture<'_, Result<Vec<Document>>>;

	/// Nearest chunks by cosine similarity among indexed, live documents of `kb_ids`, best
	/// first.
	fn search_chunks<'a>(
		&'a self,
		kb_ids: &'a [Uuid],
		query: &'a [f32],
		limit: u32,
		min_similarity: f32,
	) -> BoxFuture<'a, Result<Vec<ChunkHit>>>;

	fn chunks_for_document(&self, document_id: Uuid) -> BoxFuture<'_, Result<Vec<Chunk>>>;
}
