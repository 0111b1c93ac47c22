//! Postgres implementation of [`KbStore`] and the outbox-backed [`TaskQueue`].
//!
//! [`TaskQueue`]: crate::queue::TaskQueue

pub mod chunks;
pub mod directory;
pub mod documents;
pub mod grants;
pub mod knowledge_bases;
pub mod outbox;

use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use kb_domain::{
	cascade::{AccessGrant, GrantKey},
	context::{ContextChain, Conversation, Organization, Workspace},
	document::{Chunk, Document, DocumentError},
	knowledge_base::{KnowledgeBase, ScopeOwner},
	membership::{Membership, MembershipTarget},
};

use crate::{
	Result,
	db::Db,
	store::{BoxFuture, ChunkHit, ClaimedDocument, KbStore},
};

impl KbStore for Db {
	fn upsert_organization<'a>(&'a self, org: &'a Organization) -> BoxFuture<'a, Result<()>> {
		Box::pin(directory::upsert_organization(&self.pool, org))
	}

	fn upsert_workspace<'a>(&'a self, workspace: &'a Workspace) -> BoxFuture<'a, Result<()>> {
		Box::pin(directory::upsert_workspace(&self.pool, workspace))
	}

	fn upsert_conversation<'a>(
		&'a self,
		conversation: &'a Conversation,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(directory::upsert_conversation(&self.pool, conversation))
	}

	fn upsert_membership<'a>(&'a self, membership: &'a Membership) -> BoxFuture<'a, Result<()>> {
		Box::pin(directory::upsert_membership(&self.pool, membership))
	}

	fn get_organization(&self, org_id: Uuid) -> BoxFuture<'_, Result<Option<Organization>>> {
		Box::pin(directory::get_organization(&self.pool, org_id))
	}

	fn get_workspace(&self, workspace_id: Uuid) -> BoxFuture<'_, Result<Option<Workspace>>> {
		Box::pin(directory::get_workspace(&self.pool, workspace_id))
	}

	fn get_conversation(
		&self,
		conversation_id: Uuid,
	) -> BoxFuture<'_, Result<Option<Conversation>>> {
		Box::pin(directory::get_conversation(&self.pool, conversation_id))
	}

	fn memberships_for<'a>(
		&'a self,
		principal_id: Uuid,
		targets: &'a [MembershipTarget],
	) -> BoxFuture<'a, Result<Vec<Membership>>> {
		Box::pin(directory::memberships_for(&self.pool, principal_id, targets))
	}

	fn insert_kb<'a>(&'a self, kb: &'a KnowledgeBase) -> BoxFuture<'a, Result<()>> {
		Box::pin(knowledge_bases::insert_kb(&self.pool, kb))
	}

	fn insert_kb_or_get<'a>(
		&'a self,
		kb: &'a KnowledgeBase,
	) -> BoxFuture<'a, Result<(KnowledgeBase, bool)>> {
		Box::pin(async move {
			let mut conn = self.pool.acquire().await?;

			knowledge_bases::insert_kb_or_get(&mut conn, kb).await
		})
	}

	fn get_kb(&self, kb_id: Uuid) -> BoxFuture<'_, Result<Option<KnowledgeBase>>> {
		Box::pin(knowledge_bases::get_kb(&self.pool, kb_id))
	}

	fn update_kb<'a>(&'a self, kb: &'a KnowledgeBase) -> BoxFuture<'a, Result<()>> {
		Box::pin(knowledge_bases::update_kb(&self.pool, kb))
	}

	fn list_kbs_for_owner<'a>(
		&'a self,
		owner: &'a ScopeOwner,
	) -> BoxFuture<'a, Result<Vec<KnowledgeBase>>> {
		Box::pin(knowledge_bases::list_kbs_for_owner(&self.pool, owner))
	}

	fn candidate_kbs<'a>(
		&'a self,
		chain: &'a ContextChain,
	) -> BoxFuture<'a, Result<Vec<KnowledgeBase>>> {
		Box::pin(knowledge_bases::candidate_kbs(&self.pool, chain))
	}

	fn upsert_grant(
		&self,
		key: GrantKey,
		enabled: bool,
		actor: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'_, Result<AccessGrant>> {
		Box::pin(grants::upsert_grant(&self.pool, key, enabled, actor, now))
	}

	fn insert_grant_if_absent(
		&self,
		key: GrantKey,
		enabled: bool,
		actor: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'_, Result<bool>> {
		Box::pin(grants::insert_grant_if_absent(&self.pool, key, enabled, actor, now))
	}

	fn grants_for<'a>(
		&'a self,
		kb_ids: &'a [Uuid],
		target_ids: &'a [Uuid],
	) -> BoxFuture<'a, Result<Vec<AccessGrant>>> {
		Box::pin(grants::grants_for(&self.pool, kb_ids, target_ids))
	}

	fn list_grants(&self, kb_id: Uuid) -> BoxFuture<'_, Result<Vec<AccessGrant>>> {
		Box::pin(grants::list_grants(&self.pool, kb_id))
	}

	fn insert_document<'a>(&'a self, document: &'a Document) -> BoxFuture<'a, Result<()>> {
		Box::pin(documents::insert_document(&self.pool, document))
	}

	fn get_document(&self, document_id: Uuid) -> BoxFuture<'_, Result<Option<Document>>> {
		Box::pin(documents::get_document(&self.pool, document_id))
	}

	fn list_documents(&self, kb_id: Uuid) -> BoxFuture<'_, Result<Vec<Document>>> {
		Box::pin(documents::list_documents(&self.pool, kb_id))
	}

	fn claim_document(
		&self,
		document_id: Uuid,
		now: OffsetDateTime,
		lease: Duration,
	) -> BoxFuture<'_, Result<Option<ClaimedDocument>>> {
		Box::pin(async move {
			let token = Uuid::new_v4();
			let document =
				documents::claim_document(&self.pool, document_id, token, now, now - lease).await?;

			Ok(document.map(|document| ClaimedDocument { document, token }))
		})
	}

	fn fail_document<'a>(
		&'a self,
		document_id: Uuid,
		token: Uuid,
		error: &'a DocumentError,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(documents::fail_document(&self.pool, document_id, token, error, now))
	}

	fn release_claim(
		&self,
		document_id: Uuid,
		token: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'_, Result<bool>> {
		Box::pin(documents::release_claim(&self.pool, document_id, token, now))
	}

	fn reset_document(
		&self,
		document_id: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'_, Result<bool>> {
		Box::pin(documents::reset_document(&self.pool, document_id, now))
	}

	fn commit_indexed<'a>(
		&'a self,
		document_id: Uuid,
		token: Uuid,
		chunks: &'a [Chunk],
		metadata: &'a Map<String, Value>,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			let mut tx = self.pool.begin().await?;
			let chunk_count = chunks.len() as u32;
			let held = documents::mark_indexed(
				&mut *tx,
				document_id,
				token,
				chunk_count,
				metadata,
				now,
			)
			.await?;

			if !held {
				tx.rollback().await?;

				return Ok(false);
			}

			// Rows left by a worker that lost its lease mid-commit.
			chunks::delete_for_document(&mut *tx, document_id).await?;

			for chunk in chunks {
				chunks::insert_chunk(&mut *tx, chunk).await?;
			}

			tx.commit().await?;

			Ok(true)
		})
	}

	fn soft_delete_document(
		&self,
		document_id: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'_, Result<bool>> {
		Box::pin(async move {
			let mut tx = self.pool.begin().await?;
			let deleted = documents::soft_delete_document(&mut *tx, document_id, now).await?;

			if deleted {
				chunks::delete_for_document(&mut *tx, document_id).await?;
			}

			tx.commit().await?;

			Ok(deleted)
		})
	}

	fn failed_documents_for_retry(
		&self,
		failed_before: OffsetDateTime,
		max_attempts: u32,
		limit: u32,
	) -> BoxFuture<'_, Result<Vec<Document>>> {
		Box::pin(documents::failed_documents_for_retry(
			&self.pool,
			failed_before,
			max_attempts,
			limit,
		))
	}

	fn search_chunks<'a>(
		&'a self,
		kb_ids: &'a [Uuid],
		query: &'a [f32],
		limit: u32,
		min_similarity: f32,
	) -> BoxFuture<'a, Result<Vec<ChunkHit>>> {
		Box::pin(chunks::search_chunks(&self.pool, kb_ids, query, limit, min_similarity))
	}

	fn chunks_for_document(&self, document_id: Uuid) -> BoxFuture<'_, Result<Vec<Chunk>>> {
		Box::pin(chunks::chunks_for_document(&self.pool, document_id))
	}
}
