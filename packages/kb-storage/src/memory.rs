//! In-memory [`KbStore`] for tests and single-process deployments.
//!
//! Every table lives in one arena behind a single `RwLock`, so each conditional write is one
//! critical section. Vector search is brute-force cosine similarity.

use std::{
	collections::HashMap,
	sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use kb_domain::{
	cascade::{AccessGrant, GrantKey},
	context::{ContextChain, Conversation, Organization, Workspace},
	document::{Chunk, Document, DocumentError, DocumentStatus},
	knowledge_base::{KnowledgeBase, ScopeOwner},
	membership::{Membership, MembershipTarget},
	ranking::{self, RankKey},
};

use crate::{
	Error, Result,
	store::{BoxFuture, ChunkHit, ClaimedDocument, KbStore},
};

struct StoredDocument {
	document: Document,
	claim_token: Option<Uuid>,
}
impl StoredDocument {
	fn is_held_by(&self, token: Uuid) -> bool {
		self.document.status == DocumentStatus::Processing && self.claim_token == Some(token)
	}
}

#[derive(Default)]
struct Arena {
	organizations: HashMap<Uuid, Organization>,
	workspaces: HashMap<Uuid, Workspace>,
	conversations: HashMap<Uuid, Conversation>,
	memberships: HashMap<(Uuid, MembershipTarget), Membership>,
	kbs: HashMap<Uuid, KnowledgeBase>,
	grants: HashMap<GrantKey, AccessGrant>,
	documents: HashMap<Uuid, StoredDocument>,
	chunks: HashMap<Uuid, Chunk>,
}
impl Arena {
	fn active_owner_kb(&self, kb: &KnowledgeBase) -> Option<&KnowledgeBase> {
		if !kb.scope().is_owner_singleton() {
			return None;
		}

		self.kbs.values().find(|existing| {
			!existing.is_deleted()
				&& existing.scope() == kb.scope()
				&& existing.owner.owner_ref() == kb.owner.owner_ref()
		})
	}

	fn drop_chunks(&mut self, document_id: Uuid) {
		self.chunks.retain(|_, chunk| chunk.document_id != document_id);
	}
}

#[derive(Default)]
pub struct MemoryStore {
	arena: RwLock<Arena>,
}
impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn read(&self) -> RwLockReadGuard<'_, Arena> {
		self.arena.read().unwrap_or_else(PoisonError::into_inner)
	}

	fn write(&self) -> RwLockWriteGuard<'_, Arena> {
		self.arena.write().unwrap_or_else(PoisonError::into_inner)
	}
}

impl KbStore for MemoryStore {
	fn upsert_organization<'a>(&'a self, org: &'a Organization) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.write().organizations.insert(org.org_id, org.clone());

			Ok(())
		})
	}

	fn upsert_workspace<'a>(&'a self, workspace: &'a Workspace) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut arena = self.write();

			match arena.workspaces.get_mut(&workspace.workspace_id) {
				Some(existing) => existing.name = workspace.name.clone(),
				None => {
					arena.workspaces.insert(workspace.workspace_id, workspace.clone());
				},
			}

			Ok(())
		})
	}

	fn upsert_conversation<'a>(
		&'a self,
		conversation: &'a Conversation,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.write()
				.conversations
				.entry(conversation.conversation_id)
				.or_insert_with(|| conversation.clone());

			Ok(())
		})
	}

	fn upsert_membership<'a>(&'a self, membership: &'a Membership) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.write()
				.memberships
				.insert((membership.principal_id, membership.target), *membership);

			Ok(())
		})
	}

	fn get_organization(&self, org_id: Uuid) -> BoxFuture<'_, Result<Option<Organization>>> {
		Box::pin(async move { Ok(self.read().organizations.get(&org_id).cloned()) })
	}

	fn get_workspace(&self, workspace_id: Uuid) -> BoxFuture<'_, Result<Option<Workspace>>> {
		Box::pin(async move { Ok(self.read().workspaces.get(&workspace_id).cloned()) })
	}

	fn get_conversation(
		&self,
		conversation_id: Uuid,
	) -> BoxFuture<'_, Result<Option<Conversation>>> {
		Box::pin(async move { Ok(self.read().conversations.get(&conversation_id).cloned()) })
	}

	fn memberships_for<'a>(
		&'a self,
		principal_id: Uuid,
		targets: &'a [MembershipTarget],
	) -> BoxFuture<'a, Result<Vec<Membership>>> {
		Box::pin(async move {
			let arena = self.read();

			Ok(targets
				.iter()
				.filter_map(|target| arena.memberships.get(&(principal_id, *target)).copied())
				.collect())
		})
	}

	fn insert_kb<'a>(&'a self, kb: &'a KnowledgeBase) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut arena = self.write();

			if arena.active_owner_kb(kb).is_some() {
				return Err(Error::Conflict(format!(
					"An active {} knowledge base already exists for this owner.",
					kb.scope()
				)));
			}
			if arena.kbs.contains_key(&kb.kb_id) {
				return Err(Error::Conflict(format!("Knowledge base {} already exists.", kb.kb_id)));
			}

			arena.kbs.insert(kb.kb_id, kb.clone());

			Ok(())
		})
	}

	fn insert_kb_or_get<'a>(
		&'a self,
		kb: &'a KnowledgeBase,
	) -> BoxFuture<'a, Result<(KnowledgeBase, bool)>> {
		Box::pin(async move {
			if kb.owner.owner_ref().is_none() {
				return Err(Error::InvalidArgument(
					"Platform knowledge bases have no owner to deduplicate on.".to_string(),
				));
			}

			let mut arena = self.write();

			if let Some(existing) = arena.active_owner_kb(kb) {
				return Ok((existing.clone(), false));
			}

			arena.kbs.insert(kb.kb_id, kb.clone());

			Ok((kb.clone(), true))
		})
	}

	fn get_kb(&self, kb_id: Uuid) -> BoxFuture<'_, Result<Option<KnowledgeBase>>> {
		Box::pin(async move { Ok(self.read().kbs.get(&kb_id).cloned()) })
	}

	fn update_kb<'a>(&'a self, kb: &'a KnowledgeBase) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut arena = self.write();
			let existing = arena
				.kbs
				.get_mut(&kb.kb_id)
				.ok_or_else(|| Error::NotFound(format!("knowledge base {}", kb.kb_id)))?;

			existing.name = kb.name.clone();
			existing.config = kb.config;
			existing.enabled = kb.enabled;
			existing.updated_at = kb.updated_at;
			existing.deleted_at = kb.deleted_at;

			Ok(())
		})
	}

	fn list_kbs_for_owner<'a>(
		&'a self,
		owner: &'a ScopeOwner,
	) -> BoxFuture<'a, Result<Vec<KnowledgeBase>>> {
		Box::pin(async move {
			let mut kbs: Vec<KnowledgeBase> = self
				.read()
				.kbs
				.values()
				.filter(|kb| {
					!kb.is_deleted()
						&& kb.scope() == owner.scope()
						&& kb.owner.owner_ref() == owner.owner_ref()
				})
				.cloned()
				.collect();

			kbs.sort_by_key(|kb| (kb.created_at, kb.kb_id));

			Ok(kbs)
		})
	}

	fn candidate_kbs<'a>(
		&'a self,
		chain: &'a ContextChain,
	) -> BoxFuture<'a, Result<Vec<KnowledgeBase>>> {
		Box::pin(async move {
			let mut kbs: Vec<KnowledgeBase> = self
				.read()
				.kbs
				.values()
				.filter(|kb| kb.is_active() && chain.reaches(&kb.owner))
				.cloned()
				.collect();

			kbs.sort_by_key(|kb| (kb.created_at, kb.kb_id));

			Ok(kbs)
		})
	}

	fn upsert_grant(
		&self,
		key: GrantKey,
		enabled: bool,
		actor: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'_, Result<AccessGrant>> {
		Box::pin(async move {
			let mut arena = self.write();
			let grant = arena
				.grants
				.entry(key)
				.and_modify(|grant| {
					grant.enabled = enabled;
					grant.updated_by = actor;
					grant.updated_at = now;
				})
				.or_insert_with(|| AccessGrant::new(key, enabled, actor, now));

			Ok(grant.clone())
		})
	}

	fn insert_grant_if_absent(
		&self,
		key: GrantKey,
		enabled: bool,
		actor: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'_, Result<bool>> {
		Box::pin(async move {
			let mut arena = self.write();

			if arena.grants.contains_key(&key) {
				return Ok(false);
			}

			arena.grants.insert(key, AccessGrant::new(key, enabled, actor, now));

			Ok(true)
		})
	}

	fn grants_for<'a>(
		&'a self,
		kb_ids: &'a [Uuid],
		target_ids: &'a [Uuid],
	) -> BoxFuture<'a, Result<Vec<AccessGrant>>> {
		Box::pin(async move {
			Ok(self
				.read()
				.grants
				.values()
				.filter(|grant| kb_ids.contains(&grant.kb_id) && target_ids.contains(&grant.target_id))
				.cloned()
				.collect())
		})
	}

	fn list_grants(&self, kb_id: Uuid) -> BoxFuture<'_, Result<Vec<AccessGrant>>> {
		Box::pin(async move {
			let mut grants: Vec<AccessGrant> =
				self.read().grants.values().filter(|grant| grant.kb_id == kb_id).cloned().collect();

			grants.sort_by_key(|grant| (grant.created_at, grant.grant_id));

			Ok(grants)
		})
	}

	fn insert_document<'a>(&'a self, document: &'a Document) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut arena = self.write();

			if !arena.kbs.contains_key(&document.kb_id) {
				return Err(Error::NotFound(format!("knowledge base {}", document.kb_id)));
			}
			if arena.documents.contains_key(&document.document_id) {
				return Err(Error::Conflict(format!(
					"Document {} already exists.",
					document.document_id
				)));
			}

			arena.documents.insert(
				document.document_id,
				StoredDocument { document: document.clone(), claim_token: None },
			);

			Ok(())
		})
	}

	fn get_document(&self, document_id: Uuid) -> BoxFuture<'_, Result<Option<Document>>> {
		Box::pin(async move {
			Ok(self.read().documents.get(&document_id).map(|stored| stored.document.clone()))
		})
	}

	fn list_documents(&self, kb_id: Uuid) -> BoxFuture<'_, Result<Vec<Document>>> {
		Box::pin(async move {
			let mut documents: Vec<Document> = self
				.read()
				.documents
				.values()
				.map(|stored| &stored.document)
				.filter(|document| document.kb_id == kb_id && !document.is_deleted())
				.cloned()
				.collect();

			documents.sort_by(|a, b| {
				b.created_at.cmp(&a.created_at).then_with(|| a.document_id.cmp(&b.document_id))
			});

			Ok(documents)
		})
	}

	fn claim_document(
		&self,
		document_id: Uuid,
		now: OffsetDateTime,
		lease: Duration,
	) -> BoxFuture<'_, Result<Option<ClaimedDocument>>> {
		Box::pin(async move {
			let mut arena = self.write();
			let Some(stored) = arena.documents.get_mut(&document_id) else {
				return Ok(None);
			};
			let document = &mut stored.document;
			let stale = document.status == DocumentStatus::Processing
				&& document.claimed_at.is_some_and(|claimed_at| claimed_at < now - lease);

			if document.is_deleted() || !(document.status == DocumentStatus::Pending || stale) {
				return Ok(None);
			}

			let token = Uuid::new_v4();

			document.status = DocumentStatus::Processing;
			document.attempts += 1;
			document.claimed_at = Some(now);
			document.updated_at = now;
			stored.claim_token = Some(token);

			Ok(Some(ClaimedDocument { document: stored.document.clone(), token }))
		})
	}

	fn fail_document<'a>(
		&'a self,
		document_id: Uuid,
		token: Uuid,
		error: &'a DocumentError,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			let mut arena = self.write();
			let Some(stored) = arena.documents.get_mut(&document_id) else {
				return Ok(false);
			};

			if !stored.is_held_by(token) {
				return Ok(false);
			}

			stored.document.status = DocumentStatus::Failed;
			stored.document.error = Some(error.clone());
			stored.document.updated_at = now;
			stored.claim_token = None;

			Ok(true)
		})
	}

	fn release_claim(
		&self,
		document_id: Uuid,
		token: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'_, Result<bool>> {
		Box::pin(async move {
			let mut arena = self.write();
			let Some(stored) = arena.documents.get_mut(&document_id) else {
				return Ok(false);
			};

			if !stored.is_held_by(token) {
				return Ok(false);
			}

			stored.document.status = DocumentStatus::Pending;
			stored.document.claimed_at = None;
			stored.document.updated_at = now;
			stored.claim_token = None;

			Ok(true)
		})
	}

	fn reset_document(
		&self,
		document_id: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'_, Result<bool>> {
		Box::pin(async move {
			let mut arena = self.write();
			let Some(stored) = arena.documents.get_mut(&document_id) else {
				return Ok(false);
			};
			let document = &mut stored.document;

			if document.is_deleted() || document.status != DocumentStatus::Failed {
				return Ok(false);
			}

			document.status = DocumentStatus::Pending;
			document.error = None;
			document.claimed_at = None;
			document.updated_at = now;
			stored.claim_token = None;

			Ok(true)
		})
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
			let mut arena = self.write();
			let held = arena
				.documents
				.get(&document_id)
				.is_some_and(|stored| stored.is_held_by(token) && !stored.document.is_deleted());

			if !held {
				return Ok(false);
			}

			let mut ordinals: Vec<u32> = chunks.iter().map(|chunk| chunk.ordinal).collect();

			ordinals.sort_unstable();
			ordinals.dedup();

			if ordinals.len() != chunks.len() {
				return Err(Error::Conflict(format!(
					"Duplicate chunk ordinal for document {document_id}."
				)));
			}

			arena.drop_chunks(document_id);

			for chunk in chunks {
				arena.chunks.insert(chunk.chunk_id, chunk.clone());
			}

			let Some(stored) = arena.documents.get_mut(&document_id) else {
				return Ok(false);
			};
			let document = &mut stored.document;

			document.status = DocumentStatus::Indexed;
			document.chunk_count = chunks.len() as u32;
			document.error = None;
			document.updated_at = now;

			match &mut document.metadata {
				Value::Object(existing) => existing.extend(metadata.clone()),
				other => *other = Value::Object(metadata.clone()),
			}

			stored.claim_token = None;

			Ok(true)
		})
	}

	fn soft_delete_document(
		&self,
		document_id: Uuid,
		now: OffsetDateTime,
	) -> BoxFuture<'_, Result<bool>> {
		Box::pin(async move {
			let mut arena = self.write();
			let Some(stored) = arena.documents.get_mut(&document_id) else {
				return Ok(false);
			};

			if stored.document.is_deleted() {
				return Ok(false);
			}

			stored.document.deleted_at = Some(now);
			stored.document.updated_at = now;
			stored.claim_token = None;
			arena.drop_chunks(document_id);

			Ok(true)
		})
	}

	fn failed_documents_for_retry(
		&self,
		failed_before: OffsetDateTime,
		max_attempts: u32,
		limit: u32,
	) -> BoxFuture<'_, Result<Vec<Document>>> {
		Box::pin(async move {
			let mut documents: Vec<Document> = self
				.read()
				.documents
				.values()
				.map(|stored| &stored.document)
				.filter(|document| {
					document.status == DocumentStatus::Failed
						&& !document.is_deleted()
						&& document.updated_at < failed_before
						&& document.attempts <= max_attempts
						&& document.error.as_ref().is_some_and(DocumentError::is_retryable)
				})
				.cloned()
				.collect();

			documents.sort_by_key(|document| (document.updated_at, document.document_id));
			documents.truncate(limit as usize);

			Ok(documents)
		})
	}

	fn search_chunks<'a>(
		&'a self,
		kb_ids: &'a [Uuid],
		query: &'a [f32],
		limit: u32,
		min_similarity: f32,
	) -> BoxFuture<'a, Result<Vec<ChunkHit>>> {
		Box::pin(async move {
			let arena = self.read();
			let mut hits = Vec::new();

			for chunk in arena.chunks.values() {
				if !kb_ids.contains(&chunk.kb_id) {
					continue;
				}

				let Some(embedding) = chunk.embedding.as_deref() else {
					continue;
				};
				let Some(stored) = arena.documents.get(&chunk.document_id) else {
					continue;
				};
				let Some(kb) = arena.kbs.get(&chunk.kb_id) else {
					continue;
				};

				if stored.document.status != DocumentStatus::Indexed
					|| stored.document.is_deleted()
					|| kb.is_deleted()
				{
					continue;
				}

				let similarity = ranking::cosine_similarity(query, embedding);

				if similarity < min_similarity {
					continue;
				}

				hits.push(ChunkHit {
					chunk: Chunk { embedding: None, ..chunk.clone() },
					filename: stored.document.filename.clone(),
					scope: kb.scope(),
					similarity,
				});
			}

			hits.sort_by(|a, b| ranking::compare(&rank_key(a), &rank_key(b)));
			hits.truncate(limit as usize);

			Ok(hits)
		})
	}

	fn chunks_for_document(&self, document_id: Uuid) -> BoxFuture<'_, Result<Vec<Chunk>>> {
		Box::pin(async move {
			let mut chunks: Vec<Chunk> = self
				.read()
				.chunks
				.values()
				.filter(|chunk| chunk.document_id == document_id)
				.cloned()
				.collect();

			chunks.sort_by_key(|chunk| chunk.ordinal);

			Ok(chunks)
		})
	}
}

fn rank_key(hit: &ChunkHit) -> RankKey {
	RankKey {
		similarity: hit.similarity,
		scope: hit.scope,
		created_at: hit.chunk.created_at,
		ordinal: hit.chunk.ordinal,
		chunk_id: hit.chunk.chunk_id,
	}
}
