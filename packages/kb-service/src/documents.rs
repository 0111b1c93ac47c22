//! Upload intake and document administration.

use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use kb_domain::{
	cascade,
	context::{AccessContext, ContextChain, Principal},
	document::{Document, DocumentError, DocumentStatus, IngestErrorCode},
	knowledge_base::{KnowledgeBase, ScopeOwner},
};
use kb_providers::extractor;

use crate::{Error, KbService, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadTarget {
	KnowledgeBase(Uuid),
	/// The workspace or conversation whose own knowledge base receives the upload. The
	/// knowledge base is created on first use.
	Owner(AccessContext),
}

#[derive(Clone, Debug)]
pub struct UploadRequest {
	pub principal: Principal,
	pub target: UploadTarget,
	pub filename: String,
	pub content_type: String,
	pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, Serialize)]
pub struct UploadResponse {
	pub document: Document,
	pub kb: KnowledgeBase,
	pub enqueued: bool,
}

impl KbService {
	/// Stores the upload and queues it for ingestion. Empty and unsupported uploads are
	/// recorded as `failed` straight away and never reach a worker.
	pub async fn upload(&self, req: UploadRequest) -> Result<UploadResponse> {
		let size = req.bytes.len() as u64;
		let limit = self.cfg.ingestion.max_document_bytes;

		if size > limit {
			return Err(Error::PayloadTooLarge { size, limit });
		}

		let filename = req.filename.trim();

		if filename.is_empty() {
			return Err(Error::InvalidRequest { message: "Filename must not be empty.".to_string() });
		}

		let kb = match req.target {
			UploadTarget::KnowledgeBase(kb_id) => self.active_kb(kb_id).await?,
			UploadTarget::Owner(context) => self.owner_kb(&req.principal, context).await?,
		};

		if !self.can_upload_kb(&req.principal, &kb).await? {
			return Err(Error::not_accessible());
		}

		let content_type = extractor::normalize_content_type(&req.content_type);
		let now = OffsetDateTime::now_utc();
		let mut document = Document {
			document_id: Uuid::new_v4(),
			kb_id: kb.kb_id,
			filename: filename.to_string(),
			blob_location: None,
			byte_size: size,
			content_type,
			status: DocumentStatus::Pending,
			error: None,
			chunk_count: 0,
			metadata: Value::Object(Map::new()),
			uploaded_by: req.principal.user_id,
			attempts: 0,
			claimed_at: None,
			created_at: now,
			updated_at: now,
			deleted_at: None,
		};
		let rejection = if req.bytes.is_empty() {
			Some("Document is empty.".to_string())
		} else if !self.providers.extractors.supports(&document.content_type) {
			Some(format!("Content type {:?} is not supported.", document.content_type))
		} else {
			None
		};

		if let Some(message) = rejection {
			document.status = DocumentStatus::Failed;
			document.error = Some(DocumentError::new(IngestErrorCode::UnsupportedFormat, message));

			self.store.insert_document(&document).await?;

			tracing::info!(
				document_id = %document.document_id,
				kb_id = %kb.kb_id,
				content_type = %document.content_type,
				"Upload rejected at intake.",
			);

			return Ok(UploadResponse { document, kb, enqueued: false });
		}

		document.blob_location = Some(self.blobs.put(req.bytes).await?);

		self.store.insert_document(&document).await?;

		let enqueued = kb.config.auto_index;

		if enqueued {
			self.queue.enqueue(document.document_id, now).await?;
		}

		tracing::info!(
			document_id = %document.document_id,
			kb_id = %kb.kb_id,
			bytes = size,
			enqueued,
			"Document uploaded.",
		);

		Ok(UploadResponse { document, kb, enqueued })
	}

	/// Live documents of a knowledge base, for anyone with access in its own context.
	pub async fn list_documents(&self, principal: &Principal, kb_id: Uuid) -> Result<Vec<Document>> {
		let kb = self.active_kb(kb_id).await?;

		self.require_reader(principal, &kb).await?;

		Ok(self.store.list_documents(kb.kb_id).await?)
	}

	pub async fn get_document(&self, principal: &Principal, document_id: Uuid) -> Result<Document> {
		let (document, kb) = self.live_document(document_id).await?;

		self.require_reader(principal, &kb).await?;

		Ok(document)
	}

	/// The uploader, while still allowed to upload, or an administrator of the owner.
	pub async fn delete_document(&self, principal: &Principal, document_id: Uuid) -> Result<()> {
		let (document, kb) = self.live_document(document_id).await?;

		self.require_document_editor(principal, &document, &kb).await?;

		if self.store.soft_delete_document(document.document_id, OffsetDateTime::now_utc()).await? {
			tracing::info!(document_id = %document.document_id, actor = %principal.user_id, "Document deleted.");
		}

		Ok(())
	}

	/// `failed -> pending`, then back onto the queue.
	pub async fn retry_document(&self, principal: &Principal, document_id: Uuid) -> Result<Document> {
		let (document, kb) = self.live_document(document_id).await?;

		self.require_document_editor(principal, &document, &kb).await?;

		document.status.transition(DocumentStatus::Pending)?;

		if document.blob_location.is_none() {
			return Err(Error::InvalidRequest {
				message: "Document was rejected at intake and has no stored content.".to_string(),
			});
		}

		let now = OffsetDateTime::now_utc();

		if !self.store.reset_document(document.document_id, now).await? {
			let current = self.live_document(document_id).await?.0;

			return Err(Error::InvalidTransition { from: current.status, to: DocumentStatus::Pending });
		}

		self.queue.enqueue(document.document_id, now).await?;

		tracing::info!(document_id = %document.document_id, actor = %principal.user_id, "Document retry queued.");

		Ok(self.live_document(document_id).await?.0)
	}

	/// Queues a pending document of a knowledge base that does not index automatically.
	pub async fn index_document(&self, principal: &Principal, document_id: Uuid) -> Result<()> {
		let (document, kb) = self.live_document(document_id).await?;

		self.require_document_editor(principal, &document, &kb).await?;

		if document.status != DocumentStatus::Pending {
			return Err(Error::InvalidTransition {
				from: document.status,
				to: DocumentStatus::Processing,
			});
		}

		self.queue.enqueue(document.document_id, OffsetDateTime::now_utc()).await?;

		tracing::info!(document_id = %document.document_id, "Document queued for indexing.");

		Ok(())
	}

	async fn owner_kb(&self, principal: &Principal, context: AccessContext) -> Result<KnowledgeBase> {
		let (owner, chain) = match context {
			AccessContext::Workspace(workspace_id) => {
				let Some(workspace) = self.store.get_workspace(workspace_id).await? else {
					return Err(Error::NotFound { message: format!("workspace {workspace_id}") });
				};

				(
					ScopeOwner::Workspace { org_id: workspace.org_id, workspace_id },
					ContextChain::workspace(&workspace),
				)
			},
			AccessContext::Conversation(conversation_id) => {
				let Some(conversation) = self.store.get_conversation(conversation_id).await? else {
					return Err(Error::NotFound { message: format!("conversation {conversation_id}") });
				};

				(
					ScopeOwner::Conversation {
						org_id: conversation.org_id,
						conversation_id,
						workspace_id: conversation.workspace_id,
					},
					ContextChain::conversation(&conversation),
				)
			},
			AccessContext::Platform | AccessContext::Organization(_) =>
				return Err(Error::InvalidRequest {
					message: "Only workspace and conversation uploads create a knowledge base."
						.to_string(),
				}),
		};
		let memberships = self.memberships(principal, &chain).await?;

		if let Err(denial) = cascade::evaluate_membership(principal, &chain, &memberships) {
			tracing::debug!(principal = %principal.user_id, reason = %denial, "Upload refused.");

			return Err(Error::not_accessible());
		}

		self.get_or_create_for_owner(owner, principal.user_id).await
	}

	async fn live_document(&self, document_id: Uuid) -> Result<(Document, KnowledgeBase)> {
		let not_found = || Error::NotFound { message: format!("document {document_id}") };
		let document = match self.store.get_document(document_id).await? {
			Some(document) if !document.is_deleted() => document,
			_ => return Err(not_found()),
		};
		let kb = match self.store.get_kb(document.kb_id).await? {
			Some(kb) if !kb.is_deleted() => kb,
			_ => return Err(not_found()),
		};

		Ok((document, kb))
	}

	async fn require_reader(&self, principal: &Principal, kb: &KnowledgeBase) -> Result<()> {
		if self.can_access_kb(principal, kb, AccessContext::for_owner(&kb.owner)).await? {
			Ok(())
		} else {
			Err(Error::not_accessible())
		}
	}

	async fn require_document_editor(
		&self,
		principal: &Principal,
		document: &Document,
		kb: &KnowledgeBase,
	) -> Result<()> {
		if document.uploaded_by == principal.user_id && self.can_upload_kb(principal, kb).await? {
			return Ok(());
		}
		if self.is_owner_admin(principal, &kb.owner).await? {
			return Ok(());
		}

		Err(Error::not_accessible())
	}
}
