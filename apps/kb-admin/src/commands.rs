use std::path::Path;

use color_eyre::{Result, eyre};
use serde::Serialize;
use serde_json::json;

use kb_domain::{
	context::{AccessContext, Conversation, Organization, Workspace},
	knowledge_base::{KbConfig, OwnerRefs, ScopeOwner},
	membership::{Membership, MembershipTarget},
};
use kb_service::{
	CreateKbRequest, KbService, SearchRequest, SetGrantRequest, UpdateKbRequest, UploadRequest,
	UploadTarget,
};

use crate::{Args, Command, DirectoryCommand, DocCommand, GrantCommand, KbCommand};

pub async fn dispatch(service: &KbService, args: &Args) -> Result<()> {
	match &args.command {
		Command::Directory(command) => directory(service, command).await,
		Command::Kb(command) => kb(service, args, command).await,
		Command::Grant(command) => grant(service, args, command).await,
		Command::Doc(command) => doc(service, args, command).await,
		Command::Search { context, query, top_k, min_similarity, timeout_ms } => {
			let response = service
				.search(SearchRequest {
					principal: args.principal()?,
					context: *context,
					query: query.clone(),
					top_k: *top_k,
					min_similarity: *min_similarity,
					timeout_ms: *timeout_ms,
				})
				.await?;

			print_json(&response)
		},
	}
}

async fn directory(service: &KbService, command: &DirectoryCommand) -> Result<()> {
	match command {
		DirectoryCommand::Org { org_id, name } => {
			let org = Organization { org_id: *org_id, name: name.clone() };

			print_json(&service.upsert_organization(org).await?)
		},
		DirectoryCommand::Workspace { workspace_id, org_id, name } => {
			let workspace =
				Workspace { workspace_id: *workspace_id, org_id: *org_id, name: name.clone() };

			print_json(&service.upsert_workspace(workspace).await?)
		},
		DirectoryCommand::Conversation { conversation_id, org_id, workspace_id } => {
			let conversation = Conversation {
				conversation_id: *conversation_id,
				org_id: *org_id,
				workspace_id: *workspace_id,
			};

			print_json(&service.upsert_conversation(conversation).await?)
		},
		DirectoryCommand::Member { user_id, target, role, inactive } => {
			let target = match *target {
				AccessContext::Organization(id) => MembershipTarget::Organization(id),
				AccessContext::Workspace(id) => MembershipTarget::Workspace(id),
				AccessContext::Conversation(id) => MembershipTarget::Conversation(id),
				AccessContext::Platform =>
					return Err(eyre::eyre!("Platform membership is a flag, not a record.")),
			};
			let membership =
				Membership { principal_id: *user_id, target, role: *role, active: !inactive };

			print_json(&service.upsert_membership(membership).await?)
		},
	}
}

async fn kb(service: &KbService, args: &Args, command: &KbCommand) -> Result<()> {
	let principal = args.principal()?;

	match command {
		KbCommand::Create {
			name,
			scope,
			org_id,
			workspace_id,
			conversation_id,
			upload_policy,
			no_auto_index,
		} => {
			let kb = service
				.create_kb(CreateKbRequest {
					principal,
					name: name.clone(),
					scope: *scope,
					owners: OwnerRefs {
						org_id: *org_id,
						workspace_id: *workspace_id,
						conversation_id: *conversation_id,
					},
					config: KbConfig { upload_policy: *upload_policy, auto_index: !no_auto_index },
				})
				.await?;

			print_json(&kb)
		},
		KbCommand::Get { kb_id } => print_json(&service.get_kb(*kb_id).await?),
		KbCommand::Update { kb_id, name, enabled, upload_policy, auto_index } => {
			let config = if upload_policy.is_some() || auto_index.is_some() {
				let current = service.get_kb(*kb_id).await?.config;

				Some(KbConfig {
					upload_policy: (*upload_policy).unwrap_or(current.upload_policy),
					auto_index: (*auto_index).unwrap_or(current.auto_index),
				})
			} else {
				None
			};
			let kb = service
				.update_kb(UpdateKbRequest {
					principal,
					kb_id: *kb_id,
					name: name.clone(),
					config,
					enabled: *enabled,
				})
				.await?;

			print_json(&kb)
		},
		KbCommand::Delete { kb_id } => print_json(&service.delete_kb(&principal, *kb_id).await?),
		KbCommand::List { scope, org_id, workspace_id, conversation_id } => {
			let owner = ScopeOwner::new(
				*scope,
				OwnerRefs {
					org_id: *org_id,
					workspace_id: *workspace_id,
					conversation_id: *conversation_id,
				},
			)?;

			print_json(&service.list_kbs_for_owner(&principal, &owner).await?)
		},
		KbCommand::Accessible { context } =>
			print_json(&service.list_accessible_kbs(&principal, *context).await?),
		KbCommand::CanAccess { kb_id, context } => {
			let allowed = service.can_access(&principal, *kb_id, *context).await?;

			print_json(&json!({ "kb_id": kb_id, "context": context, "allowed": allowed }))
		},
	}
}

async fn grant(service: &KbService, args: &Args, command: &GrantCommand) -> Result<()> {
	let principal = args.principal()?;

	match command {
		GrantCommand::Set { kb_id, level, target_id, enabled } => {
			let grant = service
				.set_grant(SetGrantRequest {
					principal,
					kb_id: *kb_id,
					level: *level,
					target_id: *target_id,
					enabled: *enabled,
				})
				.await?;

			print_json(&grant)
		},
		GrantCommand::List { kb_id } => print_json(&service.list_grants(&principal, *kb_id).await?),
	}
}

async fn doc(service: &KbService, args: &Args, command: &DocCommand) -> Result<()> {
	let principal = args.principal()?;

	match command {
		DocCommand::Upload { kb_id, owner, file, content_type } => {
			let target = match (kb_id, owner) {
				(Some(kb_id), _) => UploadTarget::KnowledgeBase(*kb_id),
				(None, Some(owner)) => UploadTarget::Owner(*owner),
				(None, None) => return Err(eyre::eyre!("Either --kb-id or --owner is required.")),
			};
			let filename = file
				.file_name()
				.and_then(|name| name.to_str())
				.ok_or_else(|| eyre::eyre!("File path has no usable file name."))?
				.to_string();
			let bytes = tokio::fs::read(file).await?;
			let content_type =
				content_type.clone().unwrap_or_else(|| guess_content_type(file).to_string());
			let response = service
				.upload(UploadRequest { principal, target, filename, content_type, bytes })
				.await?;

			print_json(&response)
		},
		DocCommand::List { kb_id } =>
			print_json(&service.list_documents(&principal, *kb_id).await?),
		DocCommand::Get { document_id } =>
			print_json(&service.get_document(&principal, *document_id).await?),
		DocCommand::Retry { document_id } =>
			print_json(&service.retry_document(&principal, *document_id).await?),
		DocCommand::Delete { document_id } => {
			service.delete_document(&principal, *document_id).await?;

			print_json(&json!({ "document_id": document_id, "deleted": true }))
		},
		DocCommand::Index { document_id } => {
			service.index_document(&principal, *document_id).await?;

			print_json(&json!({ "document_id": document_id, "enqueued": true }))
		},
	}
}

fn guess_content_type(path: &Path) -> &'static str {
	let extension =
		path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase).unwrap_or_default();

	match extension.as_str() {
		"txt" | "text" | "log" => "text/plain",
		"md" | "markdown" => "text/markdown",
		"csv" => "text/csv",
		"json" => "application/json",
		_ => "application/octet-stream",
	}
}

fn print_json<T>(value: &T) -> Result<()>
where
	T: Serialize,
{
	println!("{}", serde_json::to_string_pretty(value)?);

	Ok(())
}
