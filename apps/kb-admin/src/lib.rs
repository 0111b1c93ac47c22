pub mod commands;

use std::{path::PathBuf, sync::Arc};

use clap::{ArgAction, Parser, Subcommand};
use color_eyre::eyre;
use uuid::Uuid;

use kb_domain::{
	cascade::GrantLevel,
	context::{AccessContext, Principal},
	knowledge_base::{Scope, UploadPolicy},
	membership::Role,
};
use kb_service::KbService;
use kb_storage::{blob::FsObjectStore, db::Db};

#[derive(Debug, Parser)]
#[command(
	version = kb_cli::VERSION,
	rename_all = "kebab",
	styles = kb_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	/// User the command acts as.
	#[arg(long, value_name = "UUID", global = true)]
	pub as_user: Option<Uuid>,
	#[arg(long, global = true)]
	pub platform_admin: bool,
	#[command(subcommand)]
	pub command: Command,
}
impl Args {
	pub fn principal(&self) -> eyre::Result<Principal> {
		let Some(user_id) = self.as_user else {
			return Err(eyre::eyre!("This command needs --as-user."));
		};

		Ok(Principal { user_id, platform_admin: self.platform_admin })
	}
}

#[derive(Debug, Subcommand)]
#[command(rename_all = "kebab")]
pub enum Command {
	/// Organizations, workspaces, conversations and memberships.
	#[command(subcommand)]
	Directory(DirectoryCommand),
	#[command(subcommand)]
	Kb(KbCommand),
	#[command(subcommand)]
	Grant(GrantCommand),
	#[command(subcommand)]
	Doc(DocCommand),
	/// Nearest chunks across every knowledge base accessible in the context.
	Search {
		#[arg(long, value_parser = parse_context)]
		context: AccessContext,
		#[arg(long)]
		query: String,
		#[arg(long)]
		top_k: Option<u32>,
		#[arg(long)]
		min_similarity: Option<f32>,
		#[arg(long)]
		timeout_ms: Option<u64>,
	},
}

#[derive(Debug, Subcommand)]
#[command(rename_all = "kebab")]
pub enum DirectoryCommand {
	Org {
		#[arg(long)]
		org_id: Uuid,
		#[arg(long)]
		name: String,
	},
	Workspace {
		#[arg(long)]
		workspace_id: Uuid,
		#[arg(long)]
		org_id: Uuid,
		#[arg(long)]
		name: String,
	},
	Conversation {
		#[arg(long)]
		conversation_id: Uuid,
		#[arg(long)]
		org_id: Uuid,
		#[arg(long)]
		workspace_id: Option<Uuid>,
	},
	Member {
		#[arg(long)]
		user_id: Uuid,
		/// `organization:<uuid>`, `workspace:<uuid>` or `conversation:<uuid>`.
		#[arg(long, value_parser = parse_context)]
		target: AccessContext,
		#[arg(long, value_parser = parse_role, default_value = "member")]
		role: Role,
		#[arg(long)]
		inactive: bool,
	},
}

#[derive(Debug, Subcommand)]
#[command(rename_all = "kebab")]
pub enum KbCommand {
	Create {
		#[arg(long)]
		name: String,
		#[arg(long, value_parser = parse_scope)]
		scope: Scope,
		#[arg(long)]
		org_id: Option<Uuid>,
		#[arg(long)]
		workspace_id: Option<Uuid>,
		#[arg(long)]
		conversation_id: Option<Uuid>,
		#[arg(long, value_parser = parse_upload_policy, default_value = "all_members")]
		upload_policy: UploadPolicy,
		#[arg(long)]
		no_auto_index: bool,
	},
	Get {
		#[arg(long)]
		kb_id: Uuid,
	},
	Update {
		#[arg(long)]
		kb_id: Uuid,
		#[arg(long)]
		name: Option<String>,
		#[arg(long)]
		enabled: Option<bool>,
		#[arg(long, value_parser = parse_upload_policy)]
		upload_policy: Option<UploadPolicy>,
		#[arg(long)]
		auto_index: Option<bool>,
	},
	Delete {
		#[arg(long)]
		kb_id: Uuid,
	},
	/// Knowledge bases owned by one entity, for its administrators.
	List {
		#[arg(long, value_parser = parse_scope)]
		scope: Scope,
		#[arg(long)]
		org_id: Option<Uuid>,
		#[arg(long)]
		workspace_id: Option<Uuid>,
		#[arg(long)]
		conversation_id: Option<Uuid>,
	},
	/// Knowledge bases the principal can read in a context, narrowest first.
	Accessible {
		#[arg(long, value_parser = parse_context)]
		context: AccessContext,
	},
	CanAccess {
		#[arg(long)]
		kb_id: Uuid,
		#[arg(long, value_parser = parse_context)]
		context: AccessContext,
	},
}

#[derive(Debug, Subcommand)]
#[command(rename_all = "kebab")]
pub enum GrantCommand {
	Set {
		#[arg(long)]
		kb_id: Uuid,
		#[arg(long, value_parser = parse_level)]
		level: GrantLevel,
		#[arg(long)]
		target_id: Uuid,
		#[arg(long, action = ArgAction::Set)]
		enabled: bool,
	},
	List {
		#[arg(long)]
		kb_id: Uuid,
	},
}

#[derive(Debug, Subcommand)]
#[command(rename_all = "kebab")]
pub enum DocCommand {
	/// Uploads into a knowledge base, or into the own knowledge base of a workspace or
	/// conversation.
	Upload {
		#[arg(long, conflicts_with = "owner", required_unless_present = "owner")]
		kb_id: Option<Uuid>,
		#[arg(long, value_parser = parse_context)]
		owner: Option<AccessContext>,
		#[arg(long, value_name = "FILE")]
		file: PathBuf,
		/// Guessed from the file extension when absent.
		#[arg(long)]
		content_type: Option<String>,
	},
	List {
		#[arg(long)]
		kb_id: Uuid,
	},
	Get {
		#[arg(long)]
		document_id: Uuid,
	},
	Retry {
		#[arg(long)]
		document_id: Uuid,
	},
	Delete {
		#[arg(long)]
		document_id: Uuid,
	},
	Index {
		#[arg(long)]
		document_id: Uuid,
	},
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = kb_config::load(&args.config)?;

	kb_cli::init_tracing(&config.service.log_level);

	let db = Db::connect(&config.storage.postgres).await?;

	db.ensure_schema(config.storage.vector_dim).await?;

	let db = Arc::new(db);
	let blobs = Arc::new(FsObjectStore::new(config.object_store.root.clone()));
	let service = KbService::new(config, db.clone(), blobs, db);

	commands::dispatch(&service, &args).await
}

/// `platform`, or `<kind>:<uuid>` with kind one of `organization`, `workspace`,
/// `conversation`.
pub fn parse_context(raw: &str) -> Result<AccessContext, String> {
	if raw == "platform" {
		return Ok(AccessContext::Platform);
	}

	let Some((kind, id)) = raw.split_once(':') else {
		return Err(format!("Expected platform or <kind>:<uuid>, got {raw:?}."));
	};
	let id = Uuid::parse_str(id).map_err(|err| format!("Invalid id {id:?}: {err}."))?;

	match kind {
		"organization" | "org" => Ok(AccessContext::Organization(id)),
		"workspace" => Ok(AccessContext::Workspace(id)),
		"conversation" => Ok(AccessContext::Conversation(id)),
		_ => Err(format!("Unknown context kind {kind:?}.")),
	}
}

fn parse_scope(raw: &str) -> Result<Scope, String> {
	Scope::parse(raw).map_err(|err| err.to_string())
}

fn parse_level(raw: &str) -> Result<GrantLevel, String> {
	GrantLevel::parse(raw).map_err(|err| err.to_string())
}

fn parse_role(raw: &str) -> Result<Role, String> {
	Role::parse(raw).map_err(|err| err.to_string())
}

fn parse_upload_policy(raw: &str) -> Result<UploadPolicy, String> {
	UploadPolicy::parse(raw).map_err(|err| err.to_string())
}
