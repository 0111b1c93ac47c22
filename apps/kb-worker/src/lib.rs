pub mod worker;

use std::{path::PathBuf, sync::Arc};

use clap::Parser;

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
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = kb_config::load(&args.config)?;

	kb_cli::init_tracing(&config.service.log_level);

	let db = Db::connect(&config.storage.postgres).await?;

	db.ensure_schema(config.storage.vector_dim).await?;

	let db = Arc::new(db);
	let blobs = Arc::new(FsObjectStore::new(config.object_store.root.clone()));
	let service = Arc::new(KbService::new(config, db.clone(), blobs, db));

	// A provider that disagrees with the vector column would fail every document.
	service.probe_embedding_dimension().await?;

	worker::run_worker(service).await
}
