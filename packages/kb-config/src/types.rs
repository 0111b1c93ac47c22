use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub object_store: ObjectStore,
	pub providers: Providers,
	pub ingestion: Ingestion,
	pub retrieval: Retrieval,
	pub worker: Worker,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	/// Dimension of the `vector` column chunks are stored in.
	pub vector_dim: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ObjectStore {
	pub root: PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default = "default_batch_size")]
	pub batch_size: u32,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Ingestion {
	pub max_document_bytes: u64,
	#[serde(default = "default_chunk_target_chars")]
	pub chunk_target_chars: u32,
	#[serde(default = "default_chunk_overlap_chars")]
	pub chunk_overlap_chars: u32,
	pub embed_concurrency: u32,
	pub max_attempts: u32,
	pub base_backoff_ms: u64,
	pub max_backoff_ms: u64,
	pub claim_lease_seconds: u64,
	/// Failed documents with a retryable error are queued again once their last failure is
	/// this old. Unset disables the sweep.
	pub auto_retry_after_seconds: Option<u64>,
	#[serde(default = "default_max_scheduled_retries")]
	pub max_scheduled_retries: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Retrieval {
	pub default_top_k: u32,
	pub max_top_k: u32,
	pub default_min_similarity: f32,
	pub timeout_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Worker {
	pub concurrency: u32,
	pub poll_interval_ms: u64,
	#[serde(default = "default_sweep_interval_seconds")]
	pub sweep_interval_seconds: u64,
}

fn default_batch_size() -> u32 {
	32
}

fn default_chunk_target_chars() -> u32 {
	1_000
}

fn default_chunk_overlap_chars() -> u32 {
	200
}

fn default_max_scheduled_retries() -> u32 {
	3
}

fn default_sweep_interval_seconds() -> u64 {
	60
}
