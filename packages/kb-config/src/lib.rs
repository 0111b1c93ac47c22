mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Config, EmbeddingProviderConfig, Ingestion, ObjectStore, Postgres, Providers, Retrieval,
	Service, Storage, Worker,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.postgres.dsn must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if cfg.storage.vector_dim == 0 {
		return Err(Error::Validation {
			message: "storage.vector_dim must be greater than zero.".to_string(),
		});
	}
	if cfg.object_store.root.as_os_str().is_empty() {
		return Err(Error::Validation {
			message: "object_store.root must be non-empty.".to_string(),
		});
	}

	let embedding = &cfg.providers.embedding;

	if embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if embedding.dimensions != cfg.storage.vector_dim {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must match storage.vector_dim.".to_string(),
		});
	}
	if embedding.batch_size == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.batch_size must be greater than zero.".to_string(),
		});
	}
	if embedding.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.timeout_ms must be greater than zero.".to_string(),
		});
	}

	for (label, value) in [
		("providers.embedding.api_base", &embedding.api_base),
		("providers.embedding.api_key", &embedding.api_key),
		("providers.embedding.model", &embedding.model),
	] {
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	let ingestion = &cfg.ingestion;

	if ingestion.max_document_bytes == 0 {
		return Err(Error::Validation {
			message: "ingestion.max_document_bytes must be greater than zero.".to_string(),
		});
	}
	if ingestion.chunk_target_chars == 0 {
		return Err(Error::Validation {
			message: "ingestion.chunk_target_chars must be greater than zero.".to_string(),
		});
	}
	if ingestion.chunk_overlap_chars >= ingestion.chunk_target_chars {
		return Err(Error::Validation {
			message: "ingestion.chunk_overlap_chars must be less than ingestion.chunk_target_chars."
				.to_string(),
		});
	}
	if ingestion.embed_concurrency == 0 {
		return Err(Error::Validation {
			message: "ingestion.embed_concurrency must be greater than zero.".to_string(),
		});
	}
	if ingestion.max_attempts == 0 {
		return Err(Error::Validation {
			message: "ingestion.max_attempts must be greater than zero.".to_string(),
		});
	}
	if ingestion.base_backoff_ms > ingestion.max_backoff_ms {
		return Err(Error::Validation {
			message: "ingestion.base_backoff_ms must not exceed ingestion.max_backoff_ms."
				.to_string(),
		});
	}
	if ingestion.claim_lease_seconds == 0 {
		return Err(Error::Validation {
			message: "ingestion.claim_lease_seconds must be greater than zero.".to_string(),
		});
	}

	if let Some(after) = ingestion.auto_retry_after_seconds
		&& after == 0
	{
		return Err(Error::Validation {
			message: "ingestion.auto_retry_after_seconds must be greater than zero.".to_string(),
		});
	}

	let retrieval = &cfg.retrieval;

	if retrieval.max_top_k == 0 {
		return Err(Error::Validation {
			message: "retrieval.max_top_k must be greater than zero.".to_string(),
		});
	}
	if retrieval.default_top_k == 0 || retrieval.default_top_k > retrieval.max_top_k {
		return Err(Error::Validation {
			message: "retrieval.default_top_k must be in the range 1-retrieval.max_top_k."
				.to_string(),
		});
	}
	if !retrieval.default_min_similarity.is_finite() {
		return Err(Error::Validation {
			message: "retrieval.default_min_similarity must be a finite number.".to_string(),
		});
	}
	if !(-1.0..=1.0).contains(&retrieval.default_min_similarity) {
		return Err(Error::Validation {
			message: "retrieval.default_min_similarity must be in the range -1.0-1.0.".to_string(),
		});
	}
	if retrieval.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "retrieval.timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.worker.concurrency == 0 {
		return Err(Error::Validation {
			message: "worker.concurrency must be greater than zero.".to_string(),
		});
	}
	if cfg.worker.poll_interval_ms == 0 {
		return Err(Error::Validation {
			message: "worker.poll_interval_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.worker.sweep_interval_seconds == 0 {
		return Err(Error::Validation {
			message: "worker.sweep_interval_seconds must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	cfg.service.log_level = cfg.service.log_level.trim().to_string();

	if cfg.service.log_level.is_empty() {
		cfg.service.log_level = "info".to_string();
	}

	let embedding = &mut cfg.providers.embedding;

	embedding.api_base = embedding.api_base.trim().trim_end_matches('/').to_string();

	if !embedding.path.starts_with('/') {
		embedding.path = format!("/{}", embedding.path.trim());
	}
}
