pub mod access;
pub mod directory;
pub mod documents;
pub mod ingestion;
pub mod registry;
pub mod retrieval;

mod error;

pub use access::SetGrantRequest;
pub use documents::{UploadRequest, UploadResponse, UploadTarget};
pub use error::{Error, Result};
pub use ingestion::{IngestOutcome, SkipReason};
pub use registry::{CreateKbRequest, UpdateKbRequest};
pub use retrieval::{SearchDegradation, SearchErrorCode, SearchItem, SearchRequest, SearchResponse};

use std::{future::Future, pin::Pin, sync::Arc};

use kb_config::{Config, EmbeddingProviderConfig};
use kb_providers::{
	embedding::{self, EmbeddingBatch},
	extractor::ExtractorRegistry,
};
use kb_storage::{KbStore, blob::ObjectStore, queue::TaskQueue};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, kb_providers::Result<EmbeddingBatch>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub extractors: ExtractorRegistry,
}
impl Providers {
	pub fn new(embedding: Arc<dyn EmbeddingProvider>, extractors: ExtractorRegistry) -> Self {
		Self { embedding, extractors }
	}
}

impl Default for Providers {
	fn default() -> Self {
		Self { embedding: Arc::new(DefaultProviders), extractors: ExtractorRegistry::with_defaults() }
	}
}

pub struct KbService {
	pub cfg: Config,
	pub store: Arc<dyn KbStore>,
	pub blobs: Arc<dyn ObjectStore>,
	pub queue: Arc<dyn TaskQueue>,
	pub providers: Providers,
}
impl KbService {
	pub fn new(
		cfg: Config,
		store: Arc<dyn KbStore>,
		blobs: Arc<dyn ObjectStore>,
		queue: Arc<dyn TaskQueue>,
	) -> Self {
		Self::with_providers(cfg, store, blobs, queue, Providers::default())
	}

	pub fn with_providers(
		cfg: Config,
		store: Arc<dyn KbStore>,
		blobs: Arc<dyn ObjectStore>,
		queue: Arc<dyn TaskQueue>,
		providers: Providers,
	) -> Self {
		Self { cfg, store, blobs, queue, providers }
	}

	/// Embeds a fixed sample text and compares the returned dimension with configuration.
	pub async fn probe_embedding_dimension(&self) -> Result<()> {
		let cfg = &self.cfg.providers.embedding;
		let texts = vec!["dimension check".to_string()];
		let batch = self.providers.embedding.embed(cfg, &texts).await?;
		let Some(Some(vector)) = batch.into_iter().next() else {
			return Err(Error::EmbeddingProvider {
				message: "Embedding provider returned no vector.".to_string(),
			});
		};
		let actual = vector.len() as u32;

		if actual != cfg.dimensions {
			return Err(Error::DimensionMismatch { expected: cfg.dimensions, actual });
		}

		tracing::info!(dimensions = actual, model = %cfg.model, "Embedding dimension verified.");

		Ok(())
	}
}

struct DefaultProviders;

impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, kb_providers::Result<EmbeddingBatch>> {
		Box::pin(embedding::embed(cfg, texts))
	}
}
