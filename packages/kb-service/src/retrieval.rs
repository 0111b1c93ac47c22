use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use kb_domain::{
	context::{AccessContext, Principal},
	knowledge_base::{KnowledgeBase, Scope},
};

use crate::{Error, KbService, Result};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SearchRequest {
	pub principal: Principal,
	pub context: AccessContext,
	pub query: String,
	pub top_k: Option<u32>,
	pub min_similarity: Option<f32>,
	pub timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SearchItem {
	pub chunk_id: Uuid,
	pub kb_id: Uuid,
	pub kb_name: String,
	pub scope: Scope,
	pub document_id: Uuid,
	pub filename: String,
	pub page: Option<u32>,
	pub ordinal: u32,
	pub text: String,
	pub similarity: f32,
	pub start_offset: u32,
	pub end_offset: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchErrorCode {
	EmbeddingUnavailable,
	SearchTimeout,
}
impl SearchErrorCode {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::EmbeddingUnavailable => "EMBEDDING_UNAVAILABLE",
			Self::SearchTimeout => "SEARCH_TIMEOUT",
		}
	}
}

/// Why a response carries fewer results than it could have.
#[derive(Clone, Debug, Serialize)]
pub struct SearchDegradation {
	pub code: SearchErrorCode,
	pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct SearchResponse {
	pub items: Vec<SearchItem>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<SearchDegradation>,
}
impl SearchResponse {
	fn degraded(code: SearchErrorCode, message: String) -> Self {
		Self { items: Vec::new(), error: Some(SearchDegradation { code, message }) }
	}
}

impl KbService {
	/// Nearest chunks across every knowledge base the principal can access in the context.
	/// Embedding outages and timeouts come back as a degraded response, never as a bare empty
	/// list.
	pub async fn search(&self, req: SearchRequest) -> Result<SearchResponse> {
		let query = req.query.trim();

		if query.is_empty() {
			return Err(Error::InvalidRequest { message: "Query must not be empty.".to_string() });
		}

		let retrieval = &self.cfg.retrieval;
		let top_k = req.top_k.unwrap_or(retrieval.default_top_k);

		if top_k == 0 || top_k > retrieval.max_top_k {
			return Err(Error::InvalidRequest {
				message: format!("top_k must be between 1 and {}.", retrieval.max_top_k),
			});
		}

		let min_similarity = req.min_similarity.unwrap_or(retrieval.default_min_similarity);

		if !min_similarity.is_finite() || !(-1.0..=1.0).contains(&min_similarity) {
			return Err(Error::InvalidRequest {
				message: "min_similarity must be between -1 and 1.".to_string(),
			});
		}

		let timeout_ms = req.timeout_ms.unwrap_or(retrieval.timeout_ms);
		let search = self.search_inner(&req.principal, req.context, query, top_k, min_similarity);

		match tokio::time::timeout(Duration::from_millis(timeout_ms), search).await {
			Ok(result) => result,
			Err(_) => {
				tracing::warn!(timeout_ms, "Search timed out.");

				Ok(SearchResponse::degraded(
					SearchErrorCode::SearchTimeout,
					format!("Search did not finish within {timeout_ms} ms."),
				))
			},
		}
	}

	async fn search_inner(
		&self,
		principal: &Principal,
		context: AccessContext,
		query: &str,
		top_k: u32,
		min_similarity: f32,
	) -> Result<SearchResponse> {
		let vector = match self.embed_query(query).await {
			Ok(vector) => vector,
			Err(err @ Error::DimensionMismatch { .. }) => return Err(err),
			Err(err) => {
				tracing::warn!(error = %err, "Query embedding failed.");

				return Ok(SearchResponse::degraded(
					SearchErrorCode::EmbeddingUnavailable,
					"Query could not be embedded.".to_string(),
				));
			},
		};
		let kbs = self.list_accessible_kbs(principal, context).await?;

		if kbs.is_empty() {
			return Ok(SearchResponse { items: Vec::new(), error: None });
		}

		let kb_ids: Vec<Uuid> = kbs.iter().map(|kb| kb.kb_id).collect();
		let by_id: HashMap<Uuid, KnowledgeBase> = kbs.into_iter().map(|kb| (kb.kb_id, kb)).collect();
		let hits = self.store.search_chunks(&kb_ids, &vector, top_k, min_similarity).await?;
		let items: Vec<SearchItem> = hits
			.into_iter()
			.filter_map(|hit| {
				let kb = by_id.get(&hit.chunk.kb_id)?;

				Some(SearchItem {
					chunk_id: hit.chunk.chunk_id,
					kb_id: kb.kb_id,
					kb_name: kb.name.clone(),
					scope: hit.scope,
					document_id: hit.chunk.document_id,
					filename: hit.filename,
					page: hit.chunk.page,
					ordinal: hit.chunk.ordinal,
					text: hit.chunk.text,
					similarity: hit.similarity,
					start_offset: hit.chunk.start_offset,
					end_offset: hit.chunk.end_offset,
				})
			})
			.collect();

		tracing::debug!(kbs = kb_ids.len(), items = items.len(), "Search finished.");

		Ok(SearchResponse { items, error: None })
	}

	async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
		let cfg = &self.cfg.providers.embedding;
		let texts = vec![query.to_string()];
		let batch = self.providers.embedding.embed(cfg, &texts).await?;
		let Some(Some(vector)) = batch.into_iter().next() else {
			return Err(Error::EmbeddingProvider {
				message: "Embedding provider returned no vector for the query.".to_string(),
			});
		};

		if vector.len() != cfg.dimensions as usize {
			return Err(Error::DimensionMismatch {
				expected: cfg.dimensions,
				actual: vector.len() as u32,
			});
		}

		Ok(vector)
	}
}
