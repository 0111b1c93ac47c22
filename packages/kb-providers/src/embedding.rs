use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};

/// Per-item results in input order. An item the provider did not return, or returned with an
/// error, is `None` so the caller can retry just that item.
pub type EmbeddingBatch = Vec<Option<Vec<f32>>>;

pub async fn embed(
	cfg: &kb_config::EmbeddingProviderConfig,
	texts: &[String],
) -> Result<EmbeddingBatch> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"input": texts,
		"dimensions": cfg.dimensions,
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_embedding_response(json, texts.len())
}

fn parse_embedding_response(json: Value, expected: usize) -> Result<EmbeddingBatch> {
	let data = json.get("data").and_then(|v| v.as_array()).ok_or_else(|| {
		Error::InvalidResponse { message: "Embedding response is missing data array.".to_string() }
	})?;
	let mut out = vec![None; expected];

	for (fallback_index, item) in data.iter().enumerate() {
		let index = item
			.get("index")
			.and_then(|v| v.as_u64())
			.map(|v| v as usize)
			.unwrap_or(fallback_index);

		if index >= expected {
			return Err(Error::InvalidResponse {
				message: format!("Embedding index {index} is out of range for {expected} inputs."),
			});
		}
		if item.get("error").is_some_and(|error| !error.is_null()) {
			tracing::warn!(index, "Embedding provider rejected one input.");

			continue;
		}

		let Some(embedding) = item.get("embedding").and_then(|v| v.as_array()) else {
			continue;
		};
		let mut vec = Vec::with_capacity(embedding.len());

		for value in embedding {
			let number = value.as_f64().ok_or_else(|| Error::InvalidResponse {
				message: "Embedding value must be numeric.".to_string(),
			})?;

			vec.push(number as f32);
		}

		out[index] = Some(vec);
	}

	Ok(out)
}
