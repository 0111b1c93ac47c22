//! Document processing: fetch, extract, chunk, embed, persist.
//!
//! A job only ever acts on a document it has claimed. The claim token is checked again by the
//! final write, so a worker whose lease ran out cannot overwrite the work of the one that took
//! over.

use std::{borrow::Cow, sync::Arc};

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tokio::{sync::Semaphore, task::JoinSet};
use uuid::Uuid;

use kb_chunking::{ChunkingConfig, TextChunk};
use kb_config::EmbeddingProviderConfig;
use kb_domain::document::{Chunk, DocumentError, DocumentStatus, IngestErrorCode, chunk_id_for};
use kb_providers::extractor::ExtractedText;
use kb_storage::ClaimedDocument;

use crate::{Error, KbService, Result};

const MAX_ERROR_CHARS: usize = 1_024;
const MIN_SECRET_CHARS: usize = 6;
const REDACTED: &str = "[REDACTED]";
const CREDENTIAL_KEYS: [&str; 7] =
	["api_key", "apikey", "api-key", "authorization", "password", "secret", "token"];
const CREDENTIAL_HEADER_HINTS: [&str; 4] = ["auth", "key", "token", "secret"];
const SWEEP_BATCH: u32 = 100;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
	Indexed { chunk_count: u32 },
	Failed { code: IngestErrorCode },
	Skipped { reason: SkipReason },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
	/// Already indexed, failed, deleted or unknown.
	NotClaimable,
	/// Another run holds a live claim until `until`. The job must come back after that.
	ClaimHeld { until: OffsetDateTime },
	/// The claim was taken over before this run could record its result.
	LostClaim,
}

impl KbService {
	/// Runs one delivery of an ingestion job. Redeliveries for documents that are not pending
	/// are no-ops. Storage errors hand the claim back and are returned so the job is delivered
	/// again; every other failure ends in `failed`.
	pub async fn process_document(&self, document_id: Uuid) -> Result<IngestOutcome> {
		let now = OffsetDateTime::now_utc();
		let lease = Duration::seconds(self.cfg.ingestion.claim_lease_seconds as i64);
		let Some(claim) = self.store.claim_document(document_id, now, lease).await? else {
			return self.skip_unclaimable(document_id, lease).await;
		};

		tracing::debug!(
			document_id = %document_id,
			attempt = claim.document.attempts,
			"Document claimed.",
		);

		match self.index_claimed(&claim).await {
			Ok(outcome) => Ok(outcome),
			Err(err) => {
				let Some(code) = err.ingest_code() else {
					self.hand_back_claim(&claim, &err).await;

					return Err(err);
				};
				let error = DocumentError::new(
					code,
					sanitize_error_text(&err.to_string(), &self.cfg.providers.embedding),
				);

				let recorded = match self
					.store
					.fail_document(document_id, claim.token, &error, OffsetDateTime::now_utc())
					.await
				{
					Ok(recorded) => recorded,
					Err(err) => {
						let err = Error::from(err);

						self.hand_back_claim(&claim, &err).await;

						return Err(err);
					},
				};

				if !recorded {
					return Ok(IngestOutcome::Skipped { reason: SkipReason::LostClaim });
				}

				tracing::warn!(
					document_id = %document_id,
					code = code.as_str(),
					error = %error.message,
					"Document ingestion failed.",
				);

				Ok(IngestOutcome::Failed { code })
			},
		}
	}

	/// Queues retryable failures again once they are old enough. Returns how many were queued.
	pub async fn sweep_failed(&self, now: OffsetDateTime) -> Result<u32> {
		let Some(after) = self.cfg.ingestion.auto_retry_after_seconds else {
			return Ok(0);
		};
		let failed_before = now - Duration::seconds(after as i64);
		let documents = self
			.store
			.failed_documents_for_retry(
				failed_before,
				self.cfg.ingestion.max_scheduled_retries,
				SWEEP_BATCH,
			)
			.await?;
		let mut queued = 0;

		for document in documents {
			if !self.store.reset_document(document.document_id, now).await? {
				continue;
			}

			self.queue.enqueue(document.document_id, now).await?;

			queued += 1;
		}

		if queued > 0 {
			tracing::info!(queued, "Failed documents queued for retry.");
		}

		Ok(queued)
	}

	async fn skip_unclaimable(&self, document_id: Uuid, lease: Duration) -> Result<IngestOutcome> {
		let held_until = match self.store.get_document(document_id).await? {
			Some(document)
				if document.status == DocumentStatus::Processing && !document.is_deleted() =>
				document.claimed_at.map(|claimed_at| claimed_at + lease),
			_ => None,
		};
		let reason = match held_until {
			Some(until) => SkipReason::ClaimHeld { until },
			None => SkipReason::NotClaimable,
		};

		tracing::debug!(
			document_id = %document_id,
			?reason,
			"Document is not claimable. Skipping.",
		);

		Ok(IngestOutcome::Skipped { reason })
	}

	/// Returns the document to `pending` after an infrastructure error so the redelivered job
	/// can claim it right away. Failing to do so only delays the document until the lease runs
	/// out.
	async fn hand_back_claim(&self, claim: &ClaimedDocument, cause: &Error) {
		let document_id = claim.document.document_id;

		match self.store.release_claim(document_id, claim.token, OffsetDateTime::now_utc()).await {
			Ok(released) => tracing::debug!(
				document_id = %document_id,
				released,
				error = %cause,
				"Document claim handed back after an interrupted run.",
			),
			Err(err) => tracing::warn!(
				document_id = %document_id,
				error = %err,
				"Failed to hand back the document claim. It frees up when the lease expires.",
			),
		}
	}

	async fn index_claimed(&self, claim: &ClaimedDocument) -> Result<IngestOutcome> {
		let document = &claim.document;
		let bytes = self.fetch_blob(document.blob_location.as_deref()).await?;
		let Some(extractor) = self.providers.extractors.get(&document.content_type) else {
			return Err(Error::UnsupportedFormat {
				message: format!("No extractor for content type {:?}.", document.content_type),
			});
		};
		let ExtractedText { text, page_breaks, metadata } = extractor.extract(&bytes)?;

		if text.trim().is_empty() {
			return Err(Error::UnsupportedFormat {
				message: "Document has no extractable text.".to_string(),
			});
		}

		let chunking = ChunkingConfig {
			target_chars: self.cfg.ingestion.chunk_target_chars as usize,
			overlap_chars: self.cfg.ingestion.chunk_overlap_chars as usize,
		};
		let pieces = kb_chunking::split_text(&text, &chunking);

		if pieces.is_empty() {
			return Err(Error::UnsupportedFormat {
				message: "Document produced no chunks.".to_string(),
			});
		}

		let texts: Vec<String> = pieces.iter().map(|piece| piece.text.clone()).collect();
		let vectors = self.embed_all(&texts).await?;
		let now = OffsetDateTime::now_utc();
		let chunks: Vec<Chunk> = pieces
			.into_iter()
			.zip(vectors)
			.map(|(piece, vector)| {
				let TextChunk { ordinal, start_offset, end_offset, text } = piece;

				Chunk {
					chunk_id: chunk_id_for(document.document_id, ordinal),
					kb_id: document.kb_id,
					document_id: document.document_id,
					ordinal,
					text,
					embedding: Some(vector),
					page: kb_chunking::page_for_offset(&page_breaks, start_offset),
					start_offset: start_offset as u32,
					end_offset: end_offset as u32,
					created_at: now,
				}
			})
			.collect();
		let chunk_count = chunks.len() as u32;

		if !self
			.store
			.commit_indexed(document.document_id, claim.token, &chunks, &metadata, now)
			.await?
		{
			tracing::info!(
				document_id = %document.document_id,
				"Claim lost before commit. Discarding chunks.",
			);

			return Ok(IngestOutcome::Skipped { reason: SkipReason::LostClaim });
		}

		tracing::info!(document_id = %document.document_id, chunk_count, "Document indexed.");

		Ok(IngestOutcome::Indexed { chunk_count })
	}

	async fn fetch_blob(&self, location: Option<&str>) -> Result<Vec<u8>> {
		let Some(location) = location else {
			return Err(Error::BlobUnavailable {
				message: "Document has no stored content.".to_string(),
			});
		};
		let max_attempts = self.cfg.ingestion.max_attempts.max(1);
		let mut attempt = 1;

		loop {
			match self.blobs.get(location).await {
				Ok(bytes) => return Ok(bytes),
				Err(err) if attempt >= max_attempts =>
					return Err(Error::BlobUnavailable {
						message: format!("Blob could not be read after {attempt} attempts: {err}"),
					}),
				Err(err) => {
					tracing::debug!(attempt, error = %err, "Blob read failed. Retrying.");

					tokio::time::sleep(self.backoff(attempt).unsigned_abs()).await;

					attempt += 1;
				},
			}
		}
	}

	/// Embeds every text, in ordinal order. Each round sends only the items still missing, in
	/// batches bounded by the embedding concurrency limit.
	async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
		let cfg = &self.cfg.providers.embedding;
		let batch_size = cfg.batch_size.max(1) as usize;
		let max_attempts = self.cfg.ingestion.max_attempts.max(1);
		let permits = self.cfg.ingestion.embed_concurrency.max(1) as usize;
		let semaphore = Arc::new(Semaphore::new(permits));
		let mut vectors: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
		let mut last_error = String::new();

		for round in 1..=max_attempts {
			let missing: Vec<usize> = vectors
				.iter()
				.enumerate()
				.filter(|(_, v)| v.is_none())
				.map(|(idx, _)| idx)
				.collect();

			if missing.is_empty() {
				break;
			}
			if round > 1 {
				tracing::debug!(round, missing = missing.len(), "Retrying failed embeddings.");

				tokio::time::sleep(self.backoff(round - 1).unsigned_abs()).await;
			}

			let mut tasks = JoinSet::new();

			for indices in missing.chunks(batch_size) {
				let permit = semaphore.clone().acquire_owned().await.map_err(|_| {
					Error::EmbeddingProvider { message: "Embedding limiter closed.".to_string() }
				})?;
				let provider = self.providers.embedding.clone();
				let cfg = cfg.clone();
				let indices = indices.to_vec();
				let batch: Vec<String> = indices.iter().map(|&idx| texts[idx].clone()).collect();

				tasks.spawn(async move {
					let result = provider.embed(&cfg, &batch).await;

					drop(permit);

					(indices, result)
				});
			}

			while let Some(joined) = tasks.join_next().await {
				let (indices, result) = match joined {
					Ok(pair) => pair,
					Err(err) => {
						last_error = format!("Embedding task failed: {err}");

						continue;
					},
				};
				let batch = match result {
					Ok(batch) => batch,
					Err(err) => {
						last_error = err.to_string();

						continue;
					},
				};

				if batch.len() != indices.len() {
					last_error = format!(
						"Provider returned {} vectors for {} inputs.",
						batch.len(),
						indices.len()
					);

					continue;
				}

				for (idx, vector) in indices.into_iter().zip(batch) {
					let Some(vector) = vector else {
						last_error = "Provider returned no vector for an item.".to_string();

						continue;
					};

					if vector.len() != cfg.dimensions as usize {
						return Err(Error::DimensionMismatch {
							expected: cfg.dimensions,
							actual: vector.len() as u32,
						});
					}

					vectors[idx] = Some(vector);
				}
			}
		}

		let missing = vectors.iter().filter(|vector| vector.is_none()).count();

		if missing > 0 {
			return Err(Error::EmbeddingProvider {
				message: format!(
					"{missing} of {} chunks could not be embedded after {max_attempts} attempts: {last_error}",
					texts.len()
				),
			});
		}

		Ok(vectors.into_iter().flatten().collect())
	}

	fn backoff(&self, attempt: u32) -> Duration {
		backoff_for_attempt(
			attempt,
			self.cfg.ingestion.base_backoff_ms,
			self.cfg.ingestion.max_backoff_ms,
		)
	}
}

/// `base * 2^(attempt - 1)`, capped at `max`. The exponent stops growing after six doublings.
pub fn backoff_for_attempt(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
	let exp = attempt.max(1).saturating_sub(1).min(6);
	let delay = base_ms.saturating_mul(1 << exp).min(max_ms);

	Duration::milliseconds(delay as i64)
}

/// Error text fit to persist on a document or job. The provider's configured credentials are
/// replaced wherever they appear, as are bearer tokens and `key=value` or `key:value` pairs
/// whose key names a credential. The result is cut to `MAX_ERROR_CHARS`.
pub fn sanitize_error_text(text: &str, provider: &EmbeddingProviderConfig) -> String {
	let mut text = text.to_string();

	for secret in provider_secrets(provider) {
		text = text.replace(secret, REDACTED);
	}

	let mut words: Vec<Cow<'_, str>> = Vec::new();
	let mut after_bearer = false;

	for word in text.split_whitespace() {
		let masked = if after_bearer {
			Cow::Borrowed(REDACTED)
		} else {
			mask_credential_pair(word).map_or(Cow::Borrowed(word), Cow::Owned)
		};

		words.push(masked);

		after_bearer = word.eq_ignore_ascii_case("bearer");
	}

	let joined = words.join(" ");

	match joined.char_indices().nth(MAX_ERROR_CHARS) {
		Some((cut, _)) => format!("{}...", &joined[..cut]),
		None => joined,
	}
}

/// The API key plus every string header value whose name suggests a credential. Short values
/// are skipped; replacing them would shred unrelated text.
fn provider_secrets(provider: &EmbeddingProviderConfig) -> Vec<&str> {
	let headers = provider
		.default_headers
		.iter()
		.filter(|(name, _)| {
			let name = name.to_ascii_lowercase();

			CREDENTIAL_HEADER_HINTS.iter().any(|hint| name.contains(hint))
		})
		.filter_map(|(_, value)| value.as_str());

	std::iter::once(provider.api_key.as_str())
		.chain(headers)
		.map(|secret| secret.trim_start_matches("Bearer ").trim())
		.filter(|secret| secret.len() >= MIN_SECRET_CHARS)
		.collect()
}

fn mask_credential_pair(word: &str) -> Option<String> {
	let sep = word.find(['=', ':'])?;
	let key = &word[..sep];
	let lowered = key.to_ascii_lowercase();

	CREDENTIAL_KEYS
		.iter()
		.any(|name| lowered.contains(name))
		.then(|| format!("{key}{}{REDACTED}", &word[sep..sep + 1]))
}
