//! Ingestion loops. Each loop claims one queue job at a time; a periodic sweep puts retryable
//! failures back on the queue.

use std::{sync::Arc, time::Duration as StdDuration};

use color_eyre::{Result, eyre};
use time::{Duration, OffsetDateTime};
use tokio::{sync::watch, task::JoinSet, time as tokio_time};

use kb_service::{IngestOutcome, KbService, SkipReason, ingestion};

pub async fn run_worker(service: Arc<KbService>) -> Result<()> {
	let concurrency = service.cfg.worker.concurrency.max(1);
	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let mut loops = JoinSet::new();

	for slot in 0..concurrency {
		loops.spawn(ingest_loop(service.clone(), slot, shutdown_rx.clone()));
	}

	loops.spawn(sweep_loop(service.clone(), shutdown_rx));

	tracing::info!(concurrency, "Worker started.");

	tokio::select! {
		signal = tokio::signal::ctrl_c() => {
			signal?;

			tracing::info!("Shutdown requested. Finishing in-flight jobs.");
		},
		Some(joined) = loops.join_next() => {
			loops.abort_all();

			return Err(match joined {
				Ok(()) => eyre::eyre!("A worker loop stopped unexpectedly."),
				Err(err) => eyre::eyre!("A worker loop panicked: {err}"),
			});
		},
	}

	// Receivers only fail to see this once every loop has already exited.
	let _ = shutdown_tx.send(true);

	while let Some(joined) = loops.join_next().await {
		if let Err(err) = joined {
			tracing::error!(error = %err, "Worker loop ended abnormally.");
		}
	}

	tracing::info!("Worker stopped.");

	Ok(())
}

/// Claims and runs a single job. Returns whether a job was found.
///
/// A job whose run returned an error is released with backoff, and a job whose document is
/// held by a live claim is released until that claim expires. Document-level failures are
/// recorded on the document by the service and still acknowledge the job.
pub async fn process_once(service: &KbService) -> kb_service::Result<bool> {
	let now = OffsetDateTime::now_utc();
	let lease = Duration::seconds(service.cfg.ingestion.claim_lease_seconds as i64);
	let Some(job) = service.queue.claim(now, lease).await? else {
		return Ok(false);
	};

	match service.process_document(job.document_id).await {
		Ok(IngestOutcome::Skipped { reason: SkipReason::ClaimHeld { until } }) => {
			let now = OffsetDateTime::now_utc();
			let available_at = until.max(now);

			service
				.queue
				.release(job.job_id, "Document claim is held by another run.", available_at, now)
				.await?;

			tracing::debug!(
				job_id = %job.job_id,
				document_id = %job.document_id,
				retry_in_ms = (available_at - now).whole_milliseconds() as u64,
				"Document claim is held elsewhere. Job released until the lease runs out.",
			);
		},
		Ok(outcome) => {
			service.queue.ack(job.job_id, OffsetDateTime::now_utc()).await?;

			match outcome {
				IngestOutcome::Indexed { chunk_count } => tracing::debug!(
					job_id = %job.job_id,
					document_id = %job.document_id,
					chunk_count,
					"Job done.",
				),
				IngestOutcome::Failed { code } => tracing::debug!(
					job_id = %job.job_id,
					document_id = %job.document_id,
					code = code.as_str(),
					"Job done with a failed document.",
				),
				IngestOutcome::Skipped { reason } => tracing::debug!(
					job_id = %job.job_id,
					document_id = %job.document_id,
					?reason,
					"Job skipped.",
				),
			}
		},
		Err(err) => {
			let now = OffsetDateTime::now_utc();
			let delay = ingestion::backoff_for_attempt(
				job.attempts + 1,
				service.cfg.ingestion.base_backoff_ms,
				service.cfg.ingestion.max_backoff_ms,
			);
			let message =
				ingestion::sanitize_error_text(&err.to_string(), &service.cfg.providers.embedding);

			service.queue.release(job.job_id, &message, now + delay, now).await?;

			tracing::warn!(
				job_id = %job.job_id,
				document_id = %job.document_id,
				retry_in_ms = delay.whole_milliseconds() as u64,
				error = %message,
				"Job failed. Released for another delivery.",
			);
		},
	}

	Ok(true)
}

async fn ingest_loop(service: Arc<KbService>, slot: u32, mut shutdown: watch::Receiver<bool>) {
	let poll = StdDuration::from_millis(service.cfg.worker.poll_interval_ms);

	loop {
		if *shutdown.borrow() {
			break;
		}

		match process_once(&service).await {
			// Keep draining while there is work.
			Ok(true) => continue,
			Ok(false) => {},
			Err(err) => tracing::error!(slot, error = %err, "Ingestion queue processing failed."),
		}

		tokio::select! {
			_ = tokio_time::sleep(poll) => {},
			changed = shutdown.changed() => if changed.is_err() { break },
		}
	}

	tracing::debug!(slot, "Ingestion loop stopped.");
}

async fn sweep_loop(service: Arc<KbService>, mut shutdown: watch::Receiver<bool>) {
	let interval = StdDuration::from_secs(service.cfg.worker.sweep_interval_seconds);

	loop {
		tokio::select! {
			_ = tokio_time::sleep(interval) => {},
			changed = shutdown.changed() => if changed.is_err() || *shutdown.borrow() { break },
		}

		if let Err(err) = service.sweep_failed(OffsetDateTime::now_utc()).await {
			tracing::error!(error = %err, "Failed document sweep failed.");
		}
	}
}
