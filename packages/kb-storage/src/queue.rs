//! At-least-once delivery of ingestion jobs.

use std::{
	collections::HashMap,
	sync::{Mutex, MutexGuard, PoisonError},
};

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{Error, Result, store::BoxFuture};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobStatus {
	Pending,
	Claimed,
	Done,
	Failed,
}
impl JobStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "PENDING",
			Self::Claimed => "CLAIMED",
			Self::Done => "DONE",
			Self::Failed => "FAILED",
		}
	}

	pub fn parse(raw: &str) -> Result<Self> {
		match raw {
			"PENDING" => Ok(Self::Pending),
			"CLAIMED" => Ok(Self::Claimed),
			"DONE" => Ok(Self::Done),
			"FAILED" => Ok(Self::Failed),
			_ => Err(Error::Corrupt(format!("Unknown outbox status {raw:?}."))),
		}
	}
}

#[derive(Clone, Debug)]
pub struct QueueJob {
	pub job_id: Uuid,
	pub document_id: Uuid,
	pub status: JobStatus,
	/// Number of times the job was released after a failed run.
	pub attempts: u32,
	pub last_error: Option<String>,
	pub available_at: OffsetDateTime,
}

/// A claimed job stays invisible until its lease runs out. A worker that dies mid-job therefore
/// only delays the job, and every consumer must tolerate seeing the same document twice.
pub trait TaskQueue
where
	Self: Send + Sync,
{
	fn enqueue(&self, document_id: Uuid, now: OffsetDateTime) -> BoxFuture<'_, Result<Uuid>>;

	/// Claims the job that has been visible the longest, hiding it for `lease`.
	fn claim(&self, now: OffsetDateTime, lease: Duration)
	-> BoxFuture<'_, Result<Option<QueueJob>>>;

	fn ack(&self, job_id: Uuid, now: OffsetDateTime) -> BoxFuture<'_, Result<()>>;

	/// Makes the job visible again at `available_at` and records the failure.
	fn release<'a>(
		&'a self,
		job_id: Uuid,
		error: &'a str,
		available_at: OffsetDateTime,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>>;
}

#[derive(Debug, Default)]
pub struct MemoryQueue {
	jobs: Mutex<HashMap<Uuid, QueueJob>>,
}
impl MemoryQueue {
	pub fn new() -> Self {
		Self::default()
	}

	/// Jobs that are not done yet, in no particular order.
	pub fn open_jobs(&self) -> Vec<QueueJob> {
		self.lock().values().filter(|job| job.status != JobStatus::Done).cloned().collect()
	}

	fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, QueueJob>> {
		self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn update(&self, job_id: Uuid, f: impl FnOnce(&mut QueueJob)) -> Result<()> {
		let mut jobs = self.lock();
		let job = jobs
			.get_mut(&job_id)
			.ok_or_else(|| Error::NotFound(format!("outbox job {job_id}")))?;

		f(job);

		Ok(())
	}
}

impl TaskQueue for MemoryQueue {
	fn enqueue(&self, document_id: Uuid, now: OffsetDateTime) -> BoxFuture<'_, Result<Uuid>> {
		Box::pin(async move {
			let job_id = Uuid::new_v4();

			self.lock().insert(
				job_id,
				QueueJob {
					job_id,
					document_id,
					status: JobStatus::Pending,
					attempts: 0,
					last_error: None,
					available_at: now,
				},
			);

			Ok(job_id)
		})
	}

	fn claim(
		&self,
		now: OffsetDateTime,
		lease: Duration,
	) -> BoxFuture<'_, Result<Option<QueueJob>>> {
		Box::pin(async move {
			let mut jobs = self.lock();
			let next = jobs
				.values_mut()
				.filter(|job| job.status != JobStatus::Done && job.available_at <= now)
				.min_by_key(|job| (job.available_at, job.job_id));
			let Some(job) = next else {
				return Ok(None);
			};

			job.status = JobStatus::Claimed;
			job.available_at = now + lease;

			Ok(Some(job.clone()))
		})
	}

	fn ack(&self, job_id: Uuid, _now: OffsetDateTime) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move { self.update(job_id, |job| job.status = JobStatus::Done) })
	}

	fn release<'a>(
		&'a self,
		job_id: Uuid,
		error: &'a str,
		available_at: OffsetDateTime,
		_now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.update(job_id, |job| {
				job.status = JobStatus::Failed;
				job.attempts += 1;
				job.last_error = Some(error.to_string());
				job.available_at = available_at;
			})
		})
	}
}
