use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
	Error, Result,
	db::Db,
	models::{self, OutboxRow},
	queue::{JobStatus, QueueJob, TaskQueue},
	store::BoxFuture,
};

const OUTBOX_COLUMNS: &str = "\
job_id, document_id, status, attempts, last_error, available_at, created_at, updated_at";

impl TryFrom<OutboxRow> for QueueJob {
	type Error = Error;

	fn try_from(row: OutboxRow) -> Result<Self> {
		Ok(Self {
			job_id: row.job_id,
			document_id: row.document_id,
			status: JobStatus::parse(&row.status)?,
			attempts: models::to_u32(row.attempts, "attempts")?,
			last_error: row.last_error,
			available_at: row.available_at,
		})
	}
}

pub async fn enqueue(db: &Db, document_id: Uuid, now: OffsetDateTime) -> Result<Uuid> {
	let job_id = Uuid::new_v4();

	sqlx::query(
		"\
INSERT INTO ingestion_outbox (job_id, document_id, status, available_at, created_at, updated_at)
VALUES ($1,$2,'PENDING',$3,$3,$3)",
	)
	.bind(job_id)
	.bind(document_id)
	.bind(now)
	.execute(&db.pool)
	.await?;

	Ok(job_id)
}

pub async fn claim_next(db: &Db, now: OffsetDateTime, lease: Duration) -> Result<Option<QueueJob>> {
	let mut tx = db.pool.begin().await?;
	let row = sqlx::query_as::<_, OutboxRow>(&format!(
		"\
SELECT {OUTBOX_COLUMNS}
FROM ingestion_outbox
WHERE status IN ('PENDING','FAILED','CLAIMED') AND available_at <= $1
ORDER BY available_at ASC
LIMIT 1
FOR UPDATE SKIP LOCKED"
	))
	.bind(now)
	.fetch_optional(&mut *tx)
	.await?;
	let job = if let Some(row) = row {
		let mut job = QueueJob::try_from(row)?;
		let lease_until = now + lease;

		sqlx::query(
			"UPDATE ingestion_outbox SET status = 'CLAIMED', available_at = $1, updated_at = $2 WHERE job_id = $3",
		)
		.bind(lease_until)
		.bind(now)
		.bind(job.job_id)
		.execute(&mut *tx)
		.await?;

		job.status = JobStatus::Claimed;
		job.available_at = lease_until;

		Some(job)
	} else {
		None
	};

	tx.commit().await?;

	Ok(job)
}

pub async fn mark_done(db: &Db, job_id: Uuid, now: OffsetDateTime) -> Result<()> {
	sqlx::query("UPDATE ingestion_outbox SET status = 'DONE', updated_at = $1 WHERE job_id = $2")
		.bind(now)
		.bind(job_id)
		.execute(&db.pool)
		.await?;

	Ok(())
}

pub async fn mark_failed(
	db: &Db,
	job_id: Uuid,
	error_text: &str,
	available_at: OffsetDateTime,
	now: OffsetDateTime,
) -> Result<()> {
	sqlx::query(
		"\
UPDATE ingestion_outbox
SET status = 'FAILED',
\tattempts = attempts + 1,
\tlast_error = $1,
\tavailable_at = $2,
\tupdated_at = $3
WHERE job_id = $4",
	)
	.bind(error_text)
	.bind(available_at)
	.bind(now)
	.bind(job_id)
	.execute(&db.pool)
	.await?;

	Ok(())
}

impl TaskQueue for Db {
	fn enqueue(&self, document_id: Uuid, now: OffsetDateTime) -> BoxFuture<'_, Result<Uuid>> {
		Box::pin(enqueue(self, document_id, now))
	}

	fn claim(
		&self,
		now: OffsetDateTime,
		lease: Duration,
	) -> BoxFuture<'_, Result<Option<QueueJob>>> {
		Box::pin(claim_next(self, now, lease))
	}

	fn ack(&self, job_id: Uuid, now: OffsetDateTime) -> BoxFuture<'_, Result<()>> {
		Box::pin(mark_done(self, job_id, now))
	}

	fn release<'a>(
		&'a self,
		job_id: Uuid,
		error: &'a str,
		available_at: OffsetDateTime,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(mark_failed(self, job_id, error, available_at, now))
	}
}
