use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::{Error, Result, schema};

#[derive(Clone)]
pub struct Db {
	pub pool: PgPool,
}
impl Db {
	pub async fn connect(cfg: &kb_config::Postgres) -> Result<Self> {
		let pool =
			PgPoolOptions::new().max_connections(cfg.pool_max_conns).connect(&cfg.dsn).await?;

		Ok(Self { pool })
	}

	/// Applies the schema. Refuses to run against an existing chunk table whose vector
	/// dimension differs from `vector_dim`.
	pub async fn ensure_schema(&self, vector_dim: u32) -> Result<()> {
		let sql = schema::render_schema(vector_dim);
		let lock_id: i64 = 7_120_331;
		// Advisory locks are held per connection. Use a single transaction so the lock is scoped to
		// one connection and automatically released when the transaction ends.
		let mut tx = self.pool.begin().await?;

		sqlx::query("SELECT pg_advisory_xact_lock($1)").bind(lock_id).execute(&mut *tx).await?;

		let existing: Option<String> = sqlx::query_scalar(
			"\
SELECT format_type(atttypid, atttypmod)
FROM pg_attribute
WHERE attrelid = to_regclass('kb_chunks') AND attname = 'embedding' AND NOT attisdropped",
		)
		.fetch_optional(&mut *tx)
		.await?;

		if let Some(actual) = existing.as_deref().and_then(schema::parse_vector_dim)
			&& actual != vector_dim
		{
			return Err(Error::DimensionMismatch { expected: vector_dim, actual });
		}

		for statement in sql.split(';') {
			let trimmed = statement.trim();

			if trimmed.is_empty() {
				continue;
			}

			sqlx::query(trimmed).execute(&mut *tx).await?;
		}

		tx.commit().await?;

		tracing::info!(vector_dim, "Database schema is up to date.");

		Ok(())
	}
}
