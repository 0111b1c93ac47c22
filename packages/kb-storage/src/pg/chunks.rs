use sqlx::PgExecutor;
use uuid::Uuid;

use kb_domain::{document::Chunk, knowledge_base::Scope};

use crate::{
	Result,
	models::{self, ChunkHitRow, ChunkRow},
	store::ChunkHit,
};

pub async fn insert_chunk<'e, E>(executor: E, chunk: &Chunk) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO kb_chunks (
\tchunk_id,
\tkb_id,
\tdocument_id,
\tordinal,
\ttext,
\tembedding,
\tpage,
\tstart_offset,
\tend_offset,
\tcreated_at
)
VALUES ($1,$2,$3,$4,$5,$6::text::vector,$7,$8,$9,$10)",
	)
	.bind(chunk.chunk_id)
	.bind(chunk.kb_id)
	.bind(chunk.document_id)
	.bind(models::to_i32(chunk.ordinal, "ordinal")?)
	.bind(chunk.text.as_str())
	.bind(chunk.embedding.as_deref().map(models::vector_to_pg))
	.bind(chunk.page.map(|page| models::to_i32(page, "page")).transpose()?)
	.bind(models::to_i32(chunk.start_offset, "start_offset")?)
	.bind(models::to_i32(chunk.end_offset, "end_offset")?)
	.bind(chunk.created_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn delete_for_document<'e, E>(executor: E, document_id: Uuid) -> Result<u64>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query("DELETE FROM kb_chunks WHERE document_id = $1")
		.bind(document_id)
		.execute(executor)
		.await?;

	Ok(result.rows_affected())
}

pub async fn chunks_for_document<'e, E>(executor: E, document_id: Uuid) -> Result<Vec<Chunk>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, ChunkRow>(
		"\
SELECT
\tchunk_id,
\tkb_id,
\tdocument_id,
\tordinal,
\ttext,
\tembedding::text AS embedding,
\tpage,
\tstart_offset,
\tend_offset,
\tcreated_at
FROM kb_chunks
WHERE document_id = $1
ORDER BY ordinal ASC",
	)
	.bind(document_id)
	.fetch_all(executor)
	.await?;

	rows.into_iter().map(Chunk::try_from).collect()
}

pub async fn search_chunks<'e, E>(
	executor: E,
	kb_ids: &[Uuid],
	query: &[f32],
	limit: u32,
	min_similarity: f32,
) -> Result<Vec<ChunkHit>>
where
	E: PgExecutor<'e>,
{
	if kb_ids.is_empty() || limit == 0 {
		return Ok(Vec::new());
	}

	let rows = sqlx::query_as::<_, ChunkHitRow>(
		"\
WITH scored AS (
\tSELECT
\t\tc.chunk_id,
\t\tc.kb_id,
\t\tc.document_id,
\t\tc.ordinal,
\t\tc.text,
\t\tNULL::text AS embedding,
\t\tc.page,
\t\tc.start_offset,
\t\tc.end_offset,
\t\tc.created_at,
\t\td.filename,
\t\tk.scope,
\t\tCOALESCE(NULLIF((1 - (c.embedding <=> $1::text::vector))::real, 'NaN'::real), 0)::real
\t\t\tAS similarity
\tFROM kb_chunks c
\tJOIN kb_documents d ON d.document_id = c.document_id
\tJOIN knowledge_bases k ON k.kb_id = c.kb_id
\tWHERE c.kb_id = ANY($2)
\t\tAND c.embedding IS NOT NULL
\t\tAND d.status = 'indexed'
\t\tAND d.deleted_at IS NULL
\t\tAND k.deleted_at IS NULL
)
SELECT *
FROM scored
WHERE similarity >= $3
ORDER BY
\tsimilarity DESC,
\tCASE scope
\t\tWHEN 'conversation' THEN 3
\t\tWHEN 'workspace' THEN 2
\t\tWHEN 'organization' THEN 1
\t\tELSE 0
\tEND DESC,
\tcreated_at DESC,
\tordinal ASC,
\tchunk_id ASC
LIMIT $4",
	)
	.bind(models::vector_to_pg(query))
	.bind(kb_ids)
	.bind(min_similarity)
	.bind(i64::from(limit))
	.fetch_all(executor)
	.await?;

	rows.into_iter()
		.map(|row| -> Result<ChunkHit> {
			Ok(ChunkHit {
				scope: Scope::parse(&row.scope)?,
				filename: row.filename,
				similarity: row.similarity,
				chunk: Chunk::try_from(row.chunk)?,
			})
		})
		.collect()
}
