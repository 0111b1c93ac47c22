use std::cmp::Ordering;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::knowledge_base::Scope;

#[derive(Clone, Copy, Debug)]
pub struct RankKey {
	pub similarity: f32,
	pub scope: Scope,
	pub created_at: OffsetDateTime,
	pub ordinal: u32,
	pub chunk_id: Uuid,
}

/// Best first: similarity, then narrower scope, then newer chunk. Ordinal and chunk id only
/// make the order total.
pub fn compare(a: &RankKey, b: &RankKey) -> Ordering {
	b.similarity
		.total_cmp(&a.similarity)
		.then_with(|| b.scope.specificity().cmp(&a.scope.specificity()))
		.then_with(|| b.created_at.cmp(&a.created_at))
		.then_with(|| a.ordinal.cmp(&b.ordinal))
		.then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
	if a.len() != b.len() || a.is_empty() {
		return 0.0;
	}

	let mut dot = 0.0_f32;
	let mut norm_a = 0.0_f32;
	let mut norm_b = 0.0_f32;

	for (x, y) in a.iter().zip(b) {
		dot += x * y;
		norm_a += x * x;
		norm_b += y * y;
	}

	if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
		return 0.0;
	}

	dot / (norm_a.sqrt() * norm_b.sqrt())
}
