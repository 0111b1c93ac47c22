use std::ops::Range;

use unicode_segmentation::UnicodeSegmentation;

const PARAGRAPH_BREAK: &str = "\n\n";

#[derive(Clone, Copy, Debug)]
pub struct ChunkingConfig {
	pub target_chars: usize,
	pub overlap_chars: usize,
}
impl Default for ChunkingConfig {
	fn default() -> Self {
		Self { target_chars: 1_000, overlap_chars: 200 }
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextChunk {
	pub ordinal: u32,
	/// Byte offsets into the extracted text.
	pub start_offset: usize,
	pub end_offset: usize,
	pub text: String,
}

/// Splits `text` into chunks of at most `target_chars` characters. Boundaries prefer
/// paragraphs, then sentences, then words, and only split inside a word when a single word is
/// longer than the target.
pub fn split_text(text: &str, cfg: &ChunkingConfig) -> Vec<TextChunk> {
	let target = cfg.target_chars.max(1);
	let mut pieces = Vec::new();

	for paragraph in paragraph_ranges(text) {
		push_bounded(text, paragraph, target, &mut pieces);
	}

	let mut chunks = Vec::new();
	let mut current: Option<(usize, usize)> = None;
	let mut current_chars = 0_usize;

	for piece in pieces {
		let piece_chars = text[piece.clone()].chars().count();

		if let Some((start, end)) = current
			&& current_chars + piece_chars > target
		{
			push_chunk(text, start..end, &mut chunks);

			let budget = cfg.overlap_chars.min(target.saturating_sub(piece_chars));
			let tail_start = overlap_start(text, start..end, budget);

			current_chars = text[tail_start..end].chars().count();
			current = if tail_start < end { Some((tail_start, end)) } else { None };
		}

		current = match current {
			Some((start, _)) => Some((start, piece.end)),
			None => Some((piece.start, piece.end)),
		};
		current_chars += piece_chars;
	}

	if let Some((start, end)) = current {
		push_chunk(text, start..end, &mut chunks);
	}

	tracing::trace!(chunks = chunks.len(), bytes = text.len(), "Split text into chunks.");

	chunks
}

/// Returns the 1-based page containing `offset`, given the byte offsets at which each page
/// after the first begins. `None` when the text carries no page structure.
pub fn page_for_offset(page_breaks: &[usize], offset: usize) -> Option<u32> {
	if page_breaks.is_empty() {
		return None;
	}

	let preceding = page_breaks.partition_point(|&start| start <= offset);

	Some(preceding as u32 + 1)
}

fn paragraph_ranges(text: &str) -> Vec<Range<usize>> {
	let mut ranges = Vec::new();
	let mut start = 0_usize;

	for (idx, sep) in text.match_indices(PARAGRAPH_BREAK) {
		let end = idx + sep.len();

		if end > start {
			ranges.push(start..end);
		}

		start = end;
	}

	if start < text.len() {
		ranges.push(start..text.len());
	}

	ranges
}

fn push_bounded(text: &str, range: Range<usize>, target: usize, out: &mut Vec<Range<usize>>) {
	if text[range.clone()].chars().count() <= target {
		out.push(range);

		return;
	}

	let sentences: Vec<Range<usize>> = text[range.clone()]
		.split_sentence_bound_indices()
		.map(|(idx, sentence)| range.start + idx..range.start + idx + sentence.len())
		.collect();

	if sentences.len() > 1 {
		for sentence in sentences {
			push_bounded(text, sentence, target, out);
		}

		return;
	}

	let words: Vec<Range<usize>> = text[range.clone()]
		.split_word_bound_indices()
		.map(|(idx, word)| range.start + idx..range.start + idx + word.len())
		.collect();

	if words.len() > 1 {
		for word in words {
			push_bounded(text, word, target, out);
		}

		return;
	}

	push_hard_split(text, range, target, out);
}

fn push_hard_split(text: &str, range: Range<usize>, target: usize, out: &mut Vec<Range<usize>>) {
	let mut start = range.start;
	let mut count = 0_usize;

	for (idx, _) in text[range.clone()].char_indices() {
		if count == target {
			out.push(start..range.start + idx);

			start = range.start + idx;
			count = 0;
		}

		count += 1;
	}

	if start < range.end {
		out.push(start..range.end);
	}
}

/// Start of the overlap carried into the next chunk: the last `budget` characters of `range`,
/// moved forward past the next whitespace when it would otherwise open mid-word.
fn overlap_start(text: &str, range: Range<usize>, budget: usize) -> usize {
	if budget == 0 {
		return range.end;
	}

	let slice = &text[range.clone()];
	let tail_start = slice
		.char_indices()
		.rev()
		.nth(budget - 1)
		.map(|(idx, _)| range.start + idx)
		.unwrap_or(range.start);
	let tail = &text[tail_start..range.end];
	let at_word_start = tail_start == range.start
		|| text[..tail_start].chars().next_back().is_some_and(char::is_whitespace);

	if at_word_start {
		return tail_start;
	}

	match tail.find(char::is_whitespace) {
		Some(ws) => {
			let after = tail[ws..]
				.char_indices()
				.find(|(_, ch)| !ch.is_whitespace())
				.map(|(idx, _)| ws + idx)
				.unwrap_or(tail.len());

			tail_start + after
		},
		None => tail_start,
	}
}

fn push_chunk(text: &str, range: Range<usize>, chunks: &mut Vec<TextChunk>) {
	let raw = &text[range.clone()];
	let leading = raw.len() - raw.trim_start().len();
	let trimmed = raw.trim();

	if trimmed.is_empty() {
		return;
	}

	let start_offset = range.start + leading;

	chunks.push(TextChunk {
		ordinal: chunks.len() as u32,
		start_offset,
		end_offset: start_offset + trimmed.len(),
		text: trimmed.to_string(),
	});
}
