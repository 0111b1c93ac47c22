//! Text extraction, keyed by normalized content type.

use std::{collections::HashMap, sync::Arc};

use serde_json::{Map, Value};
use unicode_normalization::UnicodeNormalization;

use crate::{Error, Result};

const FORM_FEED: char = '\u{000C}';
const BOM: char = '\u{FEFF}';

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtractedText {
	pub text: String,
	/// Byte offsets into `text` at which a new page begins. Empty when the format has no pages.
	pub page_breaks: Vec<usize>,
	pub metadata: Map<String, Value>,
}

pub trait Extractor: Send + Sync {
	fn content_types(&self) -> &[&'static str];

	fn extract(&self, bytes: &[u8]) -> Result<ExtractedText>;
}

/// UTF-8 text formats. Form feeds are treated as page separators.
pub struct PlainTextExtractor;
impl Extractor for PlainTextExtractor {
	fn content_types(&self) -> &[&'static str] {
		&["text/plain", "text/markdown", "text/x-markdown", "text/csv"]
	}

	fn extract(&self, bytes: &[u8]) -> Result<ExtractedText> {
		let raw = decode_utf8(bytes)?;
		let mut text = String::with_capacity(raw.len());
		let mut page_breaks = Vec::new();

		for ch in raw.trim_start_matches(BOM).replace("\r\n", "\n").nfc() {
			if ch == FORM_FEED {
				page_breaks.push(text.len());
				text.push('\n');
			} else {
				text.push(ch);
			}
		}

		let mut metadata = Map::new();

		metadata.insert("line_count".to_string(), Value::from(text.lines().count()));

		if !page_breaks.is_empty() {
			metadata.insert("page_count".to_string(), Value::from(page_breaks.len() + 1));
		}
		if let Some(title) = text.lines().find_map(|line| line.strip_prefix("# ")) {
			metadata.insert("title".to_string(), Value::String(title.trim().to_string()));
		}

		Ok(ExtractedText { text, page_breaks, metadata })
	}
}

/// JSON documents are flattened to their string leaves, one per line.
pub struct JsonExtractor;
impl Extractor for JsonExtractor {
	fn content_types(&self) -> &[&'static str] {
		&["application/json"]
	}

	fn extract(&self, bytes: &[u8]) -> Result<ExtractedText> {
		let value: Value = serde_json::from_slice(bytes).map_err(|err| Error::UnsupportedFormat {
			message: format!("Document is not valid JSON: {err}."),
		})?;
		let mut lines = Vec::new();

		collect_strings(&value, &mut lines);

		let mut metadata = Map::new();

		if let Value::Object(object) = &value {
			let keys = object.keys().cloned().map(Value::String).collect();

			metadata.insert("top_level_keys".to_string(), Value::Array(keys));
		}

		Ok(ExtractedText { text: lines.join("\n").nfc().collect(), page_breaks: Vec::new(), metadata })
	}
}

#[derive(Clone, Default)]
pub struct ExtractorRegistry {
	by_type: HashMap<String, Arc<dyn Extractor>>,
}
impl ExtractorRegistry {
	pub fn with_defaults() -> Self {
		let mut registry = Self::default();

		registry.register(Arc::new(PlainTextExtractor));
		registry.register(Arc::new(JsonExtractor));

		registry
	}

	/// Later registrations win for content types they share with earlier ones.
	pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
		for content_type in extractor.content_types() {
			self.by_type.insert(normalize_content_type(content_type), extractor.clone());
		}
	}

	pub fn get(&self, content_type: &str) -> Option<Arc<dyn Extractor>> {
		self.by_type.get(&normalize_content_type(content_type)).cloned()
	}

	pub fn supports(&self, content_type: &str) -> bool {
		self.by_type.contains_key(&normalize_content_type(content_type))
	}
}

/// Lowercases and strips media type parameters: `Text/Plain; charset=utf-8` is `text/plain`.
pub fn normalize_content_type(raw: &str) -> String {
	raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

fn decode_utf8(bytes: &[u8]) -> Result<&str> {
	std::str::from_utf8(bytes).map_err(|err| Error::UnsupportedFormat {
		message: format!("Document is not valid UTF-8 at byte {}.", err.valid_up_to()),
	})
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
	match value {
		Value::String(text) if !text.trim().is_empty() => out.push(text.clone()),
		Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
		Value::Object(object) => object.values().for_each(|item| collect_strings(item, out)),
		_ => {},
	}
}
