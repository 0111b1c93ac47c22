pub fn render_schema(vector_dim: u32) -> String {
	let init = include_str!("../../../sql/init.sql");
	let expanded = expand_includes(init);

	expanded.replace("<VECTOR_DIM>", &vector_dim.to_string())
}

/// Parses the declared dimension out of a `format_type` string such as `vector(1536)`.
pub fn parse_vector_dim(format_type: &str) -> Option<u32> {
	format_type.trim().strip_prefix("vector(")?.strip_suffix(')')?.parse().ok()
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"00_extensions.sql" => out.push_str(include_str!("../../../sql/00_extensions.sql")),
				"tables/001_organizations.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_organizations.sql")),
				"tables/002_workspaces.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_workspaces.sql")),
				"tables/003_conversations.sql" =>
					out.push_str(include_str!("../../../sql/tables/003_conversations.sql")),
				"tables/004_memberships.sql" =>
					out.push_str(include_str!("../../../sql/tables/004_memberships.sql")),
				"tables/005_knowledge_bases.sql" =>
					out.push_str(include_str!("../../../sql/tables/005_knowledge_bases.sql")),
				"tables/006_kb_access_grants.sql" =>
					out.push_str(include_str!("../../../sql/tables/006_kb_access_grants.sql")),
				"tables/007_kb_documents.sql" =>
					out.push_str(include_str!("../../../sql/tables/007_kb_documents.sql")),
				"tables/008_kb_chunks.sql" =>
					out.push_str(include_str!("../../../sql/tables/008_kb_chunks.sql")),
				"tables/009_ingestion_outbox.sql" =>
					out.push_str(include_str!("../../../sql/tables/009_ingestion_outbox.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}
