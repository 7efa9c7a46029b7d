use mppdump_postgres::SlotPool;
use tokio_postgres::Row;

use crate::error::RunError;

pub mod deps;
pub mod globals;
pub mod metadata;
pub mod postdata;
pub mod predata;
pub mod relations;
pub mod stats;

pub use metadata::{Acl, MetadataMap, ObjectMetadata};
pub use relations::Relation;

/// Schemas whose contents are never part of a logical backup.
pub const SYSTEM_SCHEMAS: &str =
	"'pg_catalog', 'information_schema', 'pg_toast', 'pg_aoseg', 'pg_bitmapindex', 'gp_toolkit'";

/// All metadata queries run on the pool's first slot, whose transaction is
/// the one that exported the run's snapshot.
pub const METADATA_SLOT: usize = 0;

/// Run a catalog query on the metadata slot, tagging failures with what we
/// were doing at the time.
pub async fn query(pool: &SlotPool, context: &str, sql: &str) -> Result<Vec<Row>, RunError> {
	pool.query(METADATA_SLOT, sql)
		.await
		.map_err(|err| RunError::catalog(context, err))
}

/// Like [`query`], for statements expected to return a single text value.
pub async fn select_string(pool: &SlotPool, context: &str, sql: &str) -> Result<String, RunError> {
	pool.select_string(METADATA_SLOT, sql)
		.await
		.map_err(|err| RunError::catalog(context, err))
}

/// Quote a string literal for interpolation into SQL text. Identifier
/// quoting is never needed client-side: every name leaves the catalog
/// through the server's own `quote_ident`.
pub fn quote_literal(value: &str) -> String {
	format!("'{}'", value.replace('\'', "''"))
}

/// Build an `IN (...)` list of quoted literals.
pub fn literal_list<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
	values
		.into_iter()
		.map(quote_literal)
		.collect::<Vec<_>>()
		.join(", ")
}

/// Render a `"char"` catalog column (delivered as `i8`) as a string,
/// empty for NUL.
pub fn char_to_string(c: i8) -> String {
	if c == 0 {
		String::new()
	} else {
		(c as u8 as char).to_string()
	}
}

/// WHERE fragment applying the schema-level filters to `column`, always
/// excluding system and temporary schemas.
pub fn schema_filter_clause(filters: &crate::filters::FilterSet, column: &str) -> String {
	let mut clauses = vec![
		format!("{column} NOT IN ({SYSTEM_SCHEMAS})"),
		format!("{column} NOT LIKE 'pg_temp_%'"),
		format!("{column} NOT LIKE 'pg_toast%'"),
	];
	if !filters.include_schemas.is_empty() {
		clauses.push(format!(
			"{column} IN ({})",
			literal_list(filters.include_schemas.iter().map(String::as_str)),
		));
	}
	if !filters.exclude_schemas.is_empty() {
		clauses.push(format!(
			"{column} NOT IN ({})",
			literal_list(filters.exclude_schemas.iter().map(String::as_str)),
		));
	}
	clauses.join(" AND ")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn literals_double_single_quotes() {
		assert_eq!(quote_literal("it's"), "'it''s'");
		assert_eq!(literal_list(["a", "b'c"]), "'a', 'b''c'");
	}

	#[test]
	fn schema_filter_clause_combines_lists() {
		let filters = crate::filters::FilterSet {
			include_schemas: vec!["sales".into()],
			exclude_schemas: vec!["scratch".into()],
			..Default::default()
		};
		let clause = schema_filter_clause(&filters, "n.nspname");
		assert!(clause.contains("n.nspname NOT IN ('pg_catalog'"));
		assert!(clause.contains("n.nspname IN ('sales')"));
		assert!(clause.contains("n.nspname NOT IN ('scratch')"));
	}
}
