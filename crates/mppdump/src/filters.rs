use std::{fs, path::Path};

use tracing::debug;

use crate::error::RunError;

/// The include/exclude lists, merged from flags and list files at validation
/// time and immutable afterwards.
///
/// Table entries are fully-qualified `schema.table` names compared verbatim.
/// An include-table list takes precedence over schema filtering: when present
/// it alone decides the relation set.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
	pub include_schemas: Vec<String>,
	pub exclude_schemas: Vec<String>,
	pub include_tables: Vec<String>,
	pub exclude_tables: Vec<String>,
}

impl FilterSet {
	pub fn load(
		include_schemas: Vec<String>,
		exclude_schemas: Vec<String>,
		mut include_tables: Vec<String>,
		include_table_file: Option<&Path>,
		mut exclude_tables: Vec<String>,
		exclude_table_file: Option<&Path>,
	) -> Result<Self, RunError> {
		if let Some(path) = include_table_file {
			include_tables.extend(read_list_file(path)?);
		}
		if let Some(path) = exclude_table_file {
			exclude_tables.extend(read_list_file(path)?);
		}

		let filters = Self {
			include_schemas,
			exclude_schemas,
			include_tables,
			exclude_tables,
		};
		debug!(?filters, "resolved filter lists");
		Ok(filters)
	}

	pub fn is_schema_filtered(&self) -> bool {
		!self.include_schemas.is_empty()
	}

	pub fn is_table_filtered(&self) -> bool {
		!self.include_tables.is_empty()
	}

	pub fn has_any(&self) -> bool {
		self.is_schema_filtered()
			|| self.is_table_filtered()
			|| !self.exclude_schemas.is_empty()
			|| !self.exclude_tables.is_empty()
	}

	pub fn schema_matches(&self, schema: &str) -> bool {
		if self.exclude_schemas.iter().any(|s| s == schema) {
			return false;
		}
		self.include_schemas.is_empty() || self.include_schemas.iter().any(|s| s == schema)
	}

	pub fn table_matches(&self, schema: &str, table: &str) -> bool {
		let fqn = format!("{schema}.{table}");
		if !self.include_tables.is_empty() {
			return self.include_tables.iter().any(|t| *t == fqn);
		}
		self.schema_matches(schema) && !self.exclude_tables.iter().any(|t| *t == fqn)
	}

	/// Every fully-qualified name a validation pass must prove exists.
	pub fn named_tables(&self) -> impl Iterator<Item = &str> {
		self.include_tables
			.iter()
			.chain(self.exclude_tables.iter())
			.map(String::as_str)
	}

	/// Every schema name a validation pass must prove exists.
	pub fn named_schemas(&self) -> impl Iterator<Item = &str> {
		self.include_schemas
			.iter()
			.chain(self.exclude_schemas.iter())
			.map(String::as_str)
	}
}

fn read_list_file(path: &Path) -> Result<Vec<String>, RunError> {
	let content = fs::read_to_string(path).map_err(|err| {
		RunError::ConfigInvalid(format!("cannot read filter list {}: {err}", path.display()))
	})?;
	Ok(content
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty())
		.map(Into::into)
		.collect())
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	#[test]
	fn unfiltered_matches_everything() {
		let filters = FilterSet::default();
		assert!(filters.schema_matches("public"));
		assert!(filters.table_matches("public", "things"));
		assert!(!filters.has_any());
	}

	#[test]
	fn include_schemas_narrow() {
		let filters = FilterSet {
			include_schemas: vec!["sales".into()],
			..Default::default()
		};
		assert!(filters.schema_matches("sales"));
		assert!(!filters.schema_matches("public"));
		assert!(filters.table_matches("sales", "orders"));
		assert!(!filters.table_matches("public", "orders"));
	}

	#[test]
	fn exclude_schema_wins_over_include() {
		let filters = FilterSet {
			exclude_schemas: vec!["scratch".into()],
			..Default::default()
		};
		assert!(!filters.schema_matches("scratch"));
		assert!(filters.schema_matches("public"));
	}

	#[test]
	fn include_tables_take_precedence() {
		let filters = FilterSet {
			include_tables: vec!["public.keep".into()],
			exclude_schemas: vec!["public".into()],
			..Default::default()
		};
		assert!(filters.table_matches("public", "keep"));
		assert!(!filters.table_matches("public", "drop"));
	}

	#[test]
	fn exclude_tables_apply_without_includes() {
		let filters = FilterSet {
			exclude_tables: vec!["public.noisy".into()],
			..Default::default()
		};
		assert!(!filters.table_matches("public", "noisy"));
		assert!(filters.table_matches("public", "quiet"));
	}

	#[test]
	fn list_files_merge_with_flags() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "public.from_file\n\n  public.also_from_file  ").unwrap();

		let filters = FilterSet::load(
			vec![],
			vec![],
			vec!["public.from_flag".into()],
			Some(file.path()),
			vec![],
			None,
		)
		.unwrap();
		assert_eq!(
			filters.include_tables,
			vec![
				"public.from_flag",
				"public.from_file",
				"public.also_from_file"
			]
		);
	}

	#[test]
	fn missing_list_file_is_config_error() {
		let err = FilterSet::load(
			vec![],
			vec![],
			vec![],
			Some(Path::new("/nonexistent/list")),
			vec![],
			None,
		)
		.unwrap_err();
		assert!(matches!(err, RunError::ConfigInvalid(_)));
	}
}
