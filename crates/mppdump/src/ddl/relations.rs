use std::{collections::BTreeMap, fmt::Write};

use crate::{
	catalog::{
		MetadataMap,
		predata::{Constraint, Extension, Schema, Sequence, View},
		quote_literal,
		relations::{ExternalTableDefinition, Relation, TableDefinition},
	},
	ddl::{
		Emitter,
		globals::comment_only,
		metadata::{CLASS_SCHEMA, CLASS_SEQUENCE, CLASS_VIEW, metadata_trailer},
	},
	error::RunError,
	toc::Section,
};

pub fn write_schemas<W: std::io::Write>(
	emitter: &mut Emitter<'_, W>,
	schemas: &[Schema],
	metadata: &MetadataMap,
) -> Result<(), RunError> {
	for schema in schemas {
		// public always exists; recreating it would fail the replay
		let mut sql = if schema.name == "public" {
			String::new()
		} else {
			format!("CREATE SCHEMA {};", schema.name)
		};
		if let Some(meta) = metadata.get(&schema.oid) {
			sql.push_str(&metadata_trailer(meta, &CLASS_SCHEMA, &schema.name));
		}
		let sql = sql.trim_start_matches('\n').to_string();
		if sql.is_empty() {
			continue;
		}
		emitter.emit(Section::Predata, &schema.name, &schema.name, "SCHEMA", "", &sql)?;
	}
	Ok(())
}

pub fn write_extensions<W: std::io::Write>(
	emitter: &mut Emitter<'_, W>,
	extensions: &[Extension],
) -> Result<(), RunError> {
	for extension in extensions {
		let sql = format!(
			"CREATE EXTENSION IF NOT EXISTS {} WITH SCHEMA {};",
			extension.name, extension.schema,
		);
		emitter.emit(Section::Predata, "", &extension.name, "EXTENSION", "", &sql)?;
	}
	Ok(())
}

/// The CREATE statement for one table, external or regular, including its
/// column comments. Privilege and ownership trailers are appended by the
/// caller.
pub fn table_sql(table: &Relation, def: &TableDefinition) -> String {
	let fqn = table.fqn();
	let mut sql = match &def.external {
		Some(external) => external_table_sql(&fqn, def, external),
		None => heap_table_sql(&fqn, def),
	};

	for column in &def.columns {
		if !column.is_dropped && !column.comment.is_empty() {
			let _ = write!(
				sql,
				"\n\nCOMMENT ON COLUMN {fqn}.{} IS {};",
				column.name,
				quote_literal(&column.comment),
			);
		}
	}
	sql
}

fn column_lines(def: &TableDefinition) -> String {
	def.columns
		.iter()
		.filter(|column| !column.is_dropped)
		.map(|column| {
			let mut line = format!("\t{} {}", column.name, column.type_name);
			if !column.encoding.is_empty() {
				let _ = write!(line, " ENCODING ({})", column.encoding);
			}
			if column.has_default && !column.default_val.is_empty() {
				let _ = write!(line, " DEFAULT {}", column.default_val);
			}
			if column.not_null {
				line.push_str(" NOT NULL");
			}
			line
		})
		.collect::<Vec<_>>()
		.join(",\n")
}

fn heap_table_sql(fqn: &str, def: &TableDefinition) -> String {
	let mut sql = format!("CREATE TABLE {fqn} (\n{}\n)", column_lines(def));
	if !def.inherits.is_empty() {
		let _ = write!(sql, " INHERITS ({})", def.inherits.join(", "));
	}
	if !def.storage_options.is_empty() {
		let _ = write!(sql, " WITH ({})", def.storage_options);
	}
	if !def.tablespace.is_empty() {
		let _ = write!(sql, " TABLESPACE {}", def.tablespace);
	}
	if !def.distribution_policy.is_empty() {
		let _ = write!(sql, " {}", def.distribution_policy);
	}
	if !def.partition_def.is_empty() {
		let _ = write!(sql, " {}", def.partition_def.trim_end());
	}
	sql.push(';');
	if !def.partition_template.is_empty() {
		let _ = write!(sql, "\n\n{}", def.partition_template.trim_end());
	}
	sql
}

fn external_table_sql(
	fqn: &str,
	def: &TableDefinition,
	external: &ExternalTableDefinition,
) -> String {
	let writable = if external.writable { "WRITABLE " } else { "" };
	let web = if !external.command.is_empty()
		|| external
			.locations
			.first()
			.is_some_and(|url| url.starts_with("http"))
	{
		"WEB "
	} else {
		""
	};
	let mut sql = format!(
		"CREATE {writable}EXTERNAL {web}TABLE {fqn} (\n{}\n)",
		column_lines(def),
	);

	if external.command.is_empty() {
		let locations = external
			.locations
			.iter()
			.map(|url| format!("\t{}", quote_literal(url)))
			.collect::<Vec<_>>()
			.join(",\n");
		let _ = write!(sql, " LOCATION (\n{locations}\n)");
	} else {
		let _ = write!(sql, " EXECUTE {}", quote_literal(&external.command));
		if external.exec_location.split('|').next() == Some("MASTER_ONLY") {
			sql.push_str(" ON MASTER");
		}
	}

	let format_name = match external.format_type.as_str() {
		"t" => "TEXT",
		"c" => "CSV",
		_ => "CUSTOM",
	};
	let _ = write!(sql, " FORMAT '{format_name}'");
	if !external.format_opts.is_empty() {
		let _ = write!(sql, " ({})", external.format_opts.trim());
	}
	if !external.options.is_empty() {
		let _ = write!(sql, " OPTIONS ({})", external.options);
	}
	if !external.encoding.is_empty() {
		let _ = write!(sql, " ENCODING {}", quote_literal(&external.encoding));
	}
	if external.reject_limit > 0 {
		if external.log_errors {
			sql.push_str(" LOG ERRORS");
		}
		let _ = write!(sql, " SEGMENT REJECT LIMIT {}", external.reject_limit);
		match external.reject_limit_type.as_str() {
			"p" => sql.push_str(" PERCENT"),
			_ => sql.push_str(" ROWS"),
		}
	}
	if external.writable && !def.distribution_policy.is_empty() {
		let _ = write!(sql, " {}", def.distribution_policy);
	}
	sql.push(';');
	sql
}

pub fn write_create_sequences<W: std::io::Write>(
	emitter: &mut Emitter<'_, W>,
	sequences: &[Sequence],
	metadata: &MetadataMap,
) -> Result<(), RunError> {
	for sequence in sequences {
		let fqn = sequence.fqn();
		let mut sql = format!("CREATE SEQUENCE {fqn}");
		let _ = write!(sql, "\n\tINCREMENT BY {}", sequence.increment_by);
		if sequence.min_value == 1 {
			sql.push_str("\n\tNO MINVALUE");
		} else {
			let _ = write!(sql, "\n\tMINVALUE {}", sequence.min_value);
		}
		if sequence.max_value == i64::MAX {
			sql.push_str("\n\tNO MAXVALUE");
		} else {
			let _ = write!(sql, "\n\tMAXVALUE {}", sequence.max_value);
		}
		let _ = write!(sql, "\n\tCACHE {}", sequence.cache_value);
		if sequence.is_cycled {
			sql.push_str("\n\tCYCLE");
		}
		sql.push(';');
		let _ = write!(
			sql,
			"\n\nSELECT pg_catalog.setval({}, {}, {});",
			quote_literal(&fqn),
			sequence.last_value,
			sequence.is_called,
		);
		if let Some(meta) = metadata.get(&sequence.relation.oid) {
			sql.push_str(&metadata_trailer(meta, &CLASS_SEQUENCE, &fqn));
		}
		emitter.emit(
			Section::Predata,
			&sequence.relation.schema,
			&sequence.relation.name,
			"SEQUENCE",
			"",
			&sql,
		)?;
	}
	Ok(())
}

/// `OWNED BY` references a table column, so these run right after the
/// tables exist rather than with the CREATE SEQUENCE statements.
pub fn write_alter_sequence_owners<W: std::io::Write>(
	emitter: &mut Emitter<'_, W>,
	sequences: &[Sequence],
	owners: &BTreeMap<u32, String>,
) -> Result<(), RunError> {
	for sequence in sequences {
		let Some(owner) = owners.get(&sequence.relation.oid) else {
			continue;
		};
		let sql = format!(
			"ALTER SEQUENCE {} OWNED BY {owner};",
			sequence.fqn(),
		);
		emitter.emit_uncounted(
			Section::Predata,
			&sequence.relation.schema,
			&sequence.relation.name,
			"SEQUENCE OWNER",
			owner,
			&sql,
		)?;
	}
	Ok(())
}

pub fn write_views<W: std::io::Write>(
	emitter: &mut Emitter<'_, W>,
	views: &[View],
	metadata: &MetadataMap,
) -> Result<(), RunError> {
	for view in views {
		let fqn = view.fqn();
		let definition = view.definition.trim().trim_end_matches(';');
		let mut sql = format!("CREATE VIEW {fqn} AS {definition};");
		if let Some(meta) = metadata.get(&view.oid) {
			sql.push_str(&metadata_trailer(meta, &CLASS_VIEW, &fqn));
		}
		emitter.emit(Section::Predata, &view.schema, &view.name, "VIEW", "", &sql)?;
	}
	Ok(())
}

/// Table constraints are added at the end of predata, once every referenced
/// table exists. Domain constraints never show up here; they were folded
/// into their CREATE DOMAIN.
pub fn write_constraints<W: std::io::Write>(
	emitter: &mut Emitter<'_, W>,
	constraints: &[Constraint],
	metadata: &MetadataMap,
) -> Result<(), RunError> {
	for constraint in constraints {
		if constraint.is_domain_constraint {
			continue;
		}
		// ONLY would stop the constraint from cascading to partition leaves
		let only = if constraint.is_partition_parent {
			""
		} else {
			"ONLY "
		};
		let mut sql = format!(
			"ALTER TABLE {only}{} ADD CONSTRAINT {} {};",
			constraint.owning_object, constraint.name, constraint.definition,
		);
		sql.push_str(&comment_only(
			metadata.get(&constraint.oid),
			"CONSTRAINT",
			&format!("{} ON {}", constraint.name, constraint.owning_object),
		));
		emitter.emit(
			Section::Predata,
			"",
			&constraint.name,
			"CONSTRAINT",
			&constraint.owning_object,
			&sql,
		)?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::catalog::relations::{ColumnDefinition, TableStorage};

	fn relation(name: &str) -> Relation {
		Relation {
			schema_oid: 2200,
			oid: 16384,
			schema: "public".into(),
			name: name.into(),
			depends_upon: Vec::new(),
		}
	}

	fn column(name: &str, type_name: &str) -> ColumnDefinition {
		ColumnDefinition {
			num: 1,
			name: name.into(),
			type_name: type_name.into(),
			..Default::default()
		}
	}

	#[test]
	fn heap_table_with_distribution_and_options() {
		let def = TableDefinition {
			storage: Some(TableStorage::AppendOnly),
			distribution_policy: "DISTRIBUTED BY (id)".into(),
			storage_options: "appendonly=true, compresslevel=1".into(),
			columns: vec![
				{
					let mut c = column("id", "integer");
					c.not_null = true;
					c
				},
				column("payload", "text"),
			],
			..Default::default()
		};
		assert_eq!(
			table_sql(&relation("events"), &def),
			"CREATE TABLE public.events (\n\
			\tid integer NOT NULL,\n\
			\tpayload text\n\
			) WITH (appendonly=true, compresslevel=1) DISTRIBUTED BY (id);"
		);
	}

	#[test]
	fn partition_root_keeps_definition_and_template() {
		let def = TableDefinition {
			distribution_policy: "DISTRIBUTED BY (id)".into(),
			partition_def: "PARTITION BY RANGE(day) (START ('2026-01-01') END ('2026-02-01') \
				EVERY ('1 day'))"
				.into(),
			partition_template: "ALTER TABLE public.days SET SUBPARTITION TEMPLATE ();".into(),
			columns: vec![column("id", "integer"), column("day", "date")],
			..Default::default()
		};
		let sql = table_sql(&relation("days"), &def);
		assert!(sql.contains("PARTITION BY RANGE(day)"));
		assert!(sql.ends_with("ALTER TABLE public.days SET SUBPARTITION TEMPLATE ();"));
	}

	#[test]
	fn readable_external_table_renders_locations_and_rejects() {
		let def = TableDefinition {
			columns: vec![column("line", "text")],
			external: Some(ExternalTableDefinition {
				locations: vec!["gpfdist://etl1:8081/data.txt".into()],
				format_type: "t".into(),
				format_opts: "delimiter '|' null ''".into(),
				reject_limit: 100,
				reject_limit_type: "r".into(),
				log_errors: true,
				encoding: "UTF8".into(),
				..Default::default()
			}),
			..Default::default()
		};
		let sql = table_sql(&relation("staging"), &def);
		assert!(sql.starts_with("CREATE EXTERNAL TABLE public.staging ("));
		assert!(sql.contains("LOCATION (\n\t'gpfdist://etl1:8081/data.txt'\n)"));
		assert!(sql.contains("FORMAT 'TEXT' (delimiter '|' null '')"));
		assert!(sql.contains("ENCODING 'UTF8'"));
		assert!(sql.contains("LOG ERRORS SEGMENT REJECT LIMIT 100 ROWS"));
	}

	#[test]
	fn writable_web_table_uses_execute() {
		let def = TableDefinition {
			distribution_policy: "DISTRIBUTED RANDOMLY".into(),
			columns: vec![column("line", "text")],
			external: Some(ExternalTableDefinition {
				command: "cat > /tmp/sink".into(),
				format_type: "c".into(),
				writable: true,
				..Default::default()
			}),
			..Default::default()
		};
		let sql = table_sql(&relation("sink"), &def);
		assert!(sql.starts_with("CREATE WRITABLE EXTERNAL WEB TABLE public.sink ("));
		assert!(sql.contains("EXECUTE 'cat > /tmp/sink'"));
		assert!(sql.contains("FORMAT 'CSV'"));
		assert!(sql.ends_with("DISTRIBUTED RANDOMLY;"));
	}

	#[test]
	fn dropped_columns_are_not_rendered() {
		let mut dropped = column("gone", "text");
		dropped.is_dropped = true;
		let def = TableDefinition {
			columns: vec![column("id", "integer"), dropped],
			..Default::default()
		};
		let sql = table_sql(&relation("things"), &def);
		assert!(!sql.contains("gone"));
	}
}
