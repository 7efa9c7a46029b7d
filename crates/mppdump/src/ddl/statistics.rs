use std::fmt::Write;

use crate::{
	catalog::{
		quote_literal,
		stats::{AttributeStatistic, TupleStatistic},
	},
	ddl::Emitter,
	error::RunError,
	toc::Section,
};

/// Emit planner statistics as catalog updates into the statistics file.
///
/// The tuple counts are plain `UPDATE pg_class` rows; attribute statistics
/// are re-inserted into `pg_statistic` with the polymorphic columns cast
/// back to their source types, so a restore gets working plans before the
/// first ANALYZE.
pub fn write_statistics<W: std::io::Write>(
	emitter: &mut Emitter<'_, W>,
	tuple_stats: &[TupleStatistic],
	attribute_stats: &[AttributeStatistic],
) -> Result<(), RunError> {
	for tuple in tuple_stats {
		let fqn = format!("{}.{}", tuple.schema, tuple.table);
		let sql = format!(
			"UPDATE pg_catalog.pg_class\nSET relpages = {}, reltuples = {}\n\
			WHERE oid = {}::pg_catalog.regclass;",
			tuple.rel_pages,
			tuple.rel_tuples,
			quote_literal(&fqn),
		);
		emitter.emit_uncounted(
			Section::Statistics,
			&tuple.schema,
			&tuple.table,
			"STATISTICS",
			&fqn,
			&sql,
		)?;
	}

	for attribute in attribute_stats {
		let fqn = format!("{}.{}", attribute.schema, attribute.table);
		let mut sql = format!(
			"DELETE FROM pg_catalog.pg_statistic\n\
			WHERE starelid = {fqn_lit}::pg_catalog.regclass AND staattnum = {attnum};\n\n\
			INSERT INTO pg_catalog.pg_statistic VALUES (\n\
			\t{fqn_lit}::pg_catalog.regclass,\n\
			\t{attnum}::pg_catalog.int2,\n\
			\t{nullfrac}::pg_catalog.float4,\n\
			\t{width}::pg_catalog.int4,\n\
			\t{distinct}::pg_catalog.float4",
			fqn_lit = quote_literal(&fqn),
			attnum = attribute.att_number,
			nullfrac = attribute.null_fraction,
			width = attribute.width,
			distinct = attribute.distinct,
		);
		for kind in attribute.kinds {
			let _ = write!(sql, ",\n\t{kind}::pg_catalog.int2");
		}
		for operator in attribute.operators {
			let _ = write!(sql, ",\n\t{operator}::pg_catalog.oid");
		}
		for numbers in &attribute.numbers {
			if numbers.is_empty() {
				sql.push_str(",\n\tNULL::pg_catalog.float4[]");
			} else {
				let _ = write!(sql, ",\n\t{}::pg_catalog.float4[]", quote_literal(numbers));
			}
		}
		for values in &attribute.values {
			if values.is_empty() {
				sql.push_str(",\n\tNULL");
			} else {
				let _ = write!(
					sql,
					",\n\t{}::{}[]",
					quote_literal(values),
					attribute.type_name,
				);
			}
		}
		sql.push_str("\n);");
		emitter.emit_uncounted(
			Section::Statistics,
			&attribute.schema,
			&attribute.table,
			"STATISTICS",
			&fqn,
			&sql,
		)?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ddl::testutil::Scratch;

	#[test]
	fn tuple_and_attribute_statements_emit_into_the_statistics_section() {
		let mut scratch = Scratch::new();
		let mut emitter = Emitter::new(&mut scratch.file, &mut scratch.toc, &mut scratch.counts);

		let tuple = TupleStatistic {
			oid: 16384,
			schema: "public".into(),
			table: "things".into(),
			rel_pages: 10,
			rel_tuples: 1000.0,
		};
		let attribute = AttributeStatistic {
			relid: 16384,
			schema: "public".into(),
			table: "things".into(),
			att_name: "id".into(),
			type_name: "integer".into(),
			att_number: 1,
			null_fraction: 0.0,
			width: 4,
			distinct: -1.0,
			kinds: [2, 3, 0, 0],
			operators: [97, 97, 0, 0],
			numbers: ["{0.3,0.2}".into(), String::new(), String::new(), String::new()],
			values: ["{1,2,3}".into(), String::new(), String::new(), String::new()],
		};

		write_statistics(&mut emitter, &[tuple], &[attribute]).unwrap();

		let output = scratch.output();
		assert!(output.contains(
			"UPDATE pg_catalog.pg_class\nSET relpages = 10, reltuples = 1000\n\
			WHERE oid = 'public.things'::pg_catalog.regclass;"
		));
		assert!(output.contains("'{1,2,3}'::integer[]"));
		assert!(output.contains("NULL::pg_catalog.float4[]"));
		assert_eq!(scratch.toc.statistics_entries.len(), 2);
		assert!(scratch.counts.is_empty());
	}
}
