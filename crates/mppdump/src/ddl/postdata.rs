use std::fmt::Write;

use crate::{
	catalog::{
		MetadataMap,
		postdata::{Index, RewriteRule, Trigger},
	},
	ddl::{Emitter, globals::comment_only},
	error::RunError,
	toc::Section,
};

pub fn write_indexes<W: std::io::Write>(
	emitter: &mut Emitter<'_, W>,
	indexes: &[Index],
	metadata: &MetadataMap,
) -> Result<(), RunError> {
	for index in indexes {
		let mut sql = format!("{};", index.def.trim_end_matches(';'));
		if !index.tablespace.is_empty() {
			let _ = write!(
				sql,
				"\nALTER INDEX {} SET TABLESPACE {};",
				index.name, index.tablespace,
			);
		}
		if index.is_clustered {
			let _ = write!(
				sql,
				"\nALTER TABLE {} CLUSTER ON {};",
				index.owning_table, index.name,
			);
		}
		sql.push_str(&comment_only(metadata.get(&index.oid), "INDEX", &index.name));
		emitter.emit(
			Section::Postdata,
			"",
			&index.name,
			"INDEX",
			&index.owning_table,
			&sql,
		)?;
	}
	Ok(())
}

pub fn write_rules<W: std::io::Write>(
	emitter: &mut Emitter<'_, W>,
	rules: &[RewriteRule],
	metadata: &MetadataMap,
) -> Result<(), RunError> {
	for rule in rules {
		let mut sql = format!("{};", rule.def.trim_end().trim_end_matches(';'));
		sql.push_str(&comment_only(
			metadata.get(&rule.oid),
			"RULE",
			&format!("{} ON {}", rule.name, rule.owning_table),
		));
		emitter.emit(
			Section::Postdata,
			"",
			&rule.name,
			"RULE",
			&rule.owning_table,
			&sql,
		)?;
	}
	Ok(())
}

pub fn write_triggers<W: std::io::Write>(
	emitter: &mut Emitter<'_, W>,
	triggers: &[Trigger],
	metadata: &MetadataMap,
) -> Result<(), RunError> {
	for trigger in triggers {
		let mut sql = format!("{};", trigger.def.trim_end_matches(';'));
		sql.push_str(&comment_only(
			metadata.get(&trigger.oid),
			"TRIGGER",
			&format!("{} ON {}", trigger.name, trigger.owning_table),
		));
		emitter.emit(
			Section::Postdata,
			"",
			&trigger.name,
			"TRIGGER",
			&trigger.owning_table,
			&sql,
		)?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use super::*;
	use crate::ddl::testutil::Scratch;

	#[test]
	fn clustered_index_gets_cluster_statement() {
		let mut scratch = Scratch::new();
		let mut emitter = Emitter::new(&mut scratch.file, &mut scratch.toc, &mut scratch.counts);
		write_indexes(
			&mut emitter,
			&[Index {
				oid: 1,
				name: "things_idx".into(),
				owning_table: "public.things".into(),
				def: "CREATE INDEX things_idx ON public.things USING btree (id)".into(),
				is_clustered: true,
				tablespace: "fastdisk".into(),
			}],
			&BTreeMap::new(),
		)
		.unwrap();

		let output = scratch.output();
		assert!(output.starts_with("CREATE INDEX things_idx ON public.things USING btree (id);"));
		assert!(output.contains("ALTER INDEX things_idx SET TABLESPACE fastdisk;"));
		assert!(output.contains("ALTER TABLE public.things CLUSTER ON things_idx;"));

		let entry = &scratch.toc.postdata_entries[0];
		assert_eq!(entry.object_type, "INDEX");
		assert_eq!(entry.reference_object, "public.things");
	}
}
