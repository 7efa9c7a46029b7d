use std::collections::{BTreeMap, BTreeSet};

use mppdump_postgres::SlotPool;
use tracing::{debug, info, instrument};

use super::{METADATA_SLOT, SYSTEM_SCHEMAS, literal_list, query};
use crate::{
	depsort::{ObjectKind, Sortable},
	error::RunError,
	filters::FilterSet,
};

/// A table, sequence or view as the dependency machinery sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
	pub schema_oid: u32,
	pub oid: u32,
	pub schema: String,
	pub name: String,
	pub depends_upon: Vec<String>,
}

impl Relation {
	pub fn fqn(&self) -> String {
		format!("{}.{}", self.schema, self.name)
	}
}

impl Sortable for Relation {
	fn fqn(&self) -> String {
		Relation::fqn(self)
	}
	fn depends_upon(&self) -> &[String] {
		&self.depends_upon
	}
	fn kind(&self) -> ObjectKind {
		ObjectKind::Table
	}
}

/// How a table stores rows; drives both DDL shape and data-phase skipping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStorage {
	Heap,
	AppendOnly,
	ColumnOriented,
	External,
	Foreign,
}

impl TableStorage {
	fn from_relstorage(c: i8) -> Self {
		match c as u8 as char {
			'a' => Self::AppendOnly,
			'c' => Self::ColumnOriented,
			'x' => Self::External,
			'f' => Self::Foreign,
			_ => Self::Heap,
		}
	}

	pub fn is_append_optimized(self) -> bool {
		matches!(self, Self::AppendOnly | Self::ColumnOriented)
	}

	pub fn holds_no_local_data(self) -> bool {
		matches!(self, Self::External | Self::Foreign)
	}
}

/// The relation sets one run works with: `metadata_tables` drive DDL
/// emission (partition roots stand in for their whole hierarchy),
/// `data_tables` drive the copy phase.
#[derive(Debug, Default)]
pub struct TableSet {
	pub metadata_tables: Vec<Relation>,
	pub data_tables: Vec<Relation>,
	pub partition_roots: BTreeSet<u32>,
	pub storage: BTreeMap<u32, TableStorage>,
}

/// Query every user table passing the filters and split it into the
/// metadata and data sets.
///
/// Tables that define no local rows (external, foreign) stay in the
/// metadata set but are dropped from the data set with a logged reason, so
/// every filtered-in table is accounted for one way or the other.
#[instrument(level = "debug", skip(pool, filters))]
pub async fn get_user_tables(
	pool: &SlotPool,
	filters: &FilterSet,
	leaf_partition_data: bool,
) -> Result<TableSet, RunError> {
	let mut conditions = vec![
		format!("n.nspname NOT IN ({SYSTEM_SCHEMAS})"),
		"n.nspname NOT LIKE 'pg_temp_%'".into(),
		"n.nspname NOT LIKE 'pg_toast%'".into(),
	];
	if filters.is_table_filtered() {
		// an included partition root brings its whole hierarchy along
		let list = literal_list(filters.include_tables.iter().map(String::as_str));
		conditions.push(format!(
			"((n.nspname || '.' || c.relname) IN ({list})
				OR EXISTS (SELECT 1
					FROM pg_catalog.pg_partition p
					JOIN pg_catalog.pg_partition_rule r ON r.paroid = p.oid
					JOIN pg_catalog.pg_class pc ON p.parrelid = pc.oid
					JOIN pg_catalog.pg_namespace pn ON pc.relnamespace = pn.oid
					WHERE r.parchildrelid = c.oid
						AND (pn.nspname || '.' || pc.relname) IN ({list})))",
		));
	} else {
		if !filters.include_schemas.is_empty() {
			conditions.push(format!(
				"n.nspname IN ({})",
				literal_list(filters.include_schemas.iter().map(String::as_str)),
			));
		}
		if !filters.exclude_schemas.is_empty() {
			conditions.push(format!(
				"n.nspname NOT IN ({})",
				literal_list(filters.exclude_schemas.iter().map(String::as_str)),
			));
		}
		if !filters.exclude_tables.is_empty() {
			conditions.push(format!(
				"(n.nspname || '.' || c.relname) NOT IN ({})",
				literal_list(filters.exclude_tables.iter().map(String::as_str)),
			));
		}
	}

	let sql = format!(
		"SELECT n.oid AS schemaoid, c.oid, quote_ident(n.nspname) AS schema,
			quote_ident(c.relname) AS name, c.relstorage, c.relhassubclass,
			EXISTS (SELECT 1 FROM pg_catalog.pg_partition_rule r
				WHERE r.parchildrelid = c.oid) AS ispartitionchild,
			EXISTS (SELECT 1 FROM pg_catalog.pg_partition p
				WHERE p.parrelid = c.oid AND NOT p.paristemplate) AS ispartitionroot
		FROM pg_catalog.pg_class c
		JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
		WHERE c.relkind = 'r' AND {}
		ORDER BY n.nspname, c.relname",
		conditions.join(" AND "),
	);

	let rows = query(pool, "reading user tables", &sql).await?;

	let mut set = TableSet::default();
	for row in &rows {
		let relation = Relation {
			schema_oid: row.get(0),
			oid: row.get(1),
			schema: row.get(2),
			name: row.get(3),
			depends_upon: Vec::new(),
		};
		let storage = TableStorage::from_relstorage(row.get(4));
		let has_subclass: bool = row.get(5);
		let is_partition_child: bool = row.get(6);
		let is_partition_root: bool = row.get(7);

		set.storage.insert(relation.oid, storage);
		if is_partition_root {
			set.partition_roots.insert(relation.oid);
		}

		// Partition children are implicit in the root's DDL.
		if !is_partition_child {
			set.metadata_tables.push(relation.clone());
		}

		let wants_data = if leaf_partition_data {
			!is_partition_root && !(is_partition_child && has_subclass)
		} else {
			!is_partition_child
		};
		if wants_data {
			if storage.holds_no_local_data() {
				info!(
					table = %relation.fqn(),
					"excluding table from data backup: it stores no local rows"
				);
			} else {
				set.data_tables.push(relation);
			}
		}
	}

	debug!(
		metadata = set.metadata_tables.len(),
		data = set.data_tables.len(),
		"classified user tables"
	);
	Ok(set)
}

/// Check every name the filter lists mention against the catalog (P5: a
/// filter naming a missing object is a validation-time error).
pub async fn validate_filters(pool: &SlotPool, filters: &FilterSet) -> Result<(), RunError> {
	let schemas: Vec<&str> = filters.named_schemas().collect();
	if !schemas.is_empty() {
		let sql = format!(
			"SELECT nspname FROM pg_catalog.pg_namespace WHERE nspname IN ({})",
			literal_list(schemas.iter().copied()),
		);
		let found: BTreeSet<String> = query(pool, "validating schema filters", &sql)
			.await?
			.iter()
			.map(|row| row.get(0))
			.collect();
		for schema in schemas {
			if !found.contains(schema) {
				return Err(RunError::UnknownFilterTarget {
					kind: "schema",
					name: schema.into(),
				});
			}
		}
	}

	let tables: Vec<&str> = filters.named_tables().collect();
	if !tables.is_empty() {
		let sql = format!(
			"SELECT n.nspname || '.' || c.relname
			FROM pg_catalog.pg_class c
			JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
			WHERE c.relkind = 'r' AND (n.nspname || '.' || c.relname) IN ({})",
			literal_list(tables.iter().copied()),
		);
		let found: BTreeSet<String> = query(pool, "validating table filters", &sql)
			.await?
			.iter()
			.map(|row| row.get(0))
			.collect();
		for table in tables {
			if !found.contains(table) {
				return Err(RunError::UnknownFilterTarget {
					kind: "table",
					name: table.into(),
				});
			}
		}
	}

	Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct ColumnDefinition {
	pub num: i16,
	pub name: String,
	pub not_null: bool,
	pub has_default: bool,
	pub is_dropped: bool,
	pub type_name: String,
	pub encoding: String,
	pub default_val: String,
	pub comment: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExternalTableDefinition {
	pub locations: Vec<String>,
	pub exec_location: String,
	pub format_type: String,
	pub format_opts: String,
	pub options: String,
	pub command: String,
	pub reject_limit: i32,
	pub reject_limit_type: String,
	pub log_errors: bool,
	pub encoding: String,
	pub writable: bool,
}

/// Everything needed to reconstruct one table's CREATE statement.
#[derive(Debug, Clone, Default)]
pub struct TableDefinition {
	pub storage: Option<TableStorage>,
	pub distribution_policy: String,
	pub partition_def: String,
	pub partition_template: String,
	pub storage_options: String,
	pub tablespace: String,
	pub columns: Vec<ColumnDefinition>,
	pub external: Option<ExternalTableDefinition>,
	pub inherits: Vec<String>,
}

impl TableDefinition {
	pub fn is_external(&self) -> bool {
		self.external.is_some()
	}

	pub fn is_writable_external(&self) -> bool {
		self.external.as_ref().is_some_and(|ext| ext.writable)
	}

	/// `(a,b,c)` over the live columns, recorded with each data TOC entry.
	pub fn attribute_string(&self) -> String {
		let names: Vec<&str> = self
			.columns
			.iter()
			.filter(|col| !col.is_dropped)
			.map(|col| col.name.as_str())
			.collect();
		format!("({})", names.join(","))
	}
}

/// Assemble the full definition of every table in `set`, keyed by oid.
#[instrument(level = "debug", skip(pool, set))]
pub async fn get_table_definitions(
	pool: &SlotPool,
	set: &TableSet,
) -> Result<BTreeMap<u32, TableDefinition>, RunError> {
	let mut oids: BTreeSet<u32> = set.storage.keys().copied().collect();
	oids.extend(set.data_tables.iter().map(|t| t.oid));
	if oids.is_empty() {
		return Ok(BTreeMap::new());
	}
	let oid_list = oids
		.iter()
		.map(u32::to_string)
		.collect::<Vec<_>>()
		.join(", ");

	let mut defs: BTreeMap<u32, TableDefinition> = oids
		.iter()
		.map(|&oid| {
			let def = TableDefinition {
				storage: set.storage.get(&oid).copied(),
				..Default::default()
			};
			(oid, def)
		})
		.collect();

	query_columns(pool, &oid_list, &mut defs).await?;
	query_storage(pool, &oid_list, &mut defs).await?;
	query_distribution(pool, &oid_list, &mut defs).await?;
	query_inherits(pool, &oid_list, &mut defs).await?;
	query_partition_defs(pool, set, &mut defs).await?;
	query_external_defs(pool, &oid_list, &mut defs).await?;

	Ok(defs)
}

async fn query_columns(
	pool: &SlotPool,
	oid_list: &str,
	defs: &mut BTreeMap<u32, TableDefinition>,
) -> Result<(), RunError> {
	let sql = format!(
		"SELECT a.attrelid, a.attnum, quote_ident(a.attname) AS name, a.attnotnull,
			a.atthasdef, a.attisdropped,
			pg_catalog.format_type(a.atttypid, a.atttypmod) AS type,
			coalesce(pg_catalog.array_to_string(e.attoptions, ', '), '') AS encoding,
			coalesce(d.def, '') AS defaultval,
			coalesce(pg_catalog.col_description(a.attrelid, a.attnum), '') AS comment
		FROM pg_catalog.pg_attribute a
		LEFT JOIN pg_catalog.pg_attribute_encoding e
			ON e.attrelid = a.attrelid AND e.attnum = a.attnum
		LEFT JOIN (SELECT adrelid, adnum, pg_catalog.pg_get_expr(adbin, adrelid) AS def
			FROM pg_catalog.pg_attrdef) d
			ON d.adrelid = a.attrelid AND d.adnum = a.attnum
		WHERE a.attrelid IN ({oid_list}) AND a.attnum > 0
		ORDER BY a.attrelid, a.attnum",
	);
	for row in &query(pool, "reading table columns", &sql).await? {
		let oid: u32 = row.get(0);
		if let Some(def) = defs.get_mut(&oid) {
			def.columns.push(ColumnDefinition {
				num: row.get(1),
				name: row.get(2),
				not_null: row.get(3),
				has_default: row.get(4),
				is_dropped: row.get(5),
				type_name: row.get(6),
				encoding: row.get(7),
				default_val: row.get(8),
				comment: row.get(9),
			});
		}
	}
	Ok(())
}

async fn query_storage(
	pool: &SlotPool,
	oid_list: &str,
	defs: &mut BTreeMap<u32, TableDefinition>,
) -> Result<(), RunError> {
	let sql = format!(
		"SELECT c.oid, coalesce(pg_catalog.array_to_string(c.reloptions, ', '), '') AS options,
			coalesce(quote_ident(t.spcname), '') AS tablespace
		FROM pg_catalog.pg_class c
		LEFT JOIN pg_catalog.pg_tablespace t ON c.reltablespace = t.oid
		WHERE c.oid IN ({oid_list})",
	);
	for row in &query(pool, "reading table storage options", &sql).await? {
		let oid: u32 = row.get(0);
		if let Some(def) = defs.get_mut(&oid) {
			def.storage_options = row.get(1);
			def.tablespace = row.get(2);
		}
	}
	Ok(())
}

async fn query_distribution(
	pool: &SlotPool,
	oid_list: &str,
	defs: &mut BTreeMap<u32, TableDefinition>,
) -> Result<(), RunError> {
	if pool.version.at_least(6) {
		let sql = format!(
			"SELECT localoid, pg_catalog.pg_get_table_distributedby(localoid)
			FROM pg_catalog.gp_distribution_policy
			WHERE localoid IN ({oid_list})",
		);
		for row in &query(pool, "reading distribution policies", &sql).await? {
			let oid: u32 = row.get(0);
			if let Some(def) = defs.get_mut(&oid) {
				def.distribution_policy = row.get(1);
			}
		}
	} else {
		let sql = format!(
			"SELECT localoid, coalesce(attrnums::text, '') AS attrnums
			FROM pg_catalog.gp_distribution_policy
			WHERE localoid IN ({oid_list})",
		);
		for row in &query(pool, "reading distribution policies", &sql).await? {
			let oid: u32 = row.get(0);
			let attrnums: String = row.get(1);
			if let Some(def) = defs.get_mut(&oid) {
				def.distribution_policy = distribution_from_attrnums(&attrnums, &def.columns);
			}
		}
	}
	Ok(())
}

/// Build `DISTRIBUTED BY (...)` from the pre-6 `attrnums` column, whose text
/// form is `{2,1}` over attribute numbers.
fn distribution_from_attrnums(attrnums: &str, columns: &[ColumnDefinition]) -> String {
	let nums: Vec<i16> = attrnums
		.trim_start_matches('{')
		.trim_end_matches('}')
		.split(',')
		.filter_map(|n| n.trim().parse().ok())
		.collect();
	if nums.is_empty() {
		return "DISTRIBUTED RANDOMLY".into();
	}
	let names: Vec<&str> = nums
		.iter()
		.filter_map(|num| {
			columns
				.iter()
				.find(|col| col.num == *num)
				.map(|col| col.name.as_str())
		})
		.collect();
	format!("DISTRIBUTED BY ({})", names.join(", "))
}

async fn query_inherits(
	pool: &SlotPool,
	oid_list: &str,
	defs: &mut BTreeMap<u32, TableDefinition>,
) -> Result<(), RunError> {
	let sql = format!(
		"SELECT i.inhrelid, quote_ident(n.nspname) || '.' || quote_ident(p.relname) AS parent
		FROM pg_catalog.pg_inherits i
		JOIN pg_catalog.pg_class p ON i.inhparent = p.oid
		JOIN pg_catalog.pg_namespace n ON p.relnamespace = n.oid
		WHERE i.inhrelid IN ({oid_list})
			AND NOT EXISTS (SELECT 1 FROM pg_catalog.pg_partition_rule r
				WHERE r.parchildrelid = i.inhrelid)
		ORDER BY i.inhrelid, i.inhseqno",
	);
	for row in &query(pool, "reading table inheritance", &sql).await? {
		let oid: u32 = row.get(0);
		if let Some(def) = defs.get_mut(&oid) {
			def.inherits.push(row.get(1));
		}
	}
	Ok(())
}

async fn query_partition_defs(
	pool: &SlotPool,
	set: &TableSet,
	defs: &mut BTreeMap<u32, TableDefinition>,
) -> Result<(), RunError> {
	for &oid in &set.partition_roots {
		let def_sql = format!(
			"SELECT coalesce(pg_catalog.pg_get_partition_def({oid}::pg_catalog.oid, true, false), '')"
		);
		let template_sql = format!(
			"SELECT coalesce(pg_catalog.pg_get_partition_template_def({oid}::pg_catalog.oid, true, true), '')"
		);
		let partition_def = pool
			.select_string(METADATA_SLOT, &def_sql)
			.await
			.map_err(|err| RunError::catalog("reading partition definition", err))?;
		let partition_template = pool
			.select_string(METADATA_SLOT, &template_sql)
			.await
			.map_err(|err| RunError::catalog("reading partition template", err))?;
		if let Some(def) = defs.get_mut(&oid) {
			def.partition_def = partition_def;
			def.partition_template = partition_template;
		}
	}
	Ok(())
}

async fn query_external_defs(
	pool: &SlotPool,
	oid_list: &str,
	defs: &mut BTreeMap<u32, TableDefinition>,
) -> Result<(), RunError> {
	let sql = if pool.version.at_least(6) {
		format!(
			"SELECT x.reloid,
				coalesce(pg_catalog.array_to_string(x.urilocation, '|'), '') AS locations,
				coalesce(pg_catalog.array_to_string(x.execlocation, '|'), '') AS execlocation,
				x.fmttype, coalesce(x.fmtopts, '') AS fmtopts,
				coalesce(pg_catalog.array_to_string(x.options, ', '), '') AS options,
				coalesce(x.command, '') AS command,
				coalesce(x.rejectlimit, 0) AS rejectlimit,
				coalesce(x.rejectlimittype, '') AS rejectlimittype,
				x.logerrors,
				pg_catalog.pg_encoding_to_char(x.encoding) AS encoding,
				x.writable
			FROM pg_catalog.pg_exttable x
			WHERE x.reloid IN ({oid_list})",
		)
	} else {
		format!(
			"SELECT x.reloid,
				coalesce(pg_catalog.array_to_string(x.location, '|'), '') AS locations,
				'' AS execlocation,
				x.fmttype, coalesce(x.fmtopts, '') AS fmtopts,
				'' AS options,
				coalesce(x.command, '') AS command,
				coalesce(x.rejectlimit, 0) AS rejectlimit,
				coalesce(x.rejectlimittype, '') AS rejectlimittype,
				x.fmterrtbl IS NOT NULL AS logerrors,
				pg_catalog.pg_encoding_to_char(x.encoding) AS encoding,
				x.writable
			FROM pg_catalog.pg_exttable x
			WHERE x.reloid IN ({oid_list})",
		)
	};
	for row in &query(pool, "reading external table definitions", &sql).await? {
		let oid: u32 = row.get(0);
		if let Some(def) = defs.get_mut(&oid) {
			let locations: String = row.get(1);
			def.external = Some(ExternalTableDefinition {
				locations: locations
					.split('|')
					.filter(|l| !l.is_empty())
					.map(Into::into)
					.collect(),
				exec_location: row.get(2),
				format_type: super::char_to_string(row.get(3)),
				format_opts: row.get(4),
				options: row.get(5),
				command: row.get(6),
				reject_limit: row.get(7),
				reject_limit_type: super::char_to_string(row.get(8)),
				log_errors: row.get(9),
				encoding: row.get(10),
				writable: row.get(11),
			});
		}
	}
	Ok(())
}

/// Last modification counts for append-optimized tables, recorded in the TOC
/// so later incremental backups can skip unchanged table sets.
pub async fn get_ao_incremental_metadata(
	pool: &SlotPool,
	data_tables: &[Relation],
	defs: &BTreeMap<u32, TableDefinition>,
) -> Result<BTreeMap<String, i64>, RunError> {
	let mut modcounts = BTreeMap::new();
	for table in data_tables {
		let Some(storage) = defs.get(&table.oid).and_then(|def| def.storage) else {
			continue;
		};
		if !storage.is_append_optimized() {
			continue;
		}
		let helper = match storage {
			TableStorage::ColumnOriented => "__gp_aocsseg",
			_ => "__gp_aoseg",
		};
		let sql = format!(
			"SELECT coalesce(sum(modcount), 0)::bigint
			FROM gp_toolkit.{helper}('{}'::pg_catalog.regclass)",
			table.fqn().replace('\'', "''"),
		);
		let rows = query(pool, "reading append-only modification counts", &sql).await?;
		let modcount: i64 = rows[0].get(0);
		modcounts.insert(table.fqn(), modcount);
	}
	Ok(modcounts)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn column(num: i16, name: &str) -> ColumnDefinition {
		ColumnDefinition {
			num,
			name: name.into(),
			..Default::default()
		}
	}

	#[test]
	fn relation_fqn_joins_schema_and_name() {
		let rel = Relation {
			schema_oid: 2200,
			oid: 16384,
			schema: "public".into(),
			name: "things".into(),
			depends_upon: Vec::new(),
		};
		assert_eq!(rel.fqn(), "public.things");
	}

	#[test]
	fn distribution_clause_resolves_column_names() {
		let columns = vec![column(1, "id"), column(2, "region")];
		assert_eq!(
			distribution_from_attrnums("{2,1}", &columns),
			"DISTRIBUTED BY (region, id)"
		);
		assert_eq!(
			distribution_from_attrnums("", &columns),
			"DISTRIBUTED RANDOMLY"
		);
	}

	#[test]
	fn attribute_string_skips_dropped_columns() {
		let def = TableDefinition {
			columns: vec![
				column(1, "id"),
				ColumnDefinition {
					num: 2,
					name: "gone".into(),
					is_dropped: true,
					..Default::default()
				},
				column(3, "name"),
			],
			..Default::default()
		};
		assert_eq!(def.attribute_string(), "(id,name)");
	}

	#[test]
	fn storage_classification() {
		assert_eq!(
			TableStorage::from_relstorage(b'x' as i8),
			TableStorage::External
		);
		assert!(TableStorage::External.holds_no_local_data());
		assert!(TableStorage::AppendOnly.is_append_optimized());
		assert!(!TableStorage::Heap.holds_no_local_data());
	}
}
