use mppdump_postgres::SlotPool;

use super::{query, schema_filter_clause};
use crate::{error::RunError, filters::FilterSet};

#[derive(Debug, Clone)]
pub struct Index {
	pub oid: u32,
	pub name: String,
	pub owning_table: String,
	pub def: String,
	pub is_clustered: bool,
	pub tablespace: String,
}

/// Indexes that are not the implementation of a constraint (those replay
/// with the constraint itself), excluding partition leaves whose indexes
/// are created implicitly with the root's.
pub async fn get_indexes(pool: &SlotPool, filters: &FilterSet) -> Result<Vec<Index>, RunError> {
	let not_constraint_backed = if pool.version.at_least(6) {
		"NOT EXISTS (SELECT 1 FROM pg_catalog.pg_constraint con
			WHERE con.conindid = i.indexrelid)"
	} else {
		"i.indexrelid NOT IN (SELECT d.objid FROM pg_catalog.pg_depend d
			WHERE d.refclassid = 'pg_catalog.pg_constraint'::pg_catalog.regclass
				AND d.deptype = 'i')"
	};
	let sql = format!(
		"SELECT i.indexrelid AS oid, quote_ident(ic.relname) AS name,
			quote_ident(n.nspname) || '.' || quote_ident(c.relname) AS owningtable,
			pg_catalog.pg_get_indexdef(i.indexrelid) AS def,
			i.indisclustered,
			coalesce(quote_ident(ts.spcname), '') AS tablespace
		FROM pg_catalog.pg_index i
		JOIN pg_catalog.pg_class ic ON i.indexrelid = ic.oid
		JOIN pg_catalog.pg_class c ON i.indrelid = c.oid
		JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
		LEFT JOIN pg_catalog.pg_tablespace ts ON ic.reltablespace = ts.oid
		WHERE {} AND {not_constraint_backed}
			AND NOT EXISTS (SELECT 1 FROM pg_catalog.pg_partition_rule r
				WHERE r.parchildrelid = c.oid)
		ORDER BY name",
		schema_filter_clause(filters, "n.nspname"),
	);
	Ok(query(pool, "reading indexes", &sql)
		.await?
		.iter()
		.map(|row| Index {
			oid: row.get(0),
			name: row.get(1),
			owning_table: row.get(2),
			def: row.get(3),
			is_clustered: row.get(4),
			tablespace: row.get(5),
		})
		.collect())
}

#[derive(Debug, Clone)]
pub struct RewriteRule {
	pub oid: u32,
	pub name: String,
	pub owning_table: String,
	pub def: String,
}

pub async fn get_rules(pool: &SlotPool, filters: &FilterSet) -> Result<Vec<RewriteRule>, RunError> {
	let sql = format!(
		"SELECT r.oid, quote_ident(r.rulename) AS name,
			quote_ident(n.nspname) || '.' || quote_ident(c.relname) AS owningtable,
			pg_catalog.pg_get_ruledef(r.oid) AS def
		FROM pg_catalog.pg_rewrite r
		JOIN pg_catalog.pg_class c ON r.ev_class = c.oid
		JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
		WHERE r.rulename != '_RETURN' AND {}
		ORDER BY name",
		schema_filter_clause(filters, "n.nspname"),
	);
	Ok(query(pool, "reading rewrite rules", &sql)
		.await?
		.iter()
		.map(|row| RewriteRule {
			oid: row.get(0),
			name: row.get(1),
			owning_table: row.get(2),
			def: row.get(3),
		})
		.collect())
}

#[derive(Debug, Clone)]
pub struct Trigger {
	pub oid: u32,
	pub name: String,
	pub owning_table: String,
	pub def: String,
}

pub async fn get_triggers(pool: &SlotPool, filters: &FilterSet) -> Result<Vec<Trigger>, RunError> {
	let user_trigger = if pool.version.at_least(6) {
		"NOT t.tgisinternal"
	} else {
		"NOT t.tgisconstraint"
	};
	let sql = format!(
		"SELECT t.oid, quote_ident(t.tgname) AS name,
			quote_ident(n.nspname) || '.' || quote_ident(c.relname) AS owningtable,
			pg_catalog.pg_get_triggerdef(t.oid) AS def
		FROM pg_catalog.pg_trigger t
		JOIN pg_catalog.pg_class c ON t.tgrelid = c.oid
		JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
		WHERE {user_trigger} AND {}
		ORDER BY name",
		schema_filter_clause(filters, "n.nspname"),
	);
	Ok(query(pool, "reading triggers", &sql)
		.await?
		.iter()
		.map(|row| Trigger {
			oid: row.get(0),
			name: row.get(1),
			owning_table: row.get(2),
			def: row.get(3),
		})
		.collect())
}
