use mppdump_postgres::SlotPool;
use tracing::instrument;

use super::{query, relations::Relation};
use crate::error::RunError;

/// One row of `pg_statistic`, carried as text where the column type is
/// polymorphic so it can be re-inserted verbatim.
#[derive(Debug, Clone)]
pub struct AttributeStatistic {
	pub relid: u32,
	pub schema: String,
	pub table: String,
	pub att_name: String,
	pub type_name: String,
	pub att_number: i16,
	pub null_fraction: f32,
	pub width: i32,
	pub distinct: f32,
	pub kinds: [i16; 4],
	pub operators: [u32; 4],
	pub numbers: [String; 4],
	pub values: [String; 4],
}

#[instrument(level = "debug", skip(pool, tables))]
pub async fn get_attribute_statistics(
	pool: &SlotPool,
	tables: &[Relation],
) -> Result<Vec<AttributeStatistic>, RunError> {
	if tables.is_empty() {
		return Ok(Vec::new());
	}
	let oids = tables
		.iter()
		.map(|t| t.oid.to_string())
		.collect::<Vec<_>>()
		.join(", ");
	let sql = format!(
		"SELECT c.oid AS relid, quote_ident(n.nspname) AS schema,
			quote_ident(c.relname) AS table, quote_ident(a.attname) AS attname,
			t.typname AS type, s.staattnum, s.stanullfrac, s.stawidth, s.stadistinct,
			s.stakind1, s.stakind2, s.stakind3, s.stakind4,
			s.staop1, s.staop2, s.staop3, s.staop4,
			coalesce(s.stanumbers1::text, '') AS stanumbers1,
			coalesce(s.stanumbers2::text, '') AS stanumbers2,
			coalesce(s.stanumbers3::text, '') AS stanumbers3,
			coalesce(s.stanumbers4::text, '') AS stanumbers4,
			coalesce(s.stavalues1::text, '') AS stavalues1,
			coalesce(s.stavalues2::text, '') AS stavalues2,
			coalesce(s.stavalues3::text, '') AS stavalues3,
			coalesce(s.stavalues4::text, '') AS stavalues4
		FROM pg_catalog.pg_statistic s
		JOIN pg_catalog.pg_class c ON s.starelid = c.oid
		JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
		JOIN pg_catalog.pg_attribute a
			ON a.attrelid = c.oid AND a.attnum = s.staattnum
		JOIN pg_catalog.pg_type t ON a.atttypid = t.oid
		WHERE c.oid IN ({oids})
		ORDER BY n.nspname, c.relname, a.attnum",
	);
	Ok(query(pool, "reading attribute statistics", &sql)
		.await?
		.iter()
		.map(|row| AttributeStatistic {
			relid: row.get(0),
			schema: row.get(1),
			table: row.get(2),
			att_name: row.get(3),
			type_name: row.get(4),
			att_number: row.get(5),
			null_fraction: row.get(6),
			width: row.get(7),
			distinct: row.get(8),
			kinds: [row.get(9), row.get(10), row.get(11), row.get(12)],
			operators: [row.get(13), row.get(14), row.get(15), row.get(16)],
			numbers: [row.get(17), row.get(18), row.get(19), row.get(20)],
			values: [row.get(21), row.get(22), row.get(23), row.get(24)],
		})
		.collect())
}

#[derive(Debug, Clone)]
pub struct TupleStatistic {
	pub oid: u32,
	pub schema: String,
	pub table: String,
	pub rel_pages: i32,
	pub rel_tuples: f32,
}

pub async fn get_tuple_statistics(
	pool: &SlotPool,
	tables: &[Relation],
) -> Result<Vec<TupleStatistic>, RunError> {
	if tables.is_empty() {
		return Ok(Vec::new());
	}
	let oids = tables
		.iter()
		.map(|t| t.oid.to_string())
		.collect::<Vec<_>>()
		.join(", ");
	let sql = format!(
		"SELECT c.oid, quote_ident(n.nspname) AS schema, quote_ident(c.relname) AS table,
			c.relpages, c.reltuples
		FROM pg_catalog.pg_class c
		JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
		WHERE c.oid IN ({oids})
		ORDER BY n.nspname, c.relname",
	);
	Ok(query(pool, "reading tuple statistics", &sql)
		.await?
		.iter()
		.map(|row| TupleStatistic {
			oid: row.get(0),
			schema: row.get(1),
			table: row.get(2),
			rel_pages: row.get(3),
			rel_tuples: row.get(4),
		})
		.collect())
}
