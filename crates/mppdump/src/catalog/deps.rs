use std::collections::BTreeMap;

use mppdump_postgres::SlotPool;
use tokio_postgres::Row;
use tracing::instrument;

use super::{
	SYSTEM_SCHEMAS,
	predata::{Function, FunctionInfo, Type, TypeKind, View},
	query,
	relations::Relation,
};
use crate::error::RunError;

/// Dependencies come from four places, merged onto the records before the
/// topological sort: the dependency catalog, inheritance links, view body
/// references, and type/function cross-references. Each constructor here
/// covers one of those, restricted to the objects actually in the backup
/// set so the sort never chases system objects.

fn oid_list<'a>(oids: impl Iterator<Item = &'a u32>) -> String {
	let list = oids.map(u32::to_string).collect::<Vec<_>>().join(", ");
	if list.is_empty() { "0".into() } else { list }
}

fn apply<T>(rows: &[Row], items: &mut [T], oid_of: impl Fn(&T) -> u32, deps_of: impl Fn(&mut T) -> &mut Vec<String>) {
	let mut by_oid: BTreeMap<u32, Vec<String>> = BTreeMap::new();
	for row in rows {
		let oid: u32 = row.get(0);
		by_oid.entry(oid).or_default().push(row.get(1));
	}
	for item in items {
		if let Some(deps) = by_oid.remove(&oid_of(item)) {
			deps_of(item).extend(deps);
		}
	}
}

/// Functions depend on every user-defined type in their signature.
#[instrument(level = "debug", skip(pool, functions))]
pub async fn construct_function_dependencies(
	pool: &SlotPool,
	mut functions: Vec<Function>,
) -> Result<Vec<Function>, RunError> {
	let oids = oid_list(functions.iter().map(|f| &f.oid));
	let sql = if pool.version.at_least(5) {
		format!(
			"SELECT p.oid,
				quote_ident(tn.nspname) || '.' || quote_ident(t.typname) AS referencedobject
			FROM pg_catalog.pg_depend d
			JOIN pg_catalog.pg_type t
				ON d.refobjid = t.oid
					AND d.refclassid = 'pg_catalog.pg_type'::pg_catalog.regclass
			JOIN pg_catalog.pg_namespace tn ON t.typnamespace = tn.oid
			JOIN pg_catalog.pg_proc p
				ON d.objid = p.oid
					AND d.classid = 'pg_catalog.pg_proc'::pg_catalog.regclass
			WHERE p.oid IN ({oids}) AND tn.nspname NOT IN ({SYSTEM_SCHEMAS})
				AND t.typtype != 'p'",
		)
	} else {
		format!(
			"SELECT p.oid,
				quote_ident(tn.nspname) || '.' || quote_ident(t.typname) AS referencedobject
			FROM pg_catalog.pg_proc p
			JOIN pg_catalog.pg_type t
				ON t.oid = p.prorettype
					OR t.oid = ANY (p.proargtypes::pg_catalog.oid[])
			JOIN pg_catalog.pg_namespace tn ON t.typnamespace = tn.oid
			WHERE p.oid IN ({oids}) AND tn.nspname NOT IN ({SYSTEM_SCHEMAS})",
		)
	};
	let rows = query(pool, "reading function dependencies", &sql).await?;
	apply(&rows, &mut functions, |f| f.oid, |f| &mut f.depends_upon);
	Ok(functions)
}

/// Base types depend on their I/O functions; composites on their attribute
/// types; domains on their base type.
#[instrument(level = "debug", skip(pool, types, func_info))]
pub async fn construct_type_dependencies(
	pool: &SlotPool,
	mut types: Vec<Type>,
	func_info: &BTreeMap<u32, FunctionInfo>,
) -> Result<Vec<Type>, RunError> {
	let base_oids = oid_list(
		types
			.iter()
			.filter(|t| t.kind == TypeKind::Base)
			.map(|t| &t.oid),
	);
	if pool.version.at_least(5) {
		let sql = format!(
			"SELECT t.oid,
				quote_ident(n.nspname) || '.' || quote_ident(p.proname)
					|| '(' || pg_catalog.pg_get_function_arguments(p.oid) || ')'
					AS referencedobject
			FROM pg_catalog.pg_depend d
			JOIN pg_catalog.pg_type t
				ON d.objid = t.oid
					AND d.classid = 'pg_catalog.pg_type'::pg_catalog.regclass
			JOIN pg_catalog.pg_proc p
				ON d.refobjid = p.oid
					AND d.refclassid = 'pg_catalog.pg_proc'::pg_catalog.regclass
			JOIN pg_catalog.pg_namespace n ON p.pronamespace = n.oid
			WHERE t.oid IN ({base_oids}) AND n.nspname NOT IN ({SYSTEM_SCHEMAS})",
		);
		let rows = query(pool, "reading base type dependencies", &sql).await?;
		apply(&rows, &mut types, |t| t.oid, |t| &mut t.depends_upon);
	} else {
		// The old dependency catalog has no usable rows for type I/O
		// functions; read the oids off pg_type and resolve them through the
		// function map instead.
		let sql = format!(
			"SELECT t.oid, t.typinput::pg_catalog.oid AS referencedoid
			FROM pg_catalog.pg_type t WHERE t.oid IN ({base_oids})
			UNION ALL
			SELECT t.oid, t.typoutput::pg_catalog.oid
			FROM pg_catalog.pg_type t WHERE t.oid IN ({base_oids})
			UNION ALL
			SELECT t.oid, t.typreceive::pg_catalog.oid
			FROM pg_catalog.pg_type t
			WHERE t.oid IN ({base_oids}) AND t.typreceive != 0
			UNION ALL
			SELECT t.oid, t.typsend::pg_catalog.oid
			FROM pg_catalog.pg_type t
			WHERE t.oid IN ({base_oids}) AND t.typsend != 0",
		);
		let rows = query(pool, "reading base type function references", &sql).await?;
		let mut by_oid: BTreeMap<u32, Vec<String>> = BTreeMap::new();
		for row in &rows {
			let type_oid: u32 = row.get(0);
			let func_oid: u32 = row.get(1);
			if let Some(info) = func_info.get(&func_oid)
				&& !info.is_internal
			{
				by_oid.entry(type_oid).or_default().push(info.fqn());
			}
		}
		for t in &mut types {
			if let Some(deps) = by_oid.remove(&t.oid) {
				t.depends_upon.extend(deps);
			}
		}
	}

	let composite_oids = oid_list(
		types
			.iter()
			.filter(|t| t.kind == TypeKind::Composite)
			.map(|t| &t.oid),
	);
	let sql = format!(
		"SELECT t.oid,
			quote_ident(wn.nspname) || '.' || quote_ident(wt.typname) AS referencedobject
		FROM pg_catalog.pg_type t
		JOIN pg_catalog.pg_attribute a ON a.attrelid = t.typrelid
		JOIN pg_catalog.pg_type wt ON a.atttypid = wt.oid
		JOIN pg_catalog.pg_namespace wn ON wt.typnamespace = wn.oid
		WHERE t.oid IN ({composite_oids}) AND NOT a.attisdropped
			AND wn.nspname NOT IN ({SYSTEM_SCHEMAS})",
	);
	let rows = query(pool, "reading composite type dependencies", &sql).await?;
	apply(&rows, &mut types, |t| t.oid, |t| &mut t.depends_upon);

	let domain_oids = oid_list(
		types
			.iter()
			.filter(|t| t.kind == TypeKind::Domain)
			.map(|t| &t.oid),
	);
	let sql = format!(
		"SELECT t.oid,
			quote_ident(bn.nspname) || '.' || quote_ident(bt.typname) AS referencedobject
		FROM pg_catalog.pg_type t
		JOIN pg_catalog.pg_type bt ON t.typbasetype = bt.oid
		JOIN pg_catalog.pg_namespace bn ON bt.typnamespace = bn.oid
		WHERE t.oid IN ({domain_oids}) AND bn.nspname NOT IN ({SYSTEM_SCHEMAS})",
	);
	let rows = query(pool, "reading domain dependencies", &sql).await?;
	apply(&rows, &mut types, |t| t.oid, |t| &mut t.depends_upon);

	Ok(types)
}

/// A child table depends on every parent it inherits from.
pub async fn construct_table_dependencies(
	pool: &SlotPool,
	mut tables: Vec<Relation>,
) -> Result<Vec<Relation>, RunError> {
	let oids = oid_list(tables.iter().map(|t| &t.oid));
	let sql = format!(
		"SELECT i.inhrelid,
			quote_ident(n.nspname) || '.' || quote_ident(p.relname) AS referencedobject
		FROM pg_catalog.pg_inherits i
		JOIN pg_catalog.pg_class p ON i.inhparent = p.oid
		JOIN pg_catalog.pg_namespace n ON p.relnamespace = n.oid
		WHERE i.inhrelid IN ({oids})
		ORDER BY i.inhrelid, i.inhseqno",
	);
	let rows = query(pool, "reading table inheritance dependencies", &sql).await?;
	apply(&rows, &mut tables, |t| t.oid, |t| &mut t.depends_upon);
	Ok(tables)
}

/// A view depends on every relation its body references.
pub async fn construct_view_dependencies(
	pool: &SlotPool,
	mut views: Vec<View>,
) -> Result<Vec<View>, RunError> {
	let oids = oid_list(views.iter().map(|v| &v.oid));
	let sql = format!(
		"SELECT DISTINCT v.oid,
			quote_ident(n.nspname) || '.' || quote_ident(rc.relname) AS referencedobject
		FROM pg_catalog.pg_class v
		JOIN pg_catalog.pg_rewrite rw ON rw.ev_class = v.oid
		JOIN pg_catalog.pg_depend d ON d.objid = rw.oid
		JOIN pg_catalog.pg_class rc ON d.refobjid = rc.oid AND rc.oid != v.oid
		JOIN pg_catalog.pg_namespace n ON rc.relnamespace = n.oid
		WHERE v.oid IN ({oids}) AND n.nspname NOT IN ({SYSTEM_SCHEMAS})",
	);
	let rows = query(pool, "reading view dependencies", &sql).await?;
	apply(&rows, &mut views, |v| v.oid, |v| &mut v.depends_upon);
	Ok(views)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn oid_list_never_produces_an_empty_in_clause() {
		assert_eq!(oid_list(Vec::<u32>::new().iter()), "0");
		assert_eq!(oid_list([16384u32, 16385].iter()), "16384, 16385");
	}
}
