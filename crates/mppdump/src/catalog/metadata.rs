use std::collections::BTreeMap;

use mppdump_postgres::SlotPool;
use tracing::instrument;

use crate::error::RunError;

/// One grantee's privileges on an object: a bit per privilege kind, with a
/// parallel bit for WITH GRANT OPTION. An empty grantee is PUBLIC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acl {
	pub grantee: String,
	pub select: bool,
	pub select_with_grant: bool,
	pub insert: bool,
	pub insert_with_grant: bool,
	pub update: bool,
	pub update_with_grant: bool,
	pub delete: bool,
	pub delete_with_grant: bool,
	pub truncate: bool,
	pub truncate_with_grant: bool,
	pub references: bool,
	pub references_with_grant: bool,
	pub trigger: bool,
	pub trigger_with_grant: bool,
	pub execute: bool,
	pub execute_with_grant: bool,
	pub usage: bool,
	pub usage_with_grant: bool,
	pub create: bool,
	pub create_with_grant: bool,
	pub temporary: bool,
	pub temporary_with_grant: bool,
	pub connect: bool,
	pub connect_with_grant: bool,
}

impl Acl {
	pub fn new(grantee: &str) -> Self {
		Self {
			grantee: grantee.into(),
			..Default::default()
		}
	}
}

/// Owner, comment, security label and privileges for one object. A missing
/// map entry means all-default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
	pub privileges: Vec<Acl>,
	pub owner: String,
	pub comment: String,
	pub security_label: String,
	pub security_label_provider: String,
}

pub type MetadataMap = BTreeMap<u32, ObjectMetadata>;

/// Merge per-kind metadata maps into one, for the interleaved
/// function/type/table emission pass. Oids never collide across these
/// catalogs' rows in practice; a collision keeps the later entry.
pub fn merge_metadata_maps(maps: impl IntoIterator<Item = MetadataMap>) -> MetadataMap {
	let mut merged = MetadataMap::new();
	for map in maps {
		merged.extend(map);
	}
	merged
}

/// Everything the generic metadata query needs to know about one catalog.
#[derive(Debug, Clone, Copy)]
pub struct MetadataQueryParams {
	/// Object kind for log lines, e.g. `relation`.
	pub kind: &'static str,
	/// Catalog relation, e.g. `pg_class`.
	pub catalog: &'static str,
	/// Column holding the owner oid, or empty for unowned kinds.
	pub owner_column: &'static str,
	/// Column holding the ACL array, or empty for kinds without privileges.
	pub acl_column: &'static str,
	/// Extra WHERE clause on the catalog (alias `o`), or empty.
	pub filter: &'static str,
	/// Whether comments live in `pg_shdescription` (cluster-wide objects)
	/// rather than `pg_description`.
	pub shared: bool,
}

pub const TYPE_RELATION: MetadataQueryParams = MetadataQueryParams {
	kind: "relation",
	catalog: "pg_class",
	owner_column: "relowner",
	acl_column: "relacl",
	filter: "o.relkind IN ('r', 'S', 'v')",
	shared: false,
};

pub const TYPE_FUNCTION: MetadataQueryParams = MetadataQueryParams {
	kind: "function",
	catalog: "pg_proc",
	owner_column: "proowner",
	acl_column: "proacl",
	filter: "",
	shared: false,
};

pub const TYPE_TYPE: MetadataQueryParams = MetadataQueryParams {
	kind: "type",
	catalog: "pg_type",
	owner_column: "typowner",
	acl_column: "",
	filter: "",
	shared: false,
};

pub const TYPE_SCHEMA: MetadataQueryParams = MetadataQueryParams {
	kind: "schema",
	catalog: "pg_namespace",
	owner_column: "nspowner",
	acl_column: "nspacl",
	filter: "",
	shared: false,
};

pub const TYPE_DATABASE: MetadataQueryParams = MetadataQueryParams {
	kind: "database",
	catalog: "pg_database",
	owner_column: "datdba",
	acl_column: "datacl",
	filter: "",
	shared: true,
};

pub const TYPE_TABLESPACE: MetadataQueryParams = MetadataQueryParams {
	kind: "tablespace",
	catalog: "pg_tablespace",
	owner_column: "spcowner",
	acl_column: "spcacl",
	filter: "",
	shared: true,
};

pub const TYPE_LANGUAGE: MetadataQueryParams = MetadataQueryParams {
	kind: "language",
	catalog: "pg_language",
	owner_column: "lanowner",
	acl_column: "lanacl",
	filter: "o.lanispl",
	shared: false,
};

pub const TYPE_PROTOCOL: MetadataQueryParams = MetadataQueryParams {
	kind: "protocol",
	catalog: "pg_extprotocol",
	owner_column: "ptcowner",
	acl_column: "ptcacl",
	filter: "",
	shared: false,
};

pub const TYPE_CAST: MetadataQueryParams = MetadataQueryParams {
	kind: "cast",
	catalog: "pg_cast",
	owner_column: "",
	acl_column: "",
	filter: "o.oid >= 16384",
	shared: false,
};

pub const TYPE_CONSTRAINT: MetadataQueryParams = MetadataQueryParams {
	kind: "constraint",
	catalog: "pg_constraint",
	owner_column: "",
	acl_column: "",
	filter: "",
	shared: false,
};

pub const TYPE_OPERATOR_FAMILY: MetadataQueryParams = MetadataQueryParams {
	kind: "operator family",
	catalog: "pg_opfamily",
	owner_column: "opfowner",
	acl_column: "",
	filter: "",
	shared: false,
};

pub const TYPE_RESOURCE_QUEUE: MetadataQueryParams = MetadataQueryParams {
	kind: "resource queue",
	catalog: "pg_resqueue",
	owner_column: "",
	acl_column: "",
	filter: "",
	shared: true,
};

pub const TYPE_INDEX: MetadataQueryParams = MetadataQueryParams {
	kind: "index",
	catalog: "pg_class",
	owner_column: "",
	acl_column: "",
	filter: "o.relkind = 'i'",
	shared: false,
};

pub const TYPE_RULE: MetadataQueryParams = MetadataQueryParams {
	kind: "rule",
	catalog: "pg_rewrite",
	owner_column: "",
	acl_column: "",
	filter: "",
	shared: false,
};

pub const TYPE_TRIGGER: MetadataQueryParams = MetadataQueryParams {
	kind: "trigger",
	catalog: "pg_trigger",
	owner_column: "",
	acl_column: "",
	filter: "",
	shared: false,
};

pub const TYPE_CONVERSION: MetadataQueryParams = MetadataQueryParams {
	kind: "conversion",
	catalog: "pg_conversion",
	owner_column: "conowner",
	acl_column: "",
	filter: "",
	shared: false,
};

pub const TYPE_OPERATOR: MetadataQueryParams = MetadataQueryParams {
	kind: "operator",
	catalog: "pg_operator",
	owner_column: "oprowner",
	acl_column: "",
	filter: "",
	shared: false,
};

pub const TYPE_FOREIGN_DATA_WRAPPER: MetadataQueryParams = MetadataQueryParams {
	kind: "foreign data wrapper",
	catalog: "pg_foreign_data_wrapper",
	owner_column: "fdwowner",
	acl_column: "fdwacl",
	filter: "",
	shared: false,
};

pub const TYPE_FOREIGN_SERVER: MetadataQueryParams = MetadataQueryParams {
	kind: "foreign server",
	catalog: "pg_foreign_server",
	owner_column: "srvowner",
	acl_column: "srvacl",
	filter: "",
	shared: false,
};

/// Query owner, comment, ACL and (on servers that have them) security label
/// for every row of one catalog, producing the oid-keyed metadata map.
#[instrument(level = "debug", skip(pool), fields(kind = params.kind))]
pub async fn get_metadata_for_object_type(
	pool: &SlotPool,
	params: MetadataQueryParams,
) -> Result<MetadataMap, RunError> {
	let owner_expr = if params.owner_column.is_empty() {
		"''".into()
	} else {
		format!("pg_catalog.pg_get_userbyid(o.{})", params.owner_column)
	};
	let acl_expr = if params.acl_column.is_empty() {
		"''".into()
	} else {
		format!("coalesce(o.{}::text, '')", params.acl_column)
	};
	let comment_expr = if params.shared {
		format!(
			"coalesce(pg_catalog.shobj_description(o.oid, '{}'), '')",
			params.catalog
		)
	} else {
		format!(
			"coalesce(pg_catalog.obj_description(o.oid, '{}'), '')",
			params.catalog
		)
	};
	let filter = if params.filter.is_empty() {
		String::new()
	} else {
		format!("WHERE {}", params.filter)
	};

	let sql = format!(
		"SELECT o.oid, {owner_expr} AS owner, {comment_expr} AS comment, {acl_expr} AS acl
		FROM pg_catalog.{} o
		{filter}
		ORDER BY o.oid",
		params.catalog,
	);

	let context = format!("reading {} metadata", params.kind);
	let rows = super::query(pool, &context, &sql).await?;

	let mut map = MetadataMap::new();
	for row in &rows {
		let oid: u32 = row.get(0);
		map.insert(
			oid,
			ObjectMetadata {
				owner: row.get(1),
				comment: row.get(2),
				privileges: parse_acl_array(row.get(3)),
				..Default::default()
			},
		);
	}

	if !params.shared && pool.version.at_least(6) {
		let sql = format!(
			"SELECT l.objoid, l.provider, l.label
			FROM pg_catalog.pg_seclabel l
			JOIN pg_catalog.pg_class c ON l.classoid = c.oid
			WHERE c.relname = '{}' AND l.objsubid = 0",
			params.catalog,
		);
		for row in &super::query(pool, &context, &sql).await? {
			let oid: u32 = row.get(0);
			if let Some(meta) = map.get_mut(&oid) {
				meta.security_label_provider = row.get(1);
				meta.security_label = row.get(2);
			}
		}
	}

	Ok(map)
}

/// Parse the text form of an `aclitem[]` column,
/// e.g. `{alice=arwdDxt/owner,=r/owner}`.
pub fn parse_acl_array(text: String) -> Vec<Acl> {
	let inner = text.trim().trim_start_matches('{').trim_end_matches('}');
	if inner.is_empty() {
		return Vec::new();
	}
	split_array_items(inner)
		.iter()
		.filter_map(|item| parse_acl_item(item))
		.collect()
}

/// Split a Postgres array body on commas, honouring double-quoted items
/// (role names with special characters arrive quoted).
fn split_array_items(body: &str) -> Vec<String> {
	let mut items = Vec::new();
	let mut current = String::new();
	let mut quoted = false;
	let mut chars = body.chars();
	while let Some(c) = chars.next() {
		match c {
			'"' => quoted = !quoted,
			'\\' => {
				if let Some(escaped) = chars.next() {
					current.push(escaped);
				}
			}
			',' if !quoted => {
				items.push(std::mem::take(&mut current));
			}
			_ => current.push(c),
		}
	}
	if !current.is_empty() {
		items.push(current);
	}
	items
}

fn parse_acl_item(item: &str) -> Option<Acl> {
	let (grants, _grantor) = item.split_once('/')?;
	let (grantee, letters) = grants.split_once('=')?;

	let mut acl = Acl::new(grantee);
	let mut chars = letters.chars().peekable();
	while let Some(letter) = chars.next() {
		let with_grant = chars.peek() == Some(&'*');
		if with_grant {
			chars.next();
		}
		let (bit, grant_bit) = match letter {
			'r' => (&mut acl.select, &mut acl.select_with_grant),
			'a' => (&mut acl.insert, &mut acl.insert_with_grant),
			'w' => (&mut acl.update, &mut acl.update_with_grant),
			'd' => (&mut acl.delete, &mut acl.delete_with_grant),
			'D' => (&mut acl.truncate, &mut acl.truncate_with_grant),
			'x' => (&mut acl.references, &mut acl.references_with_grant),
			't' => (&mut acl.trigger, &mut acl.trigger_with_grant),
			'X' => (&mut acl.execute, &mut acl.execute_with_grant),
			'U' => (&mut acl.usage, &mut acl.usage_with_grant),
			'C' => (&mut acl.create, &mut acl.create_with_grant),
			'T' => (&mut acl.temporary, &mut acl.temporary_with_grant),
			'c' => (&mut acl.connect, &mut acl.connect_with_grant),
			_ => continue,
		};
		*bit = true;
		*grant_bit = with_grant;
	}
	Some(acl)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_table_acl_items() {
		let acls = parse_acl_array("{alice=arwdDxt/bob,=r/bob}".into());
		assert_eq!(acls.len(), 2);

		let alice = &acls[0];
		assert_eq!(alice.grantee, "alice");
		assert!(alice.select && alice.insert && alice.update && alice.delete);
		assert!(alice.truncate && alice.references && alice.trigger);
		assert!(!alice.select_with_grant);
		assert!(!alice.execute);

		let public = &acls[1];
		assert_eq!(public.grantee, "");
		assert!(public.select);
		assert!(!public.insert);
	}

	#[test]
	fn parses_with_grant_option() {
		let acls = parse_acl_array("{carol=r*w/owner}".into());
		assert_eq!(acls.len(), 1);
		assert!(acls[0].select && acls[0].select_with_grant);
		assert!(acls[0].update && !acls[0].update_with_grant);
	}

	#[test]
	fn handles_quoted_role_names() {
		let acls = parse_acl_array(r#"{"odd role"=X/owner}"#.into());
		assert_eq!(acls.len(), 1);
		assert_eq!(acls[0].grantee, "odd role");
		assert!(acls[0].execute);
	}

	#[test]
	fn empty_acl_is_default() {
		assert!(parse_acl_array("".into()).is_empty());
		assert!(parse_acl_array("{}".into()).is_empty());
	}

	#[test]
	fn merge_keeps_all_entries() {
		let a = MetadataMap::from([(1, ObjectMetadata {
			comment: "function".into(),
			..Default::default()
		})]);
		let b = MetadataMap::from([(2, ObjectMetadata {
			comment: "type".into(),
			..Default::default()
		})]);
		let c = MetadataMap::from([(3, ObjectMetadata {
			comment: "relation".into(),
			..Default::default()
		})]);

		let merged = merge_metadata_maps([a, b, c]);
		assert_eq!(merged.len(), 3);
		assert_eq!(merged[&2].comment, "type");
	}
}
