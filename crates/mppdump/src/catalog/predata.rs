use std::collections::BTreeMap;

use mppdump_postgres::SlotPool;
use tracing::instrument;

use super::{char_to_string, query, schema_filter_clause};
use crate::{
	depsort::{ObjectKind, Sortable},
	error::RunError,
	filters::FilterSet,
};

#[derive(Debug, Clone)]
pub struct Schema {
	pub oid: u32,
	pub name: String,
}

pub async fn get_schemas(pool: &SlotPool, filters: &FilterSet) -> Result<Vec<Schema>, RunError> {
	let sql = format!(
		"SELECT n.oid, quote_ident(n.nspname) AS name
		FROM pg_catalog.pg_namespace n
		WHERE {}
		ORDER BY n.nspname",
		schema_filter_clause(filters, "n.nspname"),
	);
	Ok(query(pool, "reading schemas", &sql)
		.await?
		.iter()
		.map(|row| Schema {
			oid: row.get(0),
			name: row.get(1),
		})
		.collect())
}

#[derive(Debug, Clone)]
pub struct Extension {
	pub oid: u32,
	pub name: String,
	pub schema: String,
}

pub async fn get_extensions(pool: &SlotPool) -> Result<Vec<Extension>, RunError> {
	let sql = "SELECT e.oid, quote_ident(e.extname) AS name, quote_ident(n.nspname) AS schema
		FROM pg_catalog.pg_extension e
		JOIN pg_catalog.pg_namespace n ON e.extnamespace = n.oid
		ORDER BY e.extname";
	Ok(query(pool, "reading extensions", sql)
		.await?
		.iter()
		.map(|row| Extension {
			oid: row.get(0),
			name: row.get(1),
			schema: row.get(2),
		})
		.collect())
}

#[derive(Debug, Clone)]
pub struct ProceduralLanguage {
	pub oid: u32,
	pub name: String,
	pub is_trusted: bool,
	pub handler_oid: u32,
	pub inline_oid: u32,
	pub validator_oid: u32,
}

pub async fn get_procedural_languages(
	pool: &SlotPool,
) -> Result<Vec<ProceduralLanguage>, RunError> {
	let inline_expr = if pool.version.at_least(5) {
		"l.laninline::pg_catalog.oid"
	} else {
		"0::pg_catalog.oid"
	};
	let sql = format!(
		"SELECT l.oid, quote_ident(l.lanname) AS name, l.lanpltrusted,
			l.lanplcallfoid::pg_catalog.oid AS handler, {inline_expr} AS inline,
			l.lanvalidator::pg_catalog.oid AS validator
		FROM pg_catalog.pg_language l
		WHERE l.lanispl
		ORDER BY l.lanname",
	);
	Ok(query(pool, "reading procedural languages", &sql)
		.await?
		.iter()
		.map(|row| ProceduralLanguage {
			oid: row.get(0),
			name: row.get(1),
			is_trusted: row.get(2),
			handler_oid: row.get(3),
			inline_oid: row.get(4),
			validator_oid: row.get(5),
		})
		.collect())
}

/// Minimal facts about every function in the database (system ones
/// included), used to resolve oid references from other catalogs into
/// callable names.
#[derive(Debug, Clone)]
pub struct FunctionInfo {
	pub qualified_name: String,
	pub arguments: String,
	pub is_internal: bool,
}

impl FunctionInfo {
	pub fn fqn(&self) -> String {
		format!("{}({})", self.qualified_name, self.arguments)
	}
}

pub async fn get_function_info_map(
	pool: &SlotPool,
) -> Result<BTreeMap<u32, FunctionInfo>, RunError> {
	let arguments_expr = if pool.version.at_least(5) {
		"pg_catalog.pg_get_function_arguments(p.oid)"
	} else {
		"pg_catalog.oidvectortypes(p.proargtypes)"
	};
	let sql = format!(
		"SELECT p.oid, quote_ident(n.nspname) || '.' || quote_ident(p.proname) AS name,
			{arguments_expr} AS arguments,
			n.nspname = 'pg_catalog' AS isinternal
		FROM pg_catalog.pg_proc p
		JOIN pg_catalog.pg_namespace n ON p.pronamespace = n.oid",
	);
	let mut map = BTreeMap::new();
	for row in &query(pool, "reading function name map", &sql).await? {
		let oid: u32 = row.get(0);
		map.insert(
			oid,
			FunctionInfo {
				qualified_name: row.get(1),
				arguments: row.get(2),
				is_internal: row.get(3),
			},
		);
	}
	Ok(map)
}

#[derive(Debug, Clone, Default)]
pub struct Function {
	pub oid: u32,
	pub schema: String,
	pub name: String,
	pub arguments: String,
	pub ident_args: String,
	pub result_type: String,
	pub function_body: String,
	pub binary_path: String,
	pub language: String,
	pub volatility: String,
	pub is_strict: bool,
	pub security_definer: bool,
	pub config: String,
	pub cost: f32,
	pub num_rows: f32,
	pub is_window: bool,
	pub depends_upon: Vec<String>,
}

impl Function {
	pub fn fqn(&self) -> String {
		format!("{}.{}({})", self.schema, self.name, self.arguments)
	}
}

impl Sortable for Function {
	fn fqn(&self) -> String {
		Function::fqn(self)
	}
	fn depends_upon(&self) -> &[String] {
		&self.depends_upon
	}
	fn kind(&self) -> ObjectKind {
		ObjectKind::Function
	}
}

/// Every user-defined function passing the schema filters, with language
/// handlers split out so they can be emitted next to their language.
#[instrument(level = "debug", skip(pool, filters, languages))]
pub async fn get_functions(
	pool: &SlotPool,
	filters: &FilterSet,
	languages: &[ProceduralLanguage],
) -> Result<(Vec<Function>, Vec<Function>), RunError> {
	let sql = if pool.version.at_least(5) {
		format!(
			"SELECT p.oid, quote_ident(n.nspname) AS schema, quote_ident(p.proname) AS name,
				pg_catalog.pg_get_function_arguments(p.oid) AS arguments,
				pg_catalog.pg_get_function_identity_arguments(p.oid) AS identargs,
				pg_catalog.pg_get_function_result(p.oid) AS resulttype,
				p.prosrc AS functionbody, coalesce(p.probin, '') AS binarypath,
				l.lanname AS language, p.provolatile, p.proisstrict, p.prosecdef,
				coalesce(pg_catalog.array_to_string(p.proconfig, ', '), '') AS config,
				p.procost, p.prorows, p.proiswindow
			FROM pg_catalog.pg_proc p
			JOIN pg_catalog.pg_namespace n ON p.pronamespace = n.oid
			JOIN pg_catalog.pg_language l ON p.prolang = l.oid
			WHERE NOT p.proisagg AND {}
			ORDER BY n.nspname, p.proname, identargs",
			schema_filter_clause(filters, "n.nspname"),
		)
	} else {
		format!(
			"SELECT p.oid, quote_ident(n.nspname) AS schema, quote_ident(p.proname) AS name,
				pg_catalog.oidvectortypes(p.proargtypes) AS arguments,
				pg_catalog.oidvectortypes(p.proargtypes) AS identargs,
				CASE WHEN p.proretset THEN 'SETOF ' ELSE '' END
					|| pg_catalog.format_type(p.prorettype, NULL) AS resulttype,
				p.prosrc AS functionbody, coalesce(p.probin, '') AS binarypath,
				l.lanname AS language, p.provolatile, p.proisstrict, p.prosecdef,
				'' AS config, 100::real AS procost, 0::real AS prorows, false AS proiswindow
			FROM pg_catalog.pg_proc p
			JOIN pg_catalog.pg_namespace n ON p.pronamespace = n.oid
			JOIN pg_catalog.pg_language l ON p.prolang = l.oid
			WHERE NOT p.proisagg AND {}
			ORDER BY n.nspname, p.proname, identargs",
			schema_filter_clause(filters, "n.nspname"),
		)
	};

	let mut functions = Vec::new();
	for row in &query(pool, "reading functions", &sql).await? {
		functions.push(Function {
			oid: row.get(0),
			schema: row.get(1),
			name: row.get(2),
			arguments: row.get(3),
			ident_args: row.get(4),
			result_type: row.get(5),
			function_body: row.get(6),
			binary_path: row.get(7),
			language: row.get(8),
			volatility: char_to_string(row.get(9)),
			is_strict: row.get(10),
			security_definer: row.get(11),
			config: row.get(12),
			cost: row.get(13),
			num_rows: row.get(14),
			is_window: row.get(15),
			depends_upon: Vec::new(),
		});
	}

	// Language handler functions are pulled out of the general sequence and
	// emitted immediately before their owning language.
	let handler_oids: Vec<u32> = languages
		.iter()
		.flat_map(|lang| [lang.handler_oid, lang.inline_oid, lang.validator_oid])
		.filter(|&oid| oid != 0)
		.collect();
	let (lang_funcs, other_funcs) = functions
		.into_iter()
		.partition(|f| handler_oids.contains(&f.oid));
	Ok((lang_funcs, other_funcs))
}

/// Discriminates the flavours of `CREATE TYPE` (and `CREATE DOMAIN`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
	Base,
	Shell,
	Composite,
	Domain,
	Enum,
}

#[derive(Debug, Clone)]
pub struct Type {
	pub oid: u32,
	pub schema: String,
	pub name: String,
	pub kind: TypeKind,
	// base type properties
	pub input: String,
	pub output: String,
	pub receive: String,
	pub send: String,
	pub internal_length: i16,
	pub is_passed_by_value: bool,
	pub alignment: String,
	pub storage: String,
	pub default_val: String,
	// composite attributes as (name, type)
	pub attributes: Vec<(String, String)>,
	// enum labels in declaration order
	pub enum_labels: Vec<String>,
	// domain properties
	pub base_type: String,
	pub not_null: bool,
	pub depends_upon: Vec<String>,
}

impl Type {
	fn empty(oid: u32, schema: String, name: String, kind: TypeKind) -> Self {
		Self {
			oid,
			schema,
			name,
			kind,
			input: String::new(),
			output: String::new(),
			receive: String::new(),
			send: String::new(),
			internal_length: -1,
			is_passed_by_value: false,
			alignment: String::new(),
			storage: String::new(),
			default_val: String::new(),
			attributes: Vec::new(),
			enum_labels: Vec::new(),
			base_type: String::new(),
			not_null: false,
			depends_upon: Vec::new(),
		}
	}

	pub fn fqn(&self) -> String {
		format!("{}.{}", self.schema, self.name)
	}
}

impl Sortable for Type {
	fn fqn(&self) -> String {
		Type::fqn(self)
	}
	fn depends_upon(&self) -> &[String] {
		&self.depends_upon
	}
	fn kind(&self) -> ObjectKind {
		ObjectKind::Type
	}
}

/// All user-defined types: base (with their shells), standalone composites,
/// domains, and enums on servers that have them. Ordered by schema then name
/// within each flavour.
#[instrument(level = "debug", skip(pool, filters))]
pub async fn get_types(pool: &SlotPool, filters: &FilterSet) -> Result<Vec<Type>, RunError> {
	let schema_filter = schema_filter_clause(filters, "n.nspname");
	let mut types = Vec::new();

	let base_sql = format!(
		"SELECT t.oid, quote_ident(n.nspname) AS schema, quote_ident(t.typname) AS name,
			t.typisdefined,
			t.typinput::pg_catalog.regproc::pg_catalog.text AS input,
			t.typoutput::pg_catalog.regproc::pg_catalog.text AS output,
			CASE WHEN t.typreceive = 0 THEN ''
				ELSE t.typreceive::pg_catalog.regproc::pg_catalog.text END AS receive,
			CASE WHEN t.typsend = 0 THEN ''
				ELSE t.typsend::pg_catalog.regproc::pg_catalog.text END AS send,
			t.typlen, t.typbyval, t.typalign, t.typstorage,
			coalesce(t.typdefault, '') AS defaultval
		FROM pg_catalog.pg_type t
		JOIN pg_catalog.pg_namespace n ON t.typnamespace = n.oid
		WHERE t.typtype = 'b' AND t.typelem = 0 AND t.typrelid = 0
			AND t.typname NOT LIKE E'\\\\_%' AND {schema_filter}
		ORDER BY n.nspname, t.typname",
	);
	for row in &query(pool, "reading base types", &base_sql).await? {
		let is_defined: bool = row.get(3);
		let kind = if is_defined {
			TypeKind::Base
		} else {
			TypeKind::Shell
		};
		let mut t = Type::empty(row.get(0), row.get(1), row.get(2), kind);
		t.input = row.get(4);
		t.output = row.get(5);
		t.receive = row.get(6);
		t.send = row.get(7);
		t.internal_length = row.get(8);
		t.is_passed_by_value = row.get(9);
		t.alignment = char_to_string(row.get(10));
		t.storage = char_to_string(row.get(11));
		t.default_val = row.get(12);
		types.push(t);
	}

	let composite_sql = format!(
		"SELECT t.oid, quote_ident(n.nspname) AS schema, quote_ident(t.typname) AS name,
			t.typrelid
		FROM pg_catalog.pg_type t
		JOIN pg_catalog.pg_namespace n ON t.typnamespace = n.oid
		JOIN pg_catalog.pg_class c ON t.typrelid = c.oid
		WHERE t.typtype = 'c' AND c.relkind = 'c' AND {schema_filter}
		ORDER BY n.nspname, t.typname",
	);
	let composite_rows = query(pool, "reading composite types", &composite_sql).await?;
	for row in &composite_rows {
		let mut t = Type::empty(row.get(0), row.get(1), row.get(2), TypeKind::Composite);
		let relid: u32 = row.get(3);
		let attr_sql = format!(
			"SELECT quote_ident(a.attname) AS name,
				pg_catalog.format_type(a.atttypid, a.atttypmod) AS type
			FROM pg_catalog.pg_attribute a
			WHERE a.attrelid = {relid} AND a.attnum > 0 AND NOT a.attisdropped
			ORDER BY a.attnum",
		);
		for attr in &query(pool, "reading composite type attributes", &attr_sql).await? {
			t.attributes.push((attr.get(0), attr.get(1)));
		}
		types.push(t);
	}

	let domain_sql = format!(
		"SELECT t.oid, quote_ident(n.nspname) AS schema, quote_ident(t.typname) AS name,
			pg_catalog.format_type(t.typbasetype, t.typtypmod) AS basetype,
			t.typnotnull, coalesce(t.typdefault, '') AS defaultval
		FROM pg_catalog.pg_type t
		JOIN pg_catalog.pg_namespace n ON t.typnamespace = n.oid
		WHERE t.typtype = 'd' AND {schema_filter}
		ORDER BY n.nspname, t.typname",
	);
	for row in &query(pool, "reading domains", &domain_sql).await? {
		let mut t = Type::empty(row.get(0), row.get(1), row.get(2), TypeKind::Domain);
		t.base_type = row.get(3);
		t.not_null = row.get(4);
		t.default_val = row.get(5);
		types.push(t);
	}

	if pool.version.at_least(5) {
		let enum_sql = format!(
			"SELECT t.oid, quote_ident(n.nspname) AS schema, quote_ident(t.typname) AS name
			FROM pg_catalog.pg_type t
			JOIN pg_catalog.pg_namespace n ON t.typnamespace = n.oid
			WHERE t.typtype = 'e' AND {schema_filter}
			ORDER BY n.nspname, t.typname",
		);
		let mut has_enums = false;
		for row in &query(pool, "reading enum types", &enum_sql).await? {
			types.push(Type::empty(row.get(0), row.get(1), row.get(2), TypeKind::Enum));
			has_enums = true;
		}
		if has_enums {
			let labels_sql = "SELECT e.enumtypid, e.enumlabel
				FROM pg_catalog.pg_enum e
				ORDER BY e.enumtypid, e.oid";
			for row in &query(pool, "reading enum labels", labels_sql).await? {
				let type_oid: u32 = row.get(0);
				if let Some(t) = types.iter_mut().find(|t| t.oid == type_oid) {
					t.enum_labels.push(row.get(1));
				}
			}
		}
	}

	Ok(types)
}

#[derive(Debug, Clone)]
pub struct Sequence {
	pub relation: super::Relation,
	pub last_value: i64,
	pub increment_by: i64,
	pub max_value: i64,
	pub min_value: i64,
	pub cache_value: i64,
	pub is_cycled: bool,
	pub is_called: bool,
}

impl Sequence {
	pub fn fqn(&self) -> String {
		self.relation.fqn()
	}
}

/// Sequences in filtered schemas, with their current state read straight
/// from each sequence relation (the catalog has no row for it pre-10).
#[instrument(level = "debug", skip(pool, filters))]
pub async fn get_sequences(pool: &SlotPool, filters: &FilterSet) -> Result<Vec<Sequence>, RunError> {
	let list_sql = format!(
		"SELECT n.oid AS schemaoid, c.oid, quote_ident(n.nspname) AS schema,
			quote_ident(c.relname) AS name
		FROM pg_catalog.pg_class c
		JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
		WHERE c.relkind = 'S' AND {}
		ORDER BY n.nspname, c.relname",
		schema_filter_clause(filters, "n.nspname"),
	);
	let mut sequences = Vec::new();
	for row in &query(pool, "reading sequences", &list_sql).await? {
		let relation = super::Relation {
			schema_oid: row.get(0),
			oid: row.get(1),
			schema: row.get(2),
			name: row.get(3),
			depends_upon: Vec::new(),
		};
		let state_sql = format!(
			"SELECT last_value, increment_by, max_value, min_value, cache_value,
				is_cycled, is_called
			FROM {}",
			relation.fqn(),
		);
		let state = query(pool, "reading sequence state", &state_sql).await?;
		let state = &state[0];
		sequences.push(Sequence {
			relation,
			last_value: state.get(0),
			increment_by: state.get(1),
			max_value: state.get(2),
			min_value: state.get(3),
			cache_value: state.get(4),
			is_cycled: state.get(5),
			is_called: state.get(6),
		});
	}
	Ok(sequences)
}

/// Map of sequence oid to the `schema.table.column` that owns it, for the
/// `ALTER SEQUENCE ... OWNED BY` statements that follow table creation.
pub async fn get_sequence_owners(pool: &SlotPool) -> Result<BTreeMap<u32, String>, RunError> {
	let sql = "SELECT d.objid::pg_catalog.oid AS seqoid,
			quote_ident(n.nspname) || '.' || quote_ident(c.relname)
				|| '.' || quote_ident(a.attname) AS owner
		FROM pg_catalog.pg_depend d
		JOIN pg_catalog.pg_class c ON d.refobjid = c.oid
		JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
		JOIN pg_catalog.pg_attribute a
			ON a.attrelid = c.oid AND a.attnum = d.refobjsubid
		WHERE d.classid = 'pg_catalog.pg_class'::pg_catalog.regclass
			AND d.deptype = 'a' AND d.refobjsubid > 0";
	let mut owners = BTreeMap::new();
	for row in &query(pool, "reading sequence ownership", sql).await? {
		let oid: u32 = row.get(0);
		owners.insert(oid, row.get(1));
	}
	Ok(owners)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
	Check,
	Foreign,
	Primary,
	Unique,
}

#[derive(Debug, Clone)]
pub struct Constraint {
	pub oid: u32,
	pub name: String,
	pub kind: ConstraintKind,
	pub definition: String,
	pub owning_object: String,
	pub is_domain_constraint: bool,
	pub is_partition_parent: bool,
}

/// Table and domain constraints. With `tables` given, only constraints on
/// those relations are returned (the include-table fast path).
#[instrument(level = "debug", skip(pool, filters, tables))]
pub async fn get_constraints(
	pool: &SlotPool,
	filters: &FilterSet,
	tables: Option<&[super::Relation]>,
) -> Result<Vec<Constraint>, RunError> {
	let scope = match tables {
		Some(tables) if !tables.is_empty() => format!(
			"con.conrelid IN ({})",
			tables
				.iter()
				.map(|t| t.oid.to_string())
				.collect::<Vec<_>>()
				.join(", "),
		),
		Some(_) => "false".into(),
		None => format!(
			"((con.conrelid != 0 AND {}) OR (con.contypid != 0 AND {}))",
			schema_filter_clause(filters, "n.nspname"),
			schema_filter_clause(filters, "tn.nspname"),
		),
	};

	let sql = format!(
		"SELECT con.oid, quote_ident(con.conname) AS name, con.contype,
			pg_catalog.pg_get_constraintdef(con.oid, true) AS definition,
			CASE WHEN con.conrelid != 0
				THEN quote_ident(n.nspname) || '.' || quote_ident(c.relname)
				ELSE quote_ident(tn.nspname) || '.' || quote_ident(t.typname)
			END AS owningobject,
			con.contypid != 0 AS isdomainconstraint,
			EXISTS (SELECT 1 FROM pg_catalog.pg_partition p
				WHERE p.parrelid = con.conrelid) AS ispartitionparent
		FROM pg_catalog.pg_constraint con
		LEFT JOIN pg_catalog.pg_class c ON con.conrelid = c.oid
		LEFT JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
		LEFT JOIN pg_catalog.pg_type t ON con.contypid = t.oid
		LEFT JOIN pg_catalog.pg_namespace tn ON t.typnamespace = tn.oid
		WHERE {scope}
			AND NOT EXISTS (SELECT 1 FROM pg_catalog.pg_partition_rule r
				WHERE r.parchildrelid = con.conrelid)
		ORDER BY con.conname",
	);

	Ok(query(pool, "reading constraints", &sql)
		.await?
		.iter()
		.map(|row| Constraint {
			oid: row.get(0),
			name: row.get(1),
			kind: match row.get::<_, i8>(2) as u8 {
				b'f' => ConstraintKind::Foreign,
				b'p' => ConstraintKind::Primary,
				b'u' => ConstraintKind::Unique,
				_ => ConstraintKind::Check,
			},
			definition: row.get(3),
			owning_object: row.get(4),
			is_domain_constraint: row.get(5),
			is_partition_parent: row.get(6),
		})
		.collect())
}

#[derive(Debug, Clone)]
pub struct View {
	pub oid: u32,
	pub schema: String,
	pub name: String,
	pub definition: String,
	pub depends_upon: Vec<String>,
}

impl View {
	pub fn fqn(&self) -> String {
		format!("{}.{}", self.schema, self.name)
	}
}

impl Sortable for View {
	fn fqn(&self) -> String {
		View::fqn(self)
	}
	fn depends_upon(&self) -> &[String] {
		&self.depends_upon
	}
	fn kind(&self) -> ObjectKind {
		ObjectKind::View
	}
}

pub async fn get_views(pool: &SlotPool, filters: &FilterSet) -> Result<Vec<View>, RunError> {
	let sql = format!(
		"SELECT c.oid, quote_ident(n.nspname) AS schema, quote_ident(c.relname) AS name,
			pg_catalog.pg_get_viewdef(c.oid) AS definition
		FROM pg_catalog.pg_class c
		JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
		WHERE c.relkind = 'v' AND {}
		ORDER BY n.nspname, c.relname",
		schema_filter_clause(filters, "n.nspname"),
	);
	Ok(query(pool, "reading views", &sql)
		.await?
		.iter()
		.map(|row| View {
			oid: row.get(0),
			schema: row.get(1),
			name: row.get(2),
			definition: row.get(3),
			depends_upon: Vec::new(),
		})
		.collect())
}

#[derive(Debug, Clone)]
pub struct Operator {
	pub oid: u32,
	pub schema: String,
	pub name: String,
	pub procedure: String,
	pub left_arg: String,
	pub right_arg: String,
	pub commutator: String,
	pub negator: String,
	pub restrict_fn: String,
	pub join_fn: String,
	pub can_hash: bool,
	pub can_merge: bool,
}

pub async fn get_operators(pool: &SlotPool, filters: &FilterSet) -> Result<Vec<Operator>, RunError> {
	let merge_expr = if pool.version.at_least(5) {
		"o.oprcanmerge"
	} else {
		"o.oprlsortop != 0"
	};
	let sql = format!(
		"SELECT o.oid, quote_ident(n.nspname) AS schema, o.oprname AS name,
			o.oprcode::pg_catalog.regproc::pg_catalog.text AS procedure,
			CASE WHEN o.oprleft = 0 THEN ''
				ELSE pg_catalog.format_type(o.oprleft, NULL) END AS leftarg,
			CASE WHEN o.oprright = 0 THEN ''
				ELSE pg_catalog.format_type(o.oprright, NULL) END AS rightarg,
			CASE WHEN o.oprcom = 0 THEN ''
				ELSE (SELECT oprname FROM pg_catalog.pg_operator WHERE oid = o.oprcom)
			END AS commutator,
			CASE WHEN o.oprnegate = 0 THEN ''
				ELSE (SELECT oprname FROM pg_catalog.pg_operator WHERE oid = o.oprnegate)
			END AS negator,
			CASE WHEN o.oprrest = 0 THEN ''
				ELSE o.oprrest::pg_catalog.regproc::pg_catalog.text END AS restrictfn,
			CASE WHEN o.oprjoin = 0 THEN ''
				ELSE o.oprjoin::pg_catalog.regproc::pg_catalog.text END AS joinfn,
			o.oprcanhash, {merge_expr} AS canmerge
		FROM pg_catalog.pg_operator o
		JOIN pg_catalog.pg_namespace n ON o.oprnamespace = n.oid
		WHERE o.oprcode != 0 AND {}
		ORDER BY n.nspname, o.oprname",
		schema_filter_clause(filters, "n.nspname"),
	);
	Ok(query(pool, "reading operators", &sql)
		.await?
		.iter()
		.map(|row| Operator {
			oid: row.get(0),
			schema: row.get(1),
			name: row.get(2),
			procedure: row.get(3),
			left_arg: row.get(4),
			right_arg: row.get(5),
			commutator: row.get(6),
			negator: row.get(7),
			restrict_fn: row.get(8),
			join_fn: row.get(9),
			can_hash: row.get(10),
			can_merge: row.get(11),
		})
		.collect())
}

#[derive(Debug, Clone)]
pub struct OperatorFamily {
	pub oid: u32,
	pub schema: String,
	pub name: String,
	pub index_method: String,
}

pub async fn get_operator_families(
	pool: &SlotPool,
	filters: &FilterSet,
) -> Result<Vec<OperatorFamily>, RunError> {
	let sql = format!(
		"SELECT f.oid, quote_ident(n.nspname) AS schema, quote_ident(f.opfname) AS name,
			am.amname AS indexmethod
		FROM pg_catalog.pg_opfamily f
		JOIN pg_catalog.pg_namespace n ON f.opfnamespace = n.oid
		JOIN pg_catalog.pg_am am ON f.opfmethod = am.oid
		WHERE {}
		ORDER BY n.nspname, f.opfname",
		schema_filter_clause(filters, "n.nspname"),
	);
	Ok(query(pool, "reading operator families", &sql)
		.await?
		.iter()
		.map(|row| OperatorFamily {
			oid: row.get(0),
			schema: row.get(1),
			name: row.get(2),
			index_method: row.get(3),
		})
		.collect())
}

#[derive(Debug, Clone)]
pub struct Cast {
	pub oid: u32,
	pub source_type: String,
	pub target_type: String,
	pub function_oid: u32,
	pub context: String,
	pub method: String,
}

pub async fn get_casts(pool: &SlotPool) -> Result<Vec<Cast>, RunError> {
	let method_expr = if pool.version.at_least(6) {
		"c.castmethod::pg_catalog.text"
	} else {
		"CASE WHEN c.castfunc = 0 THEN 'b' ELSE 'f' END"
	};
	// user-defined casts only: the oid space below 16384 is reserved
	let sql = format!(
		"SELECT c.oid,
			pg_catalog.format_type(c.castsource, NULL) AS sourcetype,
			pg_catalog.format_type(c.casttarget, NULL) AS targettype,
			c.castfunc::pg_catalog.oid AS functionoid,
			c.castcontext, {method_expr} AS castmethod
		FROM pg_catalog.pg_cast c
		WHERE c.oid >= 16384
		ORDER BY sourcetype, targettype",
	);
	Ok(query(pool, "reading casts", &sql)
		.await?
		.iter()
		.map(|row| Cast {
			oid: row.get(0),
			source_type: row.get(1),
			target_type: row.get(2),
			function_oid: row.get(3),
			context: char_to_string(row.get(4)),
			method: row.get(5),
		})
		.collect())
}

#[derive(Debug, Clone)]
pub struct Aggregate {
	pub oid: u32,
	pub schema: String,
	pub name: String,
	pub arguments: String,
	pub transition_fn_oid: u32,
	pub prelim_fn_oid: u32,
	pub final_fn_oid: u32,
	pub sort_operator: String,
	pub transition_data_type: String,
	pub initial_value: String,
}

impl Aggregate {
	pub fn fqn(&self) -> String {
		format!("{}.{}({})", self.schema, self.name, self.arguments)
	}
}

pub async fn get_aggregates(
	pool: &SlotPool,
	filters: &FilterSet,
) -> Result<Vec<Aggregate>, RunError> {
	let arguments_expr = if pool.version.at_least(5) {
		"pg_catalog.pg_get_function_arguments(p.oid)"
	} else {
		"pg_catalog.oidvectortypes(p.proargtypes)"
	};
	// the two-phase combine function was renamed upstream of 6
	let prelim_expr = if pool.version.at_least(6) {
		"a.aggcombinefn::pg_catalog.oid"
	} else {
		"a.aggprelimfn::pg_catalog.oid"
	};
	let sql = format!(
		"SELECT p.oid, quote_ident(n.nspname) AS schema, quote_ident(p.proname) AS name,
			{arguments_expr} AS arguments,
			a.aggtransfn::pg_catalog.oid AS transitionfn,
			{prelim_expr} AS prelimfn,
			a.aggfinalfn::pg_catalog.oid AS finalfn,
			CASE WHEN a.aggsortop = 0 THEN ''
				ELSE (SELECT oprname FROM pg_catalog.pg_operator WHERE oid = a.aggsortop)
			END AS sortoperator,
			pg_catalog.format_type(a.aggtranstype, NULL) AS transitiondatatype,
			coalesce(a.agginitval, '') AS initialvalue
		FROM pg_catalog.pg_aggregate a
		JOIN pg_catalog.pg_proc p ON a.aggfnoid = p.oid
		JOIN pg_catalog.pg_namespace n ON p.pronamespace = n.oid
		WHERE {}
		ORDER BY n.nspname, p.proname",
		schema_filter_clause(filters, "n.nspname"),
	);
	Ok(query(pool, "reading aggregates", &sql)
		.await?
		.iter()
		.map(|row| Aggregate {
			oid: row.get(0),
			schema: row.get(1),
			name: row.get(2),
			arguments: row.get(3),
			transition_fn_oid: row.get(4),
			prelim_fn_oid: row.get(5),
			final_fn_oid: row.get(6),
			sort_operator: row.get(7),
			transition_data_type: row.get(8),
			initial_value: row.get(9),
		})
		.collect())
}

#[derive(Debug, Clone)]
pub struct Conversion {
	pub oid: u32,
	pub schema: String,
	pub name: String,
	pub for_encoding: String,
	pub to_encoding: String,
	pub function_oid: u32,
	pub is_default: bool,
}

pub async fn get_conversions(
	pool: &SlotPool,
	filters: &FilterSet,
) -> Result<Vec<Conversion>, RunError> {
	let sql = format!(
		"SELECT c.oid, quote_ident(n.nspname) AS schema, quote_ident(c.conname) AS name,
			pg_catalog.pg_encoding_to_char(c.conforencoding) AS forencoding,
			pg_catalog.pg_encoding_to_char(c.contoencoding) AS toencoding,
			c.conproc::pg_catalog.oid AS functionoid, c.condefault
		FROM pg_catalog.pg_conversion c
		JOIN pg_catalog.pg_namespace n ON c.connamespace = n.oid
		WHERE {}
		ORDER BY n.nspname, c.conname",
		schema_filter_clause(filters, "n.nspname"),
	);
	Ok(query(pool, "reading conversions", &sql)
		.await?
		.iter()
		.map(|row| Conversion {
			oid: row.get(0),
			schema: row.get(1),
			name: row.get(2),
			for_encoding: row.get(3),
			to_encoding: row.get(4),
			function_oid: row.get(5),
			is_default: row.get(6),
		})
		.collect())
}

/// A trusted/untrusted external table protocol.
#[derive(Debug, Clone)]
pub struct ExternalProtocol {
	pub oid: u32,
	pub name: String,
	pub trusted: bool,
	pub read_fn_oid: u32,
	pub write_fn_oid: u32,
	pub validator_oid: u32,
	pub depends_upon: Vec<String>,
}

impl Sortable for ExternalProtocol {
	fn fqn(&self) -> String {
		self.name.clone()
	}
	fn depends_upon(&self) -> &[String] {
		&self.depends_upon
	}
	fn kind(&self) -> ObjectKind {
		ObjectKind::Protocol
	}
}

pub async fn get_external_protocols(
	pool: &SlotPool,
) -> Result<Vec<ExternalProtocol>, RunError> {
	let sql = "SELECT p.oid, quote_ident(p.ptcname) AS name, p.ptctrusted,
			p.ptcreadfn::pg_catalog.oid AS readfn,
			p.ptcwritefn::pg_catalog.oid AS writefn,
			p.ptcvalidatorfn::pg_catalog.oid AS validatorfn
		FROM pg_catalog.pg_extprotocol p
		ORDER BY p.ptcname";
	Ok(query(pool, "reading external protocols", sql)
		.await?
		.iter()
		.map(|row| ExternalProtocol {
			oid: row.get(0),
			name: row.get(1),
			trusted: row.get(2),
			read_fn_oid: row.get(3),
			write_fn_oid: row.get(4),
			validator_oid: row.get(5),
			depends_upon: Vec::new(),
		})
		.collect())
}

#[derive(Debug, Clone)]
pub struct ForeignDataWrapper {
	pub oid: u32,
	pub name: String,
	pub handler_oid: u32,
	pub validator_oid: u32,
	pub options: String,
}

pub async fn get_foreign_data_wrappers(
	pool: &SlotPool,
) -> Result<Vec<ForeignDataWrapper>, RunError> {
	let sql = "SELECT w.oid, quote_ident(w.fdwname) AS name,
			w.fdwhandler::pg_catalog.oid AS handler,
			w.fdwvalidator::pg_catalog.oid AS validator,
			coalesce(pg_catalog.array_to_string(w.fdwoptions, ', '), '') AS options
		FROM pg_catalog.pg_foreign_data_wrapper w
		ORDER BY w.fdwname";
	Ok(query(pool, "reading foreign data wrappers", sql)
		.await?
		.iter()
		.map(|row| ForeignDataWrapper {
			oid: row.get(0),
			name: row.get(1),
			handler_oid: row.get(2),
			validator_oid: row.get(3),
			options: row.get(4),
		})
		.collect())
}

#[derive(Debug, Clone)]
pub struct ForeignServer {
	pub oid: u32,
	pub name: String,
	pub server_type: String,
	pub server_version: String,
	pub foreign_data_wrapper: String,
	pub options: String,
}

pub async fn get_foreign_servers(pool: &SlotPool) -> Result<Vec<ForeignServer>, RunError> {
	let sql = "SELECT s.oid, quote_ident(s.srvname) AS name,
			coalesce(s.srvtype, '') AS type, coalesce(s.srvversion, '') AS version,
			quote_ident(w.fdwname) AS fdw,
			coalesce(pg_catalog.array_to_string(s.srvoptions, ', '), '') AS options
		FROM pg_catalog.pg_foreign_server s
		JOIN pg_catalog.pg_foreign_data_wrapper w ON s.srvfdw = w.oid
		ORDER BY s.srvname";
	Ok(query(pool, "reading foreign servers", sql)
		.await?
		.iter()
		.map(|row| ForeignServer {
			oid: row.get(0),
			name: row.get(1),
			server_type: row.get(2),
			server_version: row.get(3),
			foreign_data_wrapper: row.get(4),
			options: row.get(5),
		})
		.collect())
}

#[derive(Debug, Clone)]
pub struct UserMapping {
	pub oid: u32,
	pub user: String,
	pub server: String,
	pub options: String,
}

pub async fn get_user_mappings(pool: &SlotPool) -> Result<Vec<UserMapping>, RunError> {
	let sql = "SELECT um.oid,
			CASE WHEN um.umuser = 0 THEN 'PUBLIC'
				ELSE quote_ident(a.rolname) END AS username,
			quote_ident(s.srvname) AS server,
			coalesce(pg_catalog.array_to_string(um.umoptions, ', '), '') AS options
		FROM pg_catalog.pg_user_mapping um
		LEFT JOIN pg_catalog.pg_authid a ON um.umuser = a.oid
		JOIN pg_catalog.pg_foreign_server s ON um.umserver = s.oid
		ORDER BY username, server";
	Ok(query(pool, "reading user mappings", sql)
		.await?
		.iter()
		.map(|row| UserMapping {
			oid: row.get(0),
			user: row.get(1),
			server: row.get(2),
			options: row.get(3),
		})
		.collect())
}

/// Read the database's quoted identity for the report: the catalog's own
/// `quote_ident` result, not the raw flag value.
pub async fn get_quoted_database_name(pool: &SlotPool) -> Result<String, RunError> {
	super::select_string(
		pool,
		"reading database name",
		"SELECT quote_ident(datname) FROM pg_catalog.pg_database WHERE datname = current_database()",
	)
	.await
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn function_fqn_carries_arguments() {
		let f = Function {
			schema: "public".into(),
			name: "add".into(),
			arguments: "integer, integer".into(),
			..Default::default()
		};
		assert_eq!(f.fqn(), "public.add(integer, integer)");
	}

	#[test]
	fn function_info_fqn_matches_function_fqn_shape() {
		let info = FunctionInfo {
			qualified_name: "public.add".into(),
			arguments: "integer, integer".into(),
			is_internal: false,
		};
		assert_eq!(info.fqn(), "public.add(integer, integer)");
	}
}
