use std::{collections::BTreeMap, fmt::Write as _, io::Write};

use crate::{
	catalog::{
		MetadataMap,
		predata::{
			Aggregate, Cast, Constraint, Conversion, ExternalProtocol, ForeignDataWrapper,
			ForeignServer, Function, FunctionInfo, OperatorFamily, Operator, ProceduralLanguage,
			Type, TypeKind, UserMapping,
		},
		quote_literal,
		relations::{Relation, TableDefinition},
	},
	ddl::{
		Emitter,
		globals::comment_only,
		metadata::{
			CLASS_AGGREGATE, CLASS_CONVERSION, CLASS_DOMAIN, CLASS_FOREIGN_DATA_WRAPPER,
			CLASS_FOREIGN_SERVER, CLASS_FUNCTION, CLASS_LANGUAGE, CLASS_OPERATOR,
			CLASS_OPERATOR_FAMILY, CLASS_PROTOCOL, CLASS_TYPE, metadata_trailer,
		},
		relations::table_sql,
	},
	depsort::{ObjectKind, Sortable, topological_sort},
	error::RunError,
	toc::Section,
};

/// The three predata classes whose dependencies cross class boundaries.
/// They are merged into one sequence and sorted once globally; emitting
/// them in separate passes would break, say, a table whose column type is a
/// user-defined composite.
#[derive(Debug, Clone)]
pub enum PredataObject {
	Function(Function),
	Type(Type),
	Table(Relation),
}

impl Sortable for PredataObject {
	fn fqn(&self) -> String {
		match self {
			Self::Function(f) => f.fqn(),
			Self::Type(t) => t.fqn(),
			Self::Table(r) => r.fqn(),
		}
	}
	fn depends_upon(&self) -> &[String] {
		match self {
			Self::Function(f) => &f.depends_upon,
			Self::Type(t) => &t.depends_upon,
			Self::Table(r) => &r.depends_upon,
		}
	}
	fn kind(&self) -> ObjectKind {
		match self {
			Self::Function(_) => ObjectKind::Function,
			Self::Type(_) => ObjectKind::Type,
			Self::Table(_) => ObjectKind::Table,
		}
	}
}

/// Merge functions, full types (shells and enums are emitted beforehand)
/// and tables into a single dependency-ordered sequence.
pub fn sort_functions_types_and_tables(
	functions: Vec<Function>,
	types: Vec<Type>,
	tables: Vec<Relation>,
) -> Result<Vec<PredataObject>, RunError> {
	let mut objects: Vec<PredataObject> = functions
		.into_iter()
		.map(PredataObject::Function)
		.chain(
			types
				.into_iter()
				.filter(|t| {
					matches!(
						t.kind,
						TypeKind::Base | TypeKind::Composite | TypeKind::Domain
					)
				})
				.map(PredataObject::Type),
		)
		.chain(tables.into_iter().map(PredataObject::Table))
		.collect();

	// Dependencies on objects outside this sequence (enums, sequences,
	// system types) are already satisfied by earlier passes; drop them so
	// the sort only orders what it emits.
	let members: std::collections::BTreeSet<String> =
		objects.iter().map(Sortable::fqn).collect();
	for object in &mut objects {
		let deps = match object {
			PredataObject::Function(f) => &mut f.depends_upon,
			PredataObject::Type(t) => &mut t.depends_upon,
			PredataObject::Table(r) => &mut r.depends_upon,
		};
		deps.retain(|dep| members.contains(dep));
	}

	topological_sort(objects)
}

/// Everything the interleaved emission pass needs to render any of the
/// three object classes.
pub struct PredataContext<'a> {
	pub function_metadata: &'a MetadataMap,
	pub type_metadata: &'a MetadataMap,
	pub relation_metadata: &'a MetadataMap,
	pub table_defs: &'a BTreeMap<u32, TableDefinition>,
	pub constraints: &'a [Constraint],
}

pub fn write_sorted_predata_objects<W: Write>(
	emitter: &mut Emitter<'_, W>,
	sorted: &[PredataObject],
	ctx: &PredataContext<'_>,
) -> Result<(), RunError> {
	for object in sorted {
		match object {
			PredataObject::Function(f) => write_function(emitter, f, ctx.function_metadata)?,
			PredataObject::Type(t) => write_full_type(emitter, t, ctx)?,
			PredataObject::Table(r) => {
				let Some(def) = ctx.table_defs.get(&r.oid) else {
					continue;
				};
				let mut sql = table_sql(r, def);
				if let Some(meta) = ctx.relation_metadata.get(&r.oid) {
					sql.push_str(&metadata_trailer(
						meta,
						&crate::ddl::metadata::CLASS_TABLE,
						&r.fqn(),
					));
				}
				emitter.emit(Section::Predata, &r.schema, &r.name, "TABLE", "", &sql)?;
			}
		}
	}
	Ok(())
}

/// Shell types come first in predata so that mutually recursive I/O
/// functions can name their base types before those are fully defined.
pub fn write_shell_types<W: Write>(
	emitter: &mut Emitter<'_, W>,
	types: &[Type],
) -> Result<(), RunError> {
	for t in types {
		if matches!(t.kind, TypeKind::Base | TypeKind::Shell) {
			let sql = format!("CREATE TYPE {};", t.fqn());
			emitter.emit(Section::Predata, &t.schema, &t.name, "TYPE", "", &sql)?;
		}
	}
	Ok(())
}

pub fn write_enum_types<W: Write>(
	emitter: &mut Emitter<'_, W>,
	types: &[Type],
	metadata: &MetadataMap,
) -> Result<(), RunError> {
	for t in types.iter().filter(|t| t.kind == TypeKind::Enum) {
		let labels = t
			.enum_labels
			.iter()
			.map(|label| quote_literal(label))
			.collect::<Vec<_>>()
			.join(",\n\t");
		let mut sql = format!("CREATE TYPE {} AS ENUM (\n\t{labels}\n);", t.fqn());
		if let Some(meta) = metadata.get(&t.oid) {
			sql.push_str(&metadata_trailer(meta, &CLASS_TYPE, &t.fqn()));
		}
		emitter.emit(Section::Predata, &t.schema, &t.name, "TYPE", "", &sql)?;
	}
	Ok(())
}

fn write_full_type<W: Write>(
	emitter: &mut Emitter<'_, W>,
	t: &Type,
	ctx: &PredataContext<'_>,
) -> Result<(), RunError> {
	let object_type = match t.kind {
		TypeKind::Domain => "DOMAIN",
		_ => "TYPE",
	};
	let mut sql = match t.kind {
		TypeKind::Base => base_type_sql(t),
		TypeKind::Composite => composite_type_sql(t),
		TypeKind::Domain => domain_sql(t, ctx.constraints),
		// shells and enums were already written by their own passes
		TypeKind::Shell | TypeKind::Enum => return Ok(()),
	};
	if let Some(meta) = ctx.type_metadata.get(&t.oid) {
		let class = if t.kind == TypeKind::Domain {
			&CLASS_DOMAIN
		} else {
			&CLASS_TYPE
		};
		sql.push_str(&metadata_trailer(meta, class, &t.fqn()));
	}
	emitter.emit(Section::Predata, &t.schema, &t.name, object_type, "", &sql)
}

fn base_type_sql(t: &Type) -> String {
	let mut attributes = vec![
		format!("INPUT = {}", t.input),
		format!("OUTPUT = {}", t.output),
	];
	if !t.receive.is_empty() {
		attributes.push(format!("RECEIVE = {}", t.receive));
	}
	if !t.send.is_empty() {
		attributes.push(format!("SEND = {}", t.send));
	}
	attributes.push(match t.internal_length {
		-1 => "INTERNALLENGTH = variable".into(),
		len => format!("INTERNALLENGTH = {len}"),
	});
	if t.is_passed_by_value {
		attributes.push("PASSEDBYVALUE".into());
	}
	match t.alignment.as_str() {
		"c" => attributes.push("ALIGNMENT = char".into()),
		"s" => attributes.push("ALIGNMENT = int2".into()),
		"i" => attributes.push("ALIGNMENT = int4".into()),
		"d" => attributes.push("ALIGNMENT = double".into()),
		_ => {}
	}
	match t.storage.as_str() {
		"p" => attributes.push("STORAGE = plain".into()),
		"e" => attributes.push("STORAGE = external".into()),
		"m" => attributes.push("STORAGE = main".into()),
		"x" => attributes.push("STORAGE = extended".into()),
		_ => {}
	}
	if !t.default_val.is_empty() {
		attributes.push(format!("DEFAULT = {}", quote_literal(&t.default_val)));
	}
	format!(
		"CREATE TYPE {} (\n\t{}\n);",
		t.fqn(),
		attributes.join(",\n\t"),
	)
}

fn composite_type_sql(t: &Type) -> String {
	let attributes = t
		.attributes
		.iter()
		.map(|(name, type_name)| format!("{name} {type_name}"))
		.collect::<Vec<_>>()
		.join(",\n\t");
	format!("CREATE TYPE {} AS (\n\t{attributes}\n);", t.fqn())
}

/// Domain constraints are folded into the CREATE DOMAIN statement; they are
/// never emitted as separate ALTER DOMAIN statements.
fn domain_sql(t: &Type, constraints: &[Constraint]) -> String {
	let fqn = t.fqn();
	let mut sql = format!("CREATE DOMAIN {fqn} AS {}", t.base_type);
	if !t.default_val.is_empty() {
		let _ = write!(sql, " DEFAULT {}", t.default_val);
	}
	if t.not_null {
		sql.push_str(" NOT NULL");
	}
	for constraint in constraints {
		if constraint.is_domain_constraint && constraint.owning_object == fqn {
			let _ = write!(sql, " CONSTRAINT {} {}", constraint.name, constraint.definition);
		}
	}
	sql.push(';');
	sql
}

pub fn write_function<W: Write>(
	emitter: &mut Emitter<'_, W>,
	f: &Function,
	metadata: &MetadataMap,
) -> Result<(), RunError> {
	let mut sql = function_sql(f);
	if let Some(meta) = metadata.get(&f.oid) {
		sql.push_str(&metadata_trailer(meta, &CLASS_FUNCTION, &f.fqn()));
	}
	emitter.emit(Section::Predata, &f.schema, &f.name, "FUNCTION", "", &sql)
}

pub fn function_sql(f: &Function) -> String {
	let mut sql = format!(
		"CREATE FUNCTION {}.{}({}) RETURNS {} AS\n",
		f.schema, f.name, f.arguments, f.result_type,
	);
	if f.binary_path.is_empty() {
		let _ = write!(sql, "$$ {} $$", f.function_body.trim());
	} else {
		let _ = write!(
			sql,
			"{}, {}",
			quote_literal(&f.binary_path),
			quote_literal(f.function_body.trim()),
		);
	}
	let _ = write!(sql, "\nLANGUAGE {}", f.language);
	if f.is_window {
		sql.push_str(" WINDOW");
	}
	match f.volatility.as_str() {
		"i" => sql.push_str(" IMMUTABLE"),
		"s" => sql.push_str(" STABLE"),
		_ => {}
	}
	if f.is_strict {
		sql.push_str(" STRICT");
	}
	if f.security_definer {
		sql.push_str(" SECURITY DEFINER");
	}
	if f.cost != 0.0 && f.cost != 100.0 {
		let _ = write!(sql, " COST {}", f.cost);
	}
	if f.num_rows != 0.0 && f.num_rows != 1000.0 {
		let _ = write!(sql, " ROWS {}", f.num_rows);
	}
	if !f.config.is_empty() {
		for setting in f.config.split(", ") {
			match setting.split_once('=') {
				Some((name, value)) => {
					let _ = write!(sql, " SET {name} TO {value}");
				}
				None => {
					let _ = write!(sql, " SET {setting}");
				}
			}
		}
	}
	sql.push(';');
	sql
}

/// Languages are emitted right after their handler functions, which the
/// caller has pulled out of the general function sequence.
pub fn write_procedural_languages<W: Write>(
	emitter: &mut Emitter<'_, W>,
	languages: &[ProceduralLanguage],
	handler_functions: &[Function],
	function_metadata: &MetadataMap,
	language_metadata: &MetadataMap,
	func_info: &BTreeMap<u32, FunctionInfo>,
) -> Result<(), RunError> {
	for language in languages {
		for handler in handler_functions {
			let owns = [
				language.handler_oid,
				language.inline_oid,
				language.validator_oid,
			]
			.contains(&handler.oid);
			if owns {
				write_function(emitter, handler, function_metadata)?;
			}
		}

		let trusted = if language.is_trusted { "TRUSTED " } else { "" };
		let mut sql = format!(
			"CREATE {trusted}PROCEDURAL LANGUAGE {}",
			language.name,
		);
		if let Some(handler) = resolve_function(language.handler_oid, func_info) {
			let _ = write!(sql, " HANDLER {handler}");
		}
		if let Some(inline) = resolve_function(language.inline_oid, func_info) {
			let _ = write!(sql, " INLINE {inline}");
		}
		if let Some(validator) = resolve_function(language.validator_oid, func_info) {
			let _ = write!(sql, " VALIDATOR {validator}");
		}
		sql.push(';');
		if let Some(meta) = language_metadata.get(&language.oid) {
			sql.push_str(&metadata_trailer(meta, &CLASS_LANGUAGE, &language.name));
		}
		emitter.emit(
			Section::Predata,
			"",
			&language.name,
			"PROCEDURAL LANGUAGE",
			"",
			&sql,
		)?;
	}
	Ok(())
}

fn resolve_function(oid: u32, func_info: &BTreeMap<u32, FunctionInfo>) -> Option<String> {
	if oid == 0 {
		return None;
	}
	func_info.get(&oid).map(|info| info.qualified_name.clone())
}

pub fn write_operators<W: Write>(
	emitter: &mut Emitter<'_, W>,
	operators: &[Operator],
	metadata: &MetadataMap,
) -> Result<(), RunError> {
	for op in operators {
		let mut attributes = vec![format!("PROCEDURE = {}", op.procedure)];
		if !op.left_arg.is_empty() {
			attributes.push(format!("LEFTARG = {}", op.left_arg));
		}
		if !op.right_arg.is_empty() {
			attributes.push(format!("RIGHTARG = {}", op.right_arg));
		}
		if !op.commutator.is_empty() {
			attributes.push(format!("COMMUTATOR = OPERATOR({})", op.commutator));
		}
		if !op.negator.is_empty() {
			attributes.push(format!("NEGATOR = OPERATOR({})", op.negator));
		}
		if !op.restrict_fn.is_empty() {
			attributes.push(format!("RESTRICT = {}", op.restrict_fn));
		}
		if !op.join_fn.is_empty() {
			attributes.push(format!("JOIN = {}", op.join_fn));
		}
		if op.can_hash {
			attributes.push("HASHES".into());
		}
		if op.can_merge {
			attributes.push("MERGES".into());
		}

		let fqn = format!("{}.{}", op.schema, op.name);
		let mut sql = format!(
			"CREATE OPERATOR {fqn} (\n\t{}\n);",
			attributes.join(",\n\t"),
		);
		if let Some(meta) = metadata.get(&op.oid) {
			// the comment target names the operand signature
			let signature = format!(
				"{fqn} ({}, {})",
				if op.left_arg.is_empty() {
					"NONE"
				} else {
					op.left_arg.as_str()
				},
				if op.right_arg.is_empty() {
					"NONE"
				} else {
					op.right_arg.as_str()
				},
			);
			sql.push_str(&metadata_trailer(meta, &CLASS_OPERATOR, &signature));
		}
		emitter.emit(Section::Predata, &op.schema, &op.name, "OPERATOR", "", &sql)?;
	}
	Ok(())
}

pub fn write_operator_families<W: Write>(
	emitter: &mut Emitter<'_, W>,
	families: &[OperatorFamily],
	metadata: &MetadataMap,
) -> Result<(), RunError> {
	for family in families {
		let fqn = format!("{}.{}", family.schema, family.name);
		let target = format!("{fqn} USING {}", family.index_method);
		let mut sql = format!("CREATE OPERATOR FAMILY {target};");
		if let Some(meta) = metadata.get(&family.oid) {
			sql.push_str(&metadata_trailer(meta, &CLASS_OPERATOR_FAMILY, &target));
		}
		emitter.emit(
			Section::Predata,
			&family.schema,
			&family.name,
			"OPERATOR FAMILY",
			"",
			&sql,
		)?;
	}
	Ok(())
}

pub fn write_casts<W: Write>(
	emitter: &mut Emitter<'_, W>,
	casts: &[Cast],
	metadata: &MetadataMap,
	func_info: &BTreeMap<u32, FunctionInfo>,
) -> Result<(), RunError> {
	for cast in casts {
		let target = format!("({} AS {})", cast.source_type, cast.target_type);
		let mut sql = format!("CREATE CAST {target}");
		match cast.method.as_str() {
			"i" => sql.push_str(" WITH INOUT"),
			"b" => sql.push_str(" WITHOUT FUNCTION"),
			_ => {
				if let Some(info) = func_info.get(&cast.function_oid) {
					let _ = write!(sql, " WITH FUNCTION {}", info.fqn());
				} else {
					sql.push_str(" WITHOUT FUNCTION");
				}
			}
		}
		match cast.context.as_str() {
			"a" => sql.push_str(" AS ASSIGNMENT"),
			"i" => sql.push_str(" AS IMPLICIT"),
			_ => {}
		}
		sql.push(';');
		sql.push_str(&comment_only(metadata.get(&cast.oid), "CAST", &target));
		emitter.emit(
			Section::Predata,
			"",
			&format!("{} AS {}", cast.source_type, cast.target_type),
			"CAST",
			"",
			&sql,
		)?;
	}
	Ok(())
}

pub fn write_aggregates<W: Write>(
	emitter: &mut Emitter<'_, W>,
	aggregates: &[Aggregate],
	metadata: &MetadataMap,
	func_info: &BTreeMap<u32, FunctionInfo>,
) -> Result<(), RunError> {
	for agg in aggregates {
		let mut attributes = Vec::new();
		if let Some(info) = func_info.get(&agg.transition_fn_oid) {
			attributes.push(format!("SFUNC = {}", info.qualified_name));
		}
		attributes.push(format!("STYPE = {}", agg.transition_data_type));
		if let Some(info) = func_info.get(&agg.prelim_fn_oid) {
			attributes.push(format!("PREFUNC = {}", info.qualified_name));
		}
		if let Some(info) = func_info.get(&agg.final_fn_oid) {
			attributes.push(format!("FINALFUNC = {}", info.qualified_name));
		}
		if !agg.initial_value.is_empty() {
			attributes.push(format!("INITCOND = {}", quote_literal(&agg.initial_value)));
		}
		if !agg.sort_operator.is_empty() {
			attributes.push(format!("SORTOP = \"{}\"", agg.sort_operator));
		}

		let fqn = agg.fqn();
		let mut sql = format!(
			"CREATE AGGREGATE {fqn} (\n\t{}\n);",
			attributes.join(",\n\t"),
		);
		if let Some(meta) = metadata.get(&agg.oid) {
			sql.push_str(&metadata_trailer(meta, &CLASS_AGGREGATE, &fqn));
		}
		emitter.emit(Section::Predata, &agg.schema, &agg.name, "AGGREGATE", "", &sql)?;
	}
	Ok(())
}

pub fn write_conversions<W: Write>(
	emitter: &mut Emitter<'_, W>,
	conversions: &[Conversion],
	metadata: &MetadataMap,
	func_info: &BTreeMap<u32, FunctionInfo>,
) -> Result<(), RunError> {
	for conversion in conversions {
		let fqn = format!("{}.{}", conversion.schema, conversion.name);
		let function = func_info
			.get(&conversion.function_oid)
			.map(|info| info.qualified_name.clone())
			.unwrap_or_default();
		let default = if conversion.is_default { "DEFAULT " } else { "" };
		let mut sql = format!(
			"CREATE {default}CONVERSION {fqn} FOR {} TO {} FROM {function};",
			quote_literal(&conversion.for_encoding),
			quote_literal(&conversion.to_encoding),
		);
		if let Some(meta) = metadata.get(&conversion.oid) {
			sql.push_str(&metadata_trailer(meta, &CLASS_CONVERSION, &fqn));
		}
		emitter.emit(
			Section::Predata,
			&conversion.schema,
			&conversion.name,
			"CONVERSION",
			"",
			&sql,
		)?;
	}
	Ok(())
}

pub fn write_external_protocols<W: Write>(
	emitter: &mut Emitter<'_, W>,
	protocols: &[ExternalProtocol],
	metadata: &MetadataMap,
	func_info: &BTreeMap<u32, FunctionInfo>,
) -> Result<(), RunError> {
	for protocol in protocols {
		let mut attributes = Vec::new();
		if let Some(info) = func_info.get(&protocol.read_fn_oid) {
			attributes.push(format!("readfunc = {}", info.qualified_name));
		}
		if let Some(info) = func_info.get(&protocol.write_fn_oid) {
			attributes.push(format!("writefunc = {}", info.qualified_name));
		}
		if let Some(info) = func_info.get(&protocol.validator_oid) {
			attributes.push(format!("validatorfunc = {}", info.qualified_name));
		}
		let trusted = if protocol.trusted { "TRUSTED " } else { "" };
		let mut sql = format!(
			"CREATE {trusted}PROTOCOL {} ({});",
			protocol.name,
			attributes.join(", "),
		);
		if let Some(meta) = metadata.get(&protocol.oid) {
			sql.push_str(&metadata_trailer(meta, &CLASS_PROTOCOL, &protocol.name));
		}
		emitter.emit(Section::Predata, "", &protocol.name, "PROTOCOL", "", &sql)?;
	}
	Ok(())
}

pub fn write_foreign_data_wrappers<W: Write>(
	emitter: &mut Emitter<'_, W>,
	wrappers: &[ForeignDataWrapper],
	metadata: &MetadataMap,
	func_info: &BTreeMap<u32, FunctionInfo>,
) -> Result<(), RunError> {
	for wrapper in wrappers {
		let mut sql = format!("CREATE FOREIGN DATA WRAPPER {}", wrapper.name);
		if let Some(handler) = resolve_function(wrapper.handler_oid, func_info) {
			let _ = write!(sql, " HANDLER {handler}");
		}
		if let Some(validator) = resolve_function(wrapper.validator_oid, func_info) {
			let _ = write!(sql, " VALIDATOR {validator}");
		}
		if let Some(options) = options_clause(&wrapper.options) {
			let _ = write!(sql, " {options}");
		}
		sql.push(';');
		if let Some(meta) = metadata.get(&wrapper.oid) {
			sql.push_str(&metadata_trailer(
				meta,
				&CLASS_FOREIGN_DATA_WRAPPER,
				&wrapper.name,
			));
		}
		emitter.emit(
			Section::Predata,
			"",
			&wrapper.name,
			"FOREIGN DATA WRAPPER",
			"",
			&sql,
		)?;
	}
	Ok(())
}

pub fn write_foreign_servers<W: Write>(
	emitter: &mut Emitter<'_, W>,
	servers: &[ForeignServer],
	metadata: &MetadataMap,
) -> Result<(), RunError> {
	for server in servers {
		let mut sql = format!("CREATE SERVER {}", server.name);
		if !server.server_type.is_empty() {
			let _ = write!(sql, " TYPE {}", quote_literal(&server.server_type));
		}
		if !server.server_version.is_empty() {
			let _ = write!(sql, " VERSION {}", quote_literal(&server.server_version));
		}
		let _ = write!(sql, " FOREIGN DATA WRAPPER {}", server.foreign_data_wrapper);
		if let Some(options) = options_clause(&server.options) {
			let _ = write!(sql, " {options}");
		}
		sql.push(';');
		if let Some(meta) = metadata.get(&server.oid) {
			sql.push_str(&metadata_trailer(meta, &CLASS_FOREIGN_SERVER, &server.name));
		}
		emitter.emit(Section::Predata, "", &server.name, "FOREIGN SERVER", "", &sql)?;
	}
	Ok(())
}

pub fn write_user_mappings<W: Write>(
	emitter: &mut Emitter<'_, W>,
	mappings: &[UserMapping],
) -> Result<(), RunError> {
	for mapping in mappings {
		let mut sql = format!(
			"CREATE USER MAPPING FOR {} SERVER {}",
			mapping.user, mapping.server,
		);
		if let Some(options) = options_clause(&mapping.options) {
			let _ = write!(sql, " {options}");
		}
		sql.push(';');
		emitter.emit(
			Section::Predata,
			"",
			&format!("{} ON {}", mapping.user, mapping.server),
			"USER MAPPING",
			"",
			&sql,
		)?;
	}
	Ok(())
}

/// Turn the catalog's `key=value, key=value` option text into an
/// `OPTIONS (key 'value', ...)` clause.
fn options_clause(options: &str) -> Option<String> {
	if options.is_empty() {
		return None;
	}
	let rendered = options
		.split(", ")
		.filter_map(|pair| pair.split_once('='))
		.map(|(key, value)| format!("{key} {}", quote_literal(value)))
		.collect::<Vec<_>>()
		.join(", ");
	Some(format!("OPTIONS ({rendered})"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ddl::testutil::Scratch;

	fn base_type(name: &str) -> Type {
		Type {
			oid: 16500,
			schema: "public".into(),
			name: name.into(),
			kind: TypeKind::Base,
			input: "base_in".into(),
			output: "base_out".into(),
			receive: String::new(),
			send: String::new(),
			internal_length: -1,
			is_passed_by_value: false,
			alignment: "i".into(),
			storage: "p".into(),
			default_val: String::new(),
			attributes: Vec::new(),
			enum_labels: Vec::new(),
			base_type: String::new(),
			not_null: false,
			depends_upon: Vec::new(),
		}
	}

	#[test]
	fn base_type_renders_io_and_storage() {
		let sql = base_type_sql(&base_type("base_type"));
		assert!(sql.starts_with("CREATE TYPE public.base_type (\n"));
		assert!(sql.contains("INPUT = base_in"));
		assert!(sql.contains("OUTPUT = base_out"));
		assert!(sql.contains("INTERNALLENGTH = variable"));
		assert!(sql.contains("ALIGNMENT = int4"));
		assert!(sql.contains("STORAGE = plain"));
	}

	#[test]
	fn shell_types_emit_for_base_and_shell_kinds() {
		let mut scratch = Scratch::new();
		let mut emitter = Emitter::new(&mut scratch.file, &mut scratch.toc, &mut scratch.counts);
		let mut shell = base_type("undefined_type");
		shell.kind = TypeKind::Shell;
		let mut enum_type = base_type("mood");
		enum_type.kind = TypeKind::Enum;

		write_shell_types(&mut emitter, &[base_type("base_type"), shell, enum_type]).unwrap();
		let output = scratch.output();
		assert!(output.contains("CREATE TYPE public.base_type;"));
		assert!(output.contains("CREATE TYPE public.undefined_type;"));
		assert!(!output.contains("mood"));
	}

	#[test]
	fn domain_folds_its_constraints() {
		let mut t = base_type("us_zip");
		t.kind = TypeKind::Domain;
		t.base_type = "text".into();
		t.not_null = true;
		let constraints = vec![
			Constraint {
				oid: 1,
				name: "us_zip_check".into(),
				kind: crate::catalog::predata::ConstraintKind::Check,
				definition: "CHECK (VALUE ~ '^[0-9]{5}$')".into(),
				owning_object: "public.us_zip".into(),
				is_domain_constraint: true,
				is_partition_parent: false,
			},
			Constraint {
				oid: 2,
				name: "unrelated".into(),
				kind: crate::catalog::predata::ConstraintKind::Check,
				definition: "CHECK (true)".into(),
				owning_object: "public.other".into(),
				is_domain_constraint: true,
				is_partition_parent: false,
			},
		];

		let sql = domain_sql(&t, &constraints);
		assert_eq!(
			sql,
			"CREATE DOMAIN public.us_zip AS text NOT NULL \
			CONSTRAINT us_zip_check CHECK (VALUE ~ '^[0-9]{5}$');"
		);
	}

	#[test]
	fn function_sql_renders_qualifiers() {
		let f = Function {
			oid: 1,
			schema: "public".into(),
			name: "add".into(),
			arguments: "integer, integer".into(),
			ident_args: "integer, integer".into(),
			result_type: "integer".into(),
			function_body: "SELECT $1 + $2".into(),
			binary_path: String::new(),
			language: "sql".into(),
			volatility: "i".into(),
			is_strict: true,
			security_definer: false,
			config: String::new(),
			cost: 100.0,
			num_rows: 0.0,
			is_window: false,
			depends_upon: Vec::new(),
		};
		assert_eq!(
			function_sql(&f),
			"CREATE FUNCTION public.add(integer, integer) RETURNS integer AS\n\
			$$ SELECT $1 + $2 $$\nLANGUAGE sql IMMUTABLE STRICT;"
		);
	}

	#[test]
	fn mixed_objects_emit_in_sorted_order() {
		// a table whose column type is a user-defined composite must come
		// after the type, regardless of class grouping
		let mut composite = base_type("pair");
		composite.kind = TypeKind::Composite;
		composite.attributes = vec![("a".into(), "integer".into())];
		let table = Relation {
			schema_oid: 2200,
			oid: 16400,
			schema: "public".into(),
			name: "uses_pair".into(),
			depends_upon: vec!["public.pair".into()],
		};

		let sorted = sort_functions_types_and_tables(vec![], vec![composite], vec![table]).unwrap();
		let fqns: Vec<String> = sorted.iter().map(Sortable::fqn).collect();
		assert_eq!(fqns, ["public.pair", "public.uses_pair"]);
	}

	#[test]
	fn outside_dependencies_are_dropped_before_sorting() {
		let table = Relation {
			schema_oid: 2200,
			oid: 16400,
			schema: "public".into(),
			name: "t".into(),
			depends_upon: vec!["public.some_enum".into()],
		};
		// the enum is not part of the merged sequence; its dependency must
		// not count as unmet
		let sorted = sort_functions_types_and_tables(vec![], vec![], vec![table]).unwrap();
		assert_eq!(sorted.len(), 1);
	}

	#[test]
	fn options_clause_quotes_values() {
		assert_eq!(
			options_clause("host=remote, port=5432").as_deref(),
			Some("OPTIONS (host 'remote', port '5432')"),
		);
		assert_eq!(options_clause(""), None);
	}
}
