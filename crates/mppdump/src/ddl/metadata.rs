use std::fmt::Write as _;

use crate::catalog::{Acl, ObjectMetadata, quote_literal};

/// How one kind of object spells its metadata statements: the keyword used
/// in COMMENT/ALTER/GRANT, and which privilege kinds apply to it (so a full
/// set collapses to `ALL`).
#[derive(Debug, Clone, Copy)]
pub struct ObjectClass {
	pub comment_keyword: &'static str,
	pub owner_keyword: Option<&'static str>,
	pub grant_keyword: Option<&'static str>,
	pub privileges: &'static [&'static str],
}

const TABLE_PRIVILEGES: &[&str] = &[
	"SELECT",
	"INSERT",
	"UPDATE",
	"DELETE",
	"TRUNCATE",
	"REFERENCES",
	"TRIGGER",
];

pub const CLASS_TABLE: ObjectClass = ObjectClass {
	comment_keyword: "TABLE",
	owner_keyword: Some("TABLE"),
	grant_keyword: Some("TABLE"),
	privileges: TABLE_PRIVILEGES,
};

pub const CLASS_VIEW: ObjectClass = ObjectClass {
	comment_keyword: "VIEW",
	owner_keyword: Some("TABLE"),
	grant_keyword: Some("TABLE"),
	privileges: TABLE_PRIVILEGES,
};

pub const CLASS_SEQUENCE: ObjectClass = ObjectClass {
	comment_keyword: "SEQUENCE",
	owner_keyword: Some("TABLE"),
	grant_keyword: Some("SEQUENCE"),
	privileges: &["SELECT", "UPDATE", "USAGE"],
};

pub const CLASS_FUNCTION: ObjectClass = ObjectClass {
	comment_keyword: "FUNCTION",
	owner_keyword: Some("FUNCTION"),
	grant_keyword: Some("FUNCTION"),
	privileges: &["EXECUTE"],
};

pub const CLASS_AGGREGATE: ObjectClass = ObjectClass {
	comment_keyword: "AGGREGATE",
	owner_keyword: Some("AGGREGATE"),
	grant_keyword: Some("FUNCTION"),
	privileges: &["EXECUTE"],
};

pub const CLASS_SCHEMA: ObjectClass = ObjectClass {
	comment_keyword: "SCHEMA",
	owner_keyword: Some("SCHEMA"),
	grant_keyword: Some("SCHEMA"),
	privileges: &["USAGE", "CREATE"],
};

pub const CLASS_DATABASE: ObjectClass = ObjectClass {
	comment_keyword: "DATABASE",
	owner_keyword: Some("DATABASE"),
	grant_keyword: Some("DATABASE"),
	privileges: &["CREATE", "TEMPORARY", "CONNECT"],
};

pub const CLASS_TABLESPACE: ObjectClass = ObjectClass {
	comment_keyword: "TABLESPACE",
	owner_keyword: Some("TABLESPACE"),
	grant_keyword: Some("TABLESPACE"),
	privileges: &["CREATE"],
};

pub const CLASS_TYPE: ObjectClass = ObjectClass {
	comment_keyword: "TYPE",
	owner_keyword: Some("TYPE"),
	grant_keyword: None,
	privileges: &[],
};

pub const CLASS_DOMAIN: ObjectClass = ObjectClass {
	comment_keyword: "DOMAIN",
	owner_keyword: Some("DOMAIN"),
	grant_keyword: None,
	privileges: &[],
};

pub const CLASS_LANGUAGE: ObjectClass = ObjectClass {
	comment_keyword: "LANGUAGE",
	owner_keyword: Some("LANGUAGE"),
	grant_keyword: Some("LANGUAGE"),
	privileges: &["USAGE"],
};

pub const CLASS_PROTOCOL: ObjectClass = ObjectClass {
	comment_keyword: "PROTOCOL",
	owner_keyword: Some("PROTOCOL"),
	grant_keyword: Some("PROTOCOL"),
	privileges: &["SELECT", "INSERT"],
};

pub const CLASS_OPERATOR: ObjectClass = ObjectClass {
	comment_keyword: "OPERATOR",
	owner_keyword: Some("OPERATOR"),
	grant_keyword: None,
	privileges: &[],
};

pub const CLASS_OPERATOR_FAMILY: ObjectClass = ObjectClass {
	comment_keyword: "OPERATOR FAMILY",
	owner_keyword: Some("OPERATOR FAMILY"),
	grant_keyword: None,
	privileges: &[],
};

pub const CLASS_CONVERSION: ObjectClass = ObjectClass {
	comment_keyword: "CONVERSION",
	owner_keyword: Some("CONVERSION"),
	grant_keyword: None,
	privileges: &[],
};

pub const CLASS_FOREIGN_DATA_WRAPPER: ObjectClass = ObjectClass {
	comment_keyword: "FOREIGN DATA WRAPPER",
	owner_keyword: Some("FOREIGN DATA WRAPPER"),
	grant_keyword: Some("FOREIGN DATA WRAPPER"),
	privileges: &["USAGE"],
};

pub const CLASS_FOREIGN_SERVER: ObjectClass = ObjectClass {
	comment_keyword: "SERVER",
	owner_keyword: Some("SERVER"),
	grant_keyword: Some("FOREIGN SERVER"),
	privileges: &["USAGE"],
};

/// The statements that follow an object's CREATE, in the fixed order:
/// comment, security label, owner, then privileges (with the blanket
/// REVOKEs ahead of any GRANT). Returns an empty string when the object's
/// metadata is all-default.
pub fn metadata_trailer(meta: &ObjectMetadata, class: &ObjectClass, fqn: &str) -> String {
	let mut sql = String::new();

	if !meta.comment.is_empty() {
		let _ = write!(
			sql,
			"\n\nCOMMENT ON {} {fqn} IS {};",
			class.comment_keyword,
			quote_literal(&meta.comment),
		);
	}

	if !meta.security_label.is_empty() {
		let _ = write!(
			sql,
			"\n\nSECURITY LABEL FOR {} ON {} {fqn} IS {};",
			meta.security_label_provider,
			class.comment_keyword,
			quote_literal(&meta.security_label),
		);
	}

	if let Some(keyword) = class.owner_keyword
		&& !meta.owner.is_empty()
	{
		let _ = write!(sql, "\n\nALTER {keyword} {fqn} OWNER TO {};", meta.owner);
	}

	if let Some(keyword) = class.grant_keyword
		&& !meta.privileges.is_empty()
	{
		let _ = write!(sql, "\n\nREVOKE ALL ON {keyword} {fqn} FROM PUBLIC;");
		if !meta.owner.is_empty() {
			let _ = write!(sql, "\nREVOKE ALL ON {keyword} {fqn} FROM {};", meta.owner);
		}
		for acl in &meta.privileges {
			let grantee = if acl.grantee.is_empty() {
				"PUBLIC"
			} else {
				acl.grantee.as_str()
			};
			let (plain, with_grant) = granted_privileges(acl, class.privileges);
			if !plain.is_empty() {
				let _ = write!(
					sql,
					"\nGRANT {} ON {keyword} {fqn} TO {grantee};",
					plain.join(","),
				);
			}
			if !with_grant.is_empty() {
				let _ = write!(
					sql,
					"\nGRANT {} ON {keyword} {fqn} TO {grantee} WITH GRANT OPTION;",
					with_grant.join(","),
				);
			}
		}
	}

	sql
}

/// Split one ACL entry into the plainly-granted privilege names and the
/// ones carrying grant option, each collapsed to `ALL` when every privilege
/// applicable to the class is present.
fn granted_privileges(acl: &Acl, applicable: &'static [&'static str]) -> (Vec<&'static str>, Vec<&'static str>) {
	let mut plain = Vec::new();
	let mut with_grant = Vec::new();
	for &name in applicable {
		let (granted, option) = privilege_bits(acl, name);
		if granted && option {
			with_grant.push(name);
		} else if granted {
			plain.push(name);
		}
	}
	if plain.len() == applicable.len() {
		plain = vec!["ALL"];
	}
	if with_grant.len() == applicable.len() {
		with_grant = vec!["ALL"];
	}
	(plain, with_grant)
}

fn privilege_bits(acl: &Acl, name: &str) -> (bool, bool) {
	match name {
		"SELECT" => (acl.select, acl.select_with_grant),
		"INSERT" => (acl.insert, acl.insert_with_grant),
		"UPDATE" => (acl.update, acl.update_with_grant),
		"DELETE" => (acl.delete, acl.delete_with_grant),
		"TRUNCATE" => (acl.truncate, acl.truncate_with_grant),
		"REFERENCES" => (acl.references, acl.references_with_grant),
		"TRIGGER" => (acl.trigger, acl.trigger_with_grant),
		"EXECUTE" => (acl.execute, acl.execute_with_grant),
		"USAGE" => (acl.usage, acl.usage_with_grant),
		"CREATE" => (acl.create, acl.create_with_grant),
		"TEMPORARY" => (acl.temporary, acl.temporary_with_grant),
		"CONNECT" => (acl.connect, acl.connect_with_grant),
		_ => (false, false),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::catalog::metadata::parse_acl_array;

	#[test]
	fn trailer_statements_come_in_the_fixed_order() {
		let meta = ObjectMetadata {
			privileges: parse_acl_array("{alice=r/bob}".into()),
			owner: "bob".into(),
			comment: "the things".into(),
			security_label: "classified".into(),
			security_label_provider: "dummy".into(),
		};

		let sql = metadata_trailer(&meta, &CLASS_TABLE, "public.things");
		let comment = sql.find("COMMENT ON TABLE").unwrap();
		let label = sql.find("SECURITY LABEL FOR dummy").unwrap();
		let owner = sql.find("ALTER TABLE public.things OWNER TO bob;").unwrap();
		let revoke_public = sql
			.find("REVOKE ALL ON TABLE public.things FROM PUBLIC;")
			.unwrap();
		let revoke_owner = sql
			.find("REVOKE ALL ON TABLE public.things FROM bob;")
			.unwrap();
		let grant = sql
			.find("GRANT SELECT ON TABLE public.things TO alice;")
			.unwrap();
		assert!(comment < label && label < owner && owner < revoke_public);
		assert!(revoke_public < revoke_owner && revoke_owner < grant);
	}

	#[test]
	fn full_privilege_set_collapses_to_all() {
		let meta = ObjectMetadata {
			privileges: parse_acl_array("{alice=arwdDxt/bob}".into()),
			owner: "bob".into(),
			..Default::default()
		};
		let sql = metadata_trailer(&meta, &CLASS_TABLE, "public.things");
		assert!(sql.contains("GRANT ALL ON TABLE public.things TO alice;"));
	}

	#[test]
	fn grant_option_privileges_split_into_a_second_grant() {
		let meta = ObjectMetadata {
			privileges: parse_acl_array("{carol=r*w/bob}".into()),
			owner: "bob".into(),
			..Default::default()
		};
		let sql = metadata_trailer(&meta, &CLASS_TABLE, "public.things");
		assert!(sql.contains("GRANT UPDATE ON TABLE public.things TO carol;"));
		assert!(sql.contains("GRANT SELECT ON TABLE public.things TO carol WITH GRANT OPTION;"));
	}

	#[test]
	fn public_grantee_spells_public() {
		let meta = ObjectMetadata {
			privileges: parse_acl_array("{=X/bob}".into()),
			owner: "bob".into(),
			..Default::default()
		};
		let sql = metadata_trailer(&meta, &CLASS_FUNCTION, "public.f(integer)");
		assert!(sql.contains("GRANT ALL ON FUNCTION public.f(integer) TO PUBLIC;"));
	}

	#[test]
	fn empty_metadata_renders_nothing() {
		let meta = ObjectMetadata::default();
		assert!(metadata_trailer(&meta, &CLASS_TABLE, "public.things").is_empty());
	}

	#[test]
	fn types_have_owner_but_no_grants() {
		let meta = ObjectMetadata {
			privileges: parse_acl_array("{alice=U/bob}".into()),
			owner: "bob".into(),
			..Default::default()
		};
		let sql = metadata_trailer(&meta, &CLASS_TYPE, "public.mood");
		assert!(sql.contains("ALTER TYPE public.mood OWNER TO bob;"));
		assert!(!sql.contains("GRANT"));
	}
}
