use std::{fmt::Write as _, io::Write};

use crate::{
	catalog::{
		MetadataMap, ObjectMetadata,
		globals::{Database, ResourceGroup, ResourceQueue, Role, RoleGrant, Tablespace},
		quote_literal,
	},
	ddl::{
		Emitter,
		metadata::{CLASS_DATABASE, CLASS_TABLESPACE, metadata_trailer},
	},
	error::RunError,
	toc::Section,
};

pub fn write_tablespaces<W: Write>(
	emitter: &mut Emitter<'_, W>,
	tablespaces: &[Tablespace],
	metadata: &MetadataMap,
) -> Result<(), RunError> {
	for ts in tablespaces {
		let mut sql = if ts.from_filespace {
			format!(
				"CREATE TABLESPACE {} FILESPACE {};",
				ts.tablespace, ts.file_location,
			)
		} else {
			format!(
				"CREATE TABLESPACE {} LOCATION {};",
				ts.tablespace,
				quote_literal(&ts.file_location),
			)
		};
		if let Some(meta) = metadata.get(&ts.oid) {
			sql.push_str(&metadata_trailer(meta, &CLASS_TABLESPACE, &ts.tablespace));
		}
		emitter.emit(Section::Global, "", &ts.tablespace, "TABLESPACE", "", &sql)?;
	}
	Ok(())
}

pub fn write_create_database<W: Write>(
	emitter: &mut Emitter<'_, W>,
	database: &Database,
	metadata: &MetadataMap,
) -> Result<(), RunError> {
	let mut sql = format!("CREATE DATABASE {} TEMPLATE template0", database.name);
	if !database.encoding.is_empty() {
		let _ = write!(sql, " ENCODING {}", quote_literal(&database.encoding));
	}
	if database.tablespace != "pg_default" {
		let _ = write!(sql, " TABLESPACE {}", database.tablespace);
	}
	sql.push(';');
	if let Some(meta) = metadata.get(&database.oid) {
		sql.push_str(&metadata_trailer(meta, &CLASS_DATABASE, &database.name));
	}
	emitter.emit(Section::Global, "", &database.name, "DATABASE", "", &sql)
}

pub fn write_database_gucs<W: Write>(
	emitter: &mut Emitter<'_, W>,
	database: &Database,
	gucs: &[String],
) -> Result<(), RunError> {
	for guc in gucs {
		let sql = match guc.split_once('=') {
			Some((name, value)) => {
				format!("ALTER DATABASE {} SET {name} TO {value};", database.name)
			}
			None => format!("ALTER DATABASE {} SET {guc};", database.name),
		};
		emitter.emit_uncounted(
			Section::Global,
			"",
			&database.name,
			"DATABASE GUC",
			"",
			&sql,
		)?;
	}
	Ok(())
}

pub fn write_resource_queues<W: Write>(
	emitter: &mut Emitter<'_, W>,
	queues: &[ResourceQueue],
	comments: &MetadataMap,
) -> Result<(), RunError> {
	for queue in queues {
		let mut attributes = Vec::new();
		if queue.active_statements != -1 {
			attributes.push(format!("ACTIVE_STATEMENTS={}", queue.active_statements));
		}
		if queue.max_cost != "-1" {
			attributes.push(format!("MAX_COST={}", queue.max_cost));
			if queue.cost_overcommit {
				attributes.push("COST_OVERCOMMIT=TRUE".into());
			}
		}
		if queue.min_cost != "0" {
			attributes.push(format!("MIN_COST={}", queue.min_cost));
		}
		attributes.push(format!("PRIORITY={}", queue.priority.to_uppercase()));
		if queue.memory_limit != "-1" {
			attributes.push(format!("MEMORY_LIMIT='{}'", queue.memory_limit));
		}

		// pg_default always exists; replay alters it instead of recreating
		let mut sql = if queue.name == "pg_default" {
			format!(
				"ALTER RESOURCE QUEUE {} WITH ({});",
				queue.name,
				attributes.join(", "),
			)
		} else {
			format!(
				"CREATE RESOURCE QUEUE {} WITH ({});",
				queue.name,
				attributes.join(", "),
			)
		};
		if let Some(meta) = comments.get(&queue.oid)
			&& !meta.comment.is_empty()
		{
			let _ = write!(
				sql,
				"\n\nCOMMENT ON RESOURCE QUEUE {} IS {};",
				queue.name,
				quote_literal(&meta.comment),
			);
		}
		emitter.emit(Section::Global, "", &queue.name, "RESOURCE QUEUE", "", &sql)?;
	}
	Ok(())
}

pub fn write_resource_groups<W: Write>(
	emitter: &mut Emitter<'_, W>,
	groups: &[ResourceGroup],
) -> Result<(), RunError> {
	for group in groups {
		let attributes = format!(
			"CONCURRENCY={}, CPU_RATE_LIMIT={}, MEMORY_LIMIT={}",
			group.concurrency, group.cpu_rate_limit, group.memory_limit,
		);
		// admin_group and default_group ship with the server
		let sql = if group.name == "admin_group" || group.name == "default_group" {
			format!("ALTER RESOURCE GROUP {} SET ({attributes});", group.name)
		} else {
			format!("CREATE RESOURCE GROUP {} WITH ({attributes});", group.name)
		};
		emitter.emit(Section::Global, "", &group.name, "RESOURCE GROUP", "", &sql)?;
	}
	Ok(())
}

pub fn write_roles<W: Write>(
	emitter: &mut Emitter<'_, W>,
	roles: &[Role],
) -> Result<(), RunError> {
	for role in roles {
		let mut sql = format!("CREATE ROLE {};", role.name);

		let mut attributes = vec![
			if role.super_user {
				"SUPERUSER"
			} else {
				"NOSUPERUSER"
			}
			.to_string(),
			if role.inherit { "INHERIT" } else { "NOINHERIT" }.to_string(),
			if role.create_role {
				"CREATEROLE"
			} else {
				"NOCREATEROLE"
			}
			.to_string(),
			if role.create_db {
				"CREATEDB"
			} else {
				"NOCREATEDB"
			}
			.to_string(),
			if role.can_login { "LOGIN" } else { "NOLOGIN" }.to_string(),
		];
		if role.connection_limit != -1 {
			attributes.push(format!("CONNECTION LIMIT {}", role.connection_limit));
		}
		if !role.password.is_empty() {
			attributes.push(format!("PASSWORD {}", quote_literal(&role.password)));
		}
		if !role.valid_until.is_empty() {
			attributes.push(format!("VALID UNTIL {}", quote_literal(&role.valid_until)));
		}
		if !role.resource_queue.is_empty() {
			attributes.push(format!("RESOURCE QUEUE {}", role.resource_queue));
		}
		if !role.resource_group.is_empty() {
			attributes.push(format!("RESOURCE GROUP {}", role.resource_group));
		}
		let _ = write!(
			sql,
			"\n\nALTER ROLE {} WITH {};",
			role.name,
			attributes.join(" "),
		);

		if !role.comment.is_empty() {
			let _ = write!(
				sql,
				"\n\nCOMMENT ON ROLE {} IS {};",
				role.name,
				quote_literal(&role.comment),
			);
		}
		emitter.emit(Section::Global, "", &role.name, "ROLE", "", &sql)?;
	}
	Ok(())
}

pub fn write_role_grants<W: Write>(
	emitter: &mut Emitter<'_, W>,
	grants: &[RoleGrant],
) -> Result<(), RunError> {
	for grant in grants {
		let mut sql = format!("GRANT {} TO {}", grant.role, grant.member);
		if grant.admin_option {
			sql.push_str(" WITH ADMIN OPTION");
		}
		if !grant.grantor.is_empty() {
			let _ = write!(sql, " GRANTED BY {}", grant.grantor);
		}
		sql.push(';');
		emitter.emit(Section::Global, "", &grant.role, "ROLE GRANT", "", &sql)?;
	}
	Ok(())
}

/// Convenience for emitting `COMMENT ON`-only kinds.
pub fn comment_only(meta: Option<&ObjectMetadata>, keyword: &str, fqn: &str) -> String {
	match meta {
		Some(meta) if !meta.comment.is_empty() => format!(
			"\n\nCOMMENT ON {keyword} {fqn} IS {};",
			quote_literal(&meta.comment),
		),
		_ => String::new(),
	}
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use super::*;
	use crate::ddl::testutil::Scratch;

	fn role(name: &str) -> Role {
		Role {
			oid: 10,
			name: name.into(),
			super_user: false,
			inherit: true,
			create_role: false,
			create_db: false,
			can_login: true,
			connection_limit: -1,
			password: String::new(),
			valid_until: String::new(),
			resource_queue: "pg_default".into(),
			resource_group: String::new(),
			comment: String::new(),
		}
	}

	#[test]
	fn roles_create_then_alter() {
		let mut scratch = Scratch::new();
		let mut emitter = Emitter::new(&mut scratch.file, &mut scratch.toc, &mut scratch.counts);
		write_roles(&mut emitter, &[role("backup_user")]).unwrap();

		let output = scratch.output();
		assert!(output.starts_with("CREATE ROLE backup_user;"));
		assert!(output.contains(
			"ALTER ROLE backup_user WITH NOSUPERUSER INHERIT NOCREATEROLE NOCREATEDB LOGIN RESOURCE QUEUE pg_default;"
		));
		assert_eq!(scratch.counts["role"], 1);
	}

	#[test]
	fn role_grants_carry_admin_and_grantor() {
		let mut scratch = Scratch::new();
		let mut emitter = Emitter::new(&mut scratch.file, &mut scratch.toc, &mut scratch.counts);
		write_role_grants(
			&mut emitter,
			&[RoleGrant {
				role: "admins".into(),
				member: "alice".into(),
				grantor: "root".into(),
				admin_option: true,
			}],
		)
		.unwrap();
		assert_eq!(
			scratch.output(),
			"GRANT admins TO alice WITH ADMIN OPTION GRANTED BY root;"
		);
	}

	#[test]
	fn tablespace_spelling_depends_on_server_era() {
		let mut scratch = Scratch::new();
		let mut emitter = Emitter::new(&mut scratch.file, &mut scratch.toc, &mut scratch.counts);
		write_tablespaces(
			&mut emitter,
			&[
				Tablespace {
					oid: 1,
					tablespace: "fastdisk".into(),
					file_location: "/mnt/fast".into(),
					from_filespace: false,
				},
				Tablespace {
					oid: 2,
					tablespace: "olddisk".into(),
					file_location: "fs_old".into(),
					from_filespace: true,
				},
			],
			&BTreeMap::new(),
		)
		.unwrap();

		let output = scratch.output();
		assert!(output.contains("CREATE TABLESPACE fastdisk LOCATION '/mnt/fast';"));
		assert!(output.contains("CREATE TABLESPACE olddisk FILESPACE fs_old;"));
	}

	#[test]
	fn default_resource_queue_is_altered_not_created() {
		let mut scratch = Scratch::new();
		let mut emitter = Emitter::new(&mut scratch.file, &mut scratch.toc, &mut scratch.counts);
		write_resource_queues(
			&mut emitter,
			&[ResourceQueue {
				oid: 6055,
				name: "pg_default".into(),
				active_statements: 20,
				max_cost: "-1".into(),
				cost_overcommit: false,
				min_cost: "0".into(),
				priority: "medium".into(),
				memory_limit: "-1".into(),
			}],
			&BTreeMap::new(),
		)
		.unwrap();
		assert_eq!(
			scratch.output(),
			"ALTER RESOURCE QUEUE pg_default WITH (ACTIVE_STATEMENTS=20, PRIORITY=MEDIUM);"
		);
	}
}
