use mppdump_postgres::SlotPool;
use tracing::instrument;

use super::{query, select_string};
use crate::error::RunError;

/// Session settings captured from the dump session, replayed at the top of
/// the metadata file so a restore session interprets the SQL identically.
#[derive(Debug, Clone)]
pub struct SessionGucs {
	pub client_encoding: String,
	pub standard_conforming_strings: String,
	pub default_with_oids: String,
}

pub async fn get_session_gucs(pool: &SlotPool) -> Result<SessionGucs, RunError> {
	let rows = query(
		pool,
		"reading session settings",
		"SELECT current_setting('client_encoding'),
			current_setting('standard_conforming_strings'),
			current_setting('default_with_oids')",
	)
	.await?;
	let row = &rows[0];
	Ok(SessionGucs {
		client_encoding: row.get(0),
		standard_conforming_strings: row.get(1),
		default_with_oids: row.get(2),
	})
}

#[derive(Debug, Clone)]
pub struct Database {
	pub oid: u32,
	pub name: String,
	pub tablespace: String,
	pub encoding: String,
}

pub async fn get_database(pool: &SlotPool) -> Result<Database, RunError> {
	let rows = query(
		pool,
		"reading database info",
		"SELECT d.oid, quote_ident(d.datname) AS name, quote_ident(t.spcname) AS tablespace,
			pg_catalog.pg_encoding_to_char(d.encoding) AS encoding
		FROM pg_catalog.pg_database d
		JOIN pg_catalog.pg_tablespace t ON d.dattablespace = t.oid
		WHERE d.datname = current_database()",
	)
	.await?;
	let row = &rows[0];
	Ok(Database {
		oid: row.get(0),
		name: row.get(1),
		tablespace: row.get(2),
		encoding: row.get(3),
	})
}

/// Per-database settings (`ALTER DATABASE ... SET ...`), as raw
/// `name=value` strings.
pub async fn get_database_gucs(pool: &SlotPool) -> Result<Vec<String>, RunError> {
	let sql = if pool.version.at_least(6) {
		"SELECT unnest(setconfig)
		FROM pg_catalog.pg_db_role_setting
		WHERE setrole = 0
			AND setdatabase = (SELECT oid FROM pg_catalog.pg_database WHERE datname = current_database())"
	} else {
		"SELECT unnest(datconfig)
		FROM pg_catalog.pg_database
		WHERE datname = current_database()"
	};
	Ok(query(pool, "reading database settings", sql)
		.await?
		.iter()
		.map(|row| row.get(0))
		.collect())
}

pub async fn get_database_size(pool: &SlotPool) -> Result<String, RunError> {
	select_string(
		pool,
		"reading database size",
		"SELECT pg_catalog.pg_size_pretty(pg_catalog.pg_database_size(current_database()))",
	)
	.await
}

#[derive(Debug, Clone)]
pub struct Tablespace {
	pub oid: u32,
	pub tablespace: String,
	/// A directory path on 6+, a filespace name on older clusters.
	pub file_location: String,
	pub from_filespace: bool,
}

pub async fn get_tablespaces(pool: &SlotPool) -> Result<Vec<Tablespace>, RunError> {
	let from_filespace = pool.version.before(6);
	let sql = if from_filespace {
		"SELECT t.oid, quote_ident(t.spcname) AS name, quote_ident(f.fsname) AS location
		FROM pg_catalog.pg_tablespace t
		JOIN pg_catalog.pg_filespace f ON t.spcfsoid = f.oid
		WHERE t.spcname NOT IN ('pg_default', 'pg_global')
		ORDER BY t.spcname"
	} else {
		"SELECT t.oid, quote_ident(t.spcname) AS name,
			pg_catalog.pg_tablespace_location(t.oid) AS location
		FROM pg_catalog.pg_tablespace t
		WHERE t.spcname NOT IN ('pg_default', 'pg_global')
		ORDER BY t.spcname"
	};
	Ok(query(pool, "reading tablespaces", sql)
		.await?
		.iter()
		.map(|row| Tablespace {
			oid: row.get(0),
			tablespace: row.get(1),
			file_location: row.get(2),
			from_filespace,
		})
		.collect())
}

#[derive(Debug, Clone)]
pub struct ResourceQueue {
	pub oid: u32,
	pub name: String,
	pub active_statements: i32,
	pub max_cost: String,
	pub cost_overcommit: bool,
	pub min_cost: String,
	pub priority: String,
	pub memory_limit: String,
}

#[instrument(level = "debug", skip(pool))]
pub async fn get_resource_queues(pool: &SlotPool) -> Result<Vec<ResourceQueue>, RunError> {
	let sql = "SELECT q.oid, quote_ident(q.rsqname) AS name,
			q.rsqcountlimit::int AS activestatements,
			q.rsqcostlimit::text AS maxcost,
			q.rsqovercommit AS costovercommit,
			q.rsqignorecostlimit::text AS mincost,
			coalesce(p.ressetting, 'medium') AS priority,
			coalesce(m.ressetting, '-1') AS memorylimit
		FROM pg_catalog.pg_resqueue q
		LEFT JOIN pg_catalog.pg_resqueuecapability p
			ON p.resqueueid = q.oid AND p.restypid = 5
		LEFT JOIN pg_catalog.pg_resqueuecapability m
			ON m.resqueueid = q.oid AND m.restypid = 6
		ORDER BY q.rsqname";
	Ok(query(pool, "reading resource queues", sql)
		.await?
		.iter()
		.map(|row| ResourceQueue {
			oid: row.get(0),
			name: row.get(1),
			active_statements: row.get(2),
			max_cost: row.get(3),
			cost_overcommit: row.get(4),
			min_cost: row.get(5),
			priority: row.get(6),
			memory_limit: row.get(7),
		})
		.collect())
}

#[derive(Debug, Clone)]
pub struct ResourceGroup {
	pub oid: u32,
	pub name: String,
	pub concurrency: String,
	pub cpu_rate_limit: String,
	pub memory_limit: String,
}

#[instrument(level = "debug", skip(pool))]
pub async fn get_resource_groups(pool: &SlotPool) -> Result<Vec<ResourceGroup>, RunError> {
	let sql = "SELECT g.oid, quote_ident(g.rsgname) AS name,
			c.value AS concurrency, cpu.value AS cpuratelimit, mem.value AS memorylimit
		FROM pg_catalog.pg_resgroup g
		JOIN pg_catalog.pg_resgroupcapability c
			ON c.resgroupid = g.oid AND c.reslimittype = 1
		JOIN pg_catalog.pg_resgroupcapability cpu
			ON cpu.resgroupid = g.oid AND cpu.reslimittype = 2
		JOIN pg_catalog.pg_resgroupcapability mem
			ON mem.resgroupid = g.oid AND mem.reslimittype = 3
		ORDER BY g.rsgname";
	Ok(query(pool, "reading resource groups", sql)
		.await?
		.iter()
		.map(|row| ResourceGroup {
			oid: row.get(0),
			name: row.get(1),
			concurrency: row.get(2),
			cpu_rate_limit: row.get(3),
			memory_limit: row.get(4),
		})
		.collect())
}

#[derive(Debug, Clone)]
pub struct Role {
	pub oid: u32,
	pub name: String,
	pub super_user: bool,
	pub inherit: bool,
	pub create_role: bool,
	pub create_db: bool,
	pub can_login: bool,
	pub connection_limit: i32,
	pub password: String,
	pub valid_until: String,
	pub resource_queue: String,
	pub resource_group: String,
	pub comment: String,
}

#[instrument(level = "debug", skip(pool))]
pub async fn get_roles(pool: &SlotPool) -> Result<Vec<Role>, RunError> {
	let resgroup_cols = if pool.version.at_least(5) {
		"coalesce(g.rsgname, '')"
	} else {
		"''"
	};
	let resgroup_join = if pool.version.at_least(5) {
		"LEFT JOIN pg_catalog.pg_resgroup g ON r.rolresgroup = g.oid"
	} else {
		""
	};
	let sql = format!(
		"SELECT r.oid, quote_ident(r.rolname) AS name, r.rolsuper, r.rolinherit,
			r.rolcreaterole, r.rolcreatedb, r.rolcanlogin, r.rolconnlimit,
			coalesce(r.rolpassword, '') AS password,
			coalesce(timezone('UTC', r.rolvaliduntil)::text, '') AS validuntil,
			coalesce(q.rsqname, '') AS resourcequeue,
			{resgroup_cols} AS resourcegroup,
			coalesce(pg_catalog.shobj_description(r.oid, 'pg_authid'), '') AS comment
		FROM pg_catalog.pg_authid r
		LEFT JOIN pg_catalog.pg_resqueue q ON r.rolresqueue = q.oid
		{resgroup_join}
		ORDER BY r.rolname",
	);
	Ok(query(pool, "reading roles", &sql)
		.await?
		.iter()
		.map(|row| Role {
			oid: row.get(0),
			name: row.get(1),
			super_user: row.get(2),
			inherit: row.get(3),
			create_role: row.get(4),
			create_db: row.get(5),
			can_login: row.get(6),
			connection_limit: row.get(7),
			password: row.get(8),
			valid_until: row.get(9),
			resource_queue: row.get(10),
			resource_group: row.get(11),
			comment: row.get(12),
		})
		.collect())
}

#[derive(Debug, Clone)]
pub struct RoleGrant {
	pub role: String,
	pub member: String,
	pub grantor: String,
	pub admin_option: bool,
}

pub async fn get_role_grants(pool: &SlotPool) -> Result<Vec<RoleGrant>, RunError> {
	let sql = "SELECT quote_ident(r.rolname) AS role, quote_ident(m.rolname) AS member,
			coalesce(quote_ident(g.rolname), '') AS grantor, am.admin_option
		FROM pg_catalog.pg_auth_members am
		JOIN pg_catalog.pg_authid r ON am.roleid = r.oid
		JOIN pg_catalog.pg_authid m ON am.member = m.oid
		LEFT JOIN pg_catalog.pg_authid g ON am.grantor = g.oid
		ORDER BY r.rolname, m.rolname";
	Ok(query(pool, "reading role grants", sql)
		.await?
		.iter()
		.map(|row| RoleGrant {
			role: row.get(0),
			member: row.get(1),
			grantor: row.get(2),
			admin_option: row.get(3),
		})
		.collect())
}
