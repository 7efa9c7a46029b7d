use std::env;

use tokio_postgres::Config;

/// Where and how to connect, resolved once from the standard libpq
/// environment variables.
///
/// Unlike a connection URL, these are resolved on the coordinator host where
/// the tool runs, so `PGHOST` may well be a Unix socket directory.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
	pub host: String,
	pub port: u16,
	pub user: String,
	pub password: Option<String>,
	pub dbname: String,
}

impl ConnectionParams {
	/// Resolve connection parameters from `PGHOST`, `PGPORT`, `PGUSER` and
	/// `PGPASSWORD`, with the usual defaults for a local cluster.
	pub fn from_env(dbname: &str) -> Self {
		let user = env::var("PGUSER")
			.ok()
			.filter(|u| !u.is_empty())
			.or_else(|| env::var("USER").ok())
			.unwrap_or_else(|| "postgres".into());

		Self {
			host: env::var("PGHOST")
				.ok()
				.filter(|h| !h.is_empty())
				.unwrap_or_else(|| "localhost".into()),
			port: env::var("PGPORT")
				.ok()
				.and_then(|p| p.parse().ok())
				.unwrap_or(5432),
			user,
			password: env::var("PGPASSWORD").ok().filter(|p| !p.is_empty()),
			dbname: dbname.into(),
		}
	}

	pub fn config(&self, application_name: &str) -> Config {
		let mut config = Config::new();
		config
			.host(&self.host)
			.port(self.port)
			.user(&self.user)
			.dbname(&self.dbname)
			.application_name(application_name);
		if let Some(password) = &self.password {
			config.password(password);
		}
		config
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_without_environment() {
		temp_env::with_vars_unset(["PGHOST", "PGPORT", "PGUSER", "PGPASSWORD", "USER"], || {
			let params = ConnectionParams::from_env("things");
			assert_eq!(params.host, "localhost");
			assert_eq!(params.port, 5432);
			assert_eq!(params.user, "postgres");
			assert_eq!(params.password, None);
			assert_eq!(params.dbname, "things");
		});
	}

	#[test]
	fn environment_overrides() {
		temp_env::with_vars(
			[
				("PGHOST", Some("db.internal")),
				("PGPORT", Some("6432")),
				("PGUSER", Some("backup")),
				("PGPASSWORD", Some("hunter2")),
			],
			|| {
				let params = ConnectionParams::from_env("things");
				assert_eq!(params.host, "db.internal");
				assert_eq!(params.port, 6432);
				assert_eq!(params.user, "backup");
				assert_eq!(params.password.as_deref(), Some("hunter2"));
			},
		);
	}

	#[test]
	fn bad_port_falls_back() {
		temp_env::with_vars([("PGPORT", Some("not-a-port"))], || {
			let params = ConnectionParams::from_env("things");
			assert_eq!(params.port, 5432);
		});
	}
}
