use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, warn};

use crate::{params::ConnectionParams, version::ServerVersion};

#[derive(Debug, Error)]
pub enum PoolError {
	#[error("connecting to database {dbname}")]
	Connect {
		dbname: String,
		#[source]
		source: tokio_postgres::Error,
	},

	#[error("executing `{sql}` on connection {slot}")]
	Exec {
		slot: usize,
		sql: String,
		#[source]
		source: tokio_postgres::Error,
	},

	#[error("connection {slot} does not exist (pool has {size})")]
	BadSlot { slot: usize, size: usize },

	#[error("could not establish a shared snapshot across the pool")]
	Snapshot {
		#[source]
		source: tokio_postgres::Error,
	},

	#[error("`{sql}` did not return a single value")]
	Shape { sql: String },
}

impl PoolError {
	/// True when the underlying session is gone, as opposed to the statement
	/// merely failing. The caller treats these as fatal for the whole run.
	pub fn is_connection_lost(&self) -> bool {
		match self {
			Self::Exec { source, .. } => source.is_closed(),
			Self::Connect { source, .. } => source.is_closed(),
			_ => false,
		}
	}
}

struct Slot {
	client: Client,
	driver: JoinHandle<()>,
}

/// A fixed set of database sessions, addressed by slot number.
///
/// Unlike a checkout/return pool, every consumer names the slot it wants:
/// each slot holds one transaction open for the entire run, and the run
/// pins work (metadata on slot 0, one table copy per slot) to specific
/// sessions. All slots observe the same snapshot, exported by slot 0.
pub struct SlotPool {
	slots: Vec<Slot>,
	pub dbname: String,
	pub version: ServerVersion,
	snapshot_id: Option<String>,
}

impl SlotPool {
	/// Open `num_jobs` sessions and detect the server version.
	///
	/// Session parameters and transactions are not set up here; call
	/// [`begin_with_shared_snapshot`](Self::begin_with_shared_snapshot) once
	/// per-session configuration is done.
	pub async fn connect(
		params: &ConnectionParams,
		num_jobs: usize,
		application_name: &str,
	) -> Result<Self, PoolError> {
		let config = params.config(application_name);

		let mut slots = Vec::with_capacity(num_jobs.max(1));
		for slot in 0..num_jobs.max(1) {
			debug!(%slot, dbname = %params.dbname, "opening database session");
			let (client, connection) =
				config
					.connect(NoTls)
					.await
					.map_err(|source| PoolError::Connect {
						dbname: params.dbname.clone(),
						source,
					})?;
			let driver = tokio::spawn(async move {
				if let Err(err) = connection.await {
					warn!(%slot, "database connection error: {err}");
				}
			});
			slots.push(Slot { client, driver });
		}

		let mut pool = Self {
			slots,
			dbname: params.dbname.clone(),
			version: ServerVersion::parse(""),
			snapshot_id: None,
		};
		let banner = pool.select_string(0, "SELECT pg_catalog.version()").await?;
		pool.version = ServerVersion::parse(&banner);
		debug!(version = %pool.version.version_string, "detected server version");

		Ok(pool)
	}

	pub fn num_conns(&self) -> usize {
		self.slots.len()
	}

	pub fn snapshot_id(&self) -> Option<&str> {
		self.snapshot_id.as_deref()
	}

	fn slot(&self, slot: usize) -> Result<&Slot, PoolError> {
		self.slots.get(slot).ok_or(PoolError::BadSlot {
			slot,
			size: self.slots.len(),
		})
	}

	/// Run a statement, returning the affected row count from the command
	/// tag (for `COPY`, the number of rows copied).
	pub async fn exec(&self, slot: usize, sql: &str) -> Result<u64, PoolError> {
		self.slot(slot)?
			.client
			.execute(sql, &[])
			.await
			.map_err(|source| PoolError::Exec {
				slot,
				sql: sql.into(),
				source,
			})
	}

	pub async fn query(&self, slot: usize, sql: &str) -> Result<Vec<Row>, PoolError> {
		self.slot(slot)?
			.client
			.query(sql, &[])
			.await
			.map_err(|source| PoolError::Exec {
				slot,
				sql: sql.into(),
				source,
			})
	}

	/// Run a query expected to return exactly one row with one text column.
	pub async fn select_string(&self, slot: usize, sql: &str) -> Result<String, PoolError> {
		let rows = self.query(slot, sql).await?;
		match rows.as_slice() {
			[row] => Ok(row.get(0)),
			_ => Err(PoolError::Shape { sql: sql.into() }),
		}
	}

	/// Run a query returning any number of rows of one text column.
	pub async fn select_strings(&self, slot: usize, sql: &str) -> Result<Vec<String>, PoolError> {
		Ok(self
			.query(slot, sql)
			.await?
			.iter()
			.map(|row| row.get(0))
			.collect())
	}

	pub async fn begin(&self, slot: usize) -> Result<(), PoolError> {
		self.exec_simple(slot, "BEGIN TRANSACTION ISOLATION LEVEL REPEATABLE READ")
			.await
	}

	pub async fn commit(&self, slot: usize) -> Result<(), PoolError> {
		self.exec_simple(slot, "COMMIT").await
	}

	pub async fn rollback(&self, slot: usize) -> Result<(), PoolError> {
		self.exec_simple(slot, "ROLLBACK").await
	}

	async fn exec_simple(&self, slot: usize, sql: &str) -> Result<(), PoolError> {
		self.slot(slot)?
			.client
			.batch_execute(sql)
			.await
			.map_err(|source| PoolError::Exec {
				slot,
				sql: sql.into(),
				source,
			})
	}

	/// Begin one transaction per slot, all observing the same snapshot.
	///
	/// Slot 0 opens a repeatable-read transaction and exports its snapshot;
	/// every other slot imports it, so data copied on any slot is consistent
	/// with the metadata read on slot 0.
	pub async fn begin_with_shared_snapshot(&mut self) -> Result<(), PoolError> {
		self.begin(0).await?;

		if self.slots.len() > 1 {
			let snapshot_id = self
				.select_string(0, "SELECT pg_catalog.pg_export_snapshot()")
				.await
				.map_err(|err| match err {
					PoolError::Exec { source, .. } => PoolError::Snapshot { source },
					other => other,
				})?;
			debug!(%snapshot_id, "exported backup snapshot");

			for slot in 1..self.slots.len() {
				self.begin(slot).await?;
				let import = format!(
					"SET TRANSACTION SNAPSHOT '{}'",
					snapshot_id.replace('\'', "''")
				);
				self.slot(slot)?
					.client
					.batch_execute(&import)
					.await
					.map_err(|source| PoolError::Snapshot { source })?;
			}
			self.snapshot_id = Some(snapshot_id);
		}

		Ok(())
	}

	/// Drop every session. In-flight statements are abandoned server-side.
	pub fn close(self) {
		for slot in self.slots {
			drop(slot.client);
			slot.driver.abort();
		}
	}
}

/// One extra session outside the pool, for control statements (such as
/// cancelling orphaned `COPY` commands) while the pool itself may be wedged.
pub async fn connect_control(
	params: &ConnectionParams,
	application_name: &str,
) -> Result<Client, PoolError> {
	let (client, connection) = params
		.config(application_name)
		.connect(NoTls)
		.await
		.map_err(|source| PoolError::Connect {
			dbname: params.dbname.clone(),
			source,
		})?;
	tokio::spawn(async move {
		if let Err(err) = connection.await {
			warn!("control connection error: {err}");
		}
	});
	Ok(client)
}
