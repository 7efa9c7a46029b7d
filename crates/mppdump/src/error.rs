use std::path::PathBuf;

use miette::Diagnostic;
use mppdump_postgres::PoolError;
use thiserror::Error;

/// Exit code for a backup stopped by an interrupt or termination signal.
pub const EXIT_TERMINATED: i32 = 2;

/// Everything that can end a backup run early.
///
/// Most variants are fatal for the whole run and travel up to the backup
/// action root, which is the only place that recovers: it records the message
/// in the report, runs teardown, and maps the error to the process exit code.
/// `DataCopyFailed` is the exception; in per-table mode it is logged and the
/// run continues with the remaining tables.
#[derive(Debug, Error, Diagnostic)]
pub enum RunError {
	#[error("invalid configuration: {0}")]
	#[diagnostic(code(mppdump::config))]
	ConfigInvalid(String),

	#[error("a backup with timestamp {timestamp} is already in progress (lock {path})")]
	#[diagnostic(
		code(mppdump::timestamp_locked),
		help("wait a second and retry, or remove the stale lock file")
	)]
	TimestampLocked { timestamp: String, path: PathBuf },

	#[error("could not establish a consistent snapshot across {jobs} connections")]
	#[diagnostic(code(mppdump::snapshot))]
	SnapshotUnavailable {
		jobs: usize,
		#[source]
		source: PoolError,
	},

	#[error("catalog query failed while {context}")]
	#[diagnostic(code(mppdump::catalog_query))]
	CatalogQueryFailed {
		context: String,
		#[source]
		source: PoolError,
	},

	#[error("dependency cycle detected: {cycle}")]
	#[diagnostic(code(mppdump::dependency_cycle))]
	CycleDetected { cycle: String },

	#[error("{object} depends on {missing}, which is not part of the backup set")]
	#[diagnostic(code(mppdump::unmet_dependency))]
	UnmetDependency { object: String, missing: String },

	#[error("failed writing {path}")]
	#[diagnostic(code(mppdump::emit_io))]
	EmitIoFailed {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("COPY of {table} failed after {rows_copied} rows")]
	#[diagnostic(code(mppdump::data_copy))]
	DataCopyFailed {
		table: String,
		rows_copied: u64,
		#[source]
		source: PoolError,
	},

	#[error("segment helper reports version {actual}, coordinator is {expected}")]
	#[diagnostic(code(mppdump::helper_version))]
	HelperVersionMismatch { expected: String, actual: String },

	#[error("could not start the segment helper: {0}")]
	#[diagnostic(code(mppdump::helper_spawn))]
	HelperSpawnFailed(String),

	#[error("plugin hook {hook} failed on {host} (exit code {exit_code})")]
	#[diagnostic(code(mppdump::plugin_hook))]
	PluginHookFailed {
		hook: String,
		host: String,
		exit_code: i32,
		stderr: String,
	},

	#[error("plugin API version {found} is below the minimum supported {minimum}")]
	#[diagnostic(code(mppdump::plugin_version))]
	PluginVersionIncompatible { found: String, minimum: String },

	#[error("{kind} {name} does not exist in the database")]
	#[diagnostic(code(mppdump::unknown_filter_target))]
	UnknownFilterTarget { kind: &'static str, name: String },

	#[error("terminated by user signal")]
	#[diagnostic(code(mppdump::terminated))]
	Terminated,

	#[error("lost database connection {slot} irrecoverably")]
	#[diagnostic(code(mppdump::fatal_connection))]
	FatalConnection {
		slot: usize,
		#[source]
		source: PoolError,
	},

	#[error("{description} failed on {failed} of {total} hosts")]
	#[diagnostic(code(mppdump::cluster_command))]
	ClusterCommandFailed {
		description: String,
		failed: usize,
		total: usize,
		details: String,
	},
}

impl RunError {
	/// Wrap a pool error from a metadata query, upgrading lost connections
	/// to the fatal-connection kind.
	pub fn catalog(context: impl Into<String>, source: PoolError) -> Self {
		if source.is_connection_lost() {
			Self::FatalConnection { slot: 0, source }
		} else {
			Self::CatalogQueryFailed {
				context: context.into(),
				source,
			}
		}
	}
}

/// Map a finished run to the process exit code: 0 success, 1 error,
/// 2 terminated by signal.
pub fn exit_code(result: &miette::Result<()>) -> i32 {
	match result {
		Ok(()) => 0,
		Err(report) => match report.downcast_ref::<RunError>() {
			Some(RunError::Terminated) => EXIT_TERMINATED,
			_ => 1,
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn terminated_maps_to_exit_code_two() {
		let result: miette::Result<()> = Err(RunError::Terminated.into());
		assert_eq!(exit_code(&result), 2);
	}

	#[test]
	fn other_errors_map_to_exit_code_one() {
		let result: miette::Result<()> = Err(RunError::ConfigInvalid("bad".into()).into());
		assert_eq!(exit_code(&result), 1);
		assert_eq!(exit_code(&Ok(())), 0);
	}
}
