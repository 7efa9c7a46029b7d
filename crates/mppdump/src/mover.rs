use std::{
	collections::{BTreeMap, VecDeque},
	sync::atomic::{AtomicBool, Ordering},
};

use futures::future::join_all;
use mppdump_postgres::SlotPool;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::{
	cluster::{Cluster, RemoteCommand, Scope},
	error::RunError,
	paths::{FilePathInfo, HelperFile},
	catalog::relations::Relation,
};

/// Name of the per-segment companion executable used in single-file mode.
pub const HELPER_BINARY: &str = "mppdump_helper";

/// The outcome of the copy phase: per-table row counts for the TOC, plus
/// the tables that failed in per-table mode (where a failure skips the
/// table rather than ending the run).
#[derive(Debug, Default)]
pub struct DataResult {
	pub rows_copied: BTreeMap<u32, u64>,
	pub failed: Vec<(String, RunError)>,
}

fn copy_out_sql(fqn: &str, destination: &str, compression: Option<u32>) -> String {
	let program = match compression {
		Some(level) => format!("gzip -c -{level} > {destination}.gz"),
		None => format!("cat - > {destination}"),
	};
	format!(
		"COPY {fqn} TO PROGRAM '{program}' WITH CSV DELIMITER ',' ON SEGMENT \
		IGNORE EXTERNAL PARTITIONS;"
	)
}

/// Per-table mode: every table is an independent COPY writing one file per
/// segment. At most one COPY runs per pool slot; completion order is
/// irrelevant because the results are keyed by table oid.
///
/// A failed COPY is recorded and the worker moves on, unless the session
/// itself is gone, which ends the run.
#[instrument(level = "debug", skip_all, fields(tables = tables.len()))]
pub async fn copy_tables_per_table(
	pool: &SlotPool,
	fp: &FilePathInfo,
	tables: &[Relation],
	compression: Option<u32>,
	terminated: &AtomicBool,
) -> Result<DataResult, RunError> {
	let queue: Mutex<VecDeque<Relation>> = Mutex::new(tables.iter().cloned().collect());

	let workers = (0..pool.num_conns()).map(|slot| {
		let queue = &queue;
		async move {
			let mut result = DataResult::default();
			loop {
				if terminated.load(Ordering::Relaxed) {
					break;
				}
				let Some(table) = queue.lock().await.pop_front() else {
					break;
				};
				let fqn = table.fqn();
				let destination = fp.copy_destination_template(table.oid);
				let sql = copy_out_sql(&fqn, &destination, compression);
				match pool.exec(slot, &sql).await {
					Ok(rows) => {
						result.rows_copied.insert(table.oid, rows);
					}
					Err(err) if err.is_connection_lost() => {
						return Err(RunError::FatalConnection { slot, source: err });
					}
					Err(err) => {
						error!(table = %fqn, "COPY failed, skipping table: {err}");
						result.failed.push((
							fqn.clone(),
							RunError::DataCopyFailed {
								table: fqn,
								rows_copied: 0,
								source: err,
							},
						));
					}
				}
			}
			Ok(result)
		}
	});

	let mut merged = DataResult::default();
	for outcome in join_all(workers).await {
		let part = outcome?;
		merged.rows_copied.extend(part.rows_copied);
		merged.failed.extend(part.failed);
	}
	Ok(merged)
}

/// Check that every segment's helper executable matches this coordinator
/// build before trusting it with the data stream.
pub async fn verify_helper_version(cluster: &Cluster) -> Result<(), RunError> {
	let expected: node_semver::Version = env!("CARGO_PKG_VERSION")
		.parse()
		.expect("crate version is valid semver");

	let output = cluster
		.run("Verifying helper agent version", Scope::SegmentsOnly, |_| {
			RemoteCommand::new([HELPER_BINARY, "--version"])
		})
		.await;
	cluster.check_cluster_error(&output, "Unable to run the helper agent", |content| {
		format!("could not execute {HELPER_BINARY} for segment {content}")
	})?;

	for (content, stdout) in &output.stdouts {
		let reported = stdout.split_whitespace().last().unwrap_or("").to_string();
		let actual: node_semver::Version =
			reported.parse().map_err(|_| RunError::HelperVersionMismatch {
				expected: expected.to_string(),
				actual: format!("unparseable version {stdout:?} on segment {content}"),
			})?;
		if actual != expected {
			return Err(RunError::HelperVersionMismatch {
				expected: expected.to_string(),
				actual: actual.to_string(),
			});
		}
	}
	Ok(())
}

/// Single-file mode setup: ship the ordered oid list, pre-create the first
/// pipe so the first COPY finds it, and launch one helper per segment.
pub async fn setup_single_file_backup(
	cluster: &Cluster,
	fp: &FilePathInfo,
	tables: &[Relation],
	compression: Option<u32>,
	plugin_config_path: Option<&str>,
) -> Result<(), RunError> {
	let oid_lines = tables
		.iter()
		.map(|t| t.oid.to_string())
		.collect::<Vec<_>>()
		.join("\\n");
	let output = cluster
		.run("Writing oid list to segments", Scope::SegmentsOnly, |content| {
			RemoteCommand::shell(format!(
				"printf '{oid_lines}\\n' > {}",
				fp.segment_helper_path(content, HelperFile::Oid).display(),
			))
		})
		.await;
	cluster.check_cluster_error(&output, "Unable to write oid list", |content| {
		format!(
			"could not write {}",
			fp.segment_helper_path(content, HelperFile::Oid).display()
		)
	})?;

	let first_oid = tables.first().map(|t| t.oid).unwrap_or_default();
	let output = cluster
		.run("Creating first segment pipe", Scope::SegmentsOnly, |content| {
			RemoteCommand::new([
				"mkfifo".to_string(),
				fp.segment_pipe_path(content, Some(first_oid))
					.display()
					.to_string(),
			])
		})
		.await;
	cluster.check_cluster_error(&output, "Unable to create segment pipes", |content| {
		format!("could not create the data pipe for segment {content}")
	})?;

	let output = cluster
		.run("Starting helper agents", Scope::SegmentsOnly, |content| {
			let mut helper = format!(
				"nohup {HELPER_BINARY} --backup-agent \
				--toc-file {toc} --oid-file {oid} --pipe-file {pipe} \
				--content {content} --single-data-file",
				toc = fp.segment_toc_path(content).display(),
				oid = fp.segment_helper_path(content, HelperFile::Oid).display(),
				pipe = fp.segment_pipe_path(content, None).display(),
			);
			if let Some(level) = compression {
				helper.push_str(&format!(" --compression-level {level}"));
			}
			if let Some(config) = plugin_config_path {
				helper.push_str(&format!(" --plugin-config {config}"));
			}
			let script = fp.segment_helper_path(content, HelperFile::Script);
			RemoteCommand::shell(format!(
				"echo '{helper} > /dev/null 2>&1 &' > {script} \
				&& chmod +x {script} && sh {script}",
				script = script.display(),
			))
		})
		.await;
	if output.num_errors > 0 {
		let failed = output.failed_contents();
		return Err(RunError::HelperSpawnFailed(format!(
			"helper agent did not start on segments {failed:?}"
		)));
	}
	info!("helper agents started on all segments");
	Ok(())
}

/// Single-file mode data phase: one COPY at a time, in oid-list order. The
/// pipe name carries the current table's oid, so the coordinator serializes
/// table switches while segments stream in parallel with each other.
///
/// Any failure here ends the run: skipping a table would corrupt the
/// concatenated stream the helpers are writing.
#[instrument(level = "debug", skip_all, fields(tables = tables.len()))]
pub async fn copy_tables_single_file(
	pool: &SlotPool,
	cluster: &Cluster,
	fp: &FilePathInfo,
	tables: &[Relation],
	terminated: &AtomicBool,
) -> Result<DataResult, RunError> {
	let mut result = DataResult::default();
	for table in tables {
		if terminated.load(Ordering::Relaxed) {
			break;
		}
		let fqn = table.fqn();
		let destination = fp.pipe_destination_template(table.oid);
		let sql = format!(
			"COPY {fqn} TO PROGRAM 'cat - > {destination}' WITH CSV DELIMITER ',' \
			ON SEGMENT IGNORE EXTERNAL PARTITIONS;"
		);
		match pool.exec(0, &sql).await {
			Ok(rows) => {
				result.rows_copied.insert(table.oid, rows);
			}
			Err(err) => {
				// tell the helpers to stop serving before bailing out
				write_error_sentinels(cluster, fp).await;
				if err.is_connection_lost() {
					return Err(RunError::FatalConnection { slot: 0, source: err });
				}
				return Err(RunError::DataCopyFailed {
					table: fqn,
					rows_copied: result.rows_copied.values().sum(),
					source: err,
				});
			}
		}
	}
	Ok(result)
}

/// Drop the error sentinel next to each helper's pipe so the agents exit
/// cleanly instead of blocking on a reader that will never come.
pub async fn write_error_sentinels(cluster: &Cluster, fp: &FilePathInfo) {
	let output = cluster
		.run("Writing error sentinels", Scope::SegmentsOnly, |content| {
			RemoteCommand::new([
				"touch".to_string(),
				fp.segment_helper_path(content, HelperFile::Error)
					.display()
					.to_string(),
			])
		})
		.await;
	if output.num_errors > 0 {
		warn!(
			failed = ?output.failed_contents(),
			"could not write error sentinel on some segments"
		);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn copy_sql_compressed_and_plain() {
		assert_eq!(
			copy_out_sql("public.things", "/data/mppdump_<SEGID>_x_16384", Some(3)),
			"COPY public.things TO PROGRAM 'gzip -c -3 > /data/mppdump_<SEGID>_x_16384.gz' \
			WITH CSV DELIMITER ',' ON SEGMENT IGNORE EXTERNAL PARTITIONS;"
		);
		assert_eq!(
			copy_out_sql("public.things", "/data/mppdump_<SEGID>_x_16384", None),
			"COPY public.things TO PROGRAM 'cat - > /data/mppdump_<SEGID>_x_16384' \
			WITH CSV DELIMITER ',' ON SEGMENT IGNORE EXTERNAL PARTITIONS;"
		);
	}
}
