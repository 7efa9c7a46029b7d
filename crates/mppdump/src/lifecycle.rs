use std::{
	fs,
	path::PathBuf,
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
};

use mppdump_postgres::{ConnectionParams, ServerVersion, pool::connect_control};
use tracing::{debug, info, warn};

use crate::{
	cluster::{Cluster, RemoteCommand, Scope},
	error::RunError,
	mover::HELPER_BINARY,
	paths::FilePathInfo,
};

/// The 14-digit run identifier, allocated once at setup. Everything the run
/// touches embeds it: filenames, TOC entries, the lock file.
pub fn current_timestamp() -> String {
	jiff::Zoned::now().strftime("%Y%m%d%H%M%S").to_string()
}

/// The `/tmp/<timestamp>.lck` file enforcing timestamp uniqueness. Acquire
/// fails if another run holds the same second.
#[derive(Debug)]
pub struct LockFile {
	path: PathBuf,
	held: bool,
}

impl LockFile {
	pub fn acquire(timestamp: &str) -> Result<Self, RunError> {
		let path = PathBuf::from(format!("/tmp/{timestamp}.lck"));
		match fs::File::create_new(&path) {
			Ok(_) => {
				debug!(?path, "acquired backup lock");
				Ok(Self { path, held: true })
			}
			Err(_) => Err(RunError::TimestampLocked {
				timestamp: timestamp.into(),
				path,
			}),
		}
	}

	/// Remove the lock file. Safe to call more than once; teardown and the
	/// drop backstop may both get here.
	pub fn release(&mut self) {
		if self.held {
			self.held = false;
			if let Err(err) = fs::remove_file(&self.path) {
				warn!(path = ?self.path, "failed to remove lock file: {err}");
			}
		}
	}
}

impl Drop for LockFile {
	fn drop(&mut self) {
		self.release();
	}
}

/// Cleanup actions registered as they are acquired and run LIFO at
/// teardown, continuing past failures so one stuck resource cannot leak
/// the rest.
#[derive(Default)]
pub struct Finalizers {
	stack: Vec<(String, Box<dyn FnOnce() -> Result<(), RunError> + Send>)>,
}

impl Finalizers {
	pub fn register(
		&mut self,
		name: impl Into<String>,
		finalizer: impl FnOnce() -> Result<(), RunError> + Send + 'static,
	) {
		self.stack.push((name.into(), Box::new(finalizer)));
	}

	/// Run and drain the stack. Running twice is the same as running once.
	pub fn run(&mut self) -> Vec<RunError> {
		let mut errors = Vec::new();
		while let Some((name, finalizer)) = self.stack.pop() {
			debug!(%name, "running finalizer");
			if let Err(err) = finalizer() {
				warn!(%name, "finalizer failed: {err}");
				errors.push(err);
			}
		}
		errors
	}
}

impl std::fmt::Debug for Finalizers {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Finalizers")
			.field("pending", &self.stack.len())
			.finish()
	}
}

/// Watch for SIGINT/SIGTERM and flip the shared flag. Work in flight checks
/// the flag at phase boundaries; the main control flow owns teardown, so
/// the handler itself never races it.
pub fn spawn_signal_listener(terminated: Arc<AtomicBool>) {
	let flag = terminated.clone();
	tokio::spawn(async move {
		match tokio::signal::ctrl_c().await {
			Ok(()) => {
				info!("received interrupt, aborting backup");
				flag.store(true, Ordering::Relaxed);
			}
			Err(err) => {
				warn!("unable to listen for interrupt signal: {err}");
			}
		}
	});

	#[cfg(unix)]
	{
		use tokio::signal::unix::{SignalKind, signal};
		tokio::spawn(async move {
			let mut sigterm = signal(SignalKind::terminate()).expect("failed to setup SIGTERM handler");
			sigterm.recv().await;
			info!("received SIGTERM, aborting backup");
			terminated.store(true, Ordering::Relaxed);
		});
	}
	#[cfg(not(unix))]
	let _ = terminated;
}

/// COPY sessions can outlive a killed helper agent. Cancel them from a
/// fresh control connection, since the pooled sessions may be the very ones
/// that are stuck.
pub async fn terminate_hanging_copy_sessions(
	params: &ConnectionParams,
	version: &ServerVersion,
	application_name: &str,
) {
	let sql = if version.at_least(6) {
		format!(
			"SELECT pg_catalog.pg_terminate_backend(pid)
			FROM pg_catalog.pg_stat_activity
			WHERE query LIKE 'COPY %' AND application_name = '{application_name}'
				AND pid != pg_catalog.pg_backend_pid()"
		)
	} else {
		format!(
			"SELECT pg_catalog.pg_terminate_backend(procpid)
			FROM pg_catalog.pg_stat_activity
			WHERE current_query LIKE 'COPY %' AND application_name = '{application_name}'
				AND procpid != pg_catalog.pg_backend_pid()"
		)
	};

	match connect_control(params, application_name).await {
		Ok(client) => {
			if let Err(err) = client.simple_query(&sql).await {
				warn!("could not cancel orphaned COPY sessions: {err}");
			} else {
				info!("cancelled any orphaned COPY sessions");
			}
		}
		Err(err) => warn!("could not open control connection for COPY cleanup: {err}"),
	}
}

/// Remove every helper artifact of this run from every segment: pipes, oid
/// lists, scripts, error sentinels.
pub async fn clean_up_helper_files(cluster: &Cluster, fp: &FilePathInfo) {
	let output = cluster
		.run("Removing helper artifacts", Scope::SegmentsOnly, |content| {
			RemoteCommand::shell(format!("rm -f {}", fp.helper_artifact_glob(content)))
		})
		.await;
	if output.num_errors > 0 {
		warn!(
			failed = ?output.failed_contents(),
			"could not remove helper artifacts on some segments"
		);
	}
}

/// Kill helper agents left running after an aborted single-file backup.
pub async fn clean_up_segment_helper_processes(cluster: &Cluster, fp: &FilePathInfo) {
	let pattern = format!("{HELPER_BINARY}.*{}", fp.timestamp());
	let output = cluster
		.run("Stopping helper agents", Scope::SegmentsOnly, |_| {
			// pkill exits 1 when nothing matched, which is the good case
			RemoteCommand::shell(format!("pkill -f '{pattern}' || true"))
		})
		.await;
	if output.num_errors > 0 {
		warn!(
			failed = ?output.failed_contents(),
			"could not stop helper agents on some segments"
		);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn timestamp_is_fourteen_digits() {
		let ts = current_timestamp();
		assert_eq!(ts.len(), 14);
		assert!(ts.chars().all(|c| c.is_ascii_digit()));
	}

	#[test]
	fn lock_file_is_exclusive_and_released_once() {
		let timestamp = format!("test{}", std::process::id());
		let mut lock = LockFile::acquire(&timestamp).unwrap();
		let second = LockFile::acquire(&timestamp);
		assert!(matches!(
			second,
			Err(RunError::TimestampLocked { .. })
		));

		lock.release();
		lock.release(); // second call is a no-op

		// the path is free again
		let mut lock = LockFile::acquire(&timestamp).unwrap();
		lock.release();
	}

	#[test]
	fn finalizers_run_lifo_and_collect_errors() {
		use std::sync::Mutex;

		let order = Arc::new(Mutex::new(Vec::new()));
		let mut finalizers = Finalizers::default();
		for name in ["first", "second", "third"] {
			let order = order.clone();
			finalizers.register(name, move || {
				order.lock().unwrap().push(name);
				if name == "second" {
					Err(RunError::Terminated)
				} else {
					Ok(())
				}
			});
		}

		let errors = finalizers.run();
		assert_eq!(*order.lock().unwrap(), ["third", "second", "first"]);
		assert_eq!(errors.len(), 1);

		// idempotent: nothing left to run
		assert!(finalizers.run().is_empty());
		assert_eq!(order.lock().unwrap().len(), 3);
	}
}
