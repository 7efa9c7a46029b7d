use std::{
	collections::BTreeMap,
	path::PathBuf,
	process::Stdio,
};

use itertools::Itertools;
use mppdump_postgres::SlotPool;
use tokio::{process::Command, task::JoinSet};
use tracing::{debug, instrument, warn};

use crate::error::RunError;

/// Which nodes a dispatched command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
	CoordinatorOnly,
	SegmentsOnly,
	SegmentsAndCoordinator,
	/// One invocation per distinct host, coordinator host included. Used for
	/// per-host work like distributing a config file.
	HostsAndCoordinator,
}

#[derive(Debug, Clone)]
pub struct SegConfig {
	pub content_id: i32,
	pub hostname: String,
	pub data_dir: PathBuf,
}

/// A command for one node, held as argv so escaping happens in exactly one
/// place (when it is wrapped for ssh), not at every call site.
#[derive(Debug, Clone)]
pub struct RemoteCommand {
	pub argv: Vec<String>,
	pub env: Vec<(String, String)>,
}

impl RemoteCommand {
	pub fn new<I, S>(argv: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			argv: argv.into_iter().map(Into::into).collect(),
			env: Vec::new(),
		}
	}

	/// Run `script` through `sh -c`; for pipelines and redirections.
	pub fn shell(script: impl Into<String>) -> Self {
		Self {
			argv: vec!["sh".into(), "-c".into(), script.into()],
			env: Vec::new(),
		}
	}

	pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.env.push((key.into(), value.into()));
		self
	}
}

/// Aggregated results of one fan-out, keyed by content ID.
#[derive(Debug, Default)]
pub struct RemoteOutput {
	pub stdouts: BTreeMap<i32, String>,
	pub stderrs: BTreeMap<i32, String>,
	pub exit_codes: BTreeMap<i32, i32>,
	pub num_errors: usize,
}

impl RemoteOutput {
	pub fn failed_contents(&self) -> Vec<i32> {
		self.exit_codes
			.iter()
			.filter(|(_, code)| **code != 0)
			.map(|(content, _)| *content)
			.collect()
	}
}

/// The cluster topology and the shell fan-out over it.
///
/// Commands run concurrently, one per target; the coordinator executes
/// locally (the tool always runs there) and segments are reached over
/// non-interactive ssh. Completion order is not guaranteed; results are
/// keyed by content ID.
#[derive(Debug, Clone)]
pub struct Cluster {
	segments: BTreeMap<i32, SegConfig>,
}

impl Cluster {
	pub fn new(segments: Vec<SegConfig>) -> Self {
		Self {
			segments: segments
				.into_iter()
				.map(|seg| (seg.content_id, seg))
				.collect(),
		}
	}

	/// Read the primary topology from the segment configuration catalog.
	pub async fn from_catalog(pool: &SlotPool) -> Result<Self, RunError> {
		let sql = if pool.version.at_least(6) {
			"SELECT content, hostname, datadir
			FROM pg_catalog.gp_segment_configuration
			WHERE role = 'p'
			ORDER BY content"
		} else {
			"SELECT s.content, s.hostname, e.fselocation AS datadir
			FROM pg_catalog.gp_segment_configuration s
			JOIN pg_catalog.pg_filespace_entry e ON s.dbid = e.fsedbid
			JOIN pg_catalog.pg_filespace f ON e.fsefsoid = f.oid
			WHERE s.role = 'p' AND f.fsname = 'pg_system'
			ORDER BY s.content"
		};

		let rows = pool
			.query(0, sql)
			.await
			.map_err(|err| RunError::catalog("reading segment configuration", err))?;

		let segments = rows
			.iter()
			.map(|row| {
				let content: i16 = row.get(0);
				SegConfig {
					content_id: content.into(),
					hostname: row.get(1),
					data_dir: PathBuf::from(row.get::<_, String>(2)),
				}
			})
			.collect();
		Ok(Self::new(segments))
	}

	pub fn coordinator(&self) -> &SegConfig {
		&self.segments[&crate::paths::COORDINATOR]
	}

	pub fn segments(&self) -> impl Iterator<Item = &SegConfig> {
		self.segments.values().filter(|seg| seg.content_id >= 0)
	}

	pub fn seg_dirs(&self) -> BTreeMap<i32, PathBuf> {
		self.segments
			.iter()
			.map(|(content, seg)| (*content, seg.data_dir.clone()))
			.collect()
	}

	/// The common basename prefix of segment data directories, derived from
	/// the coordinator's own directory (`/data/coordinator/mpp-1` → `mpp`).
	pub fn seg_prefix(&self) -> String {
		let base = self
			.coordinator()
			.data_dir
			.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.unwrap_or_default();
		base.strip_suffix("-1").unwrap_or(&base).into()
	}

	/// Content IDs addressed by a scope, one representative per host for
	/// [`Scope::HostsAndCoordinator`].
	pub fn content_ids(&self, scope: Scope) -> Vec<i32> {
		match scope {
			Scope::CoordinatorOnly => vec![crate::paths::COORDINATOR],
			Scope::SegmentsOnly => self.segments().map(|seg| seg.content_id).collect(),
			Scope::SegmentsAndCoordinator => self.segments.keys().copied().collect(),
			Scope::HostsAndCoordinator => self
				.segments
				.values()
				.unique_by(|seg| &seg.hostname)
				.map(|seg| seg.content_id)
				.collect(),
		}
	}

	/// Fan a command out to every target in `scope` and gather the results.
	#[instrument(level = "debug", skip(self, command_fn))]
	pub async fn run<F>(&self, description: &str, scope: Scope, command_fn: F) -> RemoteOutput
	where
		F: Fn(i32) -> RemoteCommand,
	{
		debug!(%description, ?scope, "dispatching cluster command");
		let local_host = &self.coordinator().hostname;

		let mut set = JoinSet::new();
		for content in self.content_ids(scope) {
			let seg = &self.segments[&content];
			let command = command_fn(content);
			let mut process = build_process(command, local_host != &seg.hostname, &seg.hostname);
			set.spawn(async move { (content, process.output().await) });
		}

		collect_outputs(set).await
	}

	pub fn hostname(&self, content_id: i32) -> &str {
		&self.segments[&content_id].hostname
	}

	/// Like [`run`](Self::run), but every command executes on the
	/// coordinator itself. Used when the command names its target host
	/// (`scp file host:/tmp/.`) rather than running there.
	#[instrument(level = "debug", skip(self, command_fn))]
	pub async fn run_local<F>(&self, description: &str, scope: Scope, command_fn: F) -> RemoteOutput
	where
		F: Fn(i32) -> RemoteCommand,
	{
		debug!(%description, ?scope, "dispatching local cluster command");
		let mut set = JoinSet::new();
		for content in self.content_ids(scope) {
			let mut process = build_process(command_fn(content), false, "");
			set.spawn(async move { (content, process.output().await) });
		}
		collect_outputs(set).await
	}

	/// Translate a partially-failed fan-out into a fatal error with one
	/// diagnostic line per failed target.
	pub fn check_cluster_error<F>(
		&self,
		output: &RemoteOutput,
		description: &str,
		diagnostic_fn: F,
	) -> Result<(), RunError>
	where
		F: Fn(i32) -> String,
	{
		if output.num_errors == 0 {
			return Ok(());
		}

		let failed = output.failed_contents();
		let details = failed
			.iter()
			.map(|content| {
				format!(
					"{}: {}",
					diagnostic_fn(*content),
					output
						.stderrs
						.get(content)
						.map(|s| s.trim())
						.filter(|s| !s.is_empty())
						.unwrap_or("(no stderr)")
				)
			})
			.collect::<Vec<_>>()
			.join("\n");

		Err(RunError::ClusterCommandFailed {
			description: description.into(),
			failed: failed.len(),
			total: output.exit_codes.len().max(failed.len()),
			details,
		})
	}
}

async fn collect_outputs(
	mut set: JoinSet<(i32, std::io::Result<std::process::Output>)>,
) -> RemoteOutput {
	let mut output = RemoteOutput::default();
	while let Some(joined) = set.join_next().await {
		let Ok((content, result)) = joined else {
			output.num_errors += 1;
			continue;
		};
		match result {
			Ok(done) => {
				let code = done.status.code().unwrap_or(-1);
				if code != 0 {
					output.num_errors += 1;
				}
				output
					.stdouts
					.insert(content, String::from_utf8_lossy(&done.stdout).into_owned());
				output
					.stderrs
					.insert(content, String::from_utf8_lossy(&done.stderr).into_owned());
				output.exit_codes.insert(content, code);
			}
			Err(err) => {
				warn!(%content, "failed to spawn cluster command: {err}");
				output.stdouts.insert(content, String::new());
				output.stderrs.insert(content, err.to_string());
				output.exit_codes.insert(content, -1);
				output.num_errors += 1;
			}
		}
	}
	output
}

fn build_process(command: RemoteCommand, remote: bool, hostname: &str) -> Command {
	let mut process = if remote {
		let mut wrapped = Command::new("ssh");
		wrapped.args(["-o", "BatchMode=yes", hostname, "--"]);
		let mut argv = Vec::new();
		if !command.env.is_empty() {
			argv.push("env".into());
			argv.extend(command.env.iter().map(|(k, v)| format!("{k}={v}")));
		}
		argv.extend(command.argv);
		wrapped.arg(shell_join(&argv));
		wrapped
	} else {
		let mut direct = Command::new(&command.argv[0]);
		direct.args(&command.argv[1..]);
		for (key, value) in &command.env {
			direct.env(key, value);
		}
		direct
	};
	process.stdin(Stdio::null());
	process.stdout(Stdio::piped());
	process.stderr(Stdio::piped());
	process.kill_on_drop(true);
	process
}

/// Join argv into one POSIX shell word sequence, single-quoting every
/// argument so remote expansion cannot happen.
pub fn shell_join(argv: &[String]) -> String {
	argv.iter()
		.map(|arg| format!("'{}'", arg.replace('\'', r"'\''")))
		.collect::<Vec<_>>()
		.join(" ")
}

#[cfg(test)]
mod tests {
	use super::*;

	fn fixture() -> Cluster {
		Cluster::new(vec![
			SegConfig {
				content_id: -1,
				hostname: "cdw".into(),
				data_dir: PathBuf::from("/data/coordinator/mpp-1"),
			},
			SegConfig {
				content_id: 0,
				hostname: "sdw1".into(),
				data_dir: PathBuf::from("/data/primary/mpp0"),
			},
			SegConfig {
				content_id: 1,
				hostname: "sdw1".into(),
				data_dir: PathBuf::from("/data/primary/mpp1"),
			},
			SegConfig {
				content_id: 2,
				hostname: "sdw2".into(),
				data_dir: PathBuf::from("/data/primary/mpp2"),
			},
		])
	}

	#[test]
	fn scopes_address_the_right_contents() {
		let cluster = fixture();
		assert_eq!(cluster.content_ids(Scope::CoordinatorOnly), vec![-1]);
		assert_eq!(cluster.content_ids(Scope::SegmentsOnly), vec![0, 1, 2]);
		assert_eq!(
			cluster.content_ids(Scope::SegmentsAndCoordinator),
			vec![-1, 0, 1, 2]
		);
		// one per host: coordinator, first segment of sdw1, sdw2
		assert_eq!(cluster.content_ids(Scope::HostsAndCoordinator), vec![-1, 0, 2]);
	}

	#[test]
	fn seg_prefix_strips_coordinator_suffix() {
		assert_eq!(fixture().seg_prefix(), "mpp");
	}

	#[test]
	fn shell_join_quotes_everything() {
		let argv: Vec<String> = vec!["mkdir".into(), "-p".into(), "/tmp/it's here".into()];
		assert_eq!(shell_join(&argv), r"'mkdir' '-p' '/tmp/it'\''s here'");
	}

	#[test]
	fn check_cluster_error_reports_each_failed_host() {
		let cluster = fixture();
		let output = RemoteOutput {
			stdouts: BTreeMap::new(),
			stderrs: BTreeMap::from([(0, "disk full\n".into()), (2, String::new())]),
			exit_codes: BTreeMap::from([(-1, 0), (0, 1), (1, 0), (2, 127)]),
			num_errors: 2,
		};

		let err = cluster
			.check_cluster_error(&output, "creating backup directories", |content| {
				format!("content {content}")
			})
			.unwrap_err();
		let RunError::ClusterCommandFailed {
			failed, details, ..
		} = err
		else {
			panic!("wrong error kind");
		};
		assert_eq!(failed, 2);
		assert!(details.contains("content 0: disk full"));
		assert!(details.contains("content 2: (no stderr)"));
	}

	#[test]
	fn clean_output_passes_check() {
		let cluster = fixture();
		let output = RemoteOutput {
			exit_codes: BTreeMap::from([(-1, 0), (0, 0)]),
			..Default::default()
		};
		assert!(cluster
			.check_cluster_error(&output, "noop", |_| String::new())
			.is_ok());
	}
}
