use std::{
	collections::BTreeMap,
	fs,
	path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::{
	cluster::{Cluster, RemoteCommand, RemoteOutput, Scope},
	error::RunError,
	paths::FilePathInfo,
};

/// Oldest plugin API this coordinator understands.
pub const REQUIRED_PLUGIN_VERSION: &str = "0.3.0";

/// The user-supplied plugin configuration file. Options are passed through
/// to the plugin untouched; only the executable path matters here.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
	#[serde(rename = "executablepath")]
	pub executable_path: String,
	#[serde(default)]
	pub options: BTreeMap<String, serde_yaml::Value>,
	#[serde(skip)]
	pub config_path: PathBuf,
}

pub fn read_plugin_config(path: &Path) -> Result<PluginConfig, RunError> {
	let content = fs::read_to_string(path).map_err(|err| {
		RunError::ConfigInvalid(format!(
			"cannot read plugin config {}: {err}",
			path.display()
		))
	})?;
	let mut config: PluginConfig = serde_yaml::from_str(&content).map_err(|err| {
		RunError::ConfigInvalid(format!(
			"cannot parse plugin config {}: {err}",
			path.display()
		))
	})?;
	// every hook receives the /tmp copy, which exists on all hosts
	let filename = path
		.file_name()
		.ok_or_else(|| RunError::ConfigInvalid("plugin config path has no filename".into()))?;
	config.config_path = Path::new("/tmp").join(filename);
	debug!(executable = %config.executable_path, "loaded plugin config");
	Ok(config)
}

impl PluginConfig {
	fn hook_error(
		&self,
		cluster: &Cluster,
		output: &RemoteOutput,
		hook: &str,
	) -> Result<(), RunError> {
		if output.num_errors == 0 {
			return Ok(());
		}
		let content = output.failed_contents().first().copied();
		Err(RunError::PluginHookFailed {
			hook: hook.into(),
			host: content.map_or_else(
				|| "unknown host".into(),
				|content| cluster.hostname(content).into(),
			),
			exit_code: content
				.and_then(|content| output.exit_codes.get(&content))
				.copied()
				.unwrap_or(-1),
			stderr: content
				.and_then(|content| output.stderrs.get(&content))
				.map(|stderr| stderr.trim().into())
				.unwrap_or_default(),
		})
	}

	/// Probe `plugin_api_version` on every host and require at least the
	/// supported minimum everywhere.
	#[instrument(level = "debug", skip(self, cluster))]
	pub async fn check_version_on_all_hosts(&self, cluster: &Cluster) -> Result<String, RunError> {
		let output = cluster
			.run("Checking plugin version", Scope::HostsAndCoordinator, |_| {
				RemoteCommand::new([self.executable_path.as_str(), "plugin_api_version"])
			})
			.await;
		self.hook_error(cluster, &output, "plugin_api_version")?;

		let minimum: node_semver::Version = REQUIRED_PLUGIN_VERSION
			.parse()
			.expect("required plugin version is valid semver");
		let mut found = String::new();
		for (content, stdout) in &output.stdouts {
			let reported = stdout.trim();
			let version: node_semver::Version =
				reported.parse().map_err(|_| RunError::PluginVersionIncompatible {
					found: format!("{reported:?} on {}", cluster.hostname(*content)),
					minimum: minimum.to_string(),
				})?;
			if version < minimum {
				return Err(RunError::PluginVersionIncompatible {
					found: version.to_string(),
					minimum: minimum.to_string(),
				});
			}
			found = version.to_string();
		}
		info!(version = %found, "plugin version verified on all hosts");
		Ok(found)
	}

	/// Copy the config file to `/tmp/.` on every host; hooks on remote
	/// hosts read that copy.
	pub async fn copy_config_to_all_hosts(
		&self,
		cluster: &Cluster,
		local_path: &Path,
	) -> Result<(), RunError> {
		let output = cluster
			.run_local(
				"Distributing plugin config",
				Scope::HostsAndCoordinator,
				|content| {
					RemoteCommand::new([
						"scp".to_string(),
						local_path.display().to_string(),
						format!("{}:/tmp/.", cluster.hostname(content)),
					])
				},
			)
			.await;
		self.hook_error(cluster, &output, "distribute_config")
	}

	pub async fn setup_on_all_hosts(
		&self,
		cluster: &Cluster,
		coordinator_dir: &Path,
	) -> Result<(), RunError> {
		let output = cluster
			.run(
				"Setting up plugin on all hosts",
				Scope::HostsAndCoordinator,
				|_| {
					RemoteCommand::new([
						self.executable_path.clone(),
						"setup_plugin_for_backup".into(),
						self.config_path.display().to_string(),
						coordinator_dir.display().to_string(),
					])
				},
			)
			.await;
		self.hook_error(cluster, &output, "setup_plugin_for_backup")
	}

	/// Hand one coordinator-local file to the plugin for storage.
	///
	/// During teardown `fatal` is false: a failed upload is logged and
	/// cleanup continues.
	pub async fn backup_file(
		&self,
		cluster: &Cluster,
		path: &Path,
		fatal: bool,
	) -> Result<(), RunError> {
		let output = cluster
			.run("Uploading file through plugin", Scope::CoordinatorOnly, |_| {
				RemoteCommand::new([
					self.executable_path.clone(),
					"backup_file".into(),
					self.config_path.display().to_string(),
					path.display().to_string(),
				])
			})
			.await;
		match self.hook_error(cluster, &output, "backup_file") {
			Err(err) if !fatal => {
				warn!(?path, "plugin upload failed during teardown: {err}");
				Ok(())
			}
			other => other,
		}
	}

	/// Upload each segment's TOC from its own host (single-file mode).
	pub async fn backup_segment_tocs(
		&self,
		cluster: &Cluster,
		fp: &FilePathInfo,
	) -> Result<(), RunError> {
		let output = cluster
			.run("Uploading segment TOCs through plugin", Scope::SegmentsOnly, |content| {
				RemoteCommand::new([
					self.executable_path.clone(),
					"backup_file".into(),
					self.config_path.display().to_string(),
					fp.segment_toc_path(content).display().to_string(),
				])
			})
			.await;
		self.hook_error(cluster, &output, "backup_file")
	}

	pub async fn cleanup_on_all_hosts(
		&self,
		cluster: &Cluster,
		coordinator_dir: &Path,
	) -> Result<(), RunError> {
		let output = cluster
			.run(
				"Cleaning up plugin on all hosts",
				Scope::HostsAndCoordinator,
				|_| {
					RemoteCommand::new([
						self.executable_path.clone(),
						"cleanup_plugin_for_backup".into(),
						self.config_path.display().to_string(),
						coordinator_dir.display().to_string(),
					])
				},
			)
			.await;
		self.hook_error(cluster, &output, "cleanup_plugin_for_backup")
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write as _;

	use super::*;

	#[test]
	fn config_parses_and_rewrites_path_to_tmp() {
		let mut file = tempfile::Builder::new()
			.suffix(".yaml")
			.tempfile()
			.unwrap();
		writeln!(
			file,
			"executablepath: /usr/local/bin/backup_plugin\n\
			options:\n  bucket: \"backups\"\n  region: \"eu-1\""
		)
		.unwrap();

		let config = read_plugin_config(file.path()).unwrap();
		assert_eq!(config.executable_path, "/usr/local/bin/backup_plugin");
		assert_eq!(config.options.len(), 2);
		assert_eq!(
			config.config_path,
			Path::new("/tmp").join(file.path().file_name().unwrap())
		);
	}

	#[test]
	fn missing_config_is_a_config_error() {
		let err = read_plugin_config(Path::new("/nonexistent/plugin.yaml")).unwrap_err();
		assert!(matches!(err, RunError::ConfigInvalid(_)));
	}

	#[test]
	fn garbage_config_is_a_config_error() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, ": not yaml : [").unwrap();
		let err = read_plugin_config(file.path()).unwrap_err();
		assert!(matches!(err, RunError::ConfigInvalid(_)));
	}
}
