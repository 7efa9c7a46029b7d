use std::{collections::BTreeMap, fmt::Write as _, fs, path::Path};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::RunError;

/// Machine-readable snapshot of everything that shaped the run. A restore
/// reads this to know how to interpret the artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
	pub backup_dir: Option<String>,
	pub backup_version: String,
	pub compressed: bool,
	pub compression_level: u32,
	pub database_name: String,
	pub database_version: String,
	pub data_only: bool,
	pub exclude_schema_filtered: bool,
	pub exclude_table_filtered: bool,
	pub include_schema_filtered: bool,
	pub include_table_filtered: bool,
	pub leaf_partition_data: bool,
	pub metadata_only: bool,
	pub plugin: Option<String>,
	pub single_data_file: bool,
	pub timestamp: String,
	pub with_statistics: bool,
}

/// The human-facing run summary, written even for failed runs as long as the
/// backup directory came into existence.
#[derive(Debug, Clone)]
pub struct Report {
	pub config: BackupConfig,
	pub database_size: String,
	pub params_string: String,
}

impl Report {
	pub fn new(config: BackupConfig) -> Self {
		let mut report = Self {
			config,
			database_size: String::new(),
			params_string: String::new(),
		};
		report.construct_params_string();
		report
	}

	/// Render the flag set into the fixed block of `name: value` lines shown
	/// in the report and logged at startup.
	pub fn construct_params_string(&mut self) {
		let compression = if self.config.compressed {
			format!("gzip (level {})", self.config.compression_level)
		} else {
			"None".into()
		};

		let section = match (self.config.metadata_only, self.config.data_only) {
			(true, _) => "Metadata Only",
			(_, true) => "Data Only",
			_ => "All Sections",
		};

		let mut filtering = Vec::new();
		if self.config.include_schema_filtered {
			filtering.push("Include Schema");
		}
		if self.config.exclude_schema_filtered {
			filtering.push("Exclude Schema");
		}
		if self.config.include_table_filtered {
			filtering.push("Include Table");
		}
		if self.config.exclude_table_filtered {
			filtering.push("Exclude Table");
		}
		let filtering = if filtering.is_empty() {
			"None".into()
		} else {
			filtering.join(", ")
		};

		let data_format = if self.config.single_data_file {
			"Single Data File Per Segment"
		} else {
			"Multiple Data Files Per Segment"
		};

		self.params_string = format!(
			"compression: {compression}\n\
			backup section: {section}\n\
			object filtering: {filtering}\n\
			includes statistics: {}\n\
			data file format: {data_format}",
			if self.config.with_statistics { "Yes" } else { "No" },
		);
	}

	pub fn write_config_file(&self, path: &Path) -> Result<(), RunError> {
		let emit_err = |source| RunError::EmitIoFailed {
			path: path.into(),
			source,
		};
		let yaml = serde_yaml::to_string(&self.config)
			.map_err(|err| emit_err(std::io::Error::other(err)))?;
		fs::write(path, yaml).map_err(emit_err)?;
		debug!(?path, "wrote backup config file");
		Ok(())
	}

	/// Write the report text. `error` of `None` means the run completed.
	pub fn write_report_file(
		&self,
		path: &Path,
		object_counts: &BTreeMap<String, usize>,
		error: Option<&str>,
	) -> Result<(), RunError> {
		let mut text = String::new();
		let _ = writeln!(text, "MPP Database Backup Report\n");
		let _ = writeln!(text, "timestamp key:         {}", self.config.timestamp);
		let _ = writeln!(text, "database name:         {}", self.config.database_name);
		let _ = writeln!(text, "database version:      {}", self.config.database_version);
		let _ = writeln!(text, "mppdump version:       {}", self.config.backup_version);
		if let Some(plugin) = &self.config.plugin {
			let _ = writeln!(text, "plugin executable:     {plugin}");
		}
		let _ = writeln!(text, "\nbackup parameters:");
		for line in self.params_string.lines() {
			let _ = writeln!(text, "  {line}");
		}
		if !self.database_size.is_empty() {
			let _ = writeln!(text, "\ndatabase size: {}", self.database_size);
		}

		if !object_counts.is_empty() {
			let _ = writeln!(text, "\ncount of database objects in backup:");
			let width = object_counts.keys().map(String::len).max().unwrap_or(0);
			for (kind, count) in object_counts {
				let _ = writeln!(text, "  {kind:width$}  {count}");
			}
		}

		match error {
			None => {
				let _ = writeln!(text, "\nbackup status: complete");
			}
			Some(message) => {
				let _ = writeln!(text, "\nbackup status: failed");
				let _ = writeln!(text, "backup error: {message}");
			}
		}

		fs::write(path, text).map_err(|source| RunError::EmitIoFailed {
			path: path.into(),
			source,
		})?;
		info!(?path, "wrote backup report");
		Ok(())
	}
}

/// Mail the report to every address in `$HOME/mail_contacts`, if that file
/// exists. Failures never fail the run; a missing `mail` binary only warns.
pub async fn email_report(report_path: &Path, timestamp: &str) {
	let Some(home) = std::env::var_os("HOME") else {
		return;
	};
	let contacts_path = Path::new(&home).join("mail_contacts");
	let Ok(contacts) = fs::read_to_string(&contacts_path) else {
		debug!(?contacts_path, "no mail contacts file, skipping report email");
		return;
	};
	let recipients: Vec<&str> = contacts
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty())
		.collect();
	if recipients.is_empty() {
		return;
	}

	let status = Command::new("sh")
		.arg("-c")
		.arg(format!(
			"mail -s 'mppdump {timestamp} report' {} < '{}'",
			recipients.join(" "),
			report_path.display(),
		))
		.status()
		.await;
	match status {
		Ok(status) if status.success() => info!(count = recipients.len(), "emailed backup report"),
		Ok(status) => warn!(?status, "mail utility failed to send the report"),
		Err(err) => warn!("could not invoke the mail utility: {err}"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn config() -> BackupConfig {
		BackupConfig {
			backup_dir: None,
			backup_version: "1.0.0".into(),
			compressed: true,
			compression_level: 1,
			database_name: "things".into(),
			database_version: "6.14.0".into(),
			data_only: false,
			exclude_schema_filtered: false,
			exclude_table_filtered: true,
			include_schema_filtered: false,
			include_table_filtered: false,
			leaf_partition_data: false,
			metadata_only: false,
			plugin: None,
			single_data_file: true,
			timestamp: "20260801123456".into(),
			with_statistics: false,
		}
	}

	#[test]
	fn params_string_covers_the_flag_set() {
		let report = Report::new(config());
		assert_eq!(
			report.params_string,
			"compression: gzip (level 1)\n\
			backup section: All Sections\n\
			object filtering: Exclude Table\n\
			includes statistics: No\n\
			data file format: Single Data File Per Segment"
		);
	}

	#[test]
	fn metadata_only_wins_the_section_line() {
		let mut config = config();
		config.metadata_only = true;
		config.compressed = false;
		let report = Report::new(config);
		assert!(report.params_string.contains("backup section: Metadata Only"));
		assert!(report.params_string.contains("compression: None"));
	}

	#[test]
	fn report_file_lists_counts_and_status() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("report");
		let report = Report::new(config());
		let counts = BTreeMap::from([("tables".into(), 12), ("views".into(), 3)]);

		report.write_report_file(&path, &counts, None).unwrap();
		let text = fs::read_to_string(&path).unwrap();
		assert!(text.contains("timestamp key:         20260801123456"));
		assert!(text.contains("tables  12"));
		assert!(text.contains("backup status: complete"));
	}

	#[test]
	fn failed_report_carries_the_error() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("report");
		let report = Report::new(config());

		report
			.write_report_file(&path, &BTreeMap::new(), Some("terminated by user signal"))
			.unwrap();
		let text = fs::read_to_string(&path).unwrap();
		assert!(text.contains("backup status: failed"));
		assert!(text.contains("backup error: terminated by user signal"));
	}

	#[test]
	fn config_file_round_trips() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.yaml");
		let report = Report::new(config());
		report.write_config_file(&path).unwrap();

		let parsed: BackupConfig =
			serde_yaml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
		assert_eq!(parsed.database_name, "things");
		assert!(parsed.single_data_file);
	}
}
