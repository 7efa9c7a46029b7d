use std::path::PathBuf;

use crate::{error::RunError, filters::FilterSet};

/// The validated, immutable shape of one backup run. Computed once from the
/// CLI arguments before any resource is acquired; nothing mutates it
/// afterwards.
#[derive(Debug, Clone)]
pub struct BackupOptions {
	pub dbname: String,
	pub backup_dir: Option<PathBuf>,
	pub jobs: usize,
	/// `None` disables compression entirely.
	pub compression: Option<u32>,
	pub single_data_file: bool,
	pub leaf_partition_data: bool,
	pub metadata_only: bool,
	pub data_only: bool,
	pub with_stats: bool,
	pub plugin_config_path: Option<PathBuf>,
	pub filters: FilterSet,
}

impl BackupOptions {
	pub fn validate(&self) -> Result<(), RunError> {
		let invalid = |message: &str| Err(RunError::ConfigInvalid(message.into()));

		if self.jobs == 0 {
			return invalid("--jobs must be at least 1");
		}
		if let Some(level) = self.compression
			&& !(1..=9).contains(&level)
		{
			return invalid("--compression-level must be between 1 and 9");
		}
		if self.single_data_file && self.jobs > 1 {
			return invalid("--single-data-file cannot be used with --jobs greater than 1");
		}
		if self.metadata_only && self.data_only {
			return invalid("--metadata-only and --data-only cannot be used together");
		}
		if let Some(dir) = &self.backup_dir
			&& !dir.is_absolute()
		{
			return invalid("--backup-dir must be an absolute path");
		}

		let filters = &self.filters;
		if !filters.include_schemas.is_empty() && !filters.include_tables.is_empty() {
			return invalid("--include-schema cannot be used with --include-table");
		}
		if !filters.include_schemas.is_empty() && !filters.exclude_schemas.is_empty() {
			return invalid("--include-schema cannot be used with --exclude-schema");
		}
		if !filters.exclude_tables.is_empty() && !filters.exclude_schemas.is_empty() {
			return invalid("--exclude-table cannot be used with --exclude-schema");
		}
		if !filters.include_tables.is_empty() && !filters.exclude_tables.is_empty() {
			return invalid("--include-table cannot be used with --exclude-table");
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn options() -> BackupOptions {
		BackupOptions {
			dbname: "things".into(),
			backup_dir: None,
			jobs: 1,
			compression: Some(1),
			single_data_file: false,
			leaf_partition_data: false,
			metadata_only: false,
			data_only: false,
			with_stats: false,
			plugin_config_path: None,
			filters: FilterSet::default(),
		}
	}

	#[test]
	fn defaults_validate() {
		assert!(options().validate().is_ok());
	}

	#[test]
	fn compression_level_bounds() {
		let mut opts = options();
		opts.compression = Some(9);
		assert!(opts.validate().is_ok());
		opts.compression = Some(10);
		assert!(opts.validate().is_err());
		opts.compression = None;
		assert!(opts.validate().is_ok());
	}

	#[test]
	fn single_data_file_rejects_parallel_jobs() {
		let mut opts = options();
		opts.single_data_file = true;
		opts.jobs = 4;
		assert!(opts.validate().is_err());
		opts.jobs = 1;
		assert!(opts.validate().is_ok());
	}

	#[test]
	fn relative_backup_dir_is_rejected() {
		let mut opts = options();
		opts.backup_dir = Some("relative/path".into());
		assert!(opts.validate().is_err());
		opts.backup_dir = Some("/backups".into());
		assert!(opts.validate().is_ok());
	}

	#[test]
	fn conflicting_filters_are_rejected() {
		let mut opts = options();
		opts.filters.include_schemas = vec!["sales".into()];
		opts.filters.include_tables = vec!["public.things".into()];
		assert!(opts.validate().is_err());

		let mut opts = options();
		opts.filters.exclude_schemas = vec!["scratch".into()];
		opts.filters.exclude_tables = vec!["public.noisy".into()];
		assert!(opts.validate().is_err());
	}
}
