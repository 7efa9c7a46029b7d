use std::{collections::BTreeMap, path::PathBuf};

/// Content ID of the coordinator node.
pub const COORDINATOR: i32 = -1;

/// Token substituted by the server in `COPY ... ON SEGMENT` destinations.
pub const SEGID_TOKEN: &str = "<SEGID>";

/// Token substituted by the server with the segment's data directory.
pub const SEG_DATA_DIR_TOKEN: &str = "<SEG_DATA_DIR>";

/// Helper-agent companion files living next to the segment data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperFile {
	/// Ordered list of table oids the helper will serve.
	Oid,
	/// The script that launches the helper in the background.
	Script,
	/// Error sentinel; its presence tells the helper to exit.
	Error,
}

impl HelperFile {
	fn suffix(self) -> &'static str {
		match self {
			Self::Oid => "oid",
			Self::Script => "script",
			Self::Error => "error",
		}
	}
}

/// Deterministic paths for every artifact of one backup run.
///
/// Pure and immutable once constructed. Every file the run touches is named
/// through here; path assembly anywhere else is a bug.
///
/// The general shape is
/// `<base>/<segPrefix><id>/backups/<yyyymmdd>/<timestamp>/mppdump_<id>_<timestamp>[_suffix]`
/// where `<base>` is the user-specified backup directory if one was given,
/// or each node's own data directory otherwise.
#[derive(Debug, Clone)]
pub struct FilePathInfo {
	timestamp: String,
	seg_prefix: String,
	user_backup_dir: Option<PathBuf>,
	seg_dirs: BTreeMap<i32, PathBuf>,
}

impl FilePathInfo {
	pub fn new(
		seg_dirs: BTreeMap<i32, PathBuf>,
		user_backup_dir: Option<PathBuf>,
		timestamp: &str,
		seg_prefix: &str,
	) -> Self {
		Self {
			timestamp: timestamp.into(),
			seg_prefix: seg_prefix.into(),
			user_backup_dir,
			seg_dirs,
		}
	}

	pub fn timestamp(&self) -> &str {
		&self.timestamp
	}

	fn date_dir(&self) -> &str {
		&self.timestamp[..8]
	}

	fn backup_root(&self, content_id: i32) -> PathBuf {
		match &self.user_backup_dir {
			Some(dir) => dir.join(format!("{}{content_id}", self.seg_prefix)),
			None => self
				.seg_dirs
				.get(&content_id)
				.cloned()
				.unwrap_or_else(|| PathBuf::from(format!("{}{content_id}", self.seg_prefix))),
		}
	}

	/// The run's directory on one node:
	/// `<base>/backups/<yyyymmdd>/<timestamp>`.
	pub fn dir_for_content(&self, content_id: i32) -> PathBuf {
		self.backup_root(content_id)
			.join("backups")
			.join(self.date_dir())
			.join(&self.timestamp)
	}

	fn coordinator_file(&self, suffix: &str) -> PathBuf {
		self.dir_for_content(COORDINATOR)
			.join(format!("mppdump_{}_{suffix}", self.timestamp))
	}

	pub fn metadata_file_path(&self) -> PathBuf {
		self.coordinator_file("metadata.sql")
	}

	pub fn toc_file_path(&self) -> PathBuf {
		self.coordinator_file("toc.yaml")
	}

	pub fn report_file_path(&self) -> PathBuf {
		self.coordinator_file("report")
	}

	pub fn config_file_path(&self) -> PathBuf {
		self.coordinator_file("config.yaml")
	}

	pub fn statistics_file_path(&self) -> PathBuf {
		self.coordinator_file("statistics.sql")
	}

	fn segment_file(&self, content_id: i32, suffix: &str) -> PathBuf {
		self.dir_for_content(content_id)
			.join(format!("mppdump_{content_id}_{}{suffix}", self.timestamp))
	}

	/// Per-table data file on one segment.
	pub fn data_file_path(&self, content_id: i32, table_oid: u32) -> PathBuf {
		self.segment_file(content_id, &format!("_{table_oid}"))
	}

	/// The one concatenated data file per segment in single-file mode.
	pub fn single_data_file_path(&self, content_id: i32) -> PathBuf {
		self.segment_file(content_id, "")
	}

	/// Destination template for `COPY ... ON SEGMENT`: one string valid on
	/// every segment, with the server substituting [`SEGID_TOKEN`] (and
	/// [`SEG_DATA_DIR_TOKEN`] unless a backup directory was given).
	pub fn copy_destination_template(&self, table_oid: u32) -> String {
		format!("{}_{table_oid}", self.copy_destination_template_base())
	}

	/// Like [`copy_destination_template`](Self::copy_destination_template),
	/// but naming the rotating pipe served by the helper agent.
	pub fn pipe_destination_template(&self, table_oid: u32) -> String {
		format!(
			"{}_pipe_{table_oid}",
			self.copy_destination_template_base()
		)
	}

	fn copy_destination_template_base(&self) -> String {
		let base = match &self.user_backup_dir {
			Some(dir) => format!("{}/{}{SEGID_TOKEN}", dir.display(), self.seg_prefix),
			None => SEG_DATA_DIR_TOKEN.into(),
		};
		format!(
			"{base}/backups/{date}/{ts}/mppdump_{SEGID_TOKEN}_{ts}",
			date = self.date_dir(),
			ts = self.timestamp,
		)
	}

	/// The rotating named pipe on one segment, optionally qualified by the
	/// oid of the table currently being served.
	pub fn segment_pipe_path(&self, content_id: i32, table_oid: Option<u32>) -> PathBuf {
		match table_oid {
			Some(oid) => self.segment_file(content_id, &format!("_pipe_{oid}")),
			None => self.segment_file(content_id, "_pipe"),
		}
	}

	/// A helper-agent companion file on one segment.
	pub fn segment_helper_path(&self, content_id: i32, kind: HelperFile) -> PathBuf {
		self.segment_file(content_id, &format!("_{}", kind.suffix()))
	}

	/// The per-segment TOC the helper writes in single-file mode.
	pub fn segment_toc_path(&self, content_id: i32) -> PathBuf {
		self.dir_for_content(content_id)
			.join(format!("mppdump_{content_id}_{}_toc.yaml", self.timestamp))
	}

	/// Glob matching every helper artifact of this run on one segment, used
	/// by teardown to sweep pipes and sentinel files in one shot.
	pub fn helper_artifact_glob(&self, content_id: i32) -> String {
		format!(
			"{}/mppdump_{content_id}_{}_[peso]*",
			self.dir_for_content(content_id).display(),
			self.timestamp
		)
	}

	/// The timestamp lock file; cluster-wide uniqueness of the run.
	pub fn lock_file_path(&self) -> PathBuf {
		PathBuf::from(format!("/tmp/{}.lck", self.timestamp))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn fixture(user_dir: Option<&str>) -> FilePathInfo {
		let seg_dirs = BTreeMap::from([
			(-1, PathBuf::from("/data/coordinator/mpp-1")),
			(0, PathBuf::from("/data/primary/mpp0")),
			(1, PathBuf::from("/data/primary/mpp1")),
		]);
		FilePathInfo::new(
			seg_dirs,
			user_dir.map(PathBuf::from),
			"20260801123456",
			"mpp",
		)
	}

	#[test]
	fn dirs_derive_from_data_dirs_by_default() {
		let fp = fixture(None);
		assert_eq!(
			fp.dir_for_content(COORDINATOR),
			PathBuf::from("/data/coordinator/mpp-1/backups/20260801/20260801123456")
		);
		assert_eq!(
			fp.dir_for_content(1),
			PathBuf::from("/data/primary/mpp1/backups/20260801/20260801123456")
		);
	}

	#[test]
	fn user_backup_dir_overrides_roots() {
		let fp = fixture(Some("/backups"));
		assert_eq!(
			fp.dir_for_content(0),
			PathBuf::from("/backups/mpp0/backups/20260801/20260801123456")
		);
	}

	#[test]
	fn coordinator_artifacts() {
		let fp = fixture(None);
		let dir = "/data/coordinator/mpp-1/backups/20260801/20260801123456";
		assert_eq!(
			fp.metadata_file_path(),
			PathBuf::from(format!("{dir}/mppdump_20260801123456_metadata.sql"))
		);
		assert_eq!(
			fp.toc_file_path(),
			PathBuf::from(format!("{dir}/mppdump_20260801123456_toc.yaml"))
		);
		assert_eq!(
			fp.report_file_path(),
			PathBuf::from(format!("{dir}/mppdump_20260801123456_report"))
		);
		assert_eq!(
			fp.config_file_path(),
			PathBuf::from(format!("{dir}/mppdump_20260801123456_config.yaml"))
		);
	}

	#[test]
	fn segment_data_and_helper_files() {
		let fp = fixture(None);
		let dir = "/data/primary/mpp0/backups/20260801/20260801123456";
		assert_eq!(
			fp.data_file_path(0, 16384),
			PathBuf::from(format!("{dir}/mppdump_0_20260801123456_16384"))
		);
		assert_eq!(
			fp.single_data_file_path(0),
			PathBuf::from(format!("{dir}/mppdump_0_20260801123456"))
		);
		assert_eq!(
			fp.segment_pipe_path(0, Some(16384)),
			PathBuf::from(format!("{dir}/mppdump_0_20260801123456_pipe_16384"))
		);
		assert_eq!(
			fp.segment_helper_path(0, HelperFile::Oid),
			PathBuf::from(format!("{dir}/mppdump_0_20260801123456_oid"))
		);
		assert_eq!(
			fp.segment_toc_path(0),
			PathBuf::from(format!("{dir}/mppdump_0_20260801123456_toc.yaml"))
		);
	}

	#[test]
	fn copy_template_uses_data_dir_token() {
		let fp = fixture(None);
		assert_eq!(
			fp.copy_destination_template(16384),
			"<SEG_DATA_DIR>/backups/20260801/20260801123456/mppdump_<SEGID>_20260801123456_16384"
		);
	}

	#[test]
	fn copy_template_uses_backup_dir_when_given() {
		let fp = fixture(Some("/backups"));
		assert_eq!(
			fp.copy_destination_template(16384),
			"/backups/mpp<SEGID>/backups/20260801/20260801123456/mppdump_<SEGID>_20260801123456_16384"
		);
	}

	#[test]
	fn lock_file_embeds_timestamp() {
		let fp = fixture(None);
		assert_eq!(
			fp.lock_file_path(),
			PathBuf::from("/tmp/20260801123456.lck")
		);
	}
}
