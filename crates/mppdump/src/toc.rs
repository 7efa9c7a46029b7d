use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RunError;

/// The three metadata phases of the dump, plus planner statistics.
///
/// Global and predata replay before data load, postdata after; statistics
/// entries index the separate statistics file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
	Global,
	Predata,
	Postdata,
	Statistics,
}

/// One emitted statement group: where its bytes live in the metadata file
/// and what object they create.
///
/// `start_byte..end_byte` covers the CREATE statement together with its
/// comment/owner/privilege trailers, so a restore can extract any object
/// subset by seeking, without parsing SQL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
	pub schema: String,
	pub name: String,
	pub object_type: String,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub reference_object: String,
	pub start_byte: u64,
	pub end_byte: u64,
}

/// One table's worth of copied data, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataEntry {
	pub schema: String,
	pub name: String,
	pub oid: u32,
	pub attribute_string: String,
	pub rows_copied: u64,
}

/// Last-known modification counts for append-only tables, letting a later
/// incremental backup skip unchanged table sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalMetadata {
	pub ao: BTreeMap<String, i64>,
}

/// The run's table of contents: a section-keyed index into the emitted
/// artifacts. Single-writer during the run, then sealed to disk read-only.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Toc {
	pub global_entries: Vec<MetadataEntry>,
	pub predata_entries: Vec<MetadataEntry>,
	pub postdata_entries: Vec<MetadataEntry>,
	pub statistics_entries: Vec<MetadataEntry>,
	pub data_entries: Vec<DataEntry>,
	pub incremental_metadata: IncrementalMetadata,
}

impl Toc {
	pub fn add_metadata_entry(&mut self, section: Section, entry: MetadataEntry) {
		self.section_mut(section).push(entry);
	}

	pub fn add_data_entry(&mut self, entry: DataEntry) {
		self.data_entries.push(entry);
	}

	pub fn entries(&self, section: Section) -> &[MetadataEntry] {
		match section {
			Section::Global => &self.global_entries,
			Section::Predata => &self.predata_entries,
			Section::Postdata => &self.postdata_entries,
			Section::Statistics => &self.statistics_entries,
		}
	}

	fn section_mut(&mut self, section: Section) -> &mut Vec<MetadataEntry> {
		match section {
			Section::Global => &mut self.global_entries,
			Section::Predata => &mut self.predata_entries,
			Section::Postdata => &mut self.postdata_entries,
			Section::Statistics => &mut self.statistics_entries,
		}
	}

	/// Serialize to `path` and drop write permission so the index cannot be
	/// mutated after the run.
	pub fn write_to_file_and_make_read_only(&self, path: &Path) -> Result<(), RunError> {
		let emit_err = |source| RunError::EmitIoFailed {
			path: path.into(),
			source,
		};

		let yaml = serde_yaml::to_string(self)
			.map_err(|err| emit_err(std::io::Error::other(err)))?;
		fs::write(path, yaml).map_err(&emit_err)?;

		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			fs::set_permissions(path, fs::Permissions::from_mode(0o400)).map_err(&emit_err)?;
		}

		debug!(?path, "table of contents sealed");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(name: &str, start: u64, end: u64) -> MetadataEntry {
		MetadataEntry {
			schema: "public".into(),
			name: name.into(),
			object_type: "TABLE".into(),
			reference_object: String::new(),
			start_byte: start,
			end_byte: end,
		}
	}

	#[test]
	fn entries_keep_append_order_per_section() {
		let mut toc = Toc::default();
		toc.add_metadata_entry(Section::Predata, entry("a", 0, 10));
		toc.add_metadata_entry(Section::Postdata, entry("a_idx", 20, 30));
		toc.add_metadata_entry(Section::Predata, entry("b", 10, 20));

		let names: Vec<&str> = toc
			.entries(Section::Predata)
			.iter()
			.map(|e| e.name.as_str())
			.collect();
		assert_eq!(names, ["a", "b"]);
		assert_eq!(toc.entries(Section::Postdata).len(), 1);
		assert!(toc.entries(Section::Global).is_empty());
	}

	#[test]
	fn zero_row_tables_still_get_data_entries() {
		let mut toc = Toc::default();
		toc.add_data_entry(DataEntry {
			schema: "public".into(),
			name: "empty".into(),
			oid: 16384,
			attribute_string: "(id,name)".into(),
			rows_copied: 0,
		});
		assert_eq!(toc.data_entries.len(), 1);
		assert_eq!(toc.data_entries[0].rows_copied, 0);
	}

	#[test]
	fn yaml_round_trips_with_decimal_offsets() {
		let mut toc = Toc::default();
		toc.add_metadata_entry(Section::Global, entry("db", 0, 64));
		toc.add_metadata_entry(Section::Predata, entry("t", 64, 4096));
		toc.incremental_metadata
			.ao
			.insert("public.events".into(), 7);

		let yaml = serde_yaml::to_string(&toc).unwrap();
		assert!(yaml.contains("start_byte: 64"), "offsets must be decimal ASCII: {yaml}");
		assert!(yaml.contains("global_entries:"));

		let parsed: Toc = serde_yaml::from_str(&yaml).unwrap();
		assert_eq!(parsed.global_entries, toc.global_entries);
		assert_eq!(parsed.predata_entries, toc.predata_entries);
		assert_eq!(parsed.incremental_metadata, toc.incremental_metadata);
	}

	#[cfg(unix)]
	#[test]
	fn sealed_file_is_read_only() {
		use std::os::unix::fs::PermissionsExt;

		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("toc.yaml");
		let toc = Toc::default();
		toc.write_to_file_and_make_read_only(&path).unwrap();

		let mode = fs::metadata(&path).unwrap().permissions().mode();
		assert_eq!(mode & 0o777, 0o400);
	}
}
