use std::{
	collections::BTreeMap,
	fs::File,
	io::{BufWriter, Write},
	path::{Path, PathBuf},
};

use crate::{
	catalog::globals::SessionGucs,
	error::RunError,
	toc::{MetadataEntry, Section, Toc},
};

pub mod globals;
pub mod metadata;
pub mod postdata;
pub mod relations;
pub mod statistics;
pub mod types;

/// A write sink that knows how many bytes it has emitted, so every
/// statement's position can be recorded in the table of contents.
pub struct ByteCountFile<W: Write> {
	writer: W,
	pub byte_count: u64,
	path: PathBuf,
}

impl ByteCountFile<BufWriter<File>> {
	pub fn create(path: &Path) -> Result<Self, RunError> {
		let file = File::create(path).map_err(|source| RunError::EmitIoFailed {
			path: path.into(),
			source,
		})?;
		Ok(Self {
			writer: BufWriter::new(file),
			byte_count: 0,
			path: path.into(),
		})
	}

	pub fn close(mut self) -> Result<(), RunError> {
		self.writer.flush().map_err(|source| RunError::EmitIoFailed {
			path: self.path.clone(),
			source,
		})
	}
}

impl<W: Write> ByteCountFile<W> {
	/// Wrap any writer; used by tests to emit into memory.
	pub fn from_writer(writer: W) -> Self {
		Self {
			writer,
			byte_count: 0,
			path: PathBuf::new(),
		}
	}

	pub fn write(&mut self, text: &str) -> Result<(), RunError> {
		self.writer
			.write_all(text.as_bytes())
			.map_err(|source| RunError::EmitIoFailed {
				path: self.path.clone(),
				source,
			})?;
		self.byte_count += text.len() as u64;
		Ok(())
	}
}

/// Couples the output file with the TOC and the per-kind object counts, so
/// a statement cannot be written without being indexed.
pub struct Emitter<'a, W: Write> {
	pub file: &'a mut ByteCountFile<W>,
	pub toc: &'a mut Toc,
	pub counts: &'a mut BTreeMap<String, usize>,
}

impl<'a, W: Write> Emitter<'a, W> {
	pub fn new(
		file: &'a mut ByteCountFile<W>,
		toc: &'a mut Toc,
		counts: &'a mut BTreeMap<String, usize>,
	) -> Self {
		Self { file, toc, counts }
	}

	/// Write one object's statement group (CREATE plus its metadata
	/// trailers) and append the covering TOC entry. The byte range is exact:
	/// the blank line separating objects lives between entries.
	pub fn emit(
		&mut self,
		section: Section,
		schema: &str,
		name: &str,
		object_type: &str,
		reference_object: &str,
		sql: &str,
	) -> Result<(), RunError> {
		self.emit_inner(section, schema, name, object_type, reference_object, sql, true)
	}

	/// Like [`emit`](Self::emit) for bookkeeping statements (session GUCs,
	/// per-database settings) that should not show up in object counts.
	pub fn emit_uncounted(
		&mut self,
		section: Section,
		schema: &str,
		name: &str,
		object_type: &str,
		reference_object: &str,
		sql: &str,
	) -> Result<(), RunError> {
		self.emit_inner(section, schema, name, object_type, reference_object, sql, false)
	}

	#[allow(clippy::too_many_arguments)]
	fn emit_inner(
		&mut self,
		section: Section,
		schema: &str,
		name: &str,
		object_type: &str,
		reference_object: &str,
		sql: &str,
		counted: bool,
	) -> Result<(), RunError> {
		if self.file.byte_count > 0 {
			self.file.write("\n\n")?;
		}
		let start_byte = self.file.byte_count;
		self.file.write(sql)?;
		let end_byte = self.file.byte_count;

		self.toc.add_metadata_entry(
			section,
			MetadataEntry {
				schema: schema.into(),
				name: name.into(),
				object_type: object_type.into(),
				reference_object: reference_object.into(),
				start_byte,
				end_byte,
			},
		);
		if counted {
			*self.counts.entry(object_type.to_lowercase()).or_default() += 1;
		}
		Ok(())
	}
}

/// The session settings header: replayed first in every restore session so
/// the statements that follow parse the way they were written.
pub fn write_session_gucs<W: Write>(
	emitter: &mut Emitter<'_, W>,
	gucs: &SessionGucs,
) -> Result<(), RunError> {
	let sql = format!(
		"SET client_encoding = '{}';\n\
		SET standard_conforming_strings = {};\n\
		SET default_with_oids = {};",
		gucs.client_encoding, gucs.standard_conforming_strings, gucs.default_with_oids,
	);
	emitter.emit_uncounted(
		Section::Global,
		"",
		"SESSION GUCS",
		"SESSION GUCS",
		"",
		&sql,
	)
}

#[cfg(test)]
pub(crate) mod testutil {
	use std::collections::BTreeMap;

	use super::ByteCountFile;
	use crate::toc::Toc;

	/// An in-memory emitter target plus a checker for the TOC-consistency
	/// property: each entry's byte range must reproduce its statements.
	pub struct Scratch {
		pub file: ByteCountFile<Vec<u8>>,
		pub toc: Toc,
		pub counts: BTreeMap<String, usize>,
	}

	impl Scratch {
		pub fn new() -> Self {
			Self {
				file: ByteCountFile::from_writer(Vec::new()),
				toc: Toc::default(),
				counts: BTreeMap::new(),
			}
		}

		pub fn output(&self) -> &str {
			std::str::from_utf8(self.file.writer()).unwrap()
		}

		pub fn slice(&self, start: u64, end: u64) -> &str {
			&self.output()[start as usize..end as usize]
		}
	}

	impl<W: std::io::Write> ByteCountFile<W> {
		pub fn writer(&self) -> &W {
			&self.writer
		}
	}
}

#[cfg(test)]
mod tests {
	use super::{testutil::Scratch, *};
	use crate::toc::Section;

	#[test]
	fn byte_ranges_are_exact_and_separators_fall_between() {
		let mut scratch = Scratch::new();
		let mut emitter = Emitter::new(&mut scratch.file, &mut scratch.toc, &mut scratch.counts);

		emitter
			.emit(
				Section::Predata,
				"public",
				"a",
				"TABLE",
				"",
				"CREATE TABLE public.a (i integer);",
			)
			.unwrap();
		emitter
			.emit(
				Section::Predata,
				"public",
				"b",
				"TABLE",
				"",
				"CREATE TABLE public.b (i integer);\n\nCOMMENT ON TABLE public.b IS 'x';",
			)
			.unwrap();

		let entries: Vec<_> = scratch.toc.entries(Section::Predata).to_vec();
		assert_eq!(
			scratch.slice(entries[0].start_byte, entries[0].end_byte),
			"CREATE TABLE public.a (i integer);"
		);
		assert_eq!(
			scratch.slice(entries[1].start_byte, entries[1].end_byte),
			"CREATE TABLE public.b (i integer);\n\nCOMMENT ON TABLE public.b IS 'x';"
		);
		// separator between the ranges, not inside them
		assert_eq!(
			scratch.slice(entries[0].end_byte, entries[1].start_byte),
			"\n\n"
		);
		assert_eq!(scratch.counts["table"], 2);
	}

	#[test]
	fn session_gucs_are_uncounted() {
		let mut scratch = Scratch::new();
		let mut emitter = Emitter::new(&mut scratch.file, &mut scratch.toc, &mut scratch.counts);
		let gucs = crate::catalog::globals::SessionGucs {
			client_encoding: "UTF8".into(),
			standard_conforming_strings: "on".into(),
			default_with_oids: "off".into(),
		};

		write_session_gucs(&mut emitter, &gucs).unwrap();
		assert!(scratch.output().starts_with("SET client_encoding = 'UTF8';"));
		assert!(scratch.counts.is_empty());
		assert_eq!(scratch.toc.global_entries[0].object_type, "SESSION GUCS");
	}
}
