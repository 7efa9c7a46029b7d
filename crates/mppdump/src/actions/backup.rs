use std::{
	collections::BTreeMap,
	path::PathBuf,
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
	time::Duration,
};

use clap::Parser;
use miette::Result;
use mppdump_postgres::{ConnectionParams, SlotPool};
use tracing::{debug, info, instrument, warn};

use crate::{
	actions::Context,
	catalog::{
		deps, globals, metadata, postdata, predata, relations,
		relations::{TableDefinition, TableSet},
		stats,
	},
	cluster::{Cluster, RemoteCommand, Scope},
	ddl::{self, ByteCountFile, Emitter},
	error::RunError,
	filters::FilterSet,
	lifecycle::{self, Finalizers, LockFile},
	mover,
	options::BackupOptions,
	paths::{COORDINATOR, FilePathInfo},
	plugin::{self, PluginConfig},
	report::{BackupConfig, Report, email_report},
	toc::{DataEntry, Toc},
};

/// Back up a database to a timestamped, self-describing artifact.
///
/// Metadata (DDL for every object in the database) is written to a single
/// SQL file on the coordinator, indexed by a table of contents; table data
/// streams out of every segment in parallel. Connection settings come from
/// the usual libpq environment variables.
#[derive(Debug, Clone, Parser)]
pub struct BackupArgs {
	/// The database to back up
	#[arg(long)]
	pub dbname: String,

	/// Absolute path under which all backup files are written.
	///
	/// Defaults to each node's own data directory, which keeps backup I/O
	/// local to the segment that owns the data.
	#[arg(long)]
	pub backup_dir: Option<PathBuf>,

	/// Number of parallel connections to use when copying table data
	#[arg(long, default_value_t = 1)]
	pub jobs: usize,

	/// gzip level for table data files
	#[arg(long, default_value_t = 1, conflicts_with = "no_compression")]
	pub compression_level: u32,

	/// Write table data uncompressed
	#[arg(long)]
	pub no_compression: bool,

	/// Write one concatenated data file per segment instead of one file per
	/// table.
	///
	/// A helper agent on each segment serializes the tables through a named
	/// pipe and records each table's byte range in a per-segment table of
	/// contents, so single tables remain restorable by offset.
	#[arg(long)]
	pub single_data_file: bool,

	/// For partitioned tables, copy each leaf partition to its own data
	/// file instead of one file for the whole hierarchy
	#[arg(long)]
	pub leaf_partition_data: bool,

	/// Back up metadata only, no table data
	#[arg(long, conflicts_with = "data_only")]
	pub metadata_only: bool,

	/// Back up table data only, no metadata
	#[arg(long)]
	pub data_only: bool,

	/// Back up only objects in this schema. Repeatable.
	#[arg(long)]
	pub include_schema: Vec<String>,

	/// Back up everything except objects in this schema. Repeatable.
	#[arg(long)]
	pub exclude_schema: Vec<String>,

	/// Back up only this fully-qualified table. Repeatable.
	#[arg(long)]
	pub include_table: Vec<String>,

	/// Back up everything except this fully-qualified table. Repeatable.
	#[arg(long)]
	pub exclude_table: Vec<String>,

	/// File with one fully-qualified table per line to include
	#[arg(long)]
	pub include_table_file: Option<PathBuf>,

	/// File with one fully-qualified table per line to exclude
	#[arg(long)]
	pub exclude_table_file: Option<PathBuf>,

	/// Also dump query planner statistics to a separate file
	#[arg(long)]
	pub with_stats: bool,

	/// Plugin configuration file; hands the finished artifact to an
	/// external storage plugin
	#[arg(long)]
	pub plugin_config: Option<PathBuf>,
}

fn build_options(args: BackupArgs) -> Result<BackupOptions, RunError> {
	let filters = FilterSet::load(
		args.include_schema,
		args.exclude_schema,
		args.include_table,
		args.include_table_file.as_deref(),
		args.exclude_table,
		args.exclude_table_file.as_deref(),
	)?;
	let opts = BackupOptions {
		dbname: args.dbname,
		backup_dir: args.backup_dir,
		jobs: args.jobs,
		compression: (!args.no_compression).then_some(args.compression_level),
		single_data_file: args.single_data_file,
		leaf_partition_data: args.leaf_partition_data,
		metadata_only: args.metadata_only,
		data_only: args.data_only,
		with_stats: args.with_stats,
		plugin_config_path: args.plugin_config,
		filters,
	};
	opts.validate()?;
	Ok(opts)
}

/// Everything one run owns. Constructed by setup and threaded through every
/// phase; teardown consumes it.
struct RunContext {
	opts: BackupOptions,
	params: ConnectionParams,
	pool: SlotPool,
	cluster: Cluster,
	fp: FilePathInfo,
	toc: Toc,
	report: Report,
	object_counts: BTreeMap<String, usize>,
	plugin: Option<PluginConfig>,
	terminated: Arc<AtomicBool>,
	finalizers: Finalizers,
}

pub async fn run(ctx: Context<BackupArgs>) -> Result<()> {
	let opts = build_options(ctx.args_top)?;

	let terminated = Arc::new(AtomicBool::new(false));
	lifecycle::spawn_signal_listener(terminated.clone());

	let timestamp = lifecycle::current_timestamp();
	let lock = LockFile::acquire(&timestamp)?;

	let mut run = setup(opts, timestamp.clone(), lock, terminated).await?;

	info!(dbname = %run.pool.dbname, %timestamp, "starting backup");
	let mut result = do_backup(&mut run).await;
	if result.is_ok() && run.terminated.load(Ordering::Relaxed) {
		result = Err(RunError::Terminated);
	}

	teardown(run, &result).await;
	result?;
	info!("backup completed successfully");
	Ok(())
}

/// Acquire every resource the run needs: the pool with its shared snapshot,
/// the cluster topology, the backup directories, the plugin.
#[instrument(level = "debug", skip_all)]
async fn setup(
	opts: BackupOptions,
	timestamp: String,
	mut lock: LockFile,
	terminated: Arc<AtomicBool>,
) -> Result<RunContext, RunError> {
	let params = ConnectionParams::from_env(&opts.dbname);
	let mut pool = SlotPool::connect(&params, opts.jobs, "mppdump")
		.await
		.map_err(|source| RunError::SnapshotUnavailable {
			jobs: opts.jobs,
			source,
		})?;
	set_session_parameters(&pool).await?;
	let jobs = pool.num_conns();
	pool.begin_with_shared_snapshot()
		.await
		.map_err(|source| RunError::SnapshotUnavailable { jobs, source })?;

	relations::validate_filters(&pool, &opts.filters).await?;

	let cluster = Cluster::from_catalog(&pool).await?;
	let fp = FilePathInfo::new(
		cluster.seg_dirs(),
		opts.backup_dir.clone(),
		&timestamp,
		&cluster.seg_prefix(),
	);

	let output = cluster
		.run(
			"Creating backup directories",
			Scope::SegmentsAndCoordinator,
			|content| {
				RemoteCommand::new([
					"mkdir".to_string(),
					"-p".to_string(),
					fp.dir_for_content(content).display().to_string(),
				])
			},
		)
		.await;
	cluster.check_cluster_error(&output, "Unable to create backup directories", |content| {
		format!(
			"could not create {}",
			fp.dir_for_content(content).display()
		)
	})?;

	let report = initialize_report(&pool, &opts, &timestamp).await?;

	let mut plugin = None;
	if let Some(config_path) = &opts.plugin_config_path {
		let config = plugin::read_plugin_config(config_path)?;
		config.check_version_on_all_hosts(&cluster).await?;
		config.copy_config_to_all_hosts(&cluster, config_path).await?;
		config
			.setup_on_all_hosts(&cluster, &fp.dir_for_content(COORDINATOR))
			.await?;
		plugin = Some(config);
	}

	let mut finalizers = Finalizers::default();
	finalizers.register("timestamp lock", move || {
		lock.release();
		Ok(())
	});

	Ok(RunContext {
		opts,
		params,
		pool,
		cluster,
		fp,
		toc: Toc::default(),
		report,
		object_counts: BTreeMap::new(),
		plugin,
		terminated,
		finalizers,
	})
}

/// Session parameters keeping the dump portable across clusters; applied to
/// every slot before its transaction begins.
async fn set_session_parameters(pool: &SlotPool) -> Result<(), RunError> {
	let mut statements = vec![
		"SET search_path TO pg_catalog",
		"SET statement_timeout = 0",
		"SET DATESTYLE = ISO",
	];
	if pool.version.at_least(5) {
		statements.push("SET synchronize_seqscans TO off");
	}
	if pool.version.at_least(6) {
		statements.push("SET INTERVALSTYLE = POSTGRES");
	}
	for slot in 0..pool.num_conns() {
		for sql in &statements {
			pool.exec(slot, sql)
				.await
				.map_err(|err| RunError::catalog("configuring session", err))?;
		}
	}
	Ok(())
}

async fn initialize_report(
	pool: &SlotPool,
	opts: &BackupOptions,
	timestamp: &str,
) -> Result<Report, RunError> {
	let database_name = predata::get_quoted_database_name(pool).await?;

	// the size is misleading for filtered or metadata-only runs
	let mut database_size = String::new();
	if !opts.metadata_only && !opts.filters.has_any() {
		debug!("reading database size");
		database_size = globals::get_database_size(pool).await?;
	}

	let config = BackupConfig {
		backup_dir: opts
			.backup_dir
			.as_ref()
			.map(|dir| dir.display().to_string()),
		backup_version: env!("CARGO_PKG_VERSION").into(),
		compressed: opts.compression.is_some(),
		compression_level: opts.compression.unwrap_or(0),
		database_name,
		database_version: pool.version.version_string.clone(),
		data_only: opts.data_only,
		exclude_schema_filtered: !opts.filters.exclude_schemas.is_empty(),
		exclude_table_filtered: !opts.filters.exclude_tables.is_empty(),
		include_schema_filtered: !opts.filters.include_schemas.is_empty(),
		include_table_filtered: !opts.filters.include_tables.is_empty(),
		leaf_partition_data: opts.leaf_partition_data,
		metadata_only: opts.metadata_only,
		plugin: None,
		single_data_file: opts.single_data_file,
		timestamp: timestamp.into(),
		with_statistics: opts.with_stats,
	};
	let mut report = Report::new(config);
	report.database_size = database_size;
	Ok(report)
}

/// The run phase: metadata emission, then data, then statistics, then the
/// sealed TOC and the plugin hand-off.
async fn do_backup(run: &mut RunContext) -> Result<(), RunError> {
	info!(timestamp = %run.fp.timestamp(), database = %run.report.config.database_name, "backup parameters");
	for line in run.report.params_string.lines() {
		debug!("{line}");
	}

	let table_set = relations::get_user_tables(
		&run.pool,
		&run.opts.filters,
		run.opts.leaf_partition_data,
	)
	.await?;
	let table_defs = relations::get_table_definitions(&run.pool, &table_set).await?;

	if table_set.data_tables.is_empty() && !run.opts.metadata_only {
		info!("no tables qualify for data backup, writing metadata only");
		run.report.config.metadata_only = true;
		run.report.construct_params_string();
	}

	let metadata_path = run.fp.metadata_file_path();
	info!(path = ?metadata_path, "writing metadata");
	let mut metadata_file = ByteCountFile::create(&metadata_path)?;

	{
		let mut emitter = Emitter::new(&mut metadata_file, &mut run.toc, &mut run.object_counts);
		let gucs = globals::get_session_gucs(&run.pool).await?;
		ddl::write_session_gucs(&mut emitter, &gucs)?;

		if !run.opts.data_only {
			if run.opts.filters.is_table_filtered() {
				backup_relation_predata(&run.pool, &mut emitter, &table_set, &table_defs).await?;
			} else {
				backup_global(&run.pool, &run.opts.filters, &mut emitter).await?;
				backup_predata(&run.pool, &run.opts.filters, &mut emitter, &table_set, &table_defs)
					.await?;
			}
			backup_postdata(&run.pool, &run.opts.filters, &mut emitter).await?;
		}
	}

	if !run.opts.data_only {
		debug!("recording append-only modification counts");
		run.toc.incremental_metadata.ao = relations::get_ao_incremental_metadata(
			&run.pool,
			&table_set.data_tables,
			&table_defs,
		)
		.await?;
	}

	if !run.report.config.metadata_only {
		check_not_terminated(run)?;
		backup_data(run, &table_set, &table_defs).await?;
	}

	if run.opts.with_stats && !run.terminated.load(Ordering::Relaxed) {
		backup_statistics(run, &table_set).await?;
	}

	run.toc
		.write_to_file_and_make_read_only(&run.fp.toc_file_path())?;

	for slot in 0..run.pool.num_conns() {
		run.pool
			.commit(slot)
			.await
			.map_err(|err| RunError::catalog("committing backup transactions", err))?;
	}
	metadata_file.close()?;

	if let Some(plugin) = &run.plugin {
		plugin
			.backup_file(&run.cluster, &run.fp.metadata_file_path(), true)
			.await?;
		plugin
			.backup_file(&run.cluster, &run.fp.toc_file_path(), true)
			.await?;
		if run.opts.with_stats {
			plugin
				.backup_file(&run.cluster, &run.fp.statistics_file_path(), true)
				.await?;
		}
	}
	Ok(())
}

fn check_not_terminated(run: &RunContext) -> Result<(), RunError> {
	if run.terminated.load(Ordering::Relaxed) {
		Err(RunError::Terminated)
	} else {
		Ok(())
	}
}

/// Cluster-wide objects; only emitted for unfiltered backups.
async fn backup_global<W: std::io::Write>(
	pool: &SlotPool,
	filters: &FilterSet,
	emitter: &mut Emitter<'_, W>,
) -> Result<(), RunError> {
	info!("writing global database metadata");

	let tablespace_metadata =
		metadata::get_metadata_for_object_type(pool, metadata::TYPE_TABLESPACE).await?;
	ddl::globals::write_tablespaces(
		emitter,
		&globals::get_tablespaces(pool).await?,
		&tablespace_metadata,
	)?;

	let database = globals::get_database(pool).await?;
	let database_metadata =
		metadata::get_metadata_for_object_type(pool, metadata::TYPE_DATABASE).await?;
	ddl::globals::write_create_database(emitter, &database, &database_metadata)?;
	ddl::globals::write_database_gucs(emitter, &database, &globals::get_database_gucs(pool).await?)?;

	if !filters.is_schema_filtered() {
		let queue_comments =
			metadata::get_metadata_for_object_type(pool, metadata::TYPE_RESOURCE_QUEUE).await?;
		ddl::globals::write_resource_queues(
			emitter,
			&globals::get_resource_queues(pool).await?,
			&queue_comments,
		)?;
		if pool.version.at_least(5) {
			ddl::globals::write_resource_groups(
				emitter,
				&globals::get_resource_groups(pool).await?,
			)?;
		}
		ddl::globals::write_roles(emitter, &globals::get_roles(pool).await?)?;
		ddl::globals::write_role_grants(emitter, &globals::get_role_grants(pool).await?)?;
	}
	Ok(())
}

/// The full predata phase: schemas and standalone kinds first, then the
/// dependency-ordered function/type/table pass, then everything that needs
/// tables to exist.
async fn backup_predata<W: std::io::Write>(
	pool: &SlotPool,
	filters: &FilterSet,
	emitter: &mut Emitter<'_, W>,
	table_set: &TableSet,
	table_defs: &BTreeMap<u32, TableDefinition>,
) -> Result<(), RunError> {
	info!("writing pre-data metadata");

	let schema_metadata = metadata::get_metadata_for_object_type(pool, metadata::TYPE_SCHEMA).await?;
	ddl::relations::write_schemas(emitter, &predata::get_schemas(pool, filters).await?, &schema_metadata)?;
	if !filters.is_schema_filtered() && pool.version.at_least(5) {
		ddl::relations::write_extensions(emitter, &predata::get_extensions(pool).await?)?;
	}

	let func_info = predata::get_function_info_map(pool).await?;
	let languages = predata::get_procedural_languages(pool).await?;
	let (lang_funcs, other_funcs) = predata::get_functions(pool, filters, &languages).await?;
	let function_metadata =
		metadata::get_metadata_for_object_type(pool, metadata::TYPE_FUNCTION).await?;
	let types = predata::get_types(pool, filters).await?;
	let type_metadata = metadata::get_metadata_for_object_type(pool, metadata::TYPE_TYPE).await?;

	if !filters.is_schema_filtered() {
		let language_metadata =
			metadata::get_metadata_for_object_type(pool, metadata::TYPE_LANGUAGE).await?;
		ddl::types::write_procedural_languages(
			emitter,
			&languages,
			&lang_funcs,
			&function_metadata,
			&language_metadata,
			&func_info,
		)?;
	}

	ddl::types::write_shell_types(emitter, &types)?;
	if pool.version.at_least(5) {
		ddl::types::write_enum_types(emitter, &types, &type_metadata)?;
	}

	let relation_metadata =
		metadata::get_metadata_for_object_type(pool, metadata::TYPE_RELATION).await?;
	let sequences = predata::get_sequences(pool, filters).await?;
	ddl::relations::write_create_sequences(emitter, &sequences, &relation_metadata)?;

	let constraints = predata::get_constraints(pool, filters, None).await?;

	// The classes that depend on each other across kind boundaries sort and
	// emit as one interleaved sequence.
	let other_funcs = deps::construct_function_dependencies(pool, other_funcs).await?;
	let types = deps::construct_type_dependencies(pool, types, &func_info).await?;
	let tables =
		deps::construct_table_dependencies(pool, table_set.metadata_tables.clone()).await?;
	let sorted = ddl::types::sort_functions_types_and_tables(other_funcs, types, tables)?;
	let predata_ctx = ddl::types::PredataContext {
		function_metadata: &function_metadata,
		type_metadata: &type_metadata,
		relation_metadata: &relation_metadata,
		table_defs,
		constraints: &constraints,
	};
	ddl::types::write_sorted_predata_objects(emitter, &sorted, &predata_ctx)?;

	let sequence_owners = predata::get_sequence_owners(pool).await?;
	ddl::relations::write_alter_sequence_owners(emitter, &sequences, &sequence_owners)?;

	if !filters.is_schema_filtered() {
		let protocol_metadata =
			metadata::get_metadata_for_object_type(pool, metadata::TYPE_PROTOCOL).await?;
		ddl::types::write_external_protocols(
			emitter,
			&predata::get_external_protocols(pool).await?,
			&protocol_metadata,
			&func_info,
		)?;
		if pool.version.at_least(6) {
			let fdw_metadata = metadata::get_metadata_for_object_type(
				pool,
				metadata::TYPE_FOREIGN_DATA_WRAPPER,
			)
			.await?;
			ddl::types::write_foreign_data_wrappers(
				emitter,
				&predata::get_foreign_data_wrappers(pool).await?,
				&fdw_metadata,
				&func_info,
			)?;
			let server_metadata =
				metadata::get_metadata_for_object_type(pool, metadata::TYPE_FOREIGN_SERVER)
					.await?;
			ddl::types::write_foreign_servers(
				emitter,
				&predata::get_foreign_servers(pool).await?,
				&server_metadata,
			)?;
			ddl::types::write_user_mappings(emitter, &predata::get_user_mappings(pool).await?)?;
		}
	}

	let operator_metadata =
		metadata::get_metadata_for_object_type(pool, metadata::TYPE_OPERATOR).await?;
	ddl::types::write_operators(emitter, &predata::get_operators(pool, filters).await?, &operator_metadata)?;
	if pool.version.at_least(5) {
		let family_metadata =
			metadata::get_metadata_for_object_type(pool, metadata::TYPE_OPERATOR_FAMILY).await?;
		ddl::types::write_operator_families(
			emitter,
			&predata::get_operator_families(pool, filters).await?,
			&family_metadata,
		)?;
	}

	let conversion_metadata =
		metadata::get_metadata_for_object_type(pool, metadata::TYPE_CONVERSION).await?;
	ddl::types::write_conversions(
		emitter,
		&predata::get_conversions(pool, filters).await?,
		&conversion_metadata,
		&func_info,
	)?;
	ddl::types::write_aggregates(
		emitter,
		&predata::get_aggregates(pool, filters).await?,
		&function_metadata,
		&func_info,
	)?;
	let cast_comments = metadata::get_metadata_for_object_type(pool, metadata::TYPE_CAST).await?;
	ddl::types::write_casts(emitter, &predata::get_casts(pool).await?, &cast_comments, &func_info)?;

	let views = deps::construct_view_dependencies(pool, predata::get_views(pool, filters).await?)
		.await?;
	let views = crate::depsort::topological_sort(views)?;
	ddl::relations::write_views(emitter, &views, &relation_metadata)?;

	let constraint_comments =
		metadata::get_metadata_for_object_type(pool, metadata::TYPE_CONSTRAINT).await?;
	ddl::relations::write_constraints(emitter, &constraints, &constraint_comments)?;
	Ok(())
}

/// The include-table fast path: only relation-scoped metadata is emitted,
/// skipping cluster-wide and schema-wide object kinds.
async fn backup_relation_predata<W: std::io::Write>(
	pool: &SlotPool,
	emitter: &mut Emitter<'_, W>,
	table_set: &TableSet,
	table_defs: &BTreeMap<u32, TableDefinition>,
) -> Result<(), RunError> {
	info!("writing table metadata");
	let filters = FilterSet::default();

	let relation_metadata =
		metadata::get_metadata_for_object_type(pool, metadata::TYPE_RELATION).await?;
	let sequences = predata::get_sequences(pool, &filters).await?;
	ddl::relations::write_create_sequences(emitter, &sequences, &relation_metadata)?;

	let constraints = predata::get_constraints(pool, &filters, Some(&table_set.metadata_tables))
		.await?;

	let tables =
		deps::construct_table_dependencies(pool, table_set.metadata_tables.clone()).await?;
	let sorted = ddl::types::sort_functions_types_and_tables(Vec::new(), Vec::new(), tables)?;
	let predata_ctx = ddl::types::PredataContext {
		function_metadata: &BTreeMap::new(),
		type_metadata: &BTreeMap::new(),
		relation_metadata: &relation_metadata,
		table_defs,
		constraints: &constraints,
	};
	ddl::types::write_sorted_predata_objects(emitter, &sorted, &predata_ctx)?;

	let sequence_owners = predata::get_sequence_owners(pool).await?;
	ddl::relations::write_alter_sequence_owners(emitter, &sequences, &sequence_owners)?;

	let views = deps::construct_view_dependencies(pool, predata::get_views(pool, &filters).await?)
		.await?;
	let views = crate::depsort::topological_sort(views)?;
	ddl::relations::write_views(emitter, &views, &relation_metadata)?;

	let constraint_comments =
		metadata::get_metadata_for_object_type(pool, metadata::TYPE_CONSTRAINT).await?;
	ddl::relations::write_constraints(emitter, &constraints, &constraint_comments)?;
	info!("table metadata backup complete");
	Ok(())
}

async fn backup_postdata<W: std::io::Write>(
	pool: &SlotPool,
	filters: &FilterSet,
	emitter: &mut Emitter<'_, W>,
) -> Result<(), RunError> {
	info!("writing post-data metadata");
	let index_comments = metadata::get_metadata_for_object_type(pool, metadata::TYPE_INDEX).await?;
	ddl::postdata::write_indexes(emitter, &postdata::get_indexes(pool, filters).await?, &index_comments)?;
	let rule_comments = metadata::get_metadata_for_object_type(pool, metadata::TYPE_RULE).await?;
	ddl::postdata::write_rules(emitter, &postdata::get_rules(pool, filters).await?, &rule_comments)?;
	let trigger_comments =
		metadata::get_metadata_for_object_type(pool, metadata::TYPE_TRIGGER).await?;
	ddl::postdata::write_triggers(emitter, &postdata::get_triggers(pool, filters).await?, &trigger_comments)?;
	Ok(())
}

/// The data phase. Table-data TOC entries are appended in input order in
/// both modes; in single-file mode the per-segment byte ranges live in the
/// helper-written segment TOCs.
async fn backup_data(
	run: &mut RunContext,
	table_set: &TableSet,
	table_defs: &BTreeMap<u32, TableDefinition>,
) -> Result<(), RunError> {
	let tables = &table_set.data_tables;

	let result = if run.opts.single_data_file {
		debug!("initializing pipes and helper agents on segments");
		mover::verify_helper_version(&run.cluster).await?;
		let plugin_config = run
			.plugin
			.as_ref()
			.map(|plugin| plugin.config_path.display().to_string());
		mover::setup_single_file_backup(
			&run.cluster,
			&run.fp,
			tables,
			run.opts.compression,
			plugin_config.as_deref(),
		)
		.await?;
		info!("writing data to a single file per segment");
		mover::copy_tables_single_file(
			&run.pool,
			&run.cluster,
			&run.fp,
			tables,
			run.terminated.as_ref(),
		)
		.await?
	} else {
		info!("writing data to per-table files");
		mover::copy_tables_per_table(
			&run.pool,
			&run.fp,
			tables,
			run.opts.compression,
			run.terminated.as_ref(),
		)
		.await?
	};

	for (table, err) in &result.failed {
		warn!(%table, "table skipped by data backup: {err}");
	}

	for table in tables {
		let Some(rows_copied) = result.rows_copied.get(&table.oid) else {
			continue;
		};
		let attribute_string = table_defs
			.get(&table.oid)
			.map(TableDefinition::attribute_string)
			.unwrap_or_default();
		run.toc.add_data_entry(DataEntry {
			schema: table.schema.clone(),
			name: table.name.clone(),
			oid: table.oid,
			attribute_string,
			rows_copied: *rows_copied,
		});
	}

	if run.opts.single_data_file
		&& let Some(plugin) = &run.plugin
	{
		plugin.backup_segment_tocs(&run.cluster, &run.fp).await?;
	}

	if run.terminated.load(Ordering::Relaxed) {
		info!("data backup incomplete");
	} else {
		info!("data backup complete");
	}
	Ok(())
}

/// Planner statistics go to their own file so a restore can choose to skip
/// them; the TOC's statistics section indexes it.
async fn backup_statistics(run: &mut RunContext, table_set: &TableSet) -> Result<(), RunError> {
	let path = run.fp.statistics_file_path();
	info!(?path, "writing query planner statistics");
	let mut file = ByteCountFile::create(&path)?;

	let attribute_stats =
		stats::get_attribute_statistics(&run.pool, &table_set.metadata_tables).await?;
	let tuple_stats = stats::get_tuple_statistics(&run.pool, &table_set.metadata_tables).await?;

	{
		let mut emitter = Emitter::new(&mut file, &mut run.toc, &mut run.object_counts);
		ddl::statistics::write_statistics(&mut emitter, &tuple_stats, &attribute_stats)?;
	}
	file.close()?;

	if run.terminated.load(Ordering::Relaxed) {
		info!("query planner statistics backup incomplete");
	} else {
		info!("query planner statistics backup complete");
	}
	Ok(())
}

/// Idempotent teardown: report first (it must exist even for failed runs),
/// then cleanup of helpers, sessions, plugin state and the lock, swallowing
/// errors so the process always reaches its exit.
async fn teardown(mut run: RunContext, result: &Result<(), RunError>) {
	let error_message = result.as_ref().err().map(ToString::to_string);
	if let Some(message) = &error_message {
		warn!("backup failed: {message}");
	}

	let coordinator_dir = run.fp.dir_for_content(COORDINATOR);
	if coordinator_dir.exists() {
		run.report.config.plugin = run
			.plugin
			.as_ref()
			.map(|plugin| plugin.executable_path.clone());
		run.report.construct_params_string();

		if let Err(err) = run.report.write_config_file(&run.fp.config_file_path()) {
			warn!("could not write config file: {err}");
		}
		let report_path = run.fp.report_file_path();
		match run
			.report
			.write_report_file(&report_path, &run.object_counts, error_message.as_deref())
		{
			Ok(()) => email_report(&report_path, run.fp.timestamp()).await,
			Err(err) => warn!("could not write report file: {err}"),
		}

		if let Some(plugin) = &run.plugin {
			let _ = plugin
				.backup_file(&run.cluster, &run.fp.config_file_path(), false)
				.await;
			let _ = plugin.backup_file(&run.cluster, &report_path, false).await;
			if let Err(err) = plugin.cleanup_on_all_hosts(&run.cluster, &coordinator_dir).await {
				warn!("plugin cleanup failed: {err}");
			}
		}
	}

	let was_terminated = run.terminated.load(Ordering::Relaxed)
		|| matches!(result, Err(RunError::Terminated));
	if run.opts.single_data_file {
		lifecycle::clean_up_helper_files(&run.cluster, &run.fp).await;
		if was_terminated {
			lifecycle::clean_up_segment_helper_processes(&run.cluster, &run.fp).await;
			lifecycle::terminate_hanging_copy_sessions(
				&run.params,
				&run.pool.version,
				"mppdump",
			)
			.await;
		}
	}

	if result.is_err() {
		for slot in 0..run.pool.num_conns() {
			if let Err(err) = run.pool.rollback(slot).await {
				debug!(%slot, "rollback failed during teardown: {err}");
			}
		}
	}
	run.pool.close();

	// consecutive runs must not land on the same second-resolution timestamp
	tokio::time::sleep(Duration::from_secs(1)).await;
	for err in run.finalizers.run() {
		warn!("cleanup error: {err}");
	}
	debug!("cleanup complete");
}
