use clap::Subcommand;
use miette::Result;
use tracing::{debug, trace};

pub use context::Context;
pub mod backup;
pub mod context;

use crate::args::Args;

#[derive(Debug, Clone, Subcommand)]
pub enum Action {
	/// Back up a database to a timestamped artifact
	#[clap(alias = "b")]
	Backup(backup::BackupArgs),
}

pub async fn run(args: Args) -> Result<()> {
	debug!(version = %env!("CARGO_PKG_VERSION"), "starting up");
	trace!(action = ?args.action, "action");
	let ctx = Context::new();
	match args.action {
		Action::Backup(sub) => backup::run(ctx.with_top(sub)).await,
	}
}
