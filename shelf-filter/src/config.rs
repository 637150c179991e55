use std::path::PathBuf;

use clap::Parser;

use crate::store::{StoreConfig, DEFAULT_STORAGE_KEY};

#[derive(Parser, Debug, Clone)]
#[command(
	name = "shelf-filter-engine",
	about = "Collection filter engine over JSON-RPC 2.0 / NDJSON stdio"
)]
pub struct CliArgs {
	/// Directory holding the persisted filter store. Filters live in memory
	/// only when omitted.
	#[arg(long, env = "SHELF_FILTER_STORAGE_DIR")]
	pub storage_dir: Option<PathBuf>,

	/// Key the filter store is saved under
	#[arg(long, default_value = DEFAULT_STORAGE_KEY, env = "SHELF_FILTER_STORAGE_KEY")]
	pub storage_key: String,

	/// Gzip the filter store on write
	#[arg(long)]
	pub compress: bool,

	/// Log level (trace, debug, info, warn, error)
	#[arg(long, default_value = "info", env = "SHELF_FILTER_LOG_LEVEL")]
	pub log_level: String,
}

/// Defaults for `store/initialize`; each session may override them.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub storage_dir: Option<PathBuf>,
	pub store: StoreConfig,
}

impl From<&CliArgs> for ServerConfig {
	fn from(args: &CliArgs) -> Self {
		Self {
			storage_dir: args.storage_dir.clone(),
			store: StoreConfig {
				storage_key: args.storage_key.clone(),
				compress: args.compress,
			},
		}
	}
}
