use anyhow::Result;
use clap::Parser;
use shelf_filter_engine::config::{CliArgs, ServerConfig};
use shelf_filter_engine::server::FilterServer;
use shelf_filter_engine::transport::NdjsonTransport;

fn main() -> Result<()> {
	let args = CliArgs::parse();

	// Logs go to stderr; stdout carries the protocol
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
		)
		.init();

	let config = ServerConfig::from(&args);
	tracing::debug!(?config, "Server configuration");

	let transport = NdjsonTransport::new();
	let mut server = FilterServer::new(transport, config);

	tracing::info!("shelf-filter-engine ready");
	server.run()?;
	Ok(())
}
