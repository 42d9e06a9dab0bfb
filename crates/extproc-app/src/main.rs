use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use extproc::server::{ExtProcService, HealthService, Server};
use extproc::watcher::ConfigWatcher;
use protos::envoy::service::ext_proc::v3::external_processor_server::ExternalProcessorServer;
use protos::grpc::health::v1::health_server::HealthServer;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
	name = "extproc",
	about = "External processing service translating OpenAI chat requests for heterogeneous LLM backends"
)]
struct Args {
	/// Path to the filter configuration file. Watched for changes.
	#[arg(long = "configPath")]
	config_path: PathBuf,
	/// gRPC listen address, either "host:port" or a bare ":port".
	#[arg(long = "extProcPort", default_value = ":1063")]
	ext_proc_addr: String,
	/// Log filter directive, e.g. "info" or "extproc=debug".
	#[arg(long = "logLevel", default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_new(&args.log_level)
				.with_context(|| format!("invalid log level {:?}", args.log_level))?,
		)
		.init();

	let addr = parse_addr(&args.ext_proc_addr)?;
	let server = Arc::new(Server::new(None));

	let mut watcher = ConfigWatcher::new(&args.config_path, server.clone(), CONFIG_POLL_INTERVAL);
	watcher
		.load_initial()
		.await
		.context("initial configuration load failed")?;

	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let watcher_task = tokio::spawn(watcher.run(shutdown_rx));

	info!(%addr, "starting external processor");
	tonic::transport::Server::builder()
		.add_service(ExternalProcessorServer::new(ExtProcService::new(server)))
		.add_service(HealthServer::new(HealthService))
		.serve_with_shutdown(addr, shutdown_signal())
		.await
		.context("gRPC server failed")?;

	let _ = shutdown_tx.send(true);
	let _ = watcher_task.await;
	info!("external processor stopped");
	Ok(())
}

fn parse_addr(raw: &str) -> anyhow::Result<SocketAddr> {
	// A bare ":port" binds every interface.
	if let Some(port) = raw.strip_prefix(':') {
		let port: u16 = port
			.parse()
			.with_context(|| format!("invalid port in listen address {raw:?}"))?;
		return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
	}
	raw
		.parse()
		.with_context(|| format!("invalid listen address {raw:?}"))
}

async fn shutdown_signal() {
	#[cfg(unix)]
	{
		let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler");
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {},
			_ = term.recv() => {},
		}
	}
	#[cfg(not(unix))]
	{
		let _ = tokio::signal::ctrl_c().await;
	}
}
