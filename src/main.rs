//! `aonbas-server` binary.
//!
//! `aonbas-server` serves the transit routes until Ctrl-C or SIGTERM.
//! `aonbas-server schema` prints the route schema document and exits.

use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::runtime::{Builder, Runtime};

use aonbas_server::config::ServerConfig;
use aonbas_server::handler::{RegistryBuilder, ServiceRegistry};
use aonbas_server::schema::SchemaRegistry;
use aonbas_server::services::ServiceContainer;
use aonbas_server::telemetry;
use aonbas_server::transit::{
    routes, CacheService, MetroService, OtpService, TmbClient, TramClient, TramService,
};
use aonbas_server::upstream::UpstreamClient;
use aonbas_server::{Server, ServerSettings};

/// Grace for handler tasks still on the worker runtime after shutdown.
const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(name = "aonbas-server", version, about = "Transit request-dispatching server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve until a shutdown signal (default).
    Run,
    /// Print the route schema document as JSON.
    Schema,
}

type BoxError = Box<dyn Error + Send + Sync>;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(),
        Command::Schema => print_schema(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("aonbas-server: {e}");
            ExitCode::FAILURE
        }
    }
}

fn build_registry() -> Result<ServiceRegistry, BoxError> {
    let mut builder = RegistryBuilder::new();
    routes::install(&mut builder)?;
    Ok(builder.build())
}

fn print_schema() -> Result<(), BoxError> {
    let schema = SchemaRegistry::from_registry(&build_registry()?);
    println!("{}", schema.export_string()?);
    Ok(())
}

fn runtime(name: &str, threads: usize) -> std::io::Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(threads)
        .thread_name(name)
        .enable_all()
        .build()
}

fn build_services(config: &ServerConfig) -> Result<ServiceContainer, BoxError> {
    let cache = Arc::new(CacheService::new(config.cache_capacity));
    let upstream = UpstreamClient::new(config.upstream_config(), config.upstreams.clone())?;
    let tmb = Arc::new(TmbClient::new(upstream.clone(), config.tmb.clone())?);
    let tram = Arc::new(
        TramClient::new(upstream.clone(), Arc::clone(&cache))?
            .with_access_token(config.tram.access_token.clone()),
    );

    let services = ServiceContainer::builder()
        .provide(MetroService::new(tmb, Arc::clone(&cache)))?
        .provide(TramService::new(tram, Arc::clone(&cache)))?
        .provide(OtpService::new(Arc::clone(&cache)))?
        .provide(upstream)?
        .provide_arc(cache)?
        .build();
    Ok(services)
}

fn run() -> Result<(), BoxError> {
    let (config, env_file) = ServerConfig::from_env()?;
    telemetry::init(config.log_format, &config.log_filter)?;
    env_file.log();
    tracing::info!(?config, "Configuration loaded");

    let registry = build_registry()?;
    let io = runtime("aonbas-io", config.io_threads)?;
    let workers = runtime("aonbas-worker", config.worker_threads)?;
    let worker_handle = workers.handle().clone();

    let result = io.block_on(async {
        let services = build_services(&config)?;
        let server = Server::builder()
            .settings(ServerSettings::from(&config))
            .registry(registry)
            .services(services)
            .workers(worker_handle)
            .bind()
            .await?;

        let report = server.run_until(shutdown_signal()).await;
        if report.forced > 0 {
            tracing::warn!(forced = report.forced, "Connections closed before finishing");
        }
        Ok::<_, BoxError>(())
    });

    workers.shutdown_timeout(WORKER_SHUTDOWN_TIMEOUT);
    result
}

/// Resolves on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
