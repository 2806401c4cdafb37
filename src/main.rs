use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use audioprint::app_state::AppState;
use audioprint::cli;
use audioprint::config::{AppResources, Args, Command, ServerConfiguration};
use audioprint::db::Db;
use audioprint::index::{FingerprintIndex, MemoryIndex};
use audioprint::recognition::Recognizer;
use audioprint::server;
use audioprint::tracing::init_tracer;
use clap::Parser;
use dotenvy::dotenv;
use fingerprint::Fingerprinter;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config_path = args
        .config_path
        .clone()
        .unwrap_or_else(AppResources::default_config_path);
    let mut configuration = match ServerConfiguration::from_file(&config_path) {
        Ok(configuration) => configuration,
        Err(err) => panic!("Could not load configuration from {}: {err}", config_path.display()),
    };
    configuration.apply_args(&args);

    if let Err(err) = AppResources::initiate(&configuration.database_path, &configuration.log_path)
    {
        panic!("Could not initiate app resources: {err}");
    };
    let log_channel = match init_tracer(configuration.log_level.into(), &configuration.log_path) {
        Ok(channel) => channel,
        Err(err) => panic!("Could not initiate tracing: {err}"),
    };
    tracing::info!("Using configuration file: {}", configuration.config_file.0.display());
    tracing::info!("Using log file location: {}", configuration.log_path.display());

    if let Ok(path) = dotenv() {
        tracing::info!("Loaded env variables from: {}", path.display());
    } else {
        tracing::debug!("Could not load env variables from dotfile");
    }

    let fingerprinter = match Fingerprinter::new(configuration.fingerprint_config()) {
        Ok(fingerprinter) => fingerprinter,
        Err(err) => {
            tracing::error!("Invalid fingerprint configuration: {err}");
            return;
        }
    };

    let command = args.command.clone().unwrap_or_default();
    let in_memory = matches!(command, Command::Serve { in_memory: true });
    let index: Arc<dyn FingerprintIndex> = if in_memory {
        tracing::warn!("Using in-memory index, fingerprints are lost on exit");
        Arc::new(MemoryIndex::new())
    } else {
        match Db::connect(&configuration.database_path).await {
            Ok(db) => Arc::new(db),
            Err(err) => {
                tracing::error!(
                    "Failed to open database {}: {err}",
                    configuration.database_path.display()
                );
                return;
            }
        }
    };
    let recognizer = Recognizer::new(fingerprinter, index)
        .with_min_offset_votes(configuration.min_offset_votes);

    let result = match command {
        Command::Serve { .. } => {
            serve(recognizer, configuration, log_channel).await;
            Ok(())
        }
        Command::Register { path, name } => {
            cli::register(&recognizer, &configuration, &path, name).await
        }
        Command::Identify { path } => cli::identify(&recognizer, &configuration, &path).await,
        Command::Tracks => cli::tracks(&recognizer).await,
        Command::Remove { id } => cli::remove(&recognizer, id).await,
    };
    if let Err(err) = result {
        tracing::error!("{err}");
        std::process::exit(1);
    }
}

async fn serve(
    recognizer: Recognizer,
    configuration: ServerConfiguration,
    log_channel: audioprint::tracing::LogChannel,
) {
    let cancellation_token = CancellationToken::new();
    let port = configuration.port;
    let app_state = AppState {
        recognizer,
        configuration: Arc::new(configuration),
    };
    let app = server::router(app_state, log_channel);

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to start server on port {port}: {e}");
            return;
        }
    };
    tracing::info!("Starting server on port {port}");

    let server = {
        let cancellation_token = cancellation_token.clone();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(cancellation_token.cancelled_owned())
                .await
            {
                tracing::error!("Server failed: {e}");
            }
        })
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            cancellation_token.cancel();
        }
        _ = cancellation_token.cancelled() => {}
    }
    tracing::trace!("Waiting for in-flight requests");
    let _ = server.await;
    tracing::info!("Gracefully shut down");
}
