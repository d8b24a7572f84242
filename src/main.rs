mod activity;
mod api;
mod batch;
mod catalog;
mod config;
mod http;
mod idempotency;
mod ingest;
mod metrics;
mod models;
mod security;

use clap::{Args, Parser, Subcommand};
use config::{AppConfig, HttpConfig};
use eyre::{Result, WrapErr, bail};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::{net::SocketAddr, path::PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "catalog-ingest", about = "Catalog ingestion gateway and batch uploader", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP gateway (default)
    Serve,
    /// Parse a delimited file, preview it, and submit it as one bulk request
    Upload(UploadArgs),
    /// Check that the configured credentials are accepted
    Verify(ClientArgs),
}

#[derive(Debug, Args)]
struct ClientArgs {
    /// Base URL of the gateway
    #[arg(long, env = "INGEST_API_URL", default_value = "http://localhost:8000")]
    api_url: String,

    /// Shared secret sent as X-Ingest-Token
    #[arg(long, env = "INGEST_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Submitter email; also used for allow-list authorization
    #[arg(long, env = "INGEST_USER_EMAIL")]
    user_email: Option<String>,
}

#[derive(Debug, Args)]
struct UploadArgs {
    /// CSV or other delimited text with a header row
    file: PathBuf,

    /// Force the field delimiter instead of detecting it
    #[arg(long)]
    delimiter: Option<char>,

    /// Stop after printing the preview
    #[arg(long)]
    dry_run: bool,

    #[command(flatten)]
    client: ClientArgs,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    init_tracing();
    if let Err(err) = run(Cli::parse()).await {
        error!(target = "catalog.cli", "{err:?}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(AppConfig::from_env()).await,
        Command::Upload(args) => upload(args).await,
        Command::Verify(args) => verify(args).await,
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    let prometheus = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(target = "catalog.api", error = %err, "prometheus_recorder_unavailable");
            None
        }
    };
    let state = api::AppState::from_config(&config, prometheus);
    let app = api::build_router(state);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(target = "catalog.api", storefront = %config.storefront_url, "listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

fn client_from(args: ClientArgs) -> batch::IngestClient {
    let http = http::build_client(&HttpConfig::default());
    batch::IngestClient::new(args.api_url, http, args.token, args.user_email)
}

async fn upload(args: UploadArgs) -> Result<()> {
    let delimiter = match args.delimiter {
        Some(ch) if ch.is_ascii() => Some(ch as u8),
        Some(ch) => bail!("delimiter `{ch}` must be a single ASCII character"),
        None => None,
    };
    let parsed = batch::parse_path(&args.file, delimiter)
        .wrap_err_with(|| format!("cannot upload {}", args.file.display()))?;

    println!("{}", parsed.preview().render());
    if args.dry_run {
        return Ok(());
    }

    let client = client_from(args.client);
    let result = client.submit(&parsed).await?;
    println!("{}", batch::render_summary(&result));
    for failure in &result.failures {
        println!("  {}", batch::render_failure(failure));
    }
    if !result.success {
        bail!("{} of {} records failed", result.failed, result.total);
    }
    Ok(())
}

async fn verify(args: ClientArgs) -> Result<()> {
    let client = client_from(args);
    let response = client.verify().await?;
    println!(
        "{}",
        response
            .message
            .unwrap_or_else(|| "Connection verified".to_string())
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
