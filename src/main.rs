//! Kura Uploadr - tenant-scoped large-object uploads for S3-compatible buckets

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use kura_uploadr::config::Config;
use kura_uploadr::logging::init_logging;
use kura_uploadr::metrics::MetricsServer;
use kura_uploadr::namespace::{relativize_listing, Caller, Role, TenantNamespace};
use kura_uploadr::s3::{ObjectListing, S3Gateway};
use kura_uploadr::server::{ApiServer, AppState};
use kura_uploadr::upload::{
    FileSource, HttpPartTransport, MultipartUploader, ProgressUpdate, UploadOutcome,
    UploadRequest,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Kura Uploadr - multipart uploads and file browsing for organization buckets
#[derive(Parser, Debug)]
#[command(name = "kura-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (and the metrics endpoint when enabled)
    Serve,

    /// Upload one local file as a multipart upload
    Upload {
        /// Organization namespace to upload into
        #[arg(long)]
        namespace: String,

        /// Caller role
        #[arg(long, default_value = "write")]
        role: String,

        /// Destination path relative to the namespace
        #[arg(long)]
        path: String,

        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,

        /// Local file to upload
        file: PathBuf,
    },

    /// List objects under a prefix
    List {
        #[arg(long)]
        namespace: String,

        #[arg(long, default_value = "")]
        prefix: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("loading configuration from {:?}", args.config))?;
    init_logging(&config.logging)?;

    info!("Starting Kura Uploadr v{}", kura_uploadr::VERSION);

    let gateway = Arc::new(S3Gateway::connect(&config.store, &config.upload).await?);

    match args.command {
        Command::Serve => serve(&config, gateway).await,
        Command::Upload {
            namespace,
            role,
            path,
            content_type,
            file,
        } => {
            let caller = Caller::new(TenantNamespace::new(namespace)?, role.parse::<Role>()?);
            upload(&config, gateway, caller, path, content_type, file).await
        }
        Command::List { namespace, prefix } => {
            let namespace = TenantNamespace::new(namespace)?;
            list(gateway, &namespace, &prefix).await
        }
    }
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            token.cancel();
        }
    });
}

async fn serve(config: &Config, gateway: Arc<S3Gateway>) -> anyhow::Result<()> {
    let mut metrics_server = if config.metrics.enabled {
        let mut server = MetricsServer::new(&config.metrics)?;
        server.start().await?;
        Some(server)
    } else {
        None
    };

    let state = AppState {
        gateway: gateway.clone(),
        listing: gateway,
    };
    let server = ApiServer::bind(&config.server.address, state).await?;

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());
    server.run(shutdown).await?;

    if let Some(metrics_server) = metrics_server.as_mut() {
        metrics_server.shutdown().await;
    }
    Ok(())
}

async fn upload(
    config: &Config,
    gateway: Arc<S3Gateway>,
    caller: Caller,
    path: String,
    content_type: String,
    file: PathBuf,
) -> anyhow::Result<()> {
    let transport = Arc::new(HttpPartTransport::new(CONNECT_TIMEOUT)?);
    let uploader = MultipartUploader::new(gateway, transport, config.upload.clone())?;

    let source = FileSource::open(&file)
        .await
        .with_context(|| format!("opening {}", file.display()))?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<ProgressUpdate>();
    let progress_log = tokio::spawn(async move {
        while let Some(update) = progress_rx.recv().await {
            info!(
                percent = update.percent,
                parts = %format!("{}/{}", update.parts_completed, update.total_parts),
                speed = %update.speed,
                eta = %update.eta_description,
                "Uploading"
            );
        }
    });

    let request = UploadRequest {
        path,
        content_type,
        source: Arc::new(source),
    };
    let result = uploader
        .upload(&caller, request, cancel, Some(progress_tx))
        .await;
    let _ = progress_log.await;

    match result {
        Ok(report) => match report.outcome {
            UploadOutcome::Completed(object) => {
                info!(
                    path = %report.path,
                    parts = report.total_parts,
                    bytes = report.total_bytes,
                    etag = ?object.etag,
                    "Upload complete"
                );
                Ok(())
            }
            UploadOutcome::Cancelled => bail!("upload of {} cancelled", report.path),
        },
        Err(e) => {
            error!(error = %e, "Upload failed");
            Err(e.into())
        }
    }
}

async fn list(
    gateway: Arc<S3Gateway>,
    namespace: &TenantNamespace,
    prefix: &str,
) -> anyhow::Result<()> {
    let prefix = if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{}/", prefix)
    };
    let key = namespace.qualify(&prefix)?;

    for object in relativize_listing(namespace, gateway.list_objects(&key).await?) {
        if object.is_folder {
            println!("{:>12}  {}", "-", object.key);
        } else {
            println!("{:>12}  {}", object.size, object.key);
        }
    }
    Ok(())
}
