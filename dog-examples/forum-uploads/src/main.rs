use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dog_upload::{
    BlobStore, GcsBlobStore, HostSettings, MemoryBlobStore, RetryPolicy, RetryingStore, UploadConfig,
    UploadCtx, UploadOrchestrator, UploadPayload, UploadRequest,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "forum-uploads", about = "Upload forum attachments and images to blob storage")]
struct Cli {
    /// Storage backend
    #[arg(long, value_enum, default_value_t = Backend::Gcs)]
    store: Backend,

    /// Storage path prefix; generated per upload when omitted
    #[arg(long, global = true)]
    context: Option<String>,

    /// Uploader id used in generated contexts
    #[arg(long, global = true)]
    uid: Option<String>,

    /// Host settings JSON, e.g. '{"maximumFileSize":"512","profileImageDimension":"256"}'
    #[arg(long, global = true)]
    settings: Option<String>,

    /// Abort the upload after this many seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a local file as-is
    File {
        path: PathBuf,
        /// Stored filename; defaults to the file's own name
        #[arg(long)]
        name: Option<String>,
    },
    /// Fetch a remote image, resize it and upload it
    Image {
        url: String,
        /// Declared size in bytes checked against the upload limit
        #[arg(long, default_value_t = 0)]
        size: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Gcs,
    Memory,
    #[cfg(feature = "s3")]
    S3,
}

async fn open_store(backend: Backend) -> Result<Arc<dyn BlobStore>> {
    let policy = RetryPolicy::default();
    Ok(match backend {
        Backend::Gcs => Arc::new(RetryingStore::new(GcsBlobStore::from_env()?, policy)),
        Backend::Memory => Arc::new(MemoryBlobStore::new()),
        #[cfg(feature = "s3")]
        Backend::S3 => Arc::new(RetryingStore::new(
            dog_upload::S3CompatibleStore::from_env().await?,
            policy,
        )),
    })
}

async fn request_for(command: Command) -> Result<UploadRequest> {
    let payload = match command {
        Command::File { path, name } => {
            let size = tokio::fs::metadata(&path)
                .await
                .with_context(|| format!("cannot stat {}", path.display()))?
                .len();
            let name = match name {
                Some(name) => name,
                None => path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .context("path has no file name; pass --name")?
                    .to_string(),
            };
            UploadPayload::file(path, name, size)
        }
        Command::Image { url, size } => UploadPayload::url(url, size),
    };
    Ok(UploadRequest::new(payload))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = UploadConfig::from_env();
    if let Some(raw) = cli.settings.as_deref() {
        let settings: HostSettings =
            serde_json::from_str(raw).context("--settings is not valid host settings JSON")?;
        config = settings.apply(config);
    }
    info!(?config, "loaded upload configuration");

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()?;
    let uploads = UploadOrchestrator::with_client(open_store(cli.store).await?, http, config);

    let is_image = matches!(cli.command, Command::Image { .. });
    let mut request = request_for(cli.command).await?;
    request.context = cli.context;
    request.uploader_id = cli.uid;

    let token = CancellationToken::new();
    let mut ctx = UploadCtx::new().with_cancellation(token.clone());
    if let Some(secs) = cli.timeout_secs {
        ctx = ctx.with_timeout(Duration::from_secs(secs));
    }
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let result = if is_image {
        uploads.upload_image(&ctx, request).await?
    } else {
        uploads.upload_file(&ctx, request).await?
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
