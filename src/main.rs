use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use eddc::{
    config::{StoreBackend, StoreConfig, ThumbnailConfig, ThumbnailFormat},
    detection::{DetectionRecorder, HistoryReader, PredictionPipeline},
    image::{ImageLoader, ImageNormalizer, ThumbnailCodec},
    models::ModelManager,
    store::{open_store, UserId},
    web::serve,
    Config,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "eddc")]
#[command(about = "Eye condition detection service with per-user detection history")]
#[command(version)]
struct Cli {
    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(flatten)]
    model: ModelArgs,

    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ModelArgs {
    /// ONNX classifier path
    #[arg(long, env = "EDDC_MODEL", default_value = "models/eye_classifier.onnx", global = true)]
    model: String,

    /// Labels file, one class per line (defaults to the built-in 15 classes)
    #[arg(long, env = "EDDC_LABELS", global = true)]
    labels: Option<String>,

    /// Number of ONNX Runtime intra-op threads
    #[arg(long, global = true)]
    threads: Option<usize>,
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreKind {
    Memory,
    Realtime,
}

#[derive(Clone, Copy, ValueEnum)]
enum ThumbnailKind {
    Jpeg,
    Png,
}

#[derive(Args)]
struct StoreArgs {
    /// History store backend
    #[arg(long, env = "EDDC_STORE", value_enum, default_value = "memory", global = true)]
    store: StoreKind,

    /// Realtime database base URL
    #[arg(long, env = "EDDC_STORE_URL", global = true)]
    store_url: Option<String>,

    /// Realtime database auth token
    #[arg(long, env = "EDDC_STORE_AUTH", hide_env_values = true, global = true)]
    store_auth: Option<String>,

    /// Store request timeout in seconds
    #[arg(long, default_value_t = 15, global = true)]
    store_timeout: u64,

    /// Thumbnail encoding
    #[arg(long, value_enum, default_value = "jpeg", global = true)]
    thumbnail_format: ThumbnailKind,

    /// JPEG thumbnail quality (1-100)
    #[arg(long, default_value_t = 70, value_parser = clap::value_parser!(u8).range(1..=100), global = true)]
    thumbnail_quality: u8,

    /// Downscale stored images so the longest side fits (keeps the original size when unset)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..), global = true)]
    thumbnail_max_side: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service
    Serve {
        /// Server bind address
        #[arg(long, env = "EDDC_BIND", default_value = "0.0.0.0:5005")]
        bind: String,

        /// Enable development mode
        #[arg(long)]
        dev: bool,
    },
    /// Classify one image file and print the result as JSON
    Classify {
        /// Image file
        image: PathBuf,

        /// Record the detection under this user's history
        #[arg(long)]
        user: Option<String>,
    },
    /// Print a user's detection history, newest first
    History {
        #[arg(long)]
        user: String,
    },
}

impl Cli {
    fn config(&self, bind: String, dev: bool) -> Result<Config> {
        let mut config = Config::new(
            bind,
            self.model.model.clone(),
            self.model.labels.clone(),
            dev,
        )?;

        if let Some(threads) = self.model.threads {
            config.onnx_config.intra_threads = threads.max(1);
        }

        Ok(config
            .with_store(self.store.store_config()?)
            .with_thumbnail(self.store.thumbnail_config()))
    }
}

impl StoreArgs {
    fn store_config(&self) -> Result<StoreConfig> {
        let backend = match self.store {
            StoreKind::Memory => StoreBackend::Memory,
            StoreKind::Realtime => StoreBackend::Realtime {
                base_url: self
                    .store_url
                    .clone()
                    .context("--store-url is required for the realtime store")?,
                auth_token: self.store_auth.clone(),
            },
        };

        Ok(StoreConfig {
            backend,
            request_timeout: self.store_timeout,
        })
    }

    fn thumbnail_config(&self) -> ThumbnailConfig {
        ThumbnailConfig {
            format: match self.thumbnail_format {
                ThumbnailKind::Jpeg => ThumbnailFormat::Jpeg {
                    quality: self.thumbnail_quality,
                },
                ThumbnailKind::Png => ThumbnailFormat::Png,
            },
            max_side: self.thumbnail_max_side,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志系统
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    match &cli.command {
        Commands::Serve { bind, dev } => {
            tracing::info!("Starting eye condition detection service...");
            tracing::info!("Bind address: {}", bind);
            tracing::info!("Model: {}", cli.model.model);

            let config = cli.config(bind.clone(), *dev)?;
            serve(config).await?;
        }
        Commands::Classify { image, user } => {
            let config = cli.config(String::new(), false)?;
            classify(config, image.clone(), user.as_deref()).await?;
        }
        Commands::History { user } => {
            let config = cli.config(String::new(), false)?;
            require_persistent_store(&config, "history")?;
            let user = UserId::parse(user)?;
            let store = open_store(&config.store_config)?;

            let view = HistoryReader::new(store).load(&user).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
    }

    Ok(())
}

async fn classify(config: Config, path: PathBuf, user: Option<&str>) -> Result<()> {
    let user = user.map(UserId::parse).transpose()?;
    if user.is_some() {
        require_persistent_store(&config, "classify --user")?;
    }

    let image = tokio::task::spawn_blocking({
        let path = path.clone();
        move || ImageLoader::from_path(&path)
    })
    .await?
    .with_context(|| format!("Failed to load image {}", path.display()))?;

    let manager = ModelManager::load(config.clone()).await?;
    let mut pipeline = PredictionPipeline::new(
        ImageNormalizer::default(),
        manager.worker(),
        manager.postprocessor(),
    );

    if user.is_some() {
        let store = open_store(&config.store_config)?;
        pipeline = pipeline.with_recorder(DetectionRecorder::new(
            store,
            ThumbnailCodec::new(config.thumbnail_config),
        ));
    }

    let outcome = pipeline.process_image(user.as_ref(), image, None).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(())
}

/// 一次性命令使用内存存储时，记录随进程退出丢失
fn require_persistent_store(config: &Config, command: &str) -> Result<()> {
    anyhow::ensure!(
        config.store_config.is_persistent(),
        "`{}` needs a persistent history store: pass --store realtime --store-url <URL>",
        command
    );
    Ok(())
}
