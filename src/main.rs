use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use galleria::{Catalog, Config, FfmpegTools, Scanner, SqliteCatalog, ThumbnailCache, Thumbnailer};

#[derive(Parser)]
#[command(name = "galleria", version, about = "Catalog a media folder and serve thumbnails")]
struct Cli {
    /// Config file (defaults to ~/.galleria/config.toml)
    #[arg(long, global = true, env = "GALLERIA_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "GALLERIA_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    #[arg(long, global = true, env = "GALLERIA_DATABASE")]
    database: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Catalog every image and video under ROOT
    Scan { root: PathBuf },
    /// Print every catalogued record as one JSON object per line
    List,
    /// Print the path of a catalogued file's thumbnail, generating it if needed
    Thumbnail { path: PathBuf },
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand)]
enum CacheCommand {
    Stats,
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "galleria=debug" } else { "galleria=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(cache_dir) = cli.cache_dir {
        config.cache_dir = cache_dir;
    }
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    match cli.command {
        Command::Scan { root } => scan(&config, root).await,
        Command::List => list(&config),
        Command::Thumbnail { path } => thumbnail(&config, path).await,
        Command::Cache(CacheCommand::Stats) => {
            let stats = ThumbnailCache::from_config(&config).stats()?;
            println!("{}", serde_json::to_string(&stats)?);
            Ok(())
        }
        Command::Cache(CacheCommand::Clear) => {
            ThumbnailCache::from_config(&config).clear()?;
            Ok(())
        }
    }
}

fn open_catalog(config: &Config) -> Result<Arc<SqliteCatalog>> {
    let catalog = SqliteCatalog::open(&config.database_path)
        .with_context(|| format!("Failed to open catalog at {}", config.database_path.display()))?;
    Ok(Arc::new(catalog))
}

async fn scan(config: &Config, root: PathBuf) -> Result<()> {
    let catalog = open_catalog(config)?;
    let scanner = Scanner::from_config(catalog, config);

    let report = scanner
        .ingest(&root)
        .await
        .with_context(|| format!("Scan of {} failed", root.display()))?;

    println!(
        "{} new, {} already catalogued, {} unrecognized, {} failed",
        report.created.len(),
        report.existing,
        report.unrecognized.len(),
        report.failed.len()
    );
    for failed in &report.failed {
        println!("  failed: {}: {}", failed.path.display(), failed.error);
    }

    Ok(())
}

fn list(config: &Config) -> Result<()> {
    let catalog = open_catalog(config)?;
    for record in catalog.all()? {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

async fn thumbnail(config: &Config, path: PathBuf) -> Result<()> {
    let path = std::fs::canonicalize(&path).with_context(|| format!("Cannot resolve {}", path.display()))?;
    let catalog = open_catalog(config)?;
    let record = catalog
        .find_by_path(&path)?
        .with_context(|| format!("{} is not catalogued; run `galleria scan` first", path.display()))?;

    let thumbnailer = Thumbnailer::new(ThumbnailCache::from_config(config), FfmpegTools::from_config(config));
    let thumbnail = thumbnailer.get_thumbnail(&record).await?;
    println!("{}", thumbnail.display());

    Ok(())
}
