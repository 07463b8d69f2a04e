//! stash-index - inspect and maintain the stash fingerprint index and
//! backup manifests.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use stash_index::executor::FingerprintExecutor;
use stash_index::fs::walker::{collect_candidates, WalkOptions};
use stash_index::planner::verify_manifest_base;
use stash_index::utils::format::{format_bytes, format_duration};
use stash_index::{utils, BackupPlan, BackupType, Config, FingerprintIndex, Metadata};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Index file (overrides config)
    #[arg(short, long, value_name = "FILE")]
    index: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show index statistics and whether a full backup is due
    Status,

    /// List candidates that changed since they were last fingerprinted
    Changed {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Show what the next backup would capture
    Plan {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Fingerprint a completed backup run into the index
    Record {
        /// Name of the backup run
        #[arg(short, long)]
        name: String,

        /// Category used for manifest backup paths
        #[arg(long, default_value = "files")]
        category: String,

        /// Write a manifest into this directory
        #[arg(long, value_name = "DIR")]
        manifest_dir: Option<PathBuf>,

        /// Record a full backup regardless of cadence
        #[arg(long)]
        full: bool,

        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Drop fingerprints from the index
    Forget {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Print a manifest summary
    Summary { manifest: PathBuf },

    /// List the largest files in a manifest
    Largest {
        manifest: PathBuf,

        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    }
    .with_env_overrides();

    if let Some(index) = args.index {
        config.index.path = index;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!(
        "stash-index v{} using {}",
        env!("CARGO_PKG_VERSION"),
        config.index.path.display()
    );

    match args.command {
        Command::Status => status(&config),
        Command::Changed { paths } => changed(&config, &paths),
        Command::Plan { paths } => plan(&config, &paths),
        Command::Record {
            name,
            category,
            manifest_dir,
            full,
            paths,
        } => record(&config, &name, &category, manifest_dir.as_deref(), full, &paths).await,
        Command::Forget { paths } => forget(&config, &paths),
        Command::Summary { manifest } => {
            let metadata = Metadata::load(&manifest)?;
            println!("{}", metadata.summary());
            Ok(())
        }
        Command::Largest { manifest, count } => {
            let metadata = Metadata::load(&manifest)?;
            for file in metadata.largest_files(count) {
                println!(
                    "{:>12}  {}",
                    format_bytes(file.size),
                    file.backup_path.display()
                );
            }
            Ok(())
        }
    }
}

fn load_index(config: &Config) -> Result<FingerprintIndex> {
    FingerprintIndex::load(&config.index.path)
        .with_context(|| format!("loading index {}", config.index.path.display()))
}

fn candidates(config: &Config, roots: &[PathBuf]) -> Vec<PathBuf> {
    let options = WalkOptions::with_excludes(config.backup.exclude_patterns.clone());
    collect_candidates(roots, &options)
}

fn status(config: &Config) -> Result<()> {
    let index = load_index(config)?;
    let format_time = |t: Option<chrono::DateTime<Utc>>| {
        t.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string())
    };

    println!("Index:            {}", config.index.path.display());
    println!("Files:            {}", index.file_count());
    println!("Total size:       {}", format_bytes(index.total_size()));
    println!(
        "Last full backup: {} ({})",
        format_time(index.last_full_backup()),
        index.last_full_backup_name().unwrap_or_else(|| "-".to_string())
    );
    println!("Last backup:      {}", format_time(index.last_backup()));
    println!(
        "Full backup due:  {}",
        if index.need_full_backup(config.full_backup_interval()) {
            "yes"
        } else {
            "no"
        }
    );
    Ok(())
}

fn changed(config: &Config, roots: &[PathBuf]) -> Result<()> {
    let index = load_index(config)?;
    for path in index.get_changed_files(&candidates(config, roots)) {
        println!("{}", path.display());
    }
    Ok(())
}

fn plan(config: &Config, roots: &[PathBuf]) -> Result<()> {
    let index = load_index(config)?;
    let plan = BackupPlan::build(&index, &candidates(config, roots), config.full_backup_interval());

    match &plan.base_backup {
        Some(base) => println!("{} backup (base: {})", plan.backup_type, base),
        None => println!("{} backup", plan.backup_type),
    }
    println!("{} of {} candidates selected", plan.files.len(), plan.candidates);
    for path in &plan.files {
        println!("  {}", path.display());
    }
    Ok(())
}

async fn record(
    config: &Config,
    name: &str,
    category: &str,
    manifest_dir: Option<&Path>,
    force_full: bool,
    roots: &[PathBuf],
) -> Result<()> {
    let start = Instant::now();
    let index = Arc::new(load_index(config)?);
    let candidates = candidates(config, roots);

    let mut plan = BackupPlan::build(&index, &candidates, config.full_backup_interval());
    if force_full && plan.is_incremental() {
        plan = BackupPlan {
            backup_type: BackupType::Full,
            base_backup: None,
            files: candidates.clone(),
            candidates: candidates.len(),
        };
    }

    let executor = FingerprintExecutor::from_config(config);

    if let Some(dir) = manifest_dir {
        let metadata = Arc::new(Metadata::new());
        plan.apply_to(&metadata);

        let entries = plan
            .files
            .iter()
            .map(|path| (path.clone(), backup_path_for(path, roots, category)))
            .collect();
        let outcome = executor
            .capture_category(metadata.clone(), category, entries)
            .await;
        if outcome.failed > 0 {
            tracing::warn!("{} entries could not be captured", outcome.failed);
        }

        if !verify_manifest_base(&index, &metadata) {
            tracing::warn!("Manifest lineage could not be verified");
        }

        metadata.set_total_duration(start.elapsed());
        let manifest_path = dir.join(&config.backup.metadata_file);
        metadata.save(&manifest_path)?;
        println!("Manifest written to {}", manifest_path.display());
    }

    let mut refresh = plan.files.clone();
    for path in index.vanished_files(roots) {
        if !refresh.contains(&path) {
            refresh.push(path);
        }
    }
    let outcome = executor.update_index(index.clone(), name, refresh).await;
    plan.commit(&index, name, Utc::now());
    index.save(&config.index.path)?;

    println!(
        "Recorded {} backup {}: {} fingerprints ({}), {} removed, {} skipped in {}",
        plan.backup_type,
        name,
        outcome.updated,
        format_bytes(outcome.bytes),
        outcome.removed,
        outcome.skipped,
        format_duration(start.elapsed())
    );
    Ok(())
}

fn forget(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let index = load_index(config)?;
    let removed = paths
        .iter()
        .filter(|path| index.remove_file(path).is_some())
        .count();
    index.save(&config.index.path)?;
    println!("Removed {} of {} fingerprints", removed, paths.len());
    Ok(())
}

/// Backup-relative path: `<category>/<path below its root>`.
fn backup_path_for(path: &Path, roots: &[PathBuf], category: &str) -> PathBuf {
    let relative = roots
        .iter()
        .filter_map(|root| path.strip_prefix(root).ok())
        .find(|rel| !rel.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .or_else(|| path.file_name().map(PathBuf::from))
        .unwrap_or_else(|| path.to_path_buf());

    Path::new(category).join(relative)
}
