mod cli;

use imagefetch::{
    audit::{self, SqliteAuditSink},
    batch::{BatchRunner, BatchSettings, BatchSummary, ItemSource},
    catalog::{ImportItem, SqliteCatalog},
    clock::{self, Clock, SystemClock},
    config::{self, Config},
    images::ImageStorage,
    orchestrator::Orchestrator,
};
use imagefetch_common::ItemStatus;
use imagefetch_db::pool::{get_conn, init_pool};
use imagefetch_db::queries::items;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{BatchArgs, Cli, Commands, JobArg};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "imagefetch=trace,imagefetch_db=trace,imagefetch_common=debug".to_string()
        } else {
            "imagefetch=info,imagefetch_db=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run {
            job,
            force,
            limit,
            batch,
        } => {
            let mut config = load_batch_config(config_path, &batch)?;
            config.batch.force_update |= force;
            if let Some(limit) = limit {
                config.batch.daily_limit = limit;
            }
            let source = match job {
                JobArg::Daily => ItemSource::Daily {
                    limit: config.batch.daily_limit,
                },
                JobArg::Backfill => ItemSource::Backfill,
            };
            block_on(run_batch(config, source, batch.json))
        }
        Commands::RetryFailed { batch } => {
            let config = load_batch_config(config_path, &batch)?;
            block_on(run_batch(config, ItemSource::RetryFailed, batch.json))
        }
        Commands::Fetch { ids, force, batch } => {
            let mut config = load_batch_config(config_path, &batch)?;
            config.batch.force_update |= force;
            block_on(run_batch(config, ItemSource::Manual(ids), batch.json))
        }
        Commands::Import { file } => import_items(&file, config_path),
        Commands::Status { json } => show_status(config_path, json),
        Commands::PruneAudit { days } => prune_audit(config_path, days),
        Commands::Validate {
            config: validate_path,
        } => {
            let path = validate_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("imagefetch {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn block_on<F: std::future::Future<Output = Result<()>>>(future: F) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(future)
}

fn load_batch_config(path: Option<&Path>, args: &BatchArgs) -> Result<Config> {
    let mut config = config::load_config_or_default(path)?;
    if let Some(concurrency) = args.concurrency {
        config.batch.concurrency = concurrency;
    }
    config.batch.test_mode |= args.dry_run;
    Ok(config)
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

fn open_catalog(config: &Config) -> Result<SqliteCatalog> {
    let db_path = expand(&config.storage.database_path);
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory: {:?}", parent))?;
    }
    tracing::debug!(path = %db_path.display(), "Opening catalog database");
    let pool = init_pool(&db_path.to_string_lossy())?;
    let storage = ImageStorage::new(expand(&config.storage.image_dir));
    Ok(SqliteCatalog::new(pool, storage))
}

async fn run_batch(config: Config, source: ItemSource, json: bool) -> Result<()> {
    config::validate_config(&config)?;

    let catalog = Arc::new(open_catalog(&config)?);
    let pool = catalog.pool().clone();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let orchestrator = Orchestrator::from_config(&config, catalog, Arc::clone(&clock))?;

    // Carry today's credential usage over from earlier processes.
    let since = clock::period_start(clock.now(), config.quota.reset_hour_utc);
    match audit::credential_usage_since(&pool, since) {
        Ok(usage) => {
            for ((provider, credential), used) in usage {
                orchestrator.credentials().set_used(provider, &credential, used);
            }
        }
        Err(e) => tracing::warn!(error = %e, "Failed to load credential usage from audit log"),
    }

    let sink = Arc::new(SqliteAuditSink::new(
        pool.clone(),
        config.audit.channel_capacity,
    ));
    let runner = BatchRunner::new(
        Arc::new(orchestrator),
        sink,
        BatchSettings::from(&config.batch),
    );

    let cancel = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight items");
            cancel.cancel();
        }
    });

    let summary = runner.run(source).await?;

    if let Err(e) = audit::prune_audit_log(&pool, config.audit.retention_days, clock.now()) {
        tracing::warn!(error = %e, "Failed to prune audit log");
    }

    print_summary(&summary, json)
}

fn print_summary(summary: &BatchSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("Run {} ({})", summary.run_id, summary.job_kind);
    if summary.dry_run {
        println!("[DRY RUN] No images were stored");
    }
    println!("Items: {} selected, {} processed", summary.selected, summary.dispatched);
    for status in ItemStatus::all() {
        let count = summary.count(*status);
        if count > 0 {
            println!("  {:<22} {}", status.to_string(), count);
        }
    }
    if summary.crashed > 0 {
        println!("  {:<22} {}", "crashed", summary.crashed);
    }
    if summary.cancelled {
        println!("Cancelled before all items were dispatched");
    }
    println!("Elapsed: {} ms", summary.elapsed_ms);
    Ok(())
}

fn import_items(file: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read import file: {:?}", file))?;
    let entries: Vec<ImportItem> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse import file: {:?}", file))?;

    let total = entries.len();
    let catalog = open_catalog(&config)?;
    let written = catalog.import(entries)?;
    println!("Imported {} of {} items", written, total);
    Ok(())
}

#[derive(serde::Serialize)]
struct StatusReport {
    items: u64,
    missing_images: u64,
    last_outcomes: Vec<(ItemStatus, u64)>,
}

fn show_status(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let catalog = open_catalog(&config)?;
    let conn = get_conn(catalog.pool())?;

    let report = StatusReport {
        items: items::count_items(&conn)?,
        missing_images: items::count_missing_images(&conn)?,
        last_outcomes: items::count_by_last_status(&conn)?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Items: {}", report.items);
    println!("Missing images: {}", report.missing_images);
    if report.last_outcomes.is_empty() {
        println!("No outcomes recorded yet");
    } else {
        println!("Last outcomes:");
        for (status, count) in &report.last_outcomes {
            println!("  {:<22} {}", status.to_string(), count);
        }
    }
    Ok(())
}

fn prune_audit(config_path: Option<&Path>, days: Option<u32>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let catalog = open_catalog(&config)?;
    let retention = days.unwrap_or(config.audit.retention_days);
    let removed = audit::prune_audit_log(catalog.pool(), retention, chrono::Utc::now())?;
    println!("Removed {} audit records older than {} days", removed, retention);
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, using defaults");
            let config = Config::default();
            config::validate_config(&config)?;
            config
        }
    };

    println!("✓ Configuration is valid");
    println!("  Concurrency: {}", config.batch.concurrency);
    println!("  Daily limit: {}", config.batch.daily_limit);
    println!("  Test mode: {}", config.batch.test_mode);
    println!(
        "  Quality: min {}x{}, max {} MB",
        config.quality.min_width, config.quality.min_height, config.quality.max_image_size_mb
    );
    let chain = config.provider_chain();
    println!("  Providers: {}", chain.len());
    for provider in chain {
        println!(
            "    {} (priority {}, {} credentials, {}/min, {}/day)",
            provider.kind,
            provider.priority,
            provider.credentials.len(),
            provider.requests_per_minute,
            provider.requests_per_day
        );
    }
    Ok(())
}
