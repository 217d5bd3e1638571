use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use jemallocator::Jemalloc;
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use lendwatch::{
    compare,
    config::RetrySettings,
    worker::{fetch_snapshot, ingest_block, BlockRef},
    AaveReader, ComparisonFile, MarketReader, Poller, PostgresStore, Settings, SnapshotFiles,
    SnapshotStore, StoreError,
};

#[derive(Parser, Debug)]
#[command(name = "lendwatch", version, about = "Block-level lending market snapshots")]
struct Cli {
    /// Config file name, without extension
    #[arg(long, default_value = "config")]
    config: String,

    /// off, error, warn, info, debug or trace
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Follow the chain head (same as `run`)
    #[arg(long)]
    continuous: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Create the schema and register tracked symbols
    Init,
    /// Snapshot the latest block and store it
    Store,
    /// Show the most recent stored market aggregates
    Recent {
        #[arg(default_value_t = 10)]
        limit: i64,
    },
    /// Fetch one block's snapshot from the chain without storing it
    Block { number: u64 },
    /// Compare two blocks
    Compare { start: u64, end: u64 },
    /// Follow the chain head and store each new block
    Run,
}

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level: LevelFilter = cli
        .log_level
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid log level {}", cli.log_level))?;

    SimpleLogger::new()
        .with_level(level)
        .init()
        .map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))?;

    let command = match (cli.command, cli.continuous) {
        (_, true) => Command::Run,
        (Some(command), false) => command,
        (None, false) => anyhow::bail!("No command given; see --help"),
    };

    // Load configuration
    let settings = Arc::new(
        Settings::from_file(&cli.config)
            .with_context(|| format!("Failed to load {}.yaml. Please ensure it exists and is valid", cli.config))?,
    );

    let reader: Arc<dyn MarketReader> =
        Arc::new(AaveReader::new(&settings.chain).context("Failed to set up chain reader")?);

    if let Command::Block { number } = command {
        return fetch_block(&settings, reader.as_ref(), number).await;
    }

    let store = Arc::new(
        PostgresStore::new(&settings.postgres)
            .await
            .context("Failed to initialize database connection")?,
    );

    let result = dispatch(command, settings, reader, store.clone()).await;
    store.close();
    result
}

/// One-shot commands surface the first failure instead of retrying.
fn single_attempt() -> RetrySettings {
    RetrySettings {
        max_attempts: 1,
        ..RetrySettings::default()
    }
}

async fn dispatch(
    command: Command,
    settings: Arc<Settings>,
    reader: Arc<dyn MarketReader>,
    store: Arc<PostgresStore>,
) -> anyhow::Result<()> {
    let files = settings
        .output
        .write_files
        .then(|| SnapshotFiles::new(&settings.output.dir));

    match command {
        Command::Init => {
            store
                .ensure_schema(&settings.market.tracked_symbols)
                .await
                .context("Failed to initialize schema")?;
            info!("Schema ready");
        },
        Command::Store => {
            let snapshot = ingest_block(
                reader.as_ref(),
                store.as_ref(),
                &single_attempt(),
                BlockRef::Latest,
            )
            .await
            .context("Failed to store latest block")?;

            info!(
                "Stored block {} ({} reserves, market size {} USD)",
                snapshot.block_number(),
                snapshot.market.token_count,
                snapshot.market.total_market_size_usd
            );

            if let Some(files) = &files {
                files.write_snapshot(&snapshot).await?;
            }
        },
        Command::Recent { limit } => {
            let recent = store
                .get_recent(limit)
                .await
                .context("Failed to read recent snapshots")?;
            info!("{} stored snapshots", recent.len());
            println!("{}", serde_json::to_string_pretty(&recent)?);
        },
        Command::Compare { start, end } => {
            let a = load_snapshot(reader.as_ref(), store.as_ref(), start).await?;
            let b = load_snapshot(reader.as_ref(), store.as_ref(), end).await?;
            let report = compare(&a, &b);

            info!(
                "Blocks {} -> {} ({}s): market size {}%, borrows {}%",
                report.start_block,
                report.end_block,
                report.time_difference_seconds,
                report.market_changes.total_market_size_change,
                report.market_changes.total_borrows_change
            );
            for symbol in report.added().map(|m| m.symbol.as_str()) {
                info!("Added: {}", symbol);
            }
            for symbol in report.removed() {
                info!("Removed: {}", symbol);
            }

            match &files {
                Some(files) => {
                    files
                        .write_comparison(&ComparisonFile::new(a, b, report))
                        .await?;
                },
                None => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        },
        Command::Run => run_poller(settings, reader, store, files).await?,
        Command::Block { number } => fetch_block(&settings, reader.as_ref(), number).await?,
    }

    Ok(())
}

async fn fetch_block(
    settings: &Settings,
    reader: &dyn MarketReader,
    number: u64,
) -> anyhow::Result<()> {
    let snapshot = fetch_snapshot(reader, &single_attempt(), BlockRef::Number(number))
        .await
        .with_context(|| format!("Failed to fetch block {}", number))?;

    if settings.output.write_files {
        SnapshotFiles::new(&settings.output.dir)
            .write_snapshot(&snapshot)
            .await?;
    } else {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }
    Ok(())
}

/// Stored snapshot of `block`, or a fresh chain read when none is stored.
async fn load_snapshot(
    reader: &dyn MarketReader,
    store: &dyn SnapshotStore,
    block: u64,
) -> anyhow::Result<lendwatch::db::Snapshot> {
    match store.get_snapshot_at_block(block).await {
        Ok(snapshot) => Ok(snapshot),
        Err(StoreError::NotFound(_)) => {
            info!("Block {} not stored, reading it from the chain", block);
            fetch_snapshot(reader, &single_attempt(), BlockRef::Number(block))
                .await
                .with_context(|| format!("Failed to fetch block {}", block))
        },
        Err(e) => Err(e).with_context(|| format!("Failed to load block {}", block)),
    }
}

async fn run_poller(
    settings: Arc<Settings>,
    reader: Arc<dyn MarketReader>,
    store: Arc<PostgresStore>,
    files: Option<SnapshotFiles>,
) -> anyhow::Result<()> {
    store
        .ensure_schema(&settings.market.tracked_symbols)
        .await
        .context("Failed to initialize schema")?;

    let mut poller = Poller::new(reader, store, settings.poller.clone());
    if let Some(files) = files {
        poller = poller.with_sink(Arc::new(files));
    }

    let cancellation_token = CancellationToken::new();
    let poller_token = cancellation_token.child_token();
    let poller_handle = tokio::spawn(async move {
        poller.run(poller_token).await;
    });

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    // Set up graceful shutdown signal handler
    info!("Poller running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    cancellation_token.cancel();

    info!("Waiting for poller to stop...");
    poller_handle.await.context("Poller task panicked")?;

    info!("Shutdown complete");
    Ok(())
}
