use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{PollerSettings, RetrySettings, StartPolicy},
    db::{models::Snapshot, SnapshotStore},
    error::{ChainError, PipelineError},
    utils::with_retry,
    worker::{
        reader::{BlockRef, MarketReader},
        transform::transform,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    Ingesting,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Head had not moved past the cursor.
    Idle { head: u64 },
    /// `block` was stored and the cursor moved to it.
    Ingested { block: u64 },
}

/// Receives every snapshot the poller has stored.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn on_snapshot(&self, snapshot: &Snapshot) -> anyhow::Result<()>;
}

/// Read and transform one block, with the reader retried under `retry`.
pub async fn fetch_snapshot(
    reader: &dyn MarketReader,
    retry: &RetrySettings,
    block: BlockRef,
) -> Result<Snapshot, ChainError> {
    let label = format!("fetch block {}", block);
    let raw = with_retry(retry, &label, || reader.fetch(block)).await?;
    Ok(transform(&raw))
}

/// Read, transform and store one block. Returns the stored snapshot.
pub async fn ingest_block(
    reader: &dyn MarketReader,
    store: &dyn SnapshotStore,
    retry: &RetrySettings,
    block: BlockRef,
) -> Result<Snapshot, PipelineError> {
    let snapshot = fetch_snapshot(reader, retry, block).await?;

    let label = format!("store block {}", snapshot.block_number());
    with_retry(retry, &label, || store.put(&snapshot)).await?;

    Ok(snapshot)
}

/// Follows the chain head and stores snapshots of the blocks it sees.
///
/// Under `StartPolicy::ChainHead` only the head at tick time is ingested and
/// blocks produced between two ticks are skipped. Under `StartPolicy::Resume`
/// every block after the cursor is ingested in order, a bounded batch per
/// tick. The cursor moves only after the store confirms a write.
pub struct Poller {
    reader: Arc<dyn MarketReader>,
    store: Arc<dyn SnapshotStore>,
    settings: PollerSettings,
    sink: Option<Arc<dyn SnapshotSink>>,
    cursor: Option<u64>,
    state: PollerState,
}

impl Poller {
    pub fn new(
        reader: Arc<dyn MarketReader>,
        store: Arc<dyn SnapshotStore>,
        settings: PollerSettings,
    ) -> Self {
        Self {
            reader,
            store,
            settings,
            sink: None,
            cursor: None,
            state: PollerState::Idle,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn SnapshotSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Last block stored by this poller, or the start position.
    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Position the cursor according to the start policy. The block at the
    /// cursor itself is not ingested.
    pub async fn start(&mut self) -> Result<u64, PipelineError> {
        let retry = &self.settings.retry;
        let reader = &self.reader;
        let head = with_retry(retry, "read head", || reader.head()).await?;

        let cursor = match self.settings.start {
            StartPolicy::ChainHead => head,
            StartPolicy::Resume => {
                let store = &self.store;
                let persisted = with_retry(retry, "read latest block", || store.latest_block()).await?;
                let floor = head.saturating_sub(self.settings.safety_margin);
                persisted.map_or(floor, |p| p.max(floor))
            },
        };

        info!(
            "Poller starting at block {} (head {}, policy {:?})",
            cursor, head, self.settings.start
        );
        self.cursor = Some(cursor);
        Ok(cursor)
    }

    /// One poll: ingest new blocks if the head moved past the cursor.
    ///
    /// On error the cursor stays at the last stored block so the next tick
    /// tries again from there.
    pub async fn tick(&mut self) -> Result<TickOutcome, PipelineError> {
        let result = self.poll_once().await;
        self.state = PollerState::Idle;
        result
    }

    async fn poll_once(&mut self) -> Result<TickOutcome, PipelineError> {
        self.state = PollerState::Polling;

        let cursor = match self.cursor {
            Some(cursor) => cursor,
            None => {
                let cursor = self.start().await?;
                return Ok(TickOutcome::Idle { head: cursor });
            },
        };

        let reader = &self.reader;
        let head = with_retry(&self.settings.retry, "read head", || reader.head()).await?;
        if head <= cursor {
            debug!("Head {} not past cursor {}", head, cursor);
            return Ok(TickOutcome::Idle { head });
        }

        self.state = PollerState::Ingesting;
        if self.settings.settle_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.settings.settle_delay_ms)).await;
        }

        let (first, last) = match self.settings.start {
            StartPolicy::ChainHead => (head, head),
            StartPolicy::Resume => {
                let batch = self.settings.max_blocks_per_tick.max(1);
                (cursor + 1, head.min(cursor.saturating_add(batch)))
            },
        };

        if first > cursor + 1 {
            debug!("Skipped {} blocks between {} and {}", first - cursor - 1, cursor, first);
        }

        for block in first..=last {
            self.ingest(block).await?;
        }

        if last < head {
            info!("Caught up to block {}, {} behind head {}", last, head - last, head);
        }

        Ok(TickOutcome::Ingested { block: last })
    }

    /// Store `block`, advance the cursor to it and hand it to the sink.
    async fn ingest(&mut self, block: u64) -> Result<(), PipelineError> {
        let snapshot = ingest_block(
            self.reader.as_ref(),
            self.store.as_ref(),
            &self.settings.retry,
            BlockRef::Number(block),
        )
        .await?;

        self.cursor = Some(block);

        info!(
            "Stored block {}: {} reserves, market size {} USD",
            block, snapshot.market.token_count, snapshot.market.total_market_size_usd
        );

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.on_snapshot(&snapshot).await {
                warn!("Snapshot sink failed for block {}: {:#}", block, e);
            }
        }

        Ok(())
    }

    /// Tick on a fixed interval until `cancellation_token` fires.
    /// Tick failures are logged and the loop carries on.
    pub async fn run(&mut self, cancellation_token: CancellationToken) {
        let period = Duration::from_millis(self.settings.interval_ms.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Poller running every {:?}", period);

        loop {
            tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => {
                    info!("Poller received cancellation signal");
                    break;
                },
                _ = interval.tick() => {},
            }

            if let Err(e) = self.tick().await {
                error!(
                    "Tick failed, cursor stays at {:?}: {}",
                    self.cursor, e
                );
            }
        }

        self.state = PollerState::Stopped;
        info!("Poller stopped at block {:?}", self.cursor);
    }
}
