use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    db::models::Snapshot,
    diff::{AssetChange, ComparisonReport, MarketChanges},
    worker::SnapshotSink,
};

const LATEST_FILE: &str = "latest.json";

/// Comparison file: the report with both full snapshots embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonFile {
    pub network: String,
    pub chain_id: u64,
    pub start_block: Snapshot,
    pub end_block: Snapshot,
    pub time_difference_seconds: i64,
    pub market_changes: MarketChanges,
    pub asset_changes: Vec<AssetChange>,
}

impl ComparisonFile {
    pub fn new(start: Snapshot, end: Snapshot, report: ComparisonReport) -> Self {
        Self {
            network: report.network,
            chain_id: report.chain_id,
            start_block: start,
            end_block: end,
            time_difference_seconds: report.time_difference_seconds,
            market_changes: report.market_changes,
            asset_changes: report.asset_changes,
        }
    }
}

/// JSON snapshot and comparison files under one output directory.
#[derive(Debug, Clone)]
pub struct SnapshotFiles {
    dir: PathBuf,
}

impl SnapshotFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self, network: &str, block_number: u64) -> PathBuf {
        self.dir.join(format!("{}_{}.json", network, block_number))
    }

    pub fn latest_path(&self) -> PathBuf {
        self.dir.join(LATEST_FILE)
    }

    pub fn comparison_path(&self, start_block: u64, end_block: u64) -> PathBuf {
        self.dir
            .join(format!("comparison_{}_{}.json", start_block, end_block))
    }

    /// Write `<network>_<block>.json` and mirror it to `latest.json`.
    pub async fn write_snapshot(&self, snapshot: &Snapshot) -> anyhow::Result<PathBuf> {
        let path = self.snapshot_path(&snapshot.market.network, snapshot.block_number());
        let json = serde_json::to_vec_pretty(snapshot).context("Failed to serialize snapshot")?;

        write_atomic(&path, &json).await?;
        self.write_latest(snapshot).await?;

        info!("Snapshot of block {} written to {}", snapshot.block_number(), path.display());
        Ok(path)
    }

    /// Point `latest.json` at `snapshot` without writing the per-block file.
    pub async fn write_latest(&self, snapshot: &Snapshot) -> anyhow::Result<PathBuf> {
        let path = self.latest_path();
        let json = serde_json::to_vec_pretty(snapshot).context("Failed to serialize snapshot")?;
        write_atomic(&path, &json).await?;
        Ok(path)
    }

    pub async fn read_snapshot(&self, path: impl AsRef<Path>) -> anyhow::Result<Snapshot> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("Invalid snapshot file {}", path.display()))
    }

    pub async fn write_comparison(&self, comparison: &ComparisonFile) -> anyhow::Result<PathBuf> {
        let path = self.comparison_path(
            comparison.start_block.block_number(),
            comparison.end_block.block_number(),
        );
        let json =
            serde_json::to_vec_pretty(comparison).context("Failed to serialize comparison")?;

        write_atomic(&path, &json).await?;

        info!("Comparison written to {}", path.display());
        Ok(path)
    }
}

#[async_trait]
impl SnapshotSink for SnapshotFiles {
    async fn on_snapshot(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        self.write_snapshot(snapshot).await.map(|_| ())
    }
}

/// Write to a sibling temp file, then rename over `path`.
async fn write_atomic(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move {} into place", tmp.display()))?;

    debug!("Wrote {} bytes to {}", contents.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        diff::compare,
        worker::transform::{
            tests::{raw_market, reserve},
            transform,
        },
    };

    fn snapshot(block: u64) -> Snapshot {
        transform(&raw_market(block, vec![reserve("WETH", 1000, 400, 200)]))
    }

    #[tokio::test]
    async fn test_snapshot_file_and_latest_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let files = SnapshotFiles::new(dir.path().join("out"));
        let snap = snapshot(100);

        let path = files.write_snapshot(&snap).await.unwrap();
        assert_eq!(path, dir.path().join("out").join("base_100.json"));

        let written = tokio::fs::read(&path).await.unwrap();
        let latest = tokio::fs::read(files.latest_path()).await.unwrap();
        assert_eq!(written, latest);

        assert_eq!(files.read_snapshot(&path).await.unwrap(), snap);
        assert!(!dir.path().join("out").join("base_100.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_latest_follows_newest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let files = SnapshotFiles::new(dir.path());

        files.write_snapshot(&snapshot(1)).await.unwrap();
        files.write_snapshot(&snapshot(2)).await.unwrap();

        let latest = files.read_snapshot(files.latest_path()).await.unwrap();
        assert_eq!(latest.block_number(), 2);
        assert!(files.snapshot_path("base", 1).exists());
    }

    #[tokio::test]
    async fn test_comparison_file_embeds_both_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let files = SnapshotFiles::new(dir.path());
        let a = snapshot(10);
        let b = snapshot(12);

        let report = compare(&a, &b);
        let comparison = ComparisonFile::new(a.clone(), b.clone(), report);
        let path = files.write_comparison(&comparison).await.unwrap();
        assert_eq!(path, dir.path().join("comparison_10_12.json"));

        let json: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(json["startBlock"]["blockNumber"], 10);
        assert_eq!(json["endBlock"]["blockNumber"], 12);
        assert_eq!(json["timeDifferenceSeconds"], 4);
        assert_eq!(json["marketChanges"]["totalMarketSizeChange"], "0");

        let back: ComparisonFile = serde_json::from_value(json).unwrap();
        assert_eq!(back, comparison);
    }

    #[tokio::test]
    async fn test_reading_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let files = SnapshotFiles::new(dir.path());
        assert!(files.read_snapshot(dir.path().join("nope.json")).await.is_err());
    }
}
