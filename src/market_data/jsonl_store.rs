use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Utc};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::models::{Id, PriceObservation};

use super::PriceStore;

/// Price history on disk, one JSONL file per security per year:
///
/// ```text
/// prices/
///   {security_id}/
///     2025.jsonl
///     2026.jsonl
/// ```
pub struct JsonlPriceStore {
    base_path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlPriceStore {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn prices_dir(&self, security_id: &Id) -> PathBuf {
        self.base_path.join("prices").join(security_id.as_str())
    }

    fn price_file(&self, security_id: &Id, year: i32) -> PathBuf {
        self.prices_dir(security_id).join(format!("{year:04}.jsonl"))
    }

    /// Years that have a price file, newest first.
    async fn years(&self, security_id: &Id) -> Result<Vec<i32>> {
        let mut entries = match fs::read_dir(self.prices_dir(security_id)).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("Failed to read prices directory"),
        };

        let mut years = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(year) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<i32>().ok())
            {
                years.push(year);
            }
        }
        years.sort_unstable_by(|a, b| b.cmp(a));
        Ok(years)
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<PriceObservation>> {
        let file = match fs::File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("Failed to open price file"),
        };

        let mut lines = BufReader::new(file).lines();
        let mut items = Vec::new();
        while let Some(line) = lines.next_line().await.context("Failed to read line")? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(item) => items.push(item),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "Skipping unparsable price line")
                }
            }
        }
        Ok(items)
    }

    async fn append_file(&self, path: &Path, items: &[PriceObservation]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create directory")?;
        }

        let mut content = String::new();
        for item in items {
            content.push_str(&serde_json::to_string(item).context("Failed to serialize price")?);
            content.push('\n');
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .context("Failed to open price file for append")?;
        file.write_all(content.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl PriceStore for JsonlPriceStore {
    async fn latest_price(
        &self,
        security_id: &Id,
        as_of: DateTime<Utc>,
    ) -> Result<Option<PriceObservation>> {
        for year in self.years(security_id).await? {
            if year > as_of.year() {
                continue;
            }
            let latest = self
                .read_file(&self.price_file(security_id, year))
                .await?
                .into_iter()
                .filter(|p| p.recorded_at <= as_of)
                .max_by_key(|p| p.recorded_at);
            if latest.is_some() {
                return Ok(latest);
            }
        }
        Ok(None)
    }

    async fn record_prices(&self, prices: &[PriceObservation]) -> Result<usize> {
        if prices.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;

        let mut grouped: BTreeMap<(Id, i32), Vec<PriceObservation>> = BTreeMap::new();
        for price in prices {
            grouped
                .entry((price.security_id.clone(), price.recorded_at.year()))
                .or_default()
                .push(price.clone());
        }

        let mut stored = 0;
        for ((security_id, year), items) in grouped {
            let path = self.price_file(&security_id, year);
            let mut seen: HashSet<DateTime<Utc>> = self
                .read_file(&path)
                .await?
                .into_iter()
                .map(|p| p.recorded_at)
                .collect();
            let fresh: Vec<PriceObservation> = items
                .into_iter()
                .filter(|p| seen.insert(p.recorded_at))
                .collect();
            if fresh.is_empty() {
                continue;
            }
            self.append_file(&path, &fresh).await?;
            stored += fresh.len();
        }

        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn obs(price: i64, y: i32, m: u32, d: u32) -> PriceObservation {
        PriceObservation {
            security_id: Id::from("btc"),
            price,
            recorded_at: Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap(),
            source: "oracle".to_string(),
        }
    }

    #[tokio::test]
    async fn latest_price_crosses_year_files() -> Result<()> {
        let dir = TempDir::new()?;
        let store = JsonlPriceStore::new(dir.path());
        store
            .record_prices(&[obs(4_000_000, 2025, 12, 30), obs(4_500_000, 2026, 2, 1)])
            .await?;

        let jan = Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap();
        let price = store.latest_price(&Id::from("btc"), jan).await?;
        assert_eq!(price.map(|p| p.price), Some(4_000_000));

        let mar = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let price = store.latest_price(&Id::from("btc"), mar).await?;
        assert_eq!(price.map(|p| p.price), Some(4_500_000));
        Ok(())
    }

    #[tokio::test]
    async fn rerecording_does_not_append_duplicates() -> Result<()> {
        let dir = TempDir::new()?;
        let store = JsonlPriceStore::new(dir.path());
        let batch = [obs(4_000_000, 2026, 1, 2), obs(4_000_000, 2026, 1, 2)];

        assert_eq!(store.record_prices(&batch).await?, 1);
        assert_eq!(store.record_prices(&batch).await?, 0);

        let content = std::fs::read_to_string(dir.path().join("prices/btc/2026.jsonl"))?;
        assert_eq!(content.lines().count(), 1);
        Ok(())
    }
}
