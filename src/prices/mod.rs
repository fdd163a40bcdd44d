pub mod source;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::model::series::PricePoint;

pub use source::{CachedPrices, PriceSource};

// ── Disk shape ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolCacheFile {
    symbol: String,
    updated_at: chrono::DateTime<Utc>,
    ranges: Vec<DateRange>,
    prices: BTreeMap<NaiveDate, f64>,
}

#[derive(Debug, Default)]
struct SymbolCache {
    ranges: Vec<DateRange>,
    prices: BTreeMap<NaiveDate, f64>,
}

impl SymbolCache {
    /// A query hits only when one covered range fully contains it; partial
    /// coverage is a miss so gaps get refetched rather than papered over.
    fn covers(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.ranges
            .iter()
            .any(|r| r.start <= start && r.end >= end)
    }

    fn points_in(&self, start: NaiveDate, end: NaiveDate) -> Vec<PricePoint> {
        self.prices
            .range(start..=end)
            .map(|(&date, &close)| PricePoint { date, close })
            .collect()
    }

    fn merge_range(&mut self, mut incoming: DateRange) {
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for r in self.ranges.drain(..) {
            // Adjacent (±1 day) ranges merge too.
            let touches = r.start <= incoming.end + chrono::Duration::days(1)
                && incoming.start <= r.end + chrono::Duration::days(1);
            if touches {
                incoming.start = incoming.start.min(r.start);
                incoming.end = incoming.end.max(r.end);
            } else {
                kept.push(r);
            }
        }
        kept.push(incoming);
        kept.sort_by_key(|r| r.start);
        self.ranges = kept;
    }
}

// ── Cache ───────────────────────────────────────────────────────────

/// On-disk + in-memory daily close cache. Per-symbol locks let distinct
/// symbols load and fetch in parallel.
pub struct PriceCache {
    dir: PathBuf,
    symbols: Mutex<HashMap<String, Arc<Mutex<SymbolCache>>>>,
}

impl PriceCache {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            symbols: Mutex::new(HashMap::new()),
        }
    }

    /// Daily closes for `[start, end]`, or `None` when the range is not
    /// fully covered and the caller should fetch.
    pub async fn get(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Option<Vec<PricePoint>> {
        let entry = self.entry(symbol).await;
        let cache = entry.lock().await;
        if cache.covers(start, end) {
            Some(cache.points_in(start, end))
        } else {
            None
        }
    }

    /// Record a fetched range. `end ≥ today` is clamped to `today − 1` and
    /// today's key is never admitted, so intraday values always refetch.
    pub async fn record(
        &self,
        symbol: &str,
        mut range: DateRange,
        points: &[PricePoint],
        today: NaiveDate,
    ) -> Result<()> {
        if range.end >= today {
            range.end = today - chrono::Duration::days(1);
        }
        if range.end < range.start {
            return Ok(());
        }

        let entry = self.entry(symbol).await;
        let mut cache = entry.lock().await;
        for p in points {
            if p.date < today && p.date >= range.start && p.date <= range.end {
                cache.prices.insert(p.date, p.close);
            }
        }
        cache.merge_range(range);
        self.persist(symbol, &cache)
    }

    /// Most recent cached close at or before `date`.
    pub async fn latest_on_or_before(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Option<PricePoint> {
        let entry = self.entry(symbol).await;
        let cache = entry.lock().await;
        cache
            .prices
            .range(..=date)
            .next_back()
            .map(|(&date, &close)| PricePoint { date, close })
    }

    async fn entry(&self, symbol: &str) -> Arc<Mutex<SymbolCache>> {
        let mut symbols = self.symbols.lock().await;
        if let Some(entry) = symbols.get(symbol) {
            return Arc::clone(entry);
        }
        let loaded = self.load(symbol).unwrap_or_default();
        let entry = Arc::new(Mutex::new(loaded));
        symbols.insert(symbol.to_string(), Arc::clone(&entry));
        entry
    }

    fn file_path(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_symbol(symbol)))
    }

    fn load(&self, symbol: &str) -> Option<SymbolCache> {
        let raw = std::fs::read_to_string(self.file_path(symbol)).ok()?;
        let file: SymbolCacheFile = serde_json::from_str(&raw).ok()?;
        Some(SymbolCache {
            ranges: file.ranges,
            prices: file.prices,
        })
    }

    fn persist(&self, symbol: &str, cache: &SymbolCache) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating price cache dir {}", self.dir.display()))?;
        let file = SymbolCacheFile {
            symbol: symbol.to_string(),
            updated_at: Utc::now(),
            ranges: cache.ranges.clone(),
            prices: cache.prices.clone(),
        };
        let path = self.file_path(symbol);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&file)?)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

/// Filename-safe symbol: `USDCAD=X` → `USDCAD_X`, `DLR.TO` → `DLR_TO`.
fn sanitize_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn points(dates: &[NaiveDate]) -> Vec<PricePoint> {
        dates
            .iter()
            .map(|&date| PricePoint { date, close: 10.0 })
            .collect()
    }

    #[tokio::test]
    async fn partial_coverage_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PriceCache::new(dir.path().to_path_buf());
        let today = d(2025, 6, 15);

        cache
            .record(
                "XYZ",
                DateRange {
                    start: d(2025, 5, 1),
                    end: d(2025, 5, 10),
                },
                &points(&[d(2025, 5, 2), d(2025, 5, 5)]),
                today,
            )
            .await
            .unwrap();

        assert!(cache.get("XYZ", d(2025, 5, 2), d(2025, 5, 9)).await.is_some());
        assert!(cache.get("XYZ", d(2025, 5, 2), d(2025, 5, 12)).await.is_none());
    }

    #[tokio::test]
    async fn todays_key_is_never_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PriceCache::new(dir.path().to_path_buf());
        let today = d(2025, 6, 15);

        cache
            .record(
                "XYZ",
                DateRange {
                    start: d(2025, 6, 10),
                    end: d(2025, 6, 20),
                },
                &points(&[d(2025, 6, 12), d(2025, 6, 15), d(2025, 6, 16)]),
                today,
            )
            .await
            .unwrap();

        // The recorded range is clamped to yesterday, so a query through
        // today misses and triggers a refetch.
        assert!(cache.get("XYZ", d(2025, 6, 12), today).await.is_none());
        let hit = cache.get("XYZ", d(2025, 6, 10), d(2025, 6, 14)).await.unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].date, d(2025, 6, 12));
    }

    #[tokio::test]
    async fn adjacent_ranges_merge() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PriceCache::new(dir.path().to_path_buf());
        let today = d(2025, 12, 31);

        cache
            .record(
                "XYZ",
                DateRange {
                    start: d(2025, 5, 1),
                    end: d(2025, 5, 10),
                },
                &points(&[d(2025, 5, 5)]),
                today,
            )
            .await
            .unwrap();
        cache
            .record(
                "XYZ",
                DateRange {
                    start: d(2025, 5, 11),
                    end: d(2025, 5, 20),
                },
                &points(&[d(2025, 5, 15)]),
                today,
            )
            .await
            .unwrap();

        // One merged range now covers a query spanning both fetches.
        assert!(cache.get("XYZ", d(2025, 5, 3), d(2025, 5, 18)).await.is_some());
    }

    #[tokio::test]
    async fn cache_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let today = d(2025, 12, 31);
        {
            let cache = PriceCache::new(dir.path().to_path_buf());
            cache
                .record(
                    "USDCAD=X",
                    DateRange {
                        start: d(2025, 5, 1),
                        end: d(2025, 5, 10),
                    },
                    &points(&[d(2025, 5, 5)]),
                    today,
                )
                .await
                .unwrap();
        }
        let reopened = PriceCache::new(dir.path().to_path_buf());
        let hit = reopened.get("USDCAD=X", d(2025, 5, 1), d(2025, 5, 10)).await;
        assert_eq!(hit.unwrap().len(), 1);
        assert!(dir.path().join("USDCAD_X.json").exists());
    }

    #[tokio::test]
    async fn latest_on_or_before_walks_back() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PriceCache::new(dir.path().to_path_buf());
        cache
            .record(
                "XYZ",
                DateRange {
                    start: d(2025, 5, 1),
                    end: d(2025, 5, 10),
                },
                &points(&[d(2025, 5, 2), d(2025, 5, 8)]),
                d(2025, 12, 31),
            )
            .await
            .unwrap();

        let p = cache.latest_on_or_before("XYZ", d(2025, 5, 6)).await.unwrap();
        assert_eq!(p.date, d(2025, 5, 2));
        assert!(cache.latest_on_or_before("XYZ", d(2025, 4, 30)).await.is_none());
    }
}
