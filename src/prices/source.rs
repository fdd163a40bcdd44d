use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::broker::BrokerApi;
use crate::model::series::PricePoint;
use crate::tokens::TokenStore;

use super::{DateRange, PriceCache};

/// Anything that can produce daily closes for a symbol. The production
/// source goes through the broker's candle endpoint; tests use in-memory
/// tables.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn daily_closes(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>>;
}

/// Candle-backed source. Market-data calls ride on the first configured
/// login's quota.
pub struct BrokerPriceSource {
    broker: Arc<dyn BrokerApi>,
    tokens: Arc<TokenStore>,
}

impl BrokerPriceSource {
    pub fn new(broker: Arc<dyn BrokerApi>, tokens: Arc<TokenStore>) -> Self {
        Self { broker, tokens }
    }
}

#[async_trait]
impl PriceSource for BrokerPriceSource {
    async fn daily_closes(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>> {
        let Some(login) = self.tokens.logins().await.into_iter().next() else {
            bail!("no logins configured for market data");
        };
        self.broker
            .daily_candles(&login.id, symbol, start, end)
            .await
            .with_context(|| format!("fetching candles for {symbol}"))
    }
}

/// Read-through combinator: serve covered ranges from the cache, fetch
/// and record the rest. Query ends are clamped to yesterday so today's
/// intraday value never enters the cache.
pub struct CachedPrices {
    cache: Arc<PriceCache>,
    source: Arc<dyn PriceSource>,
}

impl CachedPrices {
    pub fn new(cache: Arc<PriceCache>, source: Arc<dyn PriceSource>) -> Self {
        Self { cache, source }
    }

    pub async fn daily_closes(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        today: NaiveDate,
    ) -> Result<Vec<PricePoint>> {
        let end = end.min(today - chrono::Duration::days(1));
        if end < start {
            return Ok(Vec::new());
        }

        if let Some(points) = self.cache.get(symbol, start, end).await {
            return Ok(points);
        }

        let fetched = self.source.daily_closes(symbol, start, end).await?;
        self.cache
            .record(symbol, DateRange { start, end }, &fetched, today)
            .await?;
        Ok(fetched
            .into_iter()
            .filter(|p| p.date >= start && p.date <= end)
            .collect())
    }

    pub async fn latest_on_or_before(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Option<PricePoint> {
        self.cache.latest_on_or_before(symbol, date).await
    }
}
