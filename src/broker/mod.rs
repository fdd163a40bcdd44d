pub mod client;
pub mod error;
pub mod limiter;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::model::activity::Activity;
use crate::model::balance::{AccountBalances, Order, Position};
use crate::model::series::PricePoint;

pub use client::QuestradeClient;
pub use error::BrokerError;
pub use types::RawAccount;

/// The broker caps each activities/orders request at this many days.
pub const MAX_WINDOW_DAYS: i64 = 31;

/// Typed surface over the upstream REST endpoints. The production
/// implementation is [`QuestradeClient`]; tests drive the crawler and
/// aggregator against in-memory fakes.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    async fn accounts(&self, login_id: &str) -> Result<Vec<RawAccount>, BrokerError>;

    async fn balances(
        &self,
        login_id: &str,
        number: &str,
    ) -> Result<AccountBalances, BrokerError>;

    async fn positions(&self, login_id: &str, number: &str)
    -> Result<Vec<Position>, BrokerError>;

    async fn orders(
        &self,
        login_id: &str,
        number: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Order>, BrokerError>;

    /// Raw (already normalized, not yet de-duplicated) activities for a
    /// window of at most [`MAX_WINDOW_DAYS`] days. Wider windows are
    /// rejected with [`BrokerError::WindowTooWide`]; slicing is the
    /// crawler's job.
    async fn activities(
        &self,
        login_id: &str,
        number: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Activity>, BrokerError>;

    async fn daily_candles(
        &self,
        login_id: &str,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>, BrokerError>;
}

/// Reject windows wider than the broker cap before any network traffic.
pub fn check_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), BrokerError> {
    let days = (end - start).num_days();
    if days > MAX_WINDOW_DAYS {
        return Err(BrokerError::WindowTooWide {
            days,
            max_days: MAX_WINDOW_DAYS,
        });
    }
    Ok(())
}
