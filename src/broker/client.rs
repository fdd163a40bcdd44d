use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::model::activity::Activity;
use crate::model::balance::{AccountBalances, Order, Position};
use crate::model::series::PricePoint;
use crate::tokens::TokenStore;

use super::error::BrokerError;
use super::limiter::LoginLimiter;
use super::types::{
    AccountsResponse, ActivitiesResponse, BalancesResponse, CandlesResponse, OrdersResponse,
    PositionsResponse, RawAccount, SymbolSearchResponse, parse_activity_date,
};
use super::{BrokerApi, check_window};

// ── Retry policy ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total 429/418 receipts tolerated before surfacing `RateLimited`.
    pub rate_limit_attempts: u32,
    /// Total network/5xx receipts tolerated before surfacing `Transient`.
    pub transient_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_attempts: 3,
            transient_attempts: 2,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct RetryState {
    auth_refreshes: u32,
    rate_hits: u32,
    transient_hits: u32,
}

#[derive(Debug)]
pub(crate) enum Outcome {
    HttpStatus {
        status: u16,
        body: String,
        retry_after: Option<u64>,
    },
    NetworkErr(String),
}

#[derive(Debug)]
pub(crate) enum Step {
    /// Rotate the access token, then retry immediately.
    RefreshAndRetry,
    RetryAfter(Duration),
    Fail(BrokerError),
}

/// Pure retry state machine: one forced refresh on 401, bounded
/// exponential backoff on 429/418 and transient failures, everything else
/// permanent.
pub(crate) fn next_step(policy: &RetryPolicy, state: &mut RetryState, outcome: Outcome) -> Step {
    match outcome {
        Outcome::HttpStatus {
            status: 401, body, ..
        } => {
            state.auth_refreshes += 1;
            if state.auth_refreshes > 1 {
                Step::Fail(BrokerError::Auth { status: 401, body })
            } else {
                Step::RefreshAndRetry
            }
        }
        Outcome::HttpStatus {
            status: status @ (429 | 418),
            retry_after,
            ..
        } => {
            state.rate_hits += 1;
            if state.rate_hits >= policy.rate_limit_attempts {
                Step::Fail(BrokerError::RateLimited {
                    attempts: state.rate_hits,
                })
            } else {
                debug!(status, retry_after, "rate limited, backing off");
                let base = retry_after.unwrap_or(1).max(1);
                Step::RetryAfter(Duration::from_secs(base << (state.rate_hits - 1)))
            }
        }
        Outcome::HttpStatus { status, body, .. } if status >= 500 => {
            state.transient_hits += 1;
            if state.transient_hits >= policy.transient_attempts {
                Step::Fail(BrokerError::Transient(format!("status {status}: {body}")))
            } else {
                Step::RetryAfter(Duration::from_millis(500 << (state.transient_hits - 1)))
            }
        }
        Outcome::HttpStatus { status, body, .. } => {
            Step::Fail(BrokerError::Permanent { status, body })
        }
        Outcome::NetworkErr(msg) => {
            state.transient_hits += 1;
            if state.transient_hits >= policy.transient_attempts {
                Step::Fail(BrokerError::Transient(msg))
            } else {
                Step::RetryAfter(Duration::from_millis(500 << (state.transient_hits - 1)))
            }
        }
    }
}

// ── Client ──────────────────────────────────────────────────────────

pub struct QuestradeClient {
    http: reqwest::Client,
    tokens: Arc<TokenStore>,
    policy: RetryPolicy,
    max_concurrent: usize,
    min_spacing: Duration,
    limiters: Mutex<HashMap<String, Arc<LoginLimiter>>>,
    symbol_ids: Mutex<HashMap<String, u64>>,
}

impl QuestradeClient {
    pub fn new(http: reqwest::Client, tokens: Arc<TokenStore>) -> Self {
        Self {
            http,
            tokens,
            policy: RetryPolicy::default(),
            max_concurrent: 3,
            min_spacing: Duration::from_millis(200),
            limiters: Mutex::new(HashMap::new()),
            symbol_ids: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for(&self, login_id: &str) -> Arc<LoginLimiter> {
        let mut limiters = self.limiters.lock().await;
        Arc::clone(limiters.entry(login_id.to_string()).or_insert_with(|| {
            Arc::new(LoginLimiter::new(self.max_concurrent, self.min_spacing))
        }))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        login_id: &str,
        path: &str,
    ) -> Result<T, BrokerError> {
        let limiter = self.limiter_for(login_id).await;
        let mut state = RetryState::default();

        loop {
            let access = self.tokens.access(login_id).await?;
            let outcome = {
                let _permit = limiter.acquire().await;
                let url = format!("{}{}", access.api_server, path);
                match self
                    .http
                    .get(&url)
                    .bearer_auth(&access.access_token)
                    .send()
                    .await
                {
                    Ok(resp) => {
                        let status = resp.status().as_u16();
                        if (200..300).contains(&status) {
                            let body = resp
                                .text()
                                .await
                                .map_err(|e| BrokerError::Transient(e.to_string()))?;
                            return serde_json::from_str(&body).map_err(|e| {
                                BrokerError::Malformed(format!("{path}: {e}"))
                            });
                        }
                        let retry_after = resp
                            .headers()
                            .get(reqwest::header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse().ok());
                        let body = resp.text().await.unwrap_or_default();
                        Outcome::HttpStatus {
                            status,
                            body,
                            retry_after,
                        }
                    }
                    Err(e) => Outcome::NetworkErr(e.to_string()),
                }
            };

            match next_step(&self.policy, &mut state, outcome) {
                Step::RefreshAndRetry => {
                    self.tokens
                        .force_refresh(login_id, &access.access_token)
                        .await?;
                }
                Step::RetryAfter(delay) => tokio::time::sleep(delay).await,
                Step::Fail(err) => {
                    warn!(
                        login = login_id,
                        path,
                        kind = err.kind(),
                        error = %err,
                        "broker call failed"
                    );
                    return Err(err);
                }
            }
        }
    }

    async fn symbol_id(&self, login_id: &str, symbol: &str) -> Result<u64, BrokerError> {
        if let Some(id) = self.symbol_ids.lock().await.get(symbol) {
            return Ok(*id);
        }
        let resp: SymbolSearchResponse = self
            .get_json(login_id, &format!("v1/symbols/search?prefix={symbol}"))
            .await?;
        let found = resp
            .symbols
            .iter()
            .find(|s| s.symbol.eq_ignore_ascii_case(symbol))
            .or_else(|| resp.symbols.iter().find(|s| s.is_tradable))
            .ok_or_else(|| BrokerError::SymbolNotFound(symbol.to_string()))?;
        self.symbol_ids
            .lock()
            .await
            .insert(symbol.to_string(), found.symbol_id);
        Ok(found.symbol_id)
    }
}

fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl BrokerApi for QuestradeClient {
    async fn accounts(&self, login_id: &str) -> Result<Vec<RawAccount>, BrokerError> {
        let resp: AccountsResponse = self.get_json(login_id, "v1/accounts").await?;
        Ok(resp.accounts)
    }

    async fn balances(
        &self,
        login_id: &str,
        number: &str,
    ) -> Result<AccountBalances, BrokerError> {
        let resp: BalancesResponse = self
            .get_json(login_id, &format!("v1/accounts/{number}/balances"))
            .await?;
        Ok(resp.into_model())
    }

    async fn positions(
        &self,
        login_id: &str,
        number: &str,
    ) -> Result<Vec<Position>, BrokerError> {
        let resp: PositionsResponse = self
            .get_json(login_id, &format!("v1/accounts/{number}/positions"))
            .await?;
        Ok(resp.positions.into_iter().map(|p| p.into_model()).collect())
    }

    async fn orders(
        &self,
        login_id: &str,
        number: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Order>, BrokerError> {
        check_window(start, end)?;
        let path = format!(
            "v1/accounts/{number}/orders?startTime={}&endTime={}",
            fmt_time(start),
            fmt_time(end),
        );
        let resp: OrdersResponse = self.get_json(login_id, &path).await?;
        Ok(resp.orders.into_iter().map(|o| o.into_model()).collect())
    }

    async fn activities(
        &self,
        login_id: &str,
        number: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Activity>, BrokerError> {
        check_window(start, end)?;
        let path = format!(
            "v1/accounts/{number}/activities?startTime={}&endTime={}",
            fmt_time(start),
            fmt_time(end),
        );
        let resp: ActivitiesResponse = self.get_json(login_id, &path).await?;
        Ok(resp
            .activities
            .into_iter()
            .filter_map(|a| a.into_model())
            .collect())
    }

    async fn daily_candles(
        &self,
        login_id: &str,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>, BrokerError> {
        let id = self.symbol_id(login_id, symbol).await?;
        let start_time = start
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid")
            .and_utc();
        let end_time = end
            .and_hms_opt(23, 59, 59)
            .expect("end of day is always valid")
            .and_utc();
        let path = format!(
            "v1/markets/candles/{id}?startTime={}&endTime={}&interval=OneDay",
            fmt_time(start_time),
            fmt_time(end_time),
        );
        let resp: CandlesResponse = self.get_json(login_id, &path).await?;
        Ok(resp
            .candles
            .into_iter()
            .filter_map(|c| {
                parse_activity_date(Some(&c.start)).map(|date| PricePoint {
                    date,
                    close: c.close,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16, retry_after: Option<u64>) -> Outcome {
        Outcome::HttpStatus {
            status: code,
            body: String::new(),
            retry_after,
        }
    }

    #[test]
    fn first_401_refreshes_second_fails_auth() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::default();
        assert!(matches!(
            next_step(&policy, &mut state, status(401, None)),
            Step::RefreshAndRetry
        ));
        assert!(matches!(
            next_step(&policy, &mut state, status(401, None)),
            Step::Fail(BrokerError::Auth { status: 401, .. })
        ));
    }

    #[test]
    fn rate_limit_waits_at_least_retry_after_then_surfaces_on_third_hit() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::default();

        match next_step(&policy, &mut state, status(429, Some(1))) {
            Step::RetryAfter(d) => assert!(d >= Duration::from_secs(1)),
            other => panic!("expected backoff, got {other:?}"),
        }
        match next_step(&policy, &mut state, status(429, Some(1))) {
            Step::RetryAfter(d) => assert!(d >= Duration::from_secs(1)),
            other => panic!("expected backoff, got {other:?}"),
        }
        assert!(matches!(
            next_step(&policy, &mut state, status(429, Some(1))),
            Step::Fail(BrokerError::RateLimited { attempts: 3 })
        ));
    }

    #[test]
    fn missing_retry_after_still_waits_a_second() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::default();
        match next_step(&policy, &mut state, status(429, None)) {
            Step::RetryAfter(d) => assert!(d >= Duration::from_secs(1)),
            other => panic!("expected backoff, got {other:?}"),
        }
    }

    #[test]
    fn teapot_counts_as_rate_limit() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::default();
        assert!(matches!(
            next_step(&policy, &mut state, status(418, None)),
            Step::RetryAfter(_)
        ));
    }

    #[test]
    fn transient_budget_is_smaller() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::default();
        assert!(matches!(
            next_step(&policy, &mut state, status(503, None)),
            Step::RetryAfter(_)
        ));
        assert!(matches!(
            next_step(&policy, &mut state, status(503, None)),
            Step::Fail(BrokerError::Transient(_))
        ));
    }

    #[test]
    fn network_errors_follow_the_transient_path() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::default();
        assert!(matches!(
            next_step(&policy, &mut state, Outcome::NetworkErr("reset".into())),
            Step::RetryAfter(_)
        ));
    }

    #[test]
    fn other_4xx_is_permanent() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::default();
        assert!(matches!(
            next_step(&policy, &mut state, status(404, None)),
            Step::Fail(BrokerError::Permanent { status: 404, .. })
        ));
    }

    #[test]
    fn window_check_rejects_wide_ranges() {
        let start = "2025-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let end = "2025-12-31T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert!(matches!(
            check_window(start, end),
            Err(BrokerError::WindowTooWide { .. })
        ));
        let narrow_end = "2025-01-31T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert!(check_window(start, narrow_end).is_ok());
    }
}
