use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::accounts::{ConfigProjection, ConfigStore};
use crate::activity::crawl;
use crate::broker::BrokerApi;
use crate::funding::{EngineInputs, FxTable, dividend_summary, funding_summary, total_pnl_series};
use crate::model::account::{AccountGroup, AccountInfo, AccountRef, AccountSettings};
use crate::model::balance::{AccountBalances, CurrencyBalance, Order, Position};
use crate::model::series::{DividendSummary, FundingSummary, PnlSeries};
use crate::model::round_cents;
use crate::models::{Evaluation, ModelAction, ModelInput, model_for};
use crate::prices::CachedPrices;
use crate::tokens::TokenStore;

/// How far back activity history is crawled. The broker does not keep
/// records forever; this bounds the reconstruction window.
const HISTORY_YEARS: i64 = 10;

/// Lookback for investment-model benchmarks: enough trading days for a
/// 200-day moving average plus slack.
const BENCHMARK_LOOKBACK_DAYS: i64 = 420;

// ── Selection ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Default,
    Group(String),
    One(String),
}

impl Selection {
    pub fn parse(raw: &str) -> Selection {
        match raw {
            "" | "all" => Selection::All,
            "default" => Selection::Default,
            _ => match raw.strip_prefix("group:") {
                Some(group) => Selection::Group(group.to_string()),
                None => Selection::One(raw.to_string()),
            },
        }
    }
}

fn id_matches(candidate: &str, target: &str) -> bool {
    fn suffix(s: &str) -> &str {
        s.rsplit(':').next().unwrap_or(s)
    }
    candidate == target || suffix(candidate) == target || suffix(candidate) == suffix(target)
}

/// Accounts belonging to a group, including descendants of the group in
/// the parent tree.
fn group_members(
    group_id: &str,
    groups: &[AccountGroup],
    accounts: &[(AccountRef, AccountSettings)],
) -> Vec<AccountRef> {
    let mut wanted: HashSet<String> = HashSet::new();
    wanted.insert(group_id.to_string());
    // Parent edges are acyclic after config load, so this settles.
    loop {
        let before = wanted.len();
        for g in groups {
            if let Some(parent) = &g.parent {
                if wanted.contains(parent) {
                    wanted.insert(g.id.clone());
                }
            }
        }
        if wanted.len() == before {
            break;
        }
    }

    let explicit: HashSet<String> = groups
        .iter()
        .filter(|g| wanted.contains(&g.id))
        .flat_map(|g| g.account_ids.iter().cloned())
        .collect();

    accounts
        .iter()
        .filter(|(r, settings)| {
            explicit.iter().any(|id| id_matches(id, &r.id()))
                || settings
                    .account_group
                    .as_ref()
                    .map(|g| wanted.contains(g))
                    .unwrap_or(false)
        })
        .map(|(r, _)| r.clone())
        .collect()
}

// ── Summary document ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRelation {
    pub parent: String,
    pub child: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDecision {
    pub action: ModelAction,
    pub target_allocation: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEvaluationDoc {
    pub model: String,
    pub decision: ModelDecision,
    pub status: String,
}

impl ModelEvaluationDoc {
    fn new(model: String, evaluation: Evaluation) -> Self {
        Self {
            model,
            decision: ModelDecision {
                action: evaluation.action,
                target_allocation: evaluation.target_allocation,
            },
            status: evaluation.status,
        }
    }
}

/// One account's entry in the composite document. A failed account keeps
/// its row with `error` set; the rest of the document still returns.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountEntry {
    #[serde(flatten)]
    pub info: AccountInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryDocument {
    pub accounts: Vec<AccountEntry>,
    pub account_groups: Vec<AccountGroup>,
    pub group_relations: Vec<GroupRelation>,
    pub filtered_account_ids: Vec<String>,
    pub positions: Vec<Position>,
    pub orders: HashMap<String, Vec<Order>>,
    pub balances: Vec<CurrencyBalance>,
    pub account_balances: HashMap<String, AccountBalances>,
    pub account_funding: HashMap<String, FundingSummary>,
    pub account_dividends: HashMap<String, DividendSummary>,
    pub investment_model_evaluations: HashMap<String, Vec<ModelEvaluationDoc>>,
    pub account_total_pnl_series: HashMap<String, PnlSeries>,
    pub usd_to_cad_rate: f64,
    pub as_of: DateTime<Utc>,
}

// ── Per-account snapshot ────────────────────────────────────────────

struct AccountSnapshot {
    balances: AccountBalances,
    positions: Vec<Position>,
    orders: Vec<Order>,
    funding: FundingSummary,
    dividends: DividendSummary,
    pnl_series: PnlSeries,
    evaluations: Vec<ModelEvaluationDoc>,
}

// ── Aggregator ──────────────────────────────────────────────────────

pub struct Aggregator {
    pub broker: Arc<dyn BrokerApi>,
    pub tokens: Arc<TokenStore>,
    pub config: Arc<ConfigStore>,
    pub prices: Arc<CachedPrices>,
}

impl Aggregator {
    /// Every account across every login, paired with its settings.
    /// A login whose listing fails is skipped with a warning rather than
    /// failing the set.
    pub async fn list_accounts(
        &self,
        projection: &ConfigProjection,
    ) -> Vec<(AccountRef, AccountSettings, String)> {
        let logins = self.tokens.logins().await;
        let mut set = JoinSet::new();
        for login in &logins {
            let broker = Arc::clone(&self.broker);
            let id = login.id.clone();
            set.spawn(async move {
                let listed = broker.accounts(&id).await;
                (id, listed)
            });
        }

        let mut out = Vec::new();
        while let Some(joined) = set.join_next().await {
            let Ok((login_id, listed)) = joined else {
                continue;
            };
            match listed {
                Ok(accounts) => {
                    for raw in accounts {
                        let r = AccountRef {
                            login_id: login_id.clone(),
                            number: raw.number.clone(),
                        };
                        let settings = projection.settings_for(&r).cloned().unwrap_or_default();
                        out.push((r, settings, raw.account_type));
                    }
                }
                Err(e) => warn!(login = %login_id, error = %e, "account listing failed"),
            }
        }
        out.sort_by(|a, b| a.0.id().cmp(&b.0.id()));
        out
    }

    /// Resolve a selection string against the live account listing.
    pub fn resolve(
        &self,
        selection: &Selection,
        accounts: &[(AccountRef, AccountSettings, String)],
        groups: &[AccountGroup],
    ) -> Vec<AccountRef> {
        let pairs: Vec<(AccountRef, AccountSettings)> = accounts
            .iter()
            .map(|(r, s, _)| (r.clone(), s.clone()))
            .collect();
        match selection {
            Selection::All => pairs.iter().map(|(r, _)| r.clone()).collect(),
            Selection::Default => {
                // With exactly one account there is an obvious default;
                // otherwise default means everything.
                if pairs.len() == 1 {
                    vec![pairs[0].0.clone()]
                } else {
                    pairs.iter().map(|(r, _)| r.clone()).collect()
                }
            }
            Selection::Group(id) => group_members(id, groups, &pairs),
            Selection::One(id) => pairs
                .iter()
                .filter(|(r, _)| id_matches(&r.id(), id))
                .map(|(r, _)| r.clone())
                .collect(),
        }
    }

    /// The USD→CAD table for the whole crawl horizon, shared by every
    /// account in a request. Failure degrades to an empty table; the
    /// funding engine then flags conversions as incomplete.
    pub async fn fx_table(&self, today: NaiveDate) -> FxTable {
        let start = today - Duration::days(HISTORY_YEARS * 365);
        match self
            .prices
            .daily_closes("USDCAD=X", start, today, today)
            .await
        {
            Ok(points) => FxTable::from_points(&points),
            Err(e) => {
                warn!(error = %e, "USDCAD=X history unavailable");
                FxTable::empty()
            }
        }
    }

    async fn snapshot(
        self: Arc<Self>,
        account: AccountRef,
        settings: AccountSettings,
        fx: FxTable,
        usd_to_cad: f64,
        today: NaiveDate,
    ) -> (AccountRef, Result<AccountSnapshot, String>) {
        let result = self
            .snapshot_inner(&account, &settings, &fx, usd_to_cad, today)
            .await;
        (account, result)
    }

    async fn snapshot_inner(
        &self,
        account: &AccountRef,
        settings: &AccountSettings,
        fx: &FxTable,
        usd_to_cad: f64,
        today: NaiveDate,
    ) -> Result<AccountSnapshot, String> {
        let now = Utc::now();

        // Balances, positions, and recent orders form one snapshot,
        // fetched in parallel and joined before anything is derived.
        let (balances, positions, orders) = tokio::join!(
            self.broker.balances(&account.login_id, &account.number),
            self.broker.positions(&account.login_id, &account.number),
            self.broker.orders(
                &account.login_id,
                &account.number,
                now - Duration::days(30),
                now,
            ),
        );
        let balances = balances.map_err(|e| format!("balances: {e}"))?;
        let positions = positions.map_err(|e| format!("positions: {e}"))?;
        let orders = orders.map_err(|e| format!("orders: {e}"))?;

        let activities = crawl(
            self.broker.as_ref(),
            &account.login_id,
            &account.number,
            now - Duration::days(HISTORY_YEARS * 365),
            now,
        )
        .await
        .map_err(|e| format!("activities: {e}"))?;

        let inputs = EngineInputs {
            activities: &activities,
            current_equity_cad: balances.combined_equity_cad(),
            fx,
            today,
            cagr_start_date: settings.cagr_start_date,
            net_deposit_adjustment: settings.net_deposit_adjustment.unwrap_or(0.0),
        };
        let funding = funding_summary(&inputs);
        let pnl_series = total_pnl_series(&inputs, true);
        let dividends = dividend_summary(&activities, fx);

        let mut evaluations = Vec::new();
        for config in &settings.investment_models {
            let evaluation = match model_for(&config.model) {
                Some(model) => {
                    let benchmark = model.benchmark_symbol(config);
                    debug!(model = model.name(), benchmark = %benchmark, "evaluating investment model");
                    let history = self
                        .prices
                        .daily_closes(
                            &benchmark,
                            today - Duration::days(BENCHMARK_LOOKBACK_DAYS),
                            today,
                            today,
                        )
                        .await
                        .unwrap_or_default();
                    model.evaluate(&ModelInput {
                        config,
                        positions: &positions,
                        balances: &balances,
                        benchmark_history: &history,
                        usd_to_cad,
                        today,
                        default_rebalance_period: settings.rebalance_period,
                    })
                }
                None => Evaluation::error(format!("unknown investment model '{}'", config.model)),
            };
            evaluations.push(ModelEvaluationDoc::new(config.model.clone(), evaluation));
        }

        Ok(AccountSnapshot {
            balances,
            positions,
            orders,
            funding,
            dividends,
            pnl_series,
            evaluations,
        })
    }

    /// Compose the whole summary document for a selection.
    pub async fn summary(self: &Arc<Self>, selection: &Selection) -> Result<SummaryDocument> {
        let today = Utc::now().date_naive();
        let projection = self.config.load().await.context("loading accounts config")?;
        let listed = self.list_accounts(&projection).await;
        let filtered = self.resolve(selection, &listed, &projection.groups);
        let filtered_set: HashSet<String> = filtered.iter().map(|r| r.id()).collect();

        let fx = self.fx_table(today).await;
        let usd_to_cad = fx.latest().unwrap_or(1.0);

        let mut set = JoinSet::new();
        for (account, settings, _) in &listed {
            if !filtered_set.contains(&account.id()) {
                continue;
            }
            set.spawn(Arc::clone(self).snapshot(
                account.clone(),
                settings.clone(),
                fx.clone(),
                usd_to_cad,
                today,
            ));
        }

        let mut snapshots: HashMap<String, AccountSnapshot> = HashMap::new();
        let mut errors: HashMap<String, String> = HashMap::new();
        while let Some(joined) = set.join_next().await {
            let Ok((account, result)) = joined else {
                continue;
            };
            match result {
                Ok(snapshot) => {
                    snapshots.insert(account.id(), snapshot);
                }
                Err(message) => {
                    warn!(account = %account, error = %message, "account snapshot failed");
                    errors.insert(account.id(), message);
                }
            }
        }

        // Assemble account rows with config overrides applied.
        let mut accounts = Vec::new();
        for (account, settings, account_type) in &listed {
            let id = account.id();
            let display_name = settings
                .display_name
                .clone()
                .unwrap_or_else(|| format!("{account_type} {}", account.number));
            accounts.push(AccountEntry {
                info: AccountInfo {
                    id: id.clone(),
                    login_id: account.login_id.clone(),
                    number: account.number.clone(),
                    account_type: account_type.clone(),
                    display_name,
                    beneficiary: settings.beneficiary.clone(),
                    account_group: settings.account_group.clone(),
                },
                error: errors.get(&id).cloned(),
            });
        }

        let group_relations = projection
            .groups
            .iter()
            .filter_map(|g| {
                g.parent.as_ref().map(|parent| GroupRelation {
                    parent: parent.clone(),
                    child: g.id.clone(),
                })
            })
            .collect();

        let mut orders = HashMap::new();
        let mut account_balances = HashMap::new();
        let mut account_funding = HashMap::new();
        let mut account_dividends = HashMap::new();
        let mut evaluations = HashMap::new();
        let mut series = HashMap::new();
        for (id, snapshot) in &snapshots {
            orders.insert(id.clone(), snapshot.orders.clone());
            account_balances.insert(id.clone(), snapshot.balances.clone());
            account_funding.insert(id.clone(), snapshot.funding.clone());
            account_dividends.insert(id.clone(), snapshot.dividends.clone());
            evaluations.insert(id.clone(), snapshot.evaluations.clone());
            series.insert(id.clone(), snapshot.pnl_series.clone());
        }

        let positions = merge_positions(snapshots.values().flat_map(|s| s.positions.iter()));
        let balances = aggregate_balances(snapshots.values().map(|s| &s.balances));

        Ok(SummaryDocument {
            accounts,
            account_groups: projection.groups.clone(),
            group_relations,
            filtered_account_ids: filtered.iter().map(|r| r.id()).collect(),
            positions,
            orders,
            balances,
            account_balances,
            account_funding,
            account_dividends,
            investment_model_evaluations: evaluations,
            account_total_pnl_series: series,
            usd_to_cad_rate: usd_to_cad,
            as_of: Utc::now(),
        })
    }

    /// Resolve one account id (or fail), crawl it, and build its series
    /// together with the matching funding summary.
    pub async fn pnl_series(
        self: &Arc<Self>,
        account_id: &str,
        apply_cagr_start: bool,
    ) -> Result<Option<(PnlSeries, FundingSummary)>> {
        let today = Utc::now().date_naive();
        let now = Utc::now();
        let projection = self.config.load().await?;
        let listed = self.list_accounts(&projection).await;
        let Some((account, settings, _)) = listed
            .into_iter()
            .find(|(r, _, _)| id_matches(&r.id(), account_id))
        else {
            return Ok(None);
        };

        let fx = self.fx_table(today).await;
        let activities = crawl(
            self.broker.as_ref(),
            &account.login_id,
            &account.number,
            now - Duration::days(HISTORY_YEARS * 365),
            now,
        )
        .await?;
        let balances = self
            .broker
            .balances(&account.login_id, &account.number)
            .await?;

        let inputs = EngineInputs {
            activities: &activities,
            current_equity_cad: balances.combined_equity_cad(),
            fx: &fx,
            today,
            cagr_start_date: settings.cagr_start_date,
            net_deposit_adjustment: settings.net_deposit_adjustment.unwrap_or(0.0),
        };
        Ok(Some((
            total_pnl_series(&inputs, apply_cagr_start),
            funding_summary(&inputs),
        )))
    }

    /// One account's live balances and positions plus its settings, for
    /// the planning endpoints.
    pub async fn account_context(
        self: &Arc<Self>,
        account_id: &str,
    ) -> Result<Option<(AccountRef, AccountSettings, AccountBalances, Vec<Position>)>> {
        let projection = self.config.load().await?;
        let listed = self.list_accounts(&projection).await;
        let Some((account, settings, _)) = listed
            .into_iter()
            .find(|(r, _, _)| id_matches(&r.id(), account_id))
        else {
            return Ok(None);
        };

        let (balances, positions) = tokio::join!(
            self.broker.balances(&account.login_id, &account.number),
            self.broker.positions(&account.login_id, &account.number),
        );
        Ok(Some((account, settings, balances?, positions?)))
    }
}

// ── Merging ─────────────────────────────────────────────────────────

/// Merge positions across accounts by symbol: quantities and values sum,
/// the entry price re-averages over the combined cost.
pub fn merge_positions<'a>(positions: impl Iterator<Item = &'a Position>) -> Vec<Position> {
    let mut merged: BTreeMap<String, Position> = BTreeMap::new();
    for p in positions {
        match merged.get_mut(&p.symbol) {
            None => {
                merged.insert(p.symbol.clone(), p.clone());
            }
            Some(existing) => {
                existing.open_quantity += p.open_quantity;
                existing.current_market_value += p.current_market_value;
                existing.open_pnl += p.open_pnl;
                existing.total_cost += p.total_cost;
                existing.current_price = p.current_price;
                existing.average_entry_price = if existing.open_quantity > 0.0 {
                    existing.total_cost / existing.open_quantity
                } else {
                    0.0
                };
            }
        }
    }
    merged.into_values().collect()
}

/// Sum per-currency balance rows across accounts.
pub fn aggregate_balances<'a>(
    balances: impl Iterator<Item = &'a AccountBalances>,
) -> Vec<CurrencyBalance> {
    let mut by_currency: BTreeMap<&'static str, CurrencyBalance> = BTreeMap::new();
    for b in balances {
        for row in &b.per_currency {
            let entry = by_currency
                .entry(row.currency.code())
                .or_insert(CurrencyBalance {
                    currency: row.currency,
                    cash: 0.0,
                    market_value: 0.0,
                    total_equity: 0.0,
                });
            entry.cash = round_cents(entry.cash + row.cash);
            entry.market_value = round_cents(entry.market_value + row.market_value);
            entry.total_equity = round_cents(entry.total_equity + row.total_equity);
        }
    }
    by_currency.into_values().collect()
}

#[cfg(test)]
mod tests {
    use crate::model::Currency;

    use super::*;

    #[test]
    fn selection_parsing() {
        assert_eq!(Selection::parse("all"), Selection::All);
        assert_eq!(Selection::parse(""), Selection::All);
        assert_eq!(Selection::parse("default"), Selection::Default);
        assert_eq!(
            Selection::parse("group:Retirement"),
            Selection::Group("Retirement".to_string())
        );
        assert_eq!(
            Selection::parse("alpha:26010001"),
            Selection::One("alpha:26010001".to_string())
        );
    }

    fn position(symbol: &str, quantity: f64, price: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            symbol_id: 7,
            open_quantity: quantity,
            current_price: price,
            current_market_value: quantity * price,
            average_entry_price: price,
            open_pnl: 0.0,
            total_cost: quantity * price,
            currency: Currency::Usd,
        }
    }

    #[test]
    fn positions_merge_by_symbol() {
        let a = position("QQQ", 10.0, 500.0);
        let b = position("QQQ", 5.0, 500.0);
        let c = position("SPY", 1.0, 600.0);
        let merged = merge_positions([&a, &b, &c].into_iter());

        assert_eq!(merged.len(), 2);
        let qqq = merged.iter().find(|p| p.symbol == "QQQ").unwrap();
        assert_eq!(qqq.open_quantity, 15.0);
        assert_eq!(qqq.current_market_value, 7500.0);
    }

    #[test]
    fn balances_aggregate_per_currency() {
        let a = AccountBalances {
            per_currency: vec![
                CurrencyBalance {
                    currency: Currency::Cad,
                    cash: 100.0,
                    market_value: 1000.0,
                    total_equity: 1100.0,
                },
                CurrencyBalance {
                    currency: Currency::Usd,
                    cash: 50.0,
                    market_value: 500.0,
                    total_equity: 550.0,
                },
            ],
            combined: vec![],
        };
        let b = AccountBalances {
            per_currency: vec![CurrencyBalance {
                currency: Currency::Cad,
                cash: 25.0,
                market_value: 200.0,
                total_equity: 225.0,
            }],
            combined: vec![],
        };

        let rows = aggregate_balances([&a, &b].into_iter());
        assert_eq!(rows.len(), 2);
        let cad = rows.iter().find(|r| r.currency == Currency::Cad).unwrap();
        assert_eq!(cad.cash, 125.0);
        assert_eq!(cad.total_equity, 1325.0);
    }

    #[test]
    fn group_members_include_descendants() {
        let groups = vec![
            AccountGroup {
                id: "family".to_string(),
                name: "family".to_string(),
                parent: None,
                account_ids: vec![],
            },
            AccountGroup {
                id: "kids".to_string(),
                name: "kids".to_string(),
                parent: Some("family".to_string()),
                account_ids: vec!["222".to_string()],
            },
        ];
        let accounts = vec![
            (
                AccountRef {
                    login_id: "alpha".to_string(),
                    number: "111".to_string(),
                },
                AccountSettings {
                    account_group: Some("family".to_string()),
                    ..Default::default()
                },
            ),
            (
                AccountRef {
                    login_id: "alpha".to_string(),
                    number: "222".to_string(),
                },
                AccountSettings::default(),
            ),
            (
                AccountRef {
                    login_id: "alpha".to_string(),
                    number: "333".to_string(),
                },
                AccountSettings::default(),
            ),
        ];

        let members = group_members("family", &groups, &accounts);
        let numbers: Vec<&str> = members.iter().map(|r| r.number.as_str()).collect();
        assert!(numbers.contains(&"111"));
        assert!(numbers.contains(&"222"));
        assert!(!numbers.contains(&"333"));
    }
}
