use anyhow::Result;
use clap::Parser;

mod accounts;
mod activity;
mod aggregate;
mod api;
mod broker;
mod cli;
mod funding;
mod model;
mod models;
mod planner;
mod prices;
mod tokens;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = cli::Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        cli::Command::Api { host, port } => rt.block_on(api::serve(&host, port)),
        cli::Command::PnlSeries {
            account,
            apply_cagr_start,
            json,
        } => rt.block_on(print_pnl_series(&account, apply_cagr_start, json)),
        cli::Command::Temperature { symbol } => rt.block_on(print_temperature(&symbol)),
    }
}

async fn print_pnl_series(account: &str, apply_cagr_start: bool, json: bool) -> Result<()> {
    let state = api::bootstrap()?;
    let Some((series, summary)) = state.aggregator.pnl_series(account, apply_cagr_start).await?
    else {
        anyhow::bail!("no account matching '{account}'");
    };

    if json {
        let doc = api::types::PnlSeriesResponse { series, summary };
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("{:>12} {:>16} {:>14} {:>14}", "date", "net deposits", "equity", "total P&L");
    for p in &series.points {
        println!(
            "{:>12} {:>16.2} {:>14.2} {:>14.2}",
            p.date, p.cumulative_net_deposits_cad, p.equity_cad, p.total_pnl_cad,
        );
    }
    println!(
        "\nall-time P&L: {:.2} CAD; since-start P&L: {:.2} CAD",
        summary.total_pnl.all_time_cad, summary.total_pnl.combined_cad,
    );
    for issue in &series.issues {
        eprintln!("note: {issue}");
    }
    Ok(())
}

async fn print_temperature(symbol: &str) -> Result<()> {
    use crate::models::temperature::{allocation_for, temperature};

    let state = api::bootstrap()?;
    let today = chrono::Utc::now().date_naive();
    let history = state
        .prices
        .daily_closes(symbol, today - chrono::Duration::days(420), today, today)
        .await?;

    let Some(temp) = temperature(&history) else {
        anyhow::bail!("not enough price history for {symbol}");
    };
    let split = allocation_for(temp);
    println!("{symbol} temperature: {temp:.3}");
    println!(
        "allocation: leveraged {:.0}% / base {:.0}% / reserve {:.0}%",
        split[0] * 100.0,
        split[1] * 100.0,
        split[2] * 100.0,
    );
    Ok(())
}
