use clap::{Parser, Subcommand};

/// Brokerage-aggregation server: one unified view of positions,
/// balances, funding, and portfolio analytics across Questrade logins.
#[derive(Parser)]
#[command(name = "folio-flow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP API server
    Api {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(long, default_value = "4631")]
        port: u16,
    },

    /// Print an account's total-P&L series
    PnlSeries {
        /// Account id: number, loginId:number, or accountId
        #[arg(long)]
        account: String,

        /// Start the series at the account's configured display start
        #[arg(long)]
        apply_cagr_start: bool,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the current temperature and allocation for a benchmark
    Temperature {
        /// Benchmark symbol
        #[arg(long, default_value = "QQQ")]
        symbol: String,
    },
}
