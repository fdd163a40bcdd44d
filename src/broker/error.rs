use thiserror::Error;

/// Upstream-call failure taxonomy. `RateLimited` and `Transient` are
/// retried inside the client; `Auth` means the login's refresh token was
/// rejected and the operator must re-seed it.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("authorization rejected (status {status}): {body}")]
    Auth { status: u16, body: String },

    #[error("rate limited by broker after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("upstream rejected request (status {status}): {body}")]
    Permanent { status: u16, body: String },

    #[error("malformed upstream payload: {0}")]
    Malformed(String),

    #[error("requested window of {days} days exceeds the {max_days}-day cap")]
    WindowTooWide { days: i64, max_days: i64 },

    #[error("no tradable symbol found for '{0}'")]
    SymbolNotFound(String),

    #[error(transparent)]
    Token(#[from] crate::tokens::TokenError),
}

impl BrokerError {
    /// Stable kind tag for logs and degraded summary entries.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::Auth { .. } => "Auth",
            BrokerError::RateLimited { .. } => "RateLimited",
            BrokerError::Transient(_) => "Transient",
            BrokerError::Permanent { .. } => "Permanent",
            BrokerError::Malformed(_) => "Malformed",
            BrokerError::WindowTooWide { .. } => "WindowTooWide",
            BrokerError::SymbolNotFound(_) => "Permanent",
            BrokerError::Token(_) => "Auth",
        }
    }
}
