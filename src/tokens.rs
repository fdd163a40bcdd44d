use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::model::account::Login;

/// Seconds shaved off the broker's expiry so a token is never used at the
/// edge of its lifetime.
const EXPIRY_SKEW_SECS: u64 = 60;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("token refresh rejected: status {status}, body: {body}")]
    RefreshFailed { status: u16, body: String },

    #[error("unknown login '{0}'")]
    UnknownLogin(String),

    #[error("token store I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("token store parse: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("refresh task failed: {0}")]
    Join(String),
}

// ── File shapes ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TokenFile {
    logins: Vec<StoredLogin>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredLogin {
    id: String,
    label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<chrono::DateTime<Utc>>,
}

/// Pre-multi-login file shape: a bare refresh token at the top level.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyTokenFile {
    refresh_token: String,
    #[serde(default)]
    label: Option<String>,
}

// ── Token exchange (the OAuth leg) ──────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub api_server: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// The network leg of a refresh, kept behind a trait so rotation and
/// persistence can be tested without the broker.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(&self, refresh_token: &str) -> Result<TokenGrant, TokenError>;
}

pub struct QuestradeExchanger {
    http: reqwest::Client,
    login_host: String,
}

impl QuestradeExchanger {
    pub fn new(http: reqwest::Client, login_host: String) -> Self {
        Self { http, login_host }
    }
}

#[async_trait]
impl TokenExchanger for QuestradeExchanger {
    async fn exchange(&self, refresh_token: &str) -> Result<TokenGrant, TokenError> {
        let url = format!(
            "{}/oauth2/token?grant_type=refresh_token&refresh_token={}",
            self.login_host.trim_end_matches('/'),
            refresh_token,
        );

        let resp = self.http.get(&url).send().await.map_err(|e| {
            TokenError::RefreshFailed {
                status: 0,
                body: e.to_string(),
            }
        })?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(TokenError::RefreshFailed {
                status: status.as_u16(),
                body,
            });
        }

        let grant: TokenGrant =
            serde_json::from_str(&body).map_err(|e| TokenError::RefreshFailed {
                status: status.as_u16(),
                body: format!("undecodable grant: {e}"),
            })?;

        if grant.access_token.is_empty() || grant.api_server.is_empty() {
            return Err(TokenError::RefreshFailed {
                status: status.as_u16(),
                body: "grant missing access_token or api_server".to_string(),
            });
        }

        Ok(grant)
    }
}

// ── Access tokens ───────────────────────────────────────────────────

/// A live access token. Never persisted; the api_server host rides along.
#[derive(Debug, Clone)]
pub struct Access {
    pub access_token: String,
    pub api_server: String,
    pub expires_at: Instant,
}

impl Access {
    fn is_fresh(&self) -> bool {
        self.expires_at > Instant::now()
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// Persists per-login refresh tokens and hands out short-lived access
/// tokens. Exactly one refresh token is live per login; a successful
/// rotation rewrites the file before the new access token is released.
pub struct TokenStore {
    path: PathBuf,
    exchanger: Arc<dyn TokenExchanger>,
    file: RwLock<TokenFile>,
    access: RwLock<HashMap<String, Access>>,
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TokenStore {
    pub fn open(path: &Path, exchanger: Arc<dyn TokenExchanger>) -> Result<Self, TokenError> {
        let file = read_token_file(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            exchanger,
            file: RwLock::new(file),
            access: RwLock::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
        })
    }

    pub async fn logins(&self) -> Vec<Login> {
        self.file
            .read()
            .await
            .logins
            .iter()
            .map(|l| Login {
                id: l.id.clone(),
                label: l.label.clone(),
                email: l.email.clone(),
                updated_at: l.updated_at,
            })
            .collect()
    }

    /// Current access token for a login, refreshing if absent or stale.
    pub async fn access(self: &Arc<Self>, login_id: &str) -> Result<Access, TokenError> {
        if let Some(access) = self.access.read().await.get(login_id) {
            if access.is_fresh() {
                return Ok(access.clone());
            }
        }
        self.refresh(login_id, None).await
    }

    /// Force a rotation after an upstream 401. `stale_token` is the access
    /// token that was rejected: if the cache already holds a different one,
    /// another task rotated first and that token is returned instead.
    pub async fn force_refresh(
        self: &Arc<Self>,
        login_id: &str,
        stale_token: &str,
    ) -> Result<Access, TokenError> {
        self.refresh(login_id, Some(stale_token.to_string())).await
    }

    /// Refreshes run on their own task: an HTTP client disconnecting
    /// mid-request must not cancel a rotation between the broker call and
    /// the file rewrite.
    async fn refresh(
        self: &Arc<Self>,
        login_id: &str,
        stale_token: Option<String>,
    ) -> Result<Access, TokenError> {
        let store = Arc::clone(self);
        let login_id = login_id.to_string();
        tokio::spawn(async move { store.refresh_inner(&login_id, stale_token).await })
            .await
            .map_err(|e| TokenError::Join(e.to_string()))?
    }

    async fn refresh_inner(
        &self,
        login_id: &str,
        stale_token: Option<String>,
    ) -> Result<Access, TokenError> {
        let lock = {
            let mut locks = self.refresh_locks.lock().await;
            Arc::clone(locks.entry(login_id.to_string()).or_default())
        };
        let _guard = lock.lock().await;

        // Someone else may have rotated while we waited on the lock.
        if let Some(access) = self.access.read().await.get(login_id) {
            let superseded = stale_token
                .as_deref()
                .map(|stale| stale != access.access_token)
                .unwrap_or(true);
            if access.is_fresh() && superseded {
                return Ok(access.clone());
            }
        }

        let refresh_token = {
            let file = self.file.read().await;
            file.logins
                .iter()
                .find(|l| l.id == login_id)
                .map(|l| l.refresh_token.clone())
                .ok_or_else(|| TokenError::UnknownLogin(login_id.to_string()))?
        };

        let grant = self.exchanger.exchange(&refresh_token).await?;

        // Persist the rotated refresh token before releasing the access
        // token to any caller.
        {
            let mut file = self.file.write().await;
            let login = file
                .logins
                .iter_mut()
                .find(|l| l.id == login_id)
                .ok_or_else(|| TokenError::UnknownLogin(login_id.to_string()))?;
            login.refresh_token = grant.refresh_token.clone();
            login.updated_at = Some(Utc::now());
            write_atomic(&self.path, &file)?;
        }

        let expires_in = grant.expires_in.unwrap_or(1800);
        let access = Access {
            access_token: grant.access_token,
            api_server: normalize_api_server(&grant.api_server),
            expires_at: Instant::now()
                + Duration::from_secs(expires_in.saturating_sub(EXPIRY_SKEW_SECS)),
        };
        self.access
            .write()
            .await
            .insert(login_id.to_string(), access.clone());

        info!(login = login_id, "refresh token rotated");
        Ok(access)
    }
}

fn normalize_api_server(host: &str) -> String {
    let mut s = host.to_string();
    if !s.ends_with('/') {
        s.push('/');
    }
    s
}

fn read_token_file(path: &Path) -> Result<TokenFile, TokenError> {
    if !path.exists() {
        return Ok(TokenFile::default());
    }
    let raw = std::fs::read_to_string(path)?;
    match serde_json::from_str::<TokenFile>(&raw) {
        Ok(file) => Ok(file),
        Err(multi_err) => {
            // Legacy shape: a bare refresh token at the top level.
            let Ok(legacy) = serde_json::from_str::<LegacyTokenFile>(&raw) else {
                return Err(TokenError::Parse(multi_err));
            };
            Ok(TokenFile {
                logins: vec![StoredLogin {
                    id: "primary".to_string(),
                    label: legacy.label.unwrap_or_else(|| "Primary".to_string()),
                    email: None,
                    refresh_token: legacy.refresh_token,
                    updated_at: None,
                }],
            })
        }
    }
}

/// Whole-file replacement: write a sibling temp file, then rename over.
fn write_atomic(path: &Path, file: &TokenFile) -> Result<(), TokenError> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(file)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
