use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::model::account::{AccountGroup, AccountRef, AccountSettings};

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("accounts file I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("accounts file parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

// ── Projection ──────────────────────────────────────────────────────

/// Everything the rest of the server reads out of the accounts file:
/// per-account settings keyed by the id exactly as written, plus the
/// group tree.
#[derive(Debug, Default, Clone)]
pub struct ConfigProjection {
    pub settings: HashMap<String, AccountSettings>,
    pub groups: Vec<AccountGroup>,
}

impl ConfigProjection {
    /// Settings for an account, matching the full `login:number` id, the
    /// bare number, or the suffix after the last `:` on either side.
    pub fn settings_for(&self, account: &AccountRef) -> Option<&AccountSettings> {
        let full = account.id();
        self.settings
            .iter()
            .find(|(key, _)| id_matches(key, &full))
            .map(|(_, s)| s)
    }

}

/// Suffix-tolerant id comparison: `rrsp-2:26010001` matches `26010001`
/// and vice versa.
fn id_matches(candidate: &str, target: &str) -> bool {
    fn suffix(s: &str) -> &str {
        s.rsplit(':').next().unwrap_or(s)
    }
    candidate == target
        || suffix(candidate) == target
        || candidate == suffix(target)
        || suffix(candidate) == suffix(target)
}

// ── Store ───────────────────────────────────────────────────────────

struct CachedProjection {
    size: u64,
    mtime: SystemTime,
    projection: Arc<ConfigProjection>,
}

/// Reads and rewrites the free-form accounts JSON file. Any nested object
/// carrying a `number`, `accountId`, or `id` is an account override;
/// mutations edit that object in place and replace the whole file
/// atomically. The read cache is keyed by (size, mtime).
pub struct ConfigStore {
    path: PathBuf,
    cache: Mutex<Option<CachedProjection>>,
    writer: Mutex<()>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cache: Mutex::new(None),
            writer: Mutex::new(()),
        }
    }

    pub async fn load(&self) -> Result<Arc<ConfigProjection>, ConfigError> {
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return Ok(Arc::new(ConfigProjection::default()));
        };
        let size = meta.len();
        let mtime = meta.modified()?;

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.size == size && cached.mtime == mtime {
                return Ok(Arc::clone(&cached.projection));
            }
        }

        let raw = std::fs::read_to_string(&self.path)?;
        let value: Value = serde_json::from_str(&raw)?;
        let projection = Arc::new(project(&value));
        *cache = Some(CachedProjection {
            size,
            mtime,
            projection: Arc::clone(&projection),
        });
        debug!(path = %self.path.display(), "accounts config reloaded");
        Ok(projection)
    }

    // ── Mutations ───────────────────────────────────────────────────

    pub async fn set_target_proportions(
        &self,
        account_id: &str,
        proportions: &HashMap<String, f64>,
    ) -> Result<(), ConfigError> {
        self.mutate(account_id, |obj| {
            let entry = obj.entry("symbols").or_insert_with(|| json!({}));
            if !entry.is_object() {
                *entry = json!({});
            }
            let symbols = entry.as_object_mut().expect("symbols forced to an object");
            // A full replacement: symbols absent from the new map lose
            // their target but keep their notes.
            for entry in symbols.values_mut() {
                if let Some(e) = entry.as_object_mut() {
                    e.remove("targetProportion");
                }
            }
            for (symbol, pct) in proportions {
                let entry = symbols
                    .entry(symbol.clone())
                    .or_insert_with(|| json!({}));
                if let Some(e) = entry.as_object_mut() {
                    e.insert("targetProportion".to_string(), json!(pct));
                }
            }
        })
        .await
    }

    pub async fn set_symbol_notes(
        &self,
        account_id: &str,
        symbol: &str,
        note: &str,
    ) -> Result<(), ConfigError> {
        self.mutate(account_id, |obj| {
            let container = obj.entry("symbols").or_insert_with(|| json!({}));
            if !container.is_object() {
                *container = json!({});
            }
            let symbols = container
                .as_object_mut()
                .expect("symbols forced to an object");
            let entry = symbols
                .entry(symbol.to_string())
                .or_insert_with(|| json!({}));
            if let Some(e) = entry.as_object_mut() {
                if note.is_empty() {
                    e.remove("notes");
                } else {
                    e.insert("notes".to_string(), json!(note));
                }
            }
        })
        .await
    }

    pub async fn set_planning_context(
        &self,
        account_id: &str,
        context: &str,
    ) -> Result<(), ConfigError> {
        self.mutate(account_id, |obj| {
            if context.is_empty() {
                obj.remove("planningContext");
            } else {
                obj.insert("planningContext".to_string(), json!(context));
            }
        })
        .await
    }

    /// Stamp a model's last-rebalance date. Without a model name the
    /// first configured model takes the stamp; an account with no models
    /// gets a top-level `lastRebalance`.
    pub async fn mark_rebalanced(
        &self,
        account_id: &str,
        model: Option<&str>,
        date: NaiveDate,
    ) -> Result<(), ConfigError> {
        let stamp = date.format("%Y-%m-%d").to_string();
        self.mutate(account_id, move |obj| {
            let models = obj
                .get_mut("investmentModels")
                .and_then(|v| v.as_array_mut());
            match models {
                Some(models) if !models.is_empty() => {
                    let target = match model {
                        Some(name) => models.iter_mut().find(|m| {
                            m.get("model").and_then(|v| v.as_str()) == Some(name)
                        }),
                        None => models.first_mut(),
                    };
                    if let Some(entry) = target.and_then(|m| m.as_object_mut()) {
                        entry.insert("lastRebalance".to_string(), json!(stamp));
                    }
                }
                _ => {
                    obj.insert("lastRebalance".to_string(), json!(stamp));
                }
            }
        })
        .await
    }

    /// Re-read the file fresh, apply `edit` to the matching account
    /// object (creating one under a top-level `accounts` array when the
    /// account has never been configured), rewrite atomically, and drop
    /// the read cache.
    async fn mutate<F>(&self, account_id: &str, edit: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let _writer = self.writer.lock().await;

        let mut root: Value = match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => json!({}),
            Err(e) => return Err(e.into()),
        };
        if !root.is_object() {
            root = json!({});
        }

        if find_account_mut(&mut root, account_id).is_none() {
            let accounts = root
                .as_object_mut()
                .expect("root forced to an object")
                .entry("accounts")
                .or_insert_with(|| json!([]));
            if !accounts.is_array() {
                *accounts = json!([]);
            }
            accounts
                .as_array_mut()
                .expect("accounts forced to an array")
                .push(json!({ "number": suffix_of(account_id) }));
        }
        let obj = find_account_mut(&mut root, account_id)
            .expect("account object exists after insertion");
        edit(obj);

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&root)?)?;
        std::fs::rename(&tmp, &self.path)?;

        *self.cache.lock().await = None;
        Ok(())
    }
}

fn suffix_of(id: &str) -> &str {
    id.rsplit(':').next().unwrap_or(id)
}

// ── Walking the free-form document ──────────────────────────────────

fn account_id_of(map: &Map<String, Value>) -> Option<String> {
    for key in ["number", "accountId", "id"] {
        match map.get(key) {
            Some(Value::String(s)) => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn find_account_mut<'a>(
    value: &'a mut Value,
    target: &str,
) -> Option<&'a mut Map<String, Value>> {
    match value {
        Value::Object(map) => {
            let matched = account_id_of(map)
                .map(|id| id_matches(&id, target))
                .unwrap_or(false);
            if matched {
                return Some(map);
            }
            for (key, child) in map.iter_mut() {
                if key == "accountGroups" {
                    continue;
                }
                if let Some(found) = find_account_mut(child, target) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => items
            .iter_mut()
            .find_map(|item| find_account_mut(item, target)),
        _ => None,
    }
}

fn project(root: &Value) -> ConfigProjection {
    let mut settings = HashMap::new();
    collect_accounts(root, &mut settings);

    let mut groups = Vec::new();
    collect_groups(root, &mut groups);

    // Groups named only on accounts become implicit root groups.
    let known: HashSet<String> = groups.iter().map(|g| g.id.clone()).collect();
    let mut implicit: Vec<String> = settings
        .values()
        .filter_map(|s| s.account_group.clone())
        .filter(|name| !known.contains(name))
        .collect();
    implicit.sort();
    implicit.dedup();
    for name in implicit {
        groups.push(AccountGroup {
            id: name.clone(),
            name,
            parent: None,
            account_ids: Vec::new(),
        });
    }

    break_cycles(&mut groups);
    ConfigProjection { settings, groups }
}

fn collect_accounts(value: &Value, out: &mut HashMap<String, AccountSettings>) {
    match value {
        Value::Object(map) => {
            if let Some(id) = account_id_of(map) {
                let parsed: AccountSettings =
                    serde_json::from_value(Value::Object(map.clone())).unwrap_or_default();
                out.insert(id, parsed);
            }
            for (key, child) in map {
                if key != "accountGroups" {
                    collect_accounts(child, out);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_accounts(item, out);
            }
        }
        _ => {}
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupDecl {
    id: Option<String>,
    name: Option<String>,
    parent: Option<String>,
    #[serde(default)]
    accounts: Vec<Value>,
}

fn collect_groups(value: &Value, out: &mut Vec<AccountGroup>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == "accountGroups" {
                    if let Value::Array(items) = child {
                        for item in items {
                            let Ok(decl) =
                                serde_json::from_value::<GroupDecl>(item.clone())
                            else {
                                continue;
                            };
                            let Some(id) = decl.id.clone().or_else(|| decl.name.clone())
                            else {
                                continue;
                            };
                            out.push(AccountGroup {
                                name: decl.name.unwrap_or_else(|| id.clone()),
                                id,
                                parent: decl.parent,
                                account_ids: decl
                                    .accounts
                                    .iter()
                                    .filter_map(|a| match a {
                                        Value::String(s) => Some(s.clone()),
                                        Value::Number(n) => Some(n.to_string()),
                                        Value::Object(m) => account_id_of(m),
                                        _ => None,
                                    })
                                    .collect(),
                            });
                        }
                    }
                } else {
                    collect_groups(child, out);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_groups(item, out);
            }
        }
        _ => {}
    }
}

/// The parent relation must be acyclic. Walk each group's ancestor chain
/// against the live edge set; an edge that closes a loop (or points at an
/// unknown group) is dropped and that group becomes a root. Dropping is
/// recorded immediately so later groups chaining into a broken loop keep
/// their own valid edges.
fn break_cycles(groups: &mut [AccountGroup]) {
    let ids: HashSet<String> = groups.iter().map(|g| g.id.clone()).collect();
    let mut parents: HashMap<String, Option<String>> = groups
        .iter()
        .map(|g| (g.id.clone(), g.parent.clone()))
        .collect();

    for group in groups.iter_mut() {
        match &group.parent {
            Some(parent) if !ids.contains(parent) => {
                group.parent = None;
                parents.insert(group.id.clone(), None);
            }
            Some(_) => {
                let mut visited = HashSet::new();
                visited.insert(group.id.clone());
                let mut cursor = group.parent.clone();
                let mut cyclic = false;
                while let Some(current) = cursor {
                    if !visited.insert(current.clone()) {
                        cyclic = true;
                        break;
                    }
                    cursor = parents.get(&current).cloned().flatten();
                }
                if cyclic {
                    group.parent = None;
                    parents.insert(group.id.clone(), None);
                }
            }
            None => {}
        }
    }
}
