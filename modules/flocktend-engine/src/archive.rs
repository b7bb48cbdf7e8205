//! Relation-id sets and account info loaded from a platform data export.
//!
//! Export files are JavaScript assignments of the form
//! `window.YTD.<key>.part0 = [ ... ]`; the payload after the first `=` is
//! plain JSON. A missing relation file means "nothing to reconcile", not
//! an error.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use flocktend_common::{AccountId, FlocktendError, RelationKind};

/// Owning-account identity for one export, with `asof` taken from the
/// export file's modification time.
#[derive(Debug, Clone)]
pub struct AccountInfo {
    pub account_id: AccountId,
    pub handle: String,
    pub asof: DateTime<Utc>,
}

pub struct ArchiveLoader {
    root: PathBuf,
}

impl ArchiveLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn data_file(&self, handle: &str, name: &str) -> PathBuf {
        self.root.join(handle).join("data").join(name)
    }

    pub fn load_account_info(&self, handle: &str) -> Result<AccountInfo, FlocktendError> {
        let path = self.data_file(handle, "account.js");
        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(|e| archive_err(&path, e))?;
        let content = fs::read_to_string(&path).map_err(|e| archive_err(&path, e))?;
        let entries: Vec<AccountEntry> = serde_json::from_str(strip_export_preamble(&content))
            .map_err(|e| FlocktendError::Archive(format!("{}: {e}", path.display())))?;
        let entry = entries.into_iter().next().ok_or_else(|| {
            FlocktendError::Archive(format!("{}: empty account export", path.display()))
        })?;
        let account_id = entry.account.account_id.parse::<i64>().map_err(|_| {
            FlocktendError::Archive(format!(
                "{}: malformed account id '{}'",
                path.display(),
                entry.account.account_id
            ))
        })?;
        Ok(AccountInfo {
            account_id: AccountId(account_id),
            handle: handle.to_string(),
            asof: DateTime::<Utc>::from(modified),
        })
    }

    /// Ordered, deduplicated relation ids for one kind. Missing file
    /// yields an empty set; malformed entries are skipped with a warning.
    pub fn load_relation_ids(
        &self,
        handle: &str,
        kind: RelationKind,
    ) -> Result<Vec<AccountId>, FlocktendError> {
        let path = self.data_file(handle, &format!("{}.js", kind.archive_key()));
        if !path.exists() {
            debug!(handle, kind = %kind, "No export file, treating as empty relation set");
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).map_err(|e| archive_err(&path, e))?;
        let entries: Vec<Value> = serde_json::from_str(strip_export_preamble(&content))
            .map_err(|e| FlocktendError::Archive(format!("{}: {e}", path.display())))?;

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for entry in &entries {
            let raw = entry
                .get(kind.archive_key())
                .and_then(|r| r.get("accountId"))
                .and_then(Value::as_str);
            match raw.map(str::parse::<i64>) {
                Some(Ok(id)) => {
                    if seen.insert(id) {
                        ids.push(AccountId(id));
                    }
                }
                _ => warn!(handle, kind = %kind, ?entry, "Skipping malformed export entry"),
            }
        }
        info!(handle, kind = %kind, count = ids.len(), "Loaded relation ids");
        Ok(ids)
    }

    /// Allow-list of account ids that are never pruned. Absent file means
    /// an empty list.
    pub fn load_excluded_ids(&self) -> Result<HashSet<AccountId>, FlocktendError> {
        let path = self.root.join("ignore_account_ids.txt");
        if !path.exists() {
            return Ok(HashSet::new());
        }
        let content = fs::read_to_string(&path).map_err(|e| archive_err(&path, e))?;
        let mut ids = HashSet::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.parse::<i64>() {
                Ok(id) => {
                    ids.insert(AccountId(id));
                }
                Err(_) => warn!(line, "Skipping malformed exclusion entry"),
            }
        }
        Ok(ids)
    }
}

fn strip_export_preamble(content: &str) -> &str {
    match content.find('=') {
        Some(index) => content[index + 1..].trim(),
        None => content.trim(),
    }
}

fn archive_err(path: &Path, e: std::io::Error) -> FlocktendError {
    FlocktendError::Archive(format!("{}: {e}", path.display()))
}

#[derive(Deserialize)]
struct AccountEntry {
    account: AccountPayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountPayload {
    account_id: String,
}
