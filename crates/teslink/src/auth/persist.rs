// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Optional token persistence: load/save to a JSON file with atomic writes.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::auth::token::TokenSet;

/// On-disk form of a [`TokenSet`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedTokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Expiry as epoch seconds; absent when the issuer gave no lifetime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl PersistedTokens {
    pub fn from_token_set(tokens: &TokenSet) -> Self {
        let expires_at = tokens.expires_at().map(|at| {
            let remaining = at.saturating_duration_since(Instant::now());
            epoch_secs() + remaining.as_secs()
        });
        Self {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expires_at,
        }
    }

    /// Rebuild a token set; an already-passed expiry yields an immediately stale set.
    pub fn into_token_set(self) -> TokenSet {
        let expires_in =
            self.expires_at.map(|at| Duration::from_secs(at.saturating_sub(epoch_secs())));
        TokenSet::new(self.access_token, self.refresh_token, expires_in)
    }
}

/// Token file shared by every session of the process.
///
/// The file mirrors the session that wrote most recently. When that session drops its
/// tokens the file falls back to the newest session still holding some, and is removed
/// only when none is left.
pub struct TokenFile {
    path: PathBuf,
    /// Live sessions in write order, newest last.
    live: Mutex<Vec<(String, PersistedTokens)>>,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), live: Mutex::new(Vec::new()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the tokens of `session_id` and write them out.
    pub async fn store(&self, session_id: &str, tokens: PersistedTokens) -> anyhow::Result<()> {
        let mut live = self.live.lock().await;
        live.retain(|(id, _)| id != session_id);
        save(&self.path, &tokens)?;
        live.push((session_id.to_owned(), tokens));
        Ok(())
    }

    /// Drop `session_id`. Rewrites the file only when it showed that session.
    pub async fn forget(&self, session_id: &str) -> anyhow::Result<()> {
        let mut live = self.live.lock().await;
        let was_shown = live.last().is_some_and(|(id, _)| id == session_id);
        live.retain(|(id, _)| id != session_id);
        if !was_shown {
            return Ok(());
        }
        match live.last() {
            Some((id, tokens)) => {
                tracing::debug!(session_id = %id, "token file handed to remaining session");
                save(&self.path, tokens)
            }
            None => remove(&self.path),
        }
    }
}

/// Load persisted tokens. A missing file is `Ok(None)`.
pub fn load(path: &Path) -> anyhow::Result<Option<PersistedTokens>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let tokens: PersistedTokens = serde_json::from_str(&contents)?;
    Ok(Some(tokens))
}

/// Save tokens atomically (write tmp + rename).
///
/// Uses a unique temp filename (PID + counter) so concurrent saves never share a
/// `.tmp` file.
pub fn save(path: &Path, tokens: &PersistedTokens) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(tokens)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    restrict_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Delete the token file if present.
pub fn remove(path: &Path) -> anyhow::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
