use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config;
use crate::domain::email::Service;

/// Non-secret access token and expiry for one service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at_epoch: i64, // epoch seconds
}

impl CachedToken {
    pub fn is_valid_at(&self, now: i64) -> bool {
        now < self.expires_at_epoch
    }
}

/// Contents of `tokens.json`, keyed by service name.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TokensFile {
    #[serde(flatten)]
    pub entries: BTreeMap<String, CachedToken>,
}

fn tokens_path() -> Result<PathBuf> {
    Ok(config::config_dir()?.join("tokens.json"))
}

fn read_from(path: &Path) -> Result<TokensFile> {
    if !path.exists() {
        return Ok(TokensFile::default());
    }
    let s = fs::read_to_string(path)?;
    match serde_json::from_str(&s) {
        Ok(tf) => Ok(tf),
        Err(e) => {
            log::warn!("ignoring unreadable {}: {e}", path.display());
            Ok(TokensFile::default())
        }
    }
}

fn write_to(path: &Path, tf: &TokensFile) -> Result<()> {
    let s = serde_json::to_string_pretty(tf)?;
    fs::write(path, s)?;
    Ok(())
}

pub fn load_cached(service: Service) -> Result<Option<CachedToken>> {
    let tf = read_from(&tokens_path()?)?;
    Ok(tf.entries.get(&service.to_string()).cloned())
}

pub fn save_cached(service: Service, access_token: &str, expires_at_epoch: i64) -> Result<()> {
    let path = tokens_path()?;
    let mut tf = read_from(&path)?;
    tf.entries.insert(
        service.to_string(),
        CachedToken {
            access_token: access_token.to_string(),
            expires_at_epoch,
        },
    );
    write_to(&path, &tf)
}
