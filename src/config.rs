use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;

use crate::domain::email::Service;

pub const HOME_ENV: &str = "MAILTERM_HOME";
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8080/callback";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub selected_service: Service,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    pub gmail: Option<GmailConfig>,
    pub graph: Option<GraphConfig>,
    pub imap: Option<ImapConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GmailConfig {
    pub client_id: String,
    pub user_email: String,
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GraphConfig {
    pub client_id: String,
    pub tenant_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ImapConfig {
    pub server: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    pub username: String,
    /// Plain-text fallback; the keyring entry wins when both exist.
    pub password: Option<String>,
    /// Authenticate with the Gmail OAuth token instead of a password.
    #[serde(default)]
    pub xoauth2: bool,
}

fn default_page_size() -> u32 {
    20
}

fn default_imap_port() -> u16 {
    993
}

impl Config {
    pub fn gmail(&self) -> Result<&GmailConfig> {
        self.gmail
            .as_ref()
            .ok_or_else(|| anyhow!("[gmail] section missing from {}", describe_path()))
    }

    pub fn graph(&self) -> Result<&GraphConfig> {
        self.graph
            .as_ref()
            .ok_or_else(|| anyhow!("[graph] section missing from {}", describe_path()))
    }

    pub fn imap(&self) -> Result<&ImapConfig> {
        self.imap
            .as_ref()
            .ok_or_else(|| anyhow!("[imap] section missing from {}", describe_path()))
    }
}

impl GmailConfig {
    pub fn redirect_uri(&self) -> &str {
        self.redirect_uri.as_deref().unwrap_or(DEFAULT_REDIRECT_URI)
    }
}

fn describe_path() -> String {
    config_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "config.toml".to_string())
}

fn dir_from(home: Option<OsString>) -> Result<PathBuf> {
    match home {
        Some(h) if !h.is_empty() => Ok(PathBuf::from(h)),
        _ => Ok(dirs::config_dir()
            .ok_or_else(|| anyhow!("no config dir available"))?
            .join("mailterm")),
    }
}

/// `$MAILTERM_HOME`, else `<config dir>/mailterm`. Created on demand.
pub fn config_dir() -> Result<PathBuf> {
    let p = dir_from(std::env::var_os(HOME_ENV))?;
    fs::create_dir_all(&p).with_context(|| format!("creating {}", p.display()))?;
    Ok(p)
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn log_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("mailterm.log"))
}

fn template() -> Config {
    Config {
        selected_service: Service::Gmail,
        page_size: default_page_size(),
        gmail: Some(GmailConfig {
            client_id: "YOUR_CLIENT_ID.apps.googleusercontent.com".to_string(),
            user_email: "you@example.com".to_string(),
            redirect_uri: Some(DEFAULT_REDIRECT_URI.to_string()),
        }),
        graph: Some(GraphConfig {
            client_id: "YOUR_APP_ID".to_string(),
            tenant_id: "YOUR_TENANT_ID".to_string(),
        }),
        imap: Some(ImapConfig {
            server: "imap.example.com".to_string(),
            port: default_imap_port(),
            username: "you@example.com".to_string(),
            password: None,
            xoauth2: false,
        }),
    }
}

pub fn parse_config(s: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(s)?;
    if cfg.page_size == 0 {
        return Err(anyhow!("page_size must be at least 1"));
    }
    Ok(cfg)
}

pub fn load_config() -> Result<Config> {
    let path = config_path()?;
    if !path.exists() {
        // create a template config for users to edit
        let header = "# mailterm configuration\n\
                      # selected_service: gmail | graph | imap\n\
                      # secrets live in the keyring, see `mailterm set-client-secret`\n\n";
        let body = toml::to_string_pretty(&template())?;
        fs::write(&path, format!("{header}{body}"))?;
        log::info!("wrote config template to {}", path.display());
        return Err(anyhow!(
            "Created template config at {}, edit it and run again",
            path.display()
        ));
    }
    let s = fs::read_to_string(&path)?;
    parse_config(&s).with_context(|| format!("parsing {}", path.display()))
}
