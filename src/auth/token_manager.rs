use anyhow::{Context, Result, anyhow};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::auth::{oauth, token_store, tokens_file};
use crate::config::{GmailConfig, GraphConfig};
use crate::domain::email::Service;

pub const GMAIL_SECRET_ENV: &str = "MAILTERM_GMAIL_CLIENT_SECRET";
pub const GRAPH_SECRET_ENV: &str = "MAILTERM_GRAPH_CLIENT_SECRET";

/// Seconds assumed when a token response carries no `expires_in`.
const DEFAULT_LIFETIME: i64 = 3500;
/// Tokens this close to expiry are treated as expired.
const EXPIRY_SLACK: i64 = 60;

/// Anything that can hand out a bearer token for API calls.
pub trait TokenSource: Send + Sync {
    fn access_token(&self) -> Result<String>;
}

fn now_epoch() -> Result<i64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64)
}

fn expiry(now: i64, expires_in: Option<u64>) -> i64 {
    expires_in
        .map(|s| now + s as i64)
        .unwrap_or(now + DEFAULT_LIFETIME)
        - EXPIRY_SLACK
}

fn cached_token(service: Service, now: i64) -> Option<String> {
    match tokens_file::load_cached(service) {
        Ok(Some(t)) if t.is_valid_at(now) => Some(t.access_token),
        Ok(_) => None,
        Err(e) => {
            log::warn!("could not read cached {service} token: {e}");
            None
        }
    }
}

fn store_token(service: Service, access_token: &str, expires_at: i64) {
    if let Err(e) = tokens_file::save_cached(service, access_token, expires_at) {
        log::warn!("could not cache {service} token: {e}");
    }
}

/// Google user tokens: cached access token, then refresh, then PKCE.
#[derive(Clone)]
pub struct GmailTokens {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub user_email: String,
}

impl GmailTokens {
    pub fn from_config(cfg: &GmailConfig) -> Result<Self> {
        let client_secret = token_store::secret_with_env_fallback(
            token_store::load_client_secret(Service::Gmail, &cfg.client_id),
            GMAIL_SECRET_ENV,
        );

        Ok(Self {
            client_id: cfg.client_id.clone(),
            client_secret,
            redirect_uri: cfg.redirect_uri().to_string(),
            user_email: cfg.user_email.clone(),
        })
    }
}

impl TokenSource for GmailTokens {
    /// Returns a valid access token; refreshes/PKCE if needed.
    fn access_token(&self) -> Result<String> {
        let now = now_epoch()?;

        if let Some(at) = cached_token(Service::Gmail, now) {
            return Ok(at);
        }

        let refresh_token = token_store::load_refresh_token(&self.user_email)
            .unwrap_or_else(|e| {
                log::warn!("keyring unavailable for refresh token: {e}");
                None
            });

        if let Some(rt) = refresh_token {
            match oauth::refresh_access_token(&self.client_id, self.client_secret.as_deref(), &rt)
            {
                Ok(t) => {
                    log::info!("refreshed Gmail access token");
                    store_token(Service::Gmail, &t.access_token, expiry(now, t.expires_in));
                    return Ok(t.access_token);
                }
                // revoked or expired refresh token: fall through to a fresh consent
                Err(e) => log::warn!("refresh failed, starting browser sign-in: {e}"),
            }
        }

        let t = oauth::perform_pkce_flow(
            &self.client_id,
            self.client_secret.as_deref(),
            &self.redirect_uri,
            oauth::GMAIL_SCOPE,
            &self.user_email,
        )
        .context("Gmail sign-in")?;

        store_token(Service::Gmail, &t.access_token, expiry(now, t.expires_in));
        Ok(t.access_token)
    }
}

/// App-only Graph tokens from the client-credentials grant.
#[derive(Clone)]
pub struct GraphTokens {
    pub tenant_id: String,
    pub client_id: String,
    client_secret: String,
}

impl GraphTokens {
    pub fn from_config(cfg: &GraphConfig) -> Result<Self> {
        let client_secret = token_store::secret_with_env_fallback(
            token_store::load_client_secret(Service::Graph, &cfg.client_id),
            GRAPH_SECRET_ENV,
        )
        .ok_or_else(|| {
            anyhow!(
                "no Graph client secret: run `mailterm set-client-secret --service graph \
                 --client-id {}` or set ${GRAPH_SECRET_ENV}",
                cfg.client_id
            )
        })?;

        Ok(Self {
            tenant_id: cfg.tenant_id.clone(),
            client_id: cfg.client_id.clone(),
            client_secret,
        })
    }
}

impl TokenSource for GraphTokens {
    fn access_token(&self) -> Result<String> {
        let now = now_epoch()?;

        if let Some(at) = cached_token(Service::Graph, now) {
            return Ok(at);
        }

        let t = oauth::client_credentials(&self.tenant_id, &self.client_id, &self.client_secret)?;
        store_token(Service::Graph, &t.access_token, expiry(now, t.expires_in));
        Ok(t.access_token)
    }
}
