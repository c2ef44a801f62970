use anyhow::{Result, anyhow};
use keyring::{Entry, Error as KeyringError};

use crate::domain::email::Service;

const SERVICE: &str = "mailterm";

fn set(user: &str, secret: &str) -> Result<()> {
    let entry = Entry::new(SERVICE, user);
    entry?
        .set_password(secret)
        .map_err(|e| anyhow!(e.to_string()))?;
    Ok(())
}

fn get(user: &str) -> Result<Option<String>> {
    let entry = Entry::new(SERVICE, user);
    match entry?.get_password() {
        Ok(v) => Ok(Some(v)),
        Err(KeyringError::NoEntry) => Ok(None),
        Err(e) => Err(anyhow!(e.to_string())),
    }
}

fn refresh_key(email: &str) -> String {
    format!("refresh:{email}")
}

fn client_secret_key(service: Service, client_id: &str) -> String {
    format!("{service}:{client_id}")
}

fn imap_password_key(username: &str) -> String {
    format!("imap-password:{username}")
}

/// Save a refresh token into the OS keyring for the given account email
pub fn save_refresh_token(email: &str, refresh_token: &str) -> Result<()> {
    set(&refresh_key(email), refresh_token)
}

pub fn load_refresh_token(email: &str) -> Result<Option<String>> {
    get(&refresh_key(email))
}

/// Save an OAuth client secret, keyed by service and client id
pub fn save_client_secret(service: Service, client_id: &str, secret: &str) -> Result<()> {
    set(&client_secret_key(service, client_id), secret)
}

pub fn load_client_secret(service: Service, client_id: &str) -> Result<Option<String>> {
    get(&client_secret_key(service, client_id))
}

pub fn save_imap_password(username: &str, password: &str) -> Result<()> {
    set(&imap_password_key(username), password)
}

pub fn load_imap_password(username: &str) -> Result<Option<String>> {
    get(&imap_password_key(username))
}

/// Keyring first, then the environment. A keyring failure is logged and
/// treated as a miss so headless setups can rely on the variable alone.
pub fn secret_with_env_fallback(
    from_keyring: Result<Option<String>>,
    env_var: &str,
) -> Option<String> {
    let stored = from_keyring.unwrap_or_else(|e| {
        log::warn!("keyring unavailable, falling back to ${env_var}: {e}");
        None
    });
    stored.or_else(|| std::env::var(env_var).ok().filter(|v| !v.is_empty()))
}
