//! Mail backends. Each one lists, fetches raw RFC-822 bytes and deletes;
//! rendering is shared and lives in [`crate::render`].

pub mod decoders;
pub mod gmail;
pub mod graph;
pub mod imap_client;
#[cfg(test)]
pub(crate) mod stub;

use anyhow::{Result, bail};
use std::sync::Arc;

use crate::auth::{GmailTokens, GraphTokens, TokenSource, token_store};
use crate::config::Config;
use crate::domain::email::{MessageId, MessageSummary, RawMessage, Service};

pub const IMAP_PASSWORD_ENV: &str = "MAILTERM_IMAP_PASSWORD";

/// Where listing resumes. Owned by the session, advanced by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PageCursor {
    #[default]
    First,
    /// Opaque continuation from the server (Gmail page token, Graph next link).
    Token(String),
    /// Number of messages already listed (IMAP).
    Offset(u32),
    End,
}

impl PageCursor {
    pub fn is_end(&self) -> bool {
        matches!(self, PageCursor::End)
    }
}

/// Supplies complete RFC-822 bytes for one message.
pub trait RawMessageSource {
    fn fetch_raw(&self, id: &MessageId) -> Result<RawMessage>;
}

pub trait MailBackend: RawMessageSource + Send {
    fn service(&self) -> Service;

    /// Lists the page at `cursor` and moves the cursor past it. A cursor
    /// at [`PageCursor::End`] yields an empty page.
    fn list_page(&self, cursor: &mut PageCursor, page_size: u32) -> Result<Vec<MessageSummary>>;

    fn delete(&self, id: &MessageId) -> Result<()>;
}

pub(crate) fn foreign_id(backend: Service, id: &MessageId) -> anyhow::Error {
    anyhow::anyhow!("{id} does not belong to the {} backend", backend.label())
}

/// Builds the backend for `service` from configuration and stored secrets.
pub fn connect(service: Service, cfg: &Config) -> Result<Box<dyn MailBackend>> {
    log::info!("connecting {}", service.label());
    match service {
        Service::Gmail => {
            let tokens = GmailTokens::from_config(cfg.gmail()?)?;
            Ok(Box::new(gmail::GmailClient::new(Arc::new(tokens))?))
        }
        Service::Graph => {
            let tokens = GraphTokens::from_config(cfg.graph()?)?;
            Ok(Box::new(graph::GraphClient::new(Arc::new(tokens))?))
        }
        Service::Imap => {
            let imap = cfg.imap()?;
            let auth = if imap.xoauth2 {
                let tokens: Arc<dyn TokenSource> = Arc::new(GmailTokens::from_config(cfg.gmail()?)?);
                imap_client::ImapAuth::XOAuth2(tokens)
            } else {
                let password = token_store::secret_with_env_fallback(
                    token_store::load_imap_password(&imap.username),
                    IMAP_PASSWORD_ENV,
                )
                .or_else(|| imap.password.clone());
                match password {
                    Some(p) => imap_client::ImapAuth::Password(p),
                    None => bail!(
                        "no IMAP password for {}: run `mailterm set-imap-password --username {}` \
                         or set ${IMAP_PASSWORD_ENV}",
                        imap.username,
                        imap.username
                    ),
                }
            };
            Ok(Box::new(imap_client::ImapClient::new(
                &imap.server,
                imap.port,
                &imap.username,
                auth,
            )))
        }
    }
}
