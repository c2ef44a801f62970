use anyhow::{Context, Result, anyhow};
use base64::{Engine as _, engine::general_purpose};
use native_tls::TlsConnector;
use std::net::TcpStream;
use std::sync::Arc;

use crate::auth::TokenSource;
use crate::domain::email::{ImapEnvelope, MessageId, MessageSummary, RawMessage, Service};
use crate::fetch;
use crate::mail::decoders::decode_mime_words;
use crate::mail::{MailBackend, PageCursor, RawMessageSource, foreign_id};

type ImapSession = imap::Session<native_tls::TlsStream<TcpStream>>;

/// Envelopes in flight between the IMAP worker and the listing call.
const ENVELOPE_QUEUE: usize = 8;

/// Build canonical auth string as bytes.
fn build_xoauth2_bytes(user: &str, access_token: &str) -> Vec<u8> {
    format!("user={user}\x01auth=Bearer {access_token}\x01\x01").into_bytes()
}

struct OAuth2Authenticator {
    response: Vec<u8>,
}

impl imap::Authenticator for OAuth2Authenticator {
    type Response = Vec<u8>;
    fn process(&self, _challenge: &[u8]) -> Self::Response {
        self.response.clone()
    }
}

#[derive(Clone)]
pub enum ImapAuth {
    Password(String),
    XOAuth2(Arc<dyn TokenSource>),
}

#[derive(Clone)]
pub struct ImapClient {
    pub server: String,
    pub port: u16,
    pub user: String,
    auth: ImapAuth,
}

/// UIDs of one page, newest first. `offset` counts messages already listed.
pub fn page_slice(uids: &[u32], offset: u32, page_size: u32) -> Vec<u32> {
    let mut sorted = uids.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted.dedup();
    sorted
        .into_iter()
        .skip(offset as usize)
        .take(page_size as usize)
        .collect()
}

/// Joins UIDs into an IMAP sequence set.
fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn envelope_of(f: &imap::types::Fetch) -> Option<ImapEnvelope> {
    let uid = f.uid?;
    let env = f.envelope();

    let subject = env
        .and_then(|env| env.subject)
        .map(decode_mime_words)
        .unwrap_or_default();

    let from_name = env
        .and_then(|env| env.from.as_ref())
        .and_then(|froms| froms.first())
        .and_then(|addr| {
            // Prefer display name; if missing, use mailbox (without host).
            addr.name.or(addr.mailbox)
        })
        .map(decode_mime_words)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "(unknown)".to_string());

    let date = env
        .and_then(|env| env.date)
        .map(|d| String::from_utf8_lossy(d).trim().to_string())
        .unwrap_or_default();

    Some(ImapEnvelope {
        uid,
        subject,
        from_name,
        date,
    })
}

impl ImapClient {
    pub fn new(server: &str, port: u16, user: &str, auth: ImapAuth) -> Self {
        Self {
            server: server.to_string(),
            port,
            user: user.to_string(),
            auth,
        }
    }

    fn connect_and_auth(&self) -> Result<ImapSession> {
        let tls = TlsConnector::builder().build()?;
        let client = imap::connect(
            (self.server.as_str(), self.port),
            self.server.as_str(),
            &tls,
        )
        .with_context(|| format!("connecting to {}:{}", self.server, self.port))?;

        match &self.auth {
            ImapAuth::Password(password) => client
                .login(&self.user, password)
                .map_err(|(e, _)| anyhow!("IMAP login failed for {}: {e}", self.user)),
            ImapAuth::XOAuth2(tokens) => self.xoauth2(client, &tokens.access_token()?),
        }
    }

    fn xoauth2(
        &self,
        mut client: imap::Client<native_tls::TlsStream<TcpStream>>,
        access_token: &str,
    ) -> Result<ImapSession> {
        let raw_payload = build_xoauth2_bytes(&self.user, access_token);

        // Try RAW first
        let auth_raw = OAuth2Authenticator {
            response: raw_payload.clone(),
        };
        match client.authenticate("XOAUTH2", &auth_raw) {
            Ok(session) => return Ok(session),
            Err((e, returned_client)) => {
                log::debug!("raw XOAUTH2 rejected, retrying base64: {e}");
                client = returned_client;
            }
        }

        // Fallback BASE64
        let b64_bytes = general_purpose::STANDARD.encode(&raw_payload).into_bytes();
        let auth_b64 = OAuth2Authenticator {
            response: b64_bytes,
        };
        match client.authenticate("XOAUTH2", &auth_b64) {
            Ok(session) => Ok(session),
            Err((e, _)) => Err(anyhow!("XOAUTH2 failed (raw+base64): {e}")),
        }
    }

    fn open_inbox(&self) -> Result<ImapSession> {
        let mut session = self.connect_and_auth()?;
        session.select("INBOX")?;
        Ok(session)
    }

    /// One page of envelopes, newest first, plus the number of live messages.
    /// Page 0 starts at offset 0; `offset` counts messages already listed.
    pub fn fetch_page(&self, offset: u32, page_size: u32) -> Result<(Vec<ImapEnvelope>, usize)> {
        let client = self.clone();
        let worker = fetch::spawn(ENVELOPE_QUEUE, move |sink| {
            let mut session = client.open_inbox()?;

            let uids: Vec<u32> = session.uid_search("NOT DELETED")?.into_iter().collect();
            let total = uids.len();
            let page = page_slice(&uids, offset, page_size);

            if !page.is_empty() {
                let fetches = session.uid_fetch(uid_set(&page), "(UID ENVELOPE)")?;
                for f in fetches.iter() {
                    match envelope_of(f) {
                        Some(env) => sink.push(env)?,
                        None => log::warn!("skipping fetch response without UID"),
                    }
                }
            }

            session.logout()?;
            Ok(total)
        });

        let (mut envelopes, total) = worker.drain()?;
        envelopes.sort_unstable_by(|a, b| b.uid.cmp(&a.uid));
        Ok((envelopes, total))
    }

    /// Full RFC-822 source, fetched without touching flags, then marked `\Seen`.
    pub fn fetch_body(&self, uid: u32) -> Result<RawMessage> {
        let mut session = self.open_inbox()?;

        let mut raw = Self::peek_body(&mut session, uid)?;
        if raw.is_none() {
            log::warn!("UID {uid} missing body on first fetch; retrying once");
            raw = Self::peek_body(&mut session, uid)?;
        }
        let raw = raw.ok_or_else(|| anyhow!("UID {uid}: missing body even after retry"))?;

        if let Err(e) = session.uid_store(uid.to_string(), "+FLAGS (\\Seen)") {
            log::warn!("could not mark UID {uid} as seen: {e}");
        }
        session.logout()?;
        Ok(raw)
    }

    fn peek_body(session: &mut ImapSession, uid: u32) -> Result<Option<RawMessage>> {
        let fetches = session.uid_fetch(uid.to_string(), "(UID BODY.PEEK[])")?;
        let f = fetches
            .iter()
            .next()
            .ok_or_else(|| anyhow!("email UID {uid} not found"))?;
        Ok(f.body().map(RawMessage::new))
    }

    pub fn flag_deleted(&self, uid: u32) -> Result<()> {
        let mut session = self.open_inbox()?;
        session.uid_store(uid.to_string(), "+FLAGS (\\Deleted)")?;
        session.logout()?;
        log::info!("flagged UID {uid} as deleted");
        Ok(())
    }
}

impl RawMessageSource for ImapClient {
    fn fetch_raw(&self, id: &MessageId) -> Result<RawMessage> {
        let MessageId::Imap(uid) = id else {
            return Err(foreign_id(Service::Imap, id));
        };
        self.fetch_body(*uid)
    }
}

impl MailBackend for ImapClient {
    fn service(&self) -> Service {
        Service::Imap
    }

    fn list_page(&self, cursor: &mut PageCursor, page_size: u32) -> Result<Vec<MessageSummary>> {
        let offset = match cursor {
            PageCursor::First => 0,
            PageCursor::Offset(n) => *n,
            PageCursor::End => return Ok(vec![]),
            PageCursor::Token(_) => return Err(anyhow!("IMAP pages by offset, not token")),
        };
        let (envelopes, total) = self.fetch_page(offset, page_size)?;
        let next = offset as usize + envelopes.len();
        *cursor = if envelopes.is_empty() || next >= total {
            PageCursor::End
        } else {
            PageCursor::Offset(next as u32)
        };
        Ok(envelopes.into_iter().map(MessageSummary::Imap).collect())
    }

    fn delete(&self, id: &MessageId) -> Result<()> {
        let MessageId::Imap(uid) = id else {
            return Err(foreign_id(Service::Imap, id));
        };
        self.flag_deleted(*uid)
    }
}
