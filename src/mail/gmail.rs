use anyhow::{Context, Result, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::auth::TokenSource;
use crate::domain::email::{GmailThread, MessageId, MessageSummary, RawMessage, Service};
use crate::mail::decoders::{normalize_snippet, unescape_snippet};
use crate::mail::{MailBackend, PageCursor, RawMessageSource, foreign_id};

pub const API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadList {
    #[serde(default)]
    threads: Vec<ThreadRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThreadRef {
    id: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Debug, Deserialize)]
struct ThreadDetail {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRef {
    id: String,
    internal_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    raw: Option<String>,
}

/// `format=raw` payloads are base64url, with or without padding.
pub fn decode_raw_payload(raw: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(raw.as_bytes())
        .or_else(|_| URL_SAFE.decode(raw.as_bytes()))
        .map_err(|e| anyhow!("invalid Gmail raw payload: {e}"))
}

pub struct GmailClient {
    http: Client,
    tokens: Arc<dyn TokenSource>,
    base_url: String,
}

impl GmailClient {
    pub fn new(tokens: Arc<dyn TokenSource>) -> Result<Self> {
        Self::with_base_url(tokens, API_BASE)
    }

    pub fn with_base_url(tokens: Arc<dyn TokenSource>, base_url: &str) -> Result<Self> {
        Ok(Self {
            http: Client::builder().build()?,
            tokens,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/{path}", self.base_url);
        log::debug!("GET {url}");
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.tokens.access_token()?)
            .query(query)
            .send()
            .with_context(|| format!("GET {path}"))?
            .error_for_status()
            .with_context(|| format!("GET {path}"))?;
        Ok(response.json()?)
    }

    /// One page of threads, newest first, with the token for the next page.
    pub fn list_threads(
        &self,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<(Vec<GmailThread>, Option<String>)> {
        let mut query = vec![("maxResults", max_results.to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        let list: ThreadList = self.get("threads", &query)?;

        let threads = list
            .threads
            .into_iter()
            .map(|t| GmailThread {
                snippet: normalize_snippet(&unescape_snippet(&t.snippet), 140),
                id: t.id,
            })
            .collect();
        Ok((threads, list.next_page_token))
    }

    /// Id of the newest message in a thread.
    pub fn latest_message_id(&self, thread_id: &str) -> Result<String> {
        let detail: ThreadDetail = self.get(
            &format!("threads/{thread_id}"),
            &[("format", "minimal".to_string())],
        )?;
        newest(detail.messages).ok_or_else(|| anyhow!("thread {thread_id} has no messages"))
    }

    pub fn get_raw(&self, message_id: &str) -> Result<RawMessage> {
        let response: RawResponse = self.get(
            &format!("messages/{message_id}"),
            &[("format", "raw".to_string())],
        )?;
        let raw = response
            .raw
            .ok_or_else(|| anyhow!("message {message_id} came back without a raw payload"))?;
        Ok(RawMessage::new(decode_raw_payload(&raw)?))
    }

    pub fn trash_thread(&self, thread_id: &str) -> Result<()> {
        let path = format!("threads/{thread_id}/trash");
        self.http
            .post(format!("{}/{path}", self.base_url))
            .bearer_auth(self.tokens.access_token()?)
            .send()
            .with_context(|| format!("POST {path}"))?
            .error_for_status()
            .with_context(|| format!("POST {path}"))?;
        log::info!("trashed Gmail thread {thread_id}");
        Ok(())
    }
}

/// Messages in a thread are chronological, but prefer `internalDate` when present.
fn newest(messages: Vec<MessageRef>) -> Option<String> {
    let date = |m: &MessageRef| {
        m.internal_date
            .as_deref()
            .and_then(|d| d.parse::<i64>().ok())
            .unwrap_or(i64::MIN)
    };
    messages
        .into_iter()
        .enumerate()
        .max_by_key(|(i, m)| (date(m), *i))
        .map(|(_, m)| m.id)
}

impl RawMessageSource for GmailClient {
    fn fetch_raw(&self, id: &MessageId) -> Result<RawMessage> {
        let MessageId::Gmail(thread_id) = id else {
            return Err(foreign_id(Service::Gmail, id));
        };
        let message_id = self.latest_message_id(thread_id)?;
        self.get_raw(&message_id)
    }
}

impl MailBackend for GmailClient {
    fn service(&self) -> Service {
        Service::Gmail
    }

    fn list_page(&self, cursor: &mut PageCursor, page_size: u32) -> Result<Vec<MessageSummary>> {
        let token = match cursor {
            PageCursor::First => None,
            PageCursor::Token(t) => Some(t.as_str()),
            PageCursor::End => return Ok(vec![]),
            PageCursor::Offset(_) => return Err(anyhow!("Gmail pages by token, not offset")),
        };
        let (threads, next) = self.list_threads(token, page_size)?;
        *cursor = next.map_or(PageCursor::End, PageCursor::Token);
        Ok(threads.into_iter().map(MessageSummary::Gmail).collect())
    }

    fn delete(&self, id: &MessageId) -> Result<()> {
        let MessageId::Gmail(thread_id) = id else {
            return Err(foreign_id(Service::Gmail, id));
        };
        self.trash_thread(thread_id)
    }
}
