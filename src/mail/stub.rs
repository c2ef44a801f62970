//! Test doubles: a loopback HTTP stub for backend tests, on the same
//! `tiny_http` the OAuth callback listener uses, and an in-memory mailbox
//! for session and UI tests.

use anyhow::{Result, anyhow};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use tiny_http::{Header, Response, Server};

use crate::auth::TokenSource;
use crate::domain::email::{ImapEnvelope, MessageId, MessageSummary, RawMessage, Service};
use crate::mail::{MailBackend, PageCursor, RawMessageSource};

pub struct StaticToken(pub &'static str);

impl TokenSource for StaticToken {
    fn access_token(&self) -> Result<String> {
        Ok(self.0.to_string())
    }
}

/// One request as the stub saw it.
#[derive(Debug)]
pub struct Seen {
    pub method: String,
    pub url: String,
    pub authorization: Option<String>,
}

pub struct Stub {
    pub base: String,
    pub seen: Receiver<Seen>,
}

/// Serves `requests` requests, answering each with `route(method, url)`.
pub fn serve<F>(requests: usize, route: F) -> Stub
where
    F: Fn(&str, &str) -> (u16, Vec<u8>) + Send + 'static,
{
    let server = Server::http("127.0.0.1:0").expect("bind stub server");
    let base = format!("http://{}", server.server_addr());
    let (tx, seen) = mpsc::channel();

    thread::spawn(move || {
        for _ in 0..requests {
            let Ok(request) = server.recv() else {
                return;
            };
            let method = request.method().to_string();
            let url = request.url().to_string();
            let authorization = request
                .headers()
                .iter()
                .find(|h| h.field.equiv("Authorization"))
                .map(|h| h.value.as_str().to_string());

            let (status, body) = route(&method, &url);
            let _ = tx.send(Seen {
                method,
                url,
                authorization,
            });

            let content_type =
                Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).expect("header");
            let response = Response::from_data(body)
                .with_status_code(status)
                .with_header(content_type);
            let _ = request.respond(response);
        }
    });

    Stub { base, seen }
}

pub fn json(status: u16, value: serde_json::Value) -> (u16, Vec<u8>) {
    (status, value.to_string().into_bytes())
}

pub type Messages = Arc<Mutex<Vec<(u32, &'static [u8])>>>;

/// In-memory mailbox paged by offset, newest first. `messages` and
/// `deleted` are shared so a test can change the mailbox under a live
/// session.
pub struct Memory {
    pub service: Service,
    pub messages: Messages,
    pub deleted: Arc<Mutex<Vec<u32>>>,
}

impl RawMessageSource for Memory {
    fn fetch_raw(&self, id: &MessageId) -> Result<RawMessage> {
        let MessageId::Imap(uid) = id else {
            return Err(anyhow!("wrong id"));
        };
        self.messages
            .lock()
            .expect("mailbox lock")
            .iter()
            .find(|(u, _)| u == uid)
            .map(|(_, raw)| RawMessage::new(*raw))
            .ok_or_else(|| anyhow!("no such message"))
    }
}

impl MailBackend for Memory {
    fn service(&self) -> Service {
        self.service
    }

    fn list_page(&self, cursor: &mut PageCursor, page_size: u32) -> Result<Vec<MessageSummary>> {
        let offset = match cursor {
            PageCursor::First => 0,
            PageCursor::Offset(n) => *n as usize,
            _ => return Ok(vec![]),
        };
        let messages = self.messages.lock().expect("mailbox lock");
        let page: Vec<_> = messages
            .iter()
            .skip(offset)
            .take(page_size as usize)
            .map(|(uid, _)| {
                MessageSummary::Imap(ImapEnvelope {
                    uid: *uid,
                    subject: format!("m{uid}"),
                    from_name: String::new(),
                    date: String::new(),
                })
            })
            .collect();
        let next = offset + page.len();
        *cursor = if next >= messages.len() {
            PageCursor::End
        } else {
            PageCursor::Offset(next as u32)
        };
        Ok(page)
    }

    fn delete(&self, id: &MessageId) -> Result<()> {
        if let MessageId::Imap(uid) = id {
            self.deleted.lock().expect("deleted lock").push(*uid);
        }
        Ok(())
    }
}
