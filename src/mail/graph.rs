use anyhow::{Context, Result, anyhow};
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::{Arc, OnceLock};

use crate::auth::TokenSource;
use crate::domain::email::{GraphMessage, MessageId, MessageSummary, RawMessage, Service};
use crate::mail::{MailBackend, PageCursor, RawMessageSource, foreign_id};

pub const API_BASE: &str = "https://graph.microsoft.com/v1.0";

const MESSAGE_FIELDS: &str = "id,from,isRead,receivedDateTime,subject";

#[derive(Debug, Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserResource {
    id: String,
    display_name: Option<String>,
    mail: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageResource {
    id: String,
    subject: Option<String>,
    from: Option<Recipient>,
    received_date_time: Option<String>,
    #[serde(default)]
    is_read: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Recipient {
    email_address: Option<EmailAddress>,
}

#[derive(Debug, Deserialize)]
struct EmailAddress {
    name: Option<String>,
    address: Option<String>,
}

impl From<MessageResource> for GraphMessage {
    fn from(m: MessageResource) -> Self {
        let from = m
            .from
            .and_then(|r| r.email_address)
            .and_then(|a| a.name.filter(|n| !n.trim().is_empty()).or(a.address))
            .unwrap_or_default();
        GraphMessage {
            id: m.id,
            subject: m.subject.unwrap_or_default(),
            from,
            received: m.received_date_time.unwrap_or_default(),
            is_read: m.is_read,
        }
    }
}

/// Graph mail access for the first user of the tenant. The user id is
/// looked up once and kept for the life of the client.
pub struct GraphClient {
    http: Client,
    tokens: Arc<dyn TokenSource>,
    base_url: String,
    user_id: OnceLock<String>,
}

impl GraphClient {
    pub fn new(tokens: Arc<dyn TokenSource>) -> Result<Self> {
        Self::with_base_url(tokens, API_BASE)
    }

    pub fn with_base_url(tokens: Arc<dyn TokenSource>, base_url: &str) -> Result<Self> {
        Ok(Self {
            http: Client::builder().build()?,
            tokens,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id: OnceLock::new(),
        })
    }

    fn send(&self, what: &str, request: RequestBuilder) -> Result<reqwest::blocking::Response> {
        request
            .bearer_auth(self.tokens.access_token()?)
            .send()
            .with_context(|| what.to_string())?
            .error_for_status()
            .with_context(|| what.to_string())
    }

    fn get_json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        Ok(self.send(what, request)?.json()?)
    }

    pub fn user_id(&self) -> Result<String> {
        if let Some(id) = self.user_id.get() {
            return Ok(id.clone());
        }

        let request = self.http.get(format!("{}/users", self.base_url)).query(&[
            ("$select", "displayName,mail,id"),
            ("$top", "25"),
            ("$orderby", "displayName"),
        ]);
        let users: Collection<UserResource> = self.get_json(request, "listing users")?;
        let user = users
            .value
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no users visible to this Graph application"))?;
        log::info!(
            "using Graph mailbox of {}",
            user.mail
                .as_deref()
                .or(user.display_name.as_deref())
                .unwrap_or(&user.id)
        );

        let _ = self.user_id.set(user.id.clone());
        Ok(user.id)
    }

    fn message_url(&self, message_id: &str) -> Result<String> {
        Ok(format!(
            "{}/users/{}/messages/{message_id}",
            self.base_url,
            self.user_id()?
        ))
    }

    /// Inbox messages, newest first, and the link to the next page.
    pub fn list_inbox(
        &self,
        next_link: Option<&str>,
        top: u32,
    ) -> Result<(Vec<GraphMessage>, Option<String>)> {
        let request = match next_link {
            // the link already carries every query parameter
            Some(link) => self.http.get(link),
            None => self
                .http
                .get(format!(
                    "{}/users/{}/mailFolders/inbox/messages",
                    self.base_url,
                    self.user_id()?
                ))
                .query(&[
                    ("$select", MESSAGE_FIELDS.to_string()),
                    ("$top", top.to_string()),
                    ("$orderby", "receivedDateTime DESC".to_string()),
                ]),
        };
        let page: Collection<MessageResource> = self.get_json(request, "listing inbox")?;
        let messages = page.value.into_iter().map(GraphMessage::from).collect();
        Ok((messages, page.next_link))
    }

    /// Full MIME source of a message.
    pub fn get_mime(&self, message_id: &str) -> Result<RawMessage> {
        let url = format!("{}/$value", self.message_url(message_id)?);
        let bytes = self
            .send("fetching MIME content", self.http.get(url))?
            .bytes()?;
        Ok(RawMessage::new(bytes.to_vec()))
    }

    pub fn delete_message(&self, message_id: &str) -> Result<()> {
        let url = self.message_url(message_id)?;
        self.send("deleting message", self.http.delete(url))?;
        log::info!("deleted Graph message {message_id}");
        Ok(())
    }
}

impl RawMessageSource for GraphClient {
    fn fetch_raw(&self, id: &MessageId) -> Result<RawMessage> {
        let MessageId::Graph(message_id) = id else {
            return Err(foreign_id(Service::Graph, id));
        };
        self.get_mime(message_id)
    }
}

impl MailBackend for GraphClient {
    fn service(&self) -> Service {
        Service::Graph
    }

    fn list_page(&self, cursor: &mut PageCursor, page_size: u32) -> Result<Vec<MessageSummary>> {
        let link = match cursor {
            PageCursor::First => None,
            PageCursor::Token(link) => Some(link.as_str()),
            PageCursor::End => return Ok(vec![]),
            PageCursor::Offset(_) => return Err(anyhow!("Graph pages by link, not offset")),
        };
        let (messages, next) = self.list_inbox(link, page_size)?;
        *cursor = next.map_or(PageCursor::End, PageCursor::Token);
        Ok(messages.into_iter().map(MessageSummary::Graph).collect())
    }

    fn delete(&self, id: &MessageId) -> Result<()> {
        let MessageId::Graph(message_id) = id else {
            return Err(foreign_id(Service::Graph, id));
        };
        self.delete_message(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::stub::{self, StaticToken};
    use serde_json::json;

    fn client(base: &str) -> GraphClient {
        GraphClient::with_base_url(Arc::new(StaticToken("app")), base).unwrap()
    }

    #[test]
    fn sender_prefers_display_name() {
        let m: MessageResource = serde_json::from_value(json!({
            "id": "1",
            "subject": "Hello",
            "from": { "emailAddress": { "name": " ", "address": "ann@x.org" } },
            "receivedDateTime": "2024-05-01T08:00:00Z",
            "isRead": true
        }))
        .unwrap();
        let g = GraphMessage::from(m);
        assert_eq!(g.from, "ann@x.org");
        assert!(g.is_read);

        let bare: MessageResource = serde_json::from_value(json!({ "id": "2" })).unwrap();
        let g = GraphMessage::from(bare);
        assert_eq!(g.subject, "");
        assert!(!g.is_read);
    }

    #[test]
    fn user_id_is_resolved_once() {
        let stub = stub::serve(3, |_, url| {
            if url.starts_with("/users?") {
                stub::json(200, json!({ "value": [{ "id": "u1", "mail": "a@x.org" }] }))
            } else {
                (200, b"Subject: x\r\n\r\nbody".to_vec())
            }
        });
        let graph = client(&stub.base);

        let raw = graph.fetch_raw(&MessageId::Graph("m1".into())).unwrap();
        assert_eq!(raw.as_bytes(), b"Subject: x\r\n\r\nbody");
        graph.fetch_raw(&MessageId::Graph("m2".into())).unwrap();

        let urls: Vec<String> = stub.seen.iter().take(3).map(|s| s.url).collect();
        assert!(urls[0].starts_with("/users?"));
        assert_eq!(urls[1], "/users/u1/messages/m1/$value");
        assert_eq!(urls[2], "/users/u1/messages/m2/$value");
    }

    #[test]
    fn paging_follows_next_link() {
        let stub = stub::serve(3, |_, url| {
            if url.starts_with("/users?") {
                stub::json(200, json!({ "value": [{ "id": "u1" }] }))
            } else if url.starts_with("/next") {
                stub::json(200, json!({ "value": [{ "id": "m3", "subject": "old" }] }))
            } else {
                stub::json(
                    200,
                    json!({
                        "value": [
                            { "id": "m1", "subject": "new", "isRead": false },
                            { "id": "m2", "subject": "newer" }
                        ],
                        "@odata.nextLink": "NEXT"
                    }),
                )
            }
        });
        let graph = client(&stub.base);

        let mut cursor = PageCursor::First;
        let page = graph.list_page(&mut cursor, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id(), MessageId::Graph("m1".into()));
        assert_eq!(cursor, PageCursor::Token("NEXT".into()));

        // the stub cannot know its own address when building the link
        cursor = PageCursor::Token(format!("{}/next?$skip=2", stub.base));
        let page = graph.list_page(&mut cursor, 2).unwrap();
        assert_eq!(page.len(), 1);
        assert!(cursor.is_end());

        let seen: Vec<_> = stub.seen.iter().take(3).collect();
        assert!(seen[1].url.starts_with("/users/u1/mailFolders/inbox/messages?"));
        assert!(seen[1].url.contains("%24top=2"));
        assert_eq!(seen[1].authorization.as_deref(), Some("Bearer app"));
        assert!(seen[2].url.starts_with("/next"));
    }

    #[test]
    fn delete_and_empty_tenant() {
        let stub = stub::serve(2, |method, url| match (method, url) {
            ("GET", _) => stub::json(200, json!({ "value": [{ "id": "u1" }] })),
            _ => (204, Vec::new()),
        });
        let graph = client(&stub.base);
        graph.delete(&MessageId::Graph("m9".into())).unwrap();
        let seen: Vec<_> = stub.seen.iter().take(2).collect();
        assert_eq!(seen[1].method, "DELETE");
        assert_eq!(seen[1].url, "/users/u1/messages/m9");

        let empty = stub::serve(1, |_, _| stub::json(200, json!({ "value": [] })));
        assert!(client(&empty.base).user_id().is_err());
    }
}
