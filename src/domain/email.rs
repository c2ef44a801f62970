use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The three mail backends a session can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    #[default]
    Gmail,
    Graph,
    Imap,
}

impl Service {
    pub const ALL: [Service; 3] = [Service::Gmail, Service::Graph, Service::Imap];

    pub fn label(self) -> &'static str {
        match self {
            Service::Gmail => "Gmail",
            Service::Graph => "Microsoft Graph",
            Service::Imap => "IMAP",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Service::Gmail => Service::Graph,
            Service::Graph => Service::Imap,
            Service::Imap => Service::Gmail,
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Service::Gmail => "gmail",
            Service::Graph => "graph",
            Service::Imap => "imap",
        };
        f.write_str(name)
    }
}

impl FromStr for Service {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gmail" => Ok(Service::Gmail),
            "graph" | "outlook" => Ok(Service::Graph),
            "imap" => Ok(Service::Imap),
            other => Err(format!("unknown service '{other}' (expected gmail, graph or imap)")),
        }
    }
}

/// Backend-specific handle for one message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Gmail thread id; the newest message of the thread is opened.
    Gmail(String),
    Graph(String),
    Imap(u32),
}

impl MessageId {
    pub fn service(&self) -> Service {
        match self {
            MessageId::Gmail(_) => Service::Gmail,
            MessageId::Graph(_) => Service::Graph,
            MessageId::Imap(_) => Service::Imap,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Gmail(id) => write!(f, "gmail thread {id}"),
            MessageId::Graph(id) => write!(f, "graph message {id}"),
            MessageId::Imap(uid) => write!(f, "imap UID {uid}"),
        }
    }
}

/// Complete RFC-822 bytes of one message, as fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage(Vec<u8>);

impl RawMessage {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GmailThread {
    pub id: String,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphMessage {
    pub id: String,
    pub subject: String,
    pub from: String,
    pub received: String,
    pub is_read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapEnvelope {
    pub uid: u32,
    pub subject: String,
    pub from_name: String,
    pub date: String,
}

/// One row of the message list, in the shape its backend returned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageSummary {
    Gmail(GmailThread),
    Graph(GraphMessage),
    Imap(ImapEnvelope),
}

/// Two display lines for a list row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub title: String,
    pub detail: String,
    pub unread: bool,
}

impl MessageSummary {
    pub fn id(&self) -> MessageId {
        match self {
            MessageSummary::Gmail(t) => MessageId::Gmail(t.id.clone()),
            MessageSummary::Graph(m) => MessageId::Graph(m.id.clone()),
            MessageSummary::Imap(e) => MessageId::Imap(e.uid),
        }
    }

    pub fn list_entry(&self) -> ListEntry {
        match self {
            MessageSummary::Gmail(t) => ListEntry {
                title: non_empty(&t.snippet, "(no snippet)"),
                detail: t.id.clone(),
                unread: false,
            },
            MessageSummary::Graph(m) => ListEntry {
                title: non_empty(&m.subject, "(no subject)"),
                detail: join_detail(&m.from, &m.received),
                unread: !m.is_read,
            },
            MessageSummary::Imap(e) => ListEntry {
                title: non_empty(&e.subject, "(no subject)"),
                detail: join_detail(&e.from_name, &e.date),
                unread: false,
            },
        }
    }
}

fn non_empty(s: &str, fallback: &str) -> String {
    let s = s.trim();
    if s.is_empty() {
        fallback.to_string()
    } else {
        s.to_string()
    }
}

fn join_detail(who: &str, when: &str) -> String {
    match (who.trim(), when.trim()) {
        ("", "") => String::new(),
        (who, "") => who.to_string(),
        ("", when) => when.to_string(),
        (who, when) => format!("{who} · {when}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_entries_per_backend() {
        let gmail = MessageSummary::Gmail(GmailThread {
            id: "t1".into(),
            snippet: "  Lunch tomorrow?  ".into(),
        });
        assert_eq!(gmail.list_entry().title, "Lunch tomorrow?");
        assert_eq!(gmail.id(), MessageId::Gmail("t1".into()));

        let graph = MessageSummary::Graph(GraphMessage {
            id: "AAMk".into(),
            subject: String::new(),
            from: "Ann".into(),
            received: "2024-01-01T10:00:00Z".into(),
            is_read: false,
        });
        let entry = graph.list_entry();
        assert_eq!(entry.title, "(no subject)");
        assert_eq!(entry.detail, "Ann · 2024-01-01T10:00:00Z");
        assert!(entry.unread);

        let imap = MessageSummary::Imap(ImapEnvelope {
            uid: 42,
            subject: "Hi".into(),
            from_name: "Bob".into(),
            date: String::new(),
        });
        assert_eq!(imap.list_entry().detail, "Bob");
        assert_eq!(imap.id().service(), Service::Imap);
    }

    #[test]
    fn service_cycle_visits_all() {
        let mut s = Service::Gmail;
        let mut seen = vec![];
        for _ in 0..3 {
            seen.push(s);
            s = s.next();
        }
        assert_eq!(seen, Service::ALL);
        assert_eq!(s, Service::Gmail);
    }

    #[test]
    fn service_names() {
        for s in Service::ALL {
            assert_eq!(s.to_string().parse::<Service>(), Ok(s));
        }
        assert_eq!("Outlook".parse::<Service>(), Ok(Service::Graph));
        assert!("pop3".parse::<Service>().is_err());
    }
}
