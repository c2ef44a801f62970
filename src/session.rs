//! Per-run mail context: which backend is active, where listing resumes,
//! and how an opened message becomes display text.

use anyhow::{Context, Result};

use crate::config::Config;
use crate::domain::email::{MessageSummary, Service};
use crate::mail::{self, MailBackend, PageCursor};
use crate::render::{self, RenderedMessage};

type Connector = Box<dyn Fn(Service) -> Result<Box<dyn MailBackend>>>;

/// Text shown in place of a message body when fetching or decoding fails.
pub fn error_text(e: &anyhow::Error) -> String {
    format!("Error displaying message: {e:#}")
}

pub struct Session {
    service: Service,
    backend: Box<dyn MailBackend>,
    cursor: PageCursor,
    page_size: u32,
    connect: Connector,
}

impl Session {
    /// Connects the configured backends on demand, starting with `service`.
    pub fn connect(config: Config, service: Service) -> Result<Self> {
        let page_size = config.page_size;
        Self::with_connector(
            service,
            page_size,
            Box::new(move |s| mail::connect(s, &config)),
        )
    }

    pub fn with_connector(service: Service, page_size: u32, connect: Connector) -> Result<Self> {
        let backend = connect(service)?;
        Ok(Self {
            service,
            backend,
            cursor: PageCursor::First,
            page_size: page_size.max(1),
            connect,
        })
    }

    pub fn service(&self) -> Service {
        self.service
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn has_more(&self) -> bool {
        !self.cursor.is_end()
    }

    /// Rebuilds the backend for `service`. The old one stays active if
    /// the new one cannot be built.
    pub fn switch_service(&mut self, service: Service) -> Result<()> {
        let backend = (self.connect)(service)
            .with_context(|| format!("switching to {}", service.label()))?;
        self.backend = backend;
        self.service = service;
        self.cursor = PageCursor::First;
        log::info!("switched to {}", service.label());
        Ok(())
    }

    pub fn first_page(&mut self) -> Result<Vec<MessageSummary>> {
        self.cursor = PageCursor::First;
        self.next_page()
    }

    /// The page after the last one listed; empty once the mailbox is exhausted.
    pub fn next_page(&mut self) -> Result<Vec<MessageSummary>> {
        let mut cursor = self.cursor.clone();
        let page = self
            .backend
            .list_page(&mut cursor, self.page_size)
            .with_context(|| format!("listing {} messages", self.service.label()))?;
        self.cursor = cursor;
        log::debug!("listed {} messages from {}", page.len(), self.service);
        Ok(page)
    }

    /// Fetches the raw message and runs it through the shared decoder.
    pub fn read(&self, summary: &MessageSummary) -> Result<RenderedMessage> {
        let id = summary.id();
        let raw = self
            .backend
            .fetch_raw(&id)
            .with_context(|| format!("fetching {id}"))?;
        log::debug!("fetched {} bytes for {id}", raw.len());
        let rendered = render::decode(raw.as_bytes())?;
        Ok(rendered)
    }

    /// Display text for a message; failures become the error text itself.
    pub fn open(&self, summary: &MessageSummary) -> String {
        match self.read(summary) {
            Ok(rendered) => rendered.to_string(),
            Err(e) => {
                log::warn!("could not display {}: {e:#}", summary.id());
                error_text(&e)
            }
        }
    }

    pub fn delete(&self, summary: &MessageSummary) -> Result<()> {
        let id = summary.id();
        self.backend
            .delete(&id)
            .with_context(|| format!("deleting {id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::email::{ImapEnvelope, MessageId};
    use crate::mail::stub::Memory;
    use anyhow::anyhow;
    use std::sync::{Arc, Mutex};

    fn session(deleted: Arc<Mutex<Vec<u32>>>) -> Session {
        Session::with_connector(
            Service::Imap,
            2,
            Box::new(move |service| {
                if service == Service::Graph {
                    return Err(anyhow!("graph not configured"));
                }
                let backend: Box<dyn MailBackend> = Box::new(Memory {
                    service,
                    messages: Arc::new(Mutex::new(vec![
                        (3, &b"Subject: three\r\n\r\nhello"[..]),
                        (2, &b"Content-Type: multipart/mixed\r\n\r\nbody"[..]),
                        (1, &b"Subject: one\r\n\r\nx"[..]),
                    ])),
                    deleted: deleted.clone(),
                });
                Ok(backend)
            }),
        )
        .unwrap()
    }

    #[test]
    fn pages_until_exhausted_and_restarts() {
        let mut s = session(Arc::default());
        assert_eq!(s.next_page().unwrap().len(), 2);
        assert!(s.has_more());
        assert_eq!(s.next_page().unwrap().len(), 1);
        assert!(!s.has_more());
        assert!(s.next_page().unwrap().is_empty());

        let first = s.first_page().unwrap();
        assert_eq!(first[0].id(), MessageId::Imap(3));
    }

    #[test]
    fn open_renders_or_substitutes_error_text() {
        let mut s = session(Arc::default());
        let page = s.first_page().unwrap();

        assert_eq!(s.open(&page[0]), "Subject: three\n\nhello");

        let broken = s.open(&page[1]);
        assert!(broken.starts_with("Error displaying message: "), "{broken}");
        assert!(broken.contains("malformed message"), "{broken}");

        let missing = MessageSummary::Imap(ImapEnvelope {
            uid: 99,
            subject: String::new(),
            from_name: String::new(),
            date: String::new(),
        });
        assert!(s.open(&missing).contains("no such message"));
    }

    #[test]
    fn switching_resets_paging_and_keeps_old_backend_on_failure() {
        let mut s = session(Arc::default());
        s.next_page().unwrap();
        s.next_page().unwrap();
        assert!(!s.has_more());

        assert!(s.switch_service(Service::Graph).is_err());
        assert_eq!(s.service(), Service::Imap);
        assert!(!s.has_more());

        s.switch_service(Service::Gmail).unwrap();
        assert_eq!(s.service(), Service::Gmail);
        assert!(s.has_more());
    }

    #[test]
    fn delete_goes_to_the_backend() {
        let deleted = Arc::new(Mutex::new(vec![]));
        let mut s = session(deleted.clone());
        let page = s.first_page().unwrap();
        s.delete(&page[1]).unwrap();
        assert_eq!(*deleted.lock().unwrap(), [2]);
    }
}
