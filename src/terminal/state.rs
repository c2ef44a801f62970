use std::time::{Duration, Instant};

use anyhow::Result;
use ratatui::widgets::ListState;

use crate::domain::email::{MessageId, MessageSummary, Service};
use crate::session::Session;

/// How often the first page is re-listed while auto-refresh is on.
pub const REFRESH_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    List,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    ListOnly,
    Split,
}

pub struct AppState {
    pub service: Service,
    /// Zero-based index of the page on screen.
    pub page: u32,
    pub has_more: bool,

    pub items: Vec<MessageSummary>,
    pub list_state: ListState,

    /// The message currently opened in the right panel (only when Split)
    pub opened_id: Option<MessageId>,
    pub body: Option<String>,
    pub body_scroll: u16,

    pub focus: Focus,
    pub mode: ViewMode,

    /// One-line notice for the footer (errors, confirmations).
    pub status: Option<String>,

    pub auto_refresh: bool,
    last_refresh: Instant,
}

impl AppState {
    pub fn new(service: Service) -> Self {
        Self {
            service,
            page: 0,
            has_more: false,
            items: vec![],
            list_state: ListState::default(),
            opened_id: None,
            body: None,
            body_scroll: 0,
            focus: Focus::List,
            mode: ViewMode::ListOnly,
            status: None,
            auto_refresh: false,
            last_refresh: Instant::now(),
        }
    }

    /// Keeps the UI alive on failure: the error lands in the footer.
    pub fn report(&mut self, result: Result<()>) {
        if let Err(e) = result {
            log::error!("{e:#}");
            self.status = Some(format!("{e:#}"));
        }
    }

    fn show_page(&mut self, items: Vec<MessageSummary>, page: u32, has_more: bool) {
        self.items = items;
        self.page = page;
        self.has_more = has_more;
        self.list_state
            .select(if self.items.is_empty() { None } else { Some(0) });
    }

    pub fn first_page(&mut self, session: &mut Session) -> Result<()> {
        let items = session.first_page()?;
        self.show_page(items, 0, session.has_more());
        Ok(())
    }

    pub fn next_page(&mut self, session: &mut Session) -> Result<()> {
        if !session.has_more() {
            self.status = Some("no more messages".to_string());
            return Ok(());
        }
        let items = session.next_page()?;
        if items.is_empty() {
            self.has_more = false;
            self.status = Some("no more messages".to_string());
            return Ok(());
        }
        self.show_page(items, self.page + 1, session.has_more());
        Ok(())
    }

    pub fn cycle_service(&mut self, session: &mut Session) -> Result<()> {
        let next = session.service().next();
        session.switch_service(next)?;
        self.service = next;
        self.close_email();
        self.first_page(session)?;
        self.status = Some(format!("switched to {}", next.label()));
        Ok(())
    }

    pub fn toggle_auto_refresh(&mut self, now: Instant) {
        self.auto_refresh = !self.auto_refresh;
        self.last_refresh = now;
        let word = if self.auto_refresh { "on" } else { "off" };
        self.status = Some(format!("auto-refresh {word}"));
    }

    /// Re-lists the first page once per [`REFRESH_PERIOD`] while
    /// auto-refresh is on. Later pages are left alone; the selection
    /// follows the selected message when it is still listed.
    pub fn tick(&mut self, session: &mut Session, now: Instant) -> Result<()> {
        if !self.auto_refresh || now.saturating_duration_since(self.last_refresh) < REFRESH_PERIOD {
            return Ok(());
        }
        self.last_refresh = now;
        if self.page != 0 {
            return Ok(());
        }

        let selected = self.current_selected().map(MessageSummary::id);
        self.first_page(session)?;
        if let Some(id) = selected
            && let Some(idx) = self.items.iter().position(|m| m.id() == id)
        {
            self.list_state.select(Some(idx));
        }
        log::debug!("auto-refreshed {}", self.service);
        Ok(())
    }

    pub fn current_selected(&self) -> Option<&MessageSummary> {
        let idx = self.list_state.selected()?;
        self.items.get(idx)
    }

    pub fn move_selection(&mut self, delta: i32) {
        if self.items.is_empty() {
            self.list_state.select(None);
            return;
        }
        let cur = self.list_state.selected().unwrap_or(0) as i32;
        let len = self.items.len() as i32;
        let next = (cur + delta).clamp(0, len - 1) as usize;
        self.list_state.select(Some(next));
    }

    /// Fetches and renders the selected message; errors become its body.
    pub fn open_selected(&mut self, session: &Session) {
        let Some(summary) = self.current_selected() else {
            return;
        };
        let id = summary.id();
        let text = session.open(summary);

        self.mode = ViewMode::Split;
        self.focus = Focus::Body;
        self.body_scroll = 0;
        self.opened_id = Some(id);
        self.body = Some(text);
    }

    pub fn delete_selected(&mut self, session: &Session) -> Result<()> {
        let Some(idx) = self.list_state.selected() else {
            return Ok(());
        };
        let Some(summary) = self.items.get(idx) else {
            return Ok(());
        };
        session.delete(summary)?;

        let removed = self.items.remove(idx);
        if self.opened_id.as_ref() == Some(&removed.id()) {
            self.close_email();
        }
        if self.items.is_empty() {
            self.list_state.select(None);
        } else {
            self.list_state.select(Some(idx.min(self.items.len() - 1)));
        }
        self.status = Some("message deleted".to_string());
        Ok(())
    }

    pub fn close_email(&mut self) {
        self.mode = ViewMode::ListOnly;
        self.focus = Focus::List;
        self.opened_id = None;
        self.body = None;
        self.body_scroll = 0;
    }

    pub fn toggle_focus(&mut self) {
        if self.mode != ViewMode::Split {
            return;
        }
        self.focus = match self.focus {
            Focus::List => Focus::Body,
            Focus::Body => Focus::List,
        };
    }

    pub fn scroll_body(&mut self, delta: i32) {
        if self.mode != ViewMode::Split {
            return;
        }
        if delta < 0 {
            self.body_scroll = self.body_scroll.saturating_sub((-delta) as u16);
        } else {
            self.body_scroll = self.body_scroll.saturating_add(delta as u16);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::email::{GmailThread, MessageId};
    use crate::mail::MailBackend;
    use crate::mail::stub::{Memory, Messages};
    use std::sync::{Arc, Mutex};

    fn state_with(n: usize) -> AppState {
        let mut s = AppState::new(Service::Gmail);
        let items = (0..n)
            .map(|i| {
                MessageSummary::Gmail(GmailThread {
                    id: format!("t{i}"),
                    snippet: format!("snippet {i}"),
                })
            })
            .collect();
        s.show_page(items, 0, true);
        s
    }

    #[test]
    fn selection_is_clamped() {
        let mut s = state_with(3);
        assert_eq!(s.list_state.selected(), Some(0));
        s.move_selection(-1);
        assert_eq!(s.list_state.selected(), Some(0));
        s.move_selection(5);
        assert_eq!(s.list_state.selected(), Some(2));

        let mut empty = state_with(0);
        empty.move_selection(1);
        assert_eq!(empty.list_state.selected(), None);
        assert!(empty.current_selected().is_none());
    }

    #[test]
    fn body_scrolling_only_in_split_view() {
        let mut s = state_with(1);
        s.scroll_body(3);
        assert_eq!(s.body_scroll, 0);

        s.mode = ViewMode::Split;
        s.scroll_body(3);
        s.scroll_body(-10);
        assert_eq!(s.body_scroll, 0);
        s.scroll_body(4);
        assert_eq!(s.body_scroll, 4);

        s.toggle_focus();
        assert_eq!(s.focus, Focus::Body);
        s.close_email();
        assert_eq!((s.mode, s.focus, s.body_scroll), (ViewMode::ListOnly, Focus::List, 0));
    }

    #[test]
    fn errors_go_to_the_status_line() {
        let mut s = state_with(0);
        s.report(Err(anyhow::anyhow!("offline")));
        assert_eq!(s.status.as_deref(), Some("offline"));
    }

    fn memory_session(messages: &Messages) -> Session {
        let shared = messages.clone();
        Session::with_connector(
            Service::Imap,
            5,
            Box::new(move |service| {
                let backend: Box<dyn MailBackend> = Box::new(Memory {
                    service,
                    messages: shared.clone(),
                    deleted: Arc::default(),
                });
                Ok(backend)
            }),
        )
        .unwrap()
    }

    fn listed(s: &AppState) -> Vec<MessageId> {
        s.items.iter().map(MessageSummary::id).collect()
    }

    #[test]
    fn auto_refresh_relists_the_first_page_once_per_period() {
        let messages: Messages = Arc::new(Mutex::new(vec![
            (2, &b"Subject: two\r\n\r\nb"[..]),
            (1, &b"Subject: one\r\n\r\na"[..]),
        ]));
        let mut session = memory_session(&messages);
        let mut s = AppState::new(Service::Imap);
        s.first_page(&mut session).unwrap();
        s.move_selection(1);
        let start = s.last_refresh;

        messages.lock().unwrap().insert(0, (3, &b"Subject: three\r\n\r\nc"[..]));

        s.tick(&mut session, start + REFRESH_PERIOD).unwrap();
        assert_eq!(listed(&s), [MessageId::Imap(2), MessageId::Imap(1)]);

        s.toggle_auto_refresh(start);
        assert_eq!(s.status.as_deref(), Some("auto-refresh on"));
        s.tick(&mut session, start + REFRESH_PERIOD / 2).unwrap();
        assert_eq!(s.items.len(), 2);

        s.tick(&mut session, start + REFRESH_PERIOD).unwrap();
        assert_eq!(
            listed(&s),
            [MessageId::Imap(3), MessageId::Imap(2), MessageId::Imap(1)]
        );
        assert_eq!(s.current_selected().map(MessageSummary::id), Some(MessageId::Imap(1)));

        s.toggle_auto_refresh(start + REFRESH_PERIOD);
        assert!(!s.auto_refresh);
        assert_eq!(s.status.as_deref(), Some("auto-refresh off"));
    }

    #[test]
    fn auto_refresh_leaves_later_pages_alone() {
        let messages: Messages = Arc::new(Mutex::new(vec![(1, &b"Subject: one\r\n\r\na"[..])]));
        let mut session = memory_session(&messages);
        let mut s = AppState::new(Service::Imap);
        s.first_page(&mut session).unwrap();
        s.page = 1;
        let start = s.last_refresh;
        s.toggle_auto_refresh(start);

        messages.lock().unwrap().insert(0, (2, &b"Subject: two\r\n\r\nb"[..]));
        s.tick(&mut session, start + REFRESH_PERIOD).unwrap();
        assert_eq!(listed(&s), [MessageId::Imap(1)]);
        assert_eq!(s.page, 1);
    }
}
