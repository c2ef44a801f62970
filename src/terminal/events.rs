use std::time::Instant;

use crossterm::event::{KeyCode, KeyEvent};

use crate::session::Session;
use crate::terminal::state::{AppState, Focus, ViewMode};

/// Applies one key press. Returns `true` when the UI should exit.
pub fn handle_key(key: KeyEvent, state: &mut AppState, session: &mut Session) -> bool {
    state.status = None;

    match key.code {
        KeyCode::Char('q') => return true,

        KeyCode::Esc => {
            if state.mode == ViewMode::Split {
                state.close_email();
                return false;
            }
            return true;
        }

        KeyCode::Enter => {
            state.open_selected(session);
            return false;
        }

        KeyCode::Tab => {
            state.toggle_focus();
            return false;
        }

        KeyCode::Char('n') => {
            let result = state.next_page(session);
            state.report(result);
            return false;
        }

        KeyCode::Char('g') => {
            let result = state.first_page(session);
            state.report(result);
            return false;
        }

        KeyCode::Char('d') => {
            let result = state.delete_selected(session);
            state.report(result);
            return false;
        }

        KeyCode::Char('r') => {
            state.toggle_auto_refresh(Instant::now());
            return false;
        }

        KeyCode::Char('s') => {
            let result = state.cycle_service(session);
            state.report(result);
            return false;
        }

        _ => {}
    }

    match state.focus {
        Focus::List => handle_list_keys(key, state),
        Focus::Body => handle_body_keys(key, state),
    }
    false
}

fn handle_list_keys(key: KeyEvent, state: &mut AppState) {
    match key.code {
        KeyCode::Down | KeyCode::Char('j') => state.move_selection(1),
        KeyCode::Up | KeyCode::Char('k') => state.move_selection(-1),
        KeyCode::Home => state.list_state.select((!state.items.is_empty()).then_some(0)),
        KeyCode::End => {
            if !state.items.is_empty() {
                state.list_state.select(Some(state.items.len() - 1));
            }
        }
        _ => {}
    }
}

fn handle_body_keys(key: KeyEvent, state: &mut AppState) {
    match key.code {
        KeyCode::Down | KeyCode::Char('j') => state.scroll_body(1),
        KeyCode::Up | KeyCode::Char('k') => state.scroll_body(-1),
        KeyCode::PageDown => state.scroll_body(10),
        KeyCode::PageUp => state.scroll_body(-10),
        KeyCode::Home => state.body_scroll = 0,
        _ => {}
    }
}
