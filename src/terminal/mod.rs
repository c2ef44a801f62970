pub mod events;
pub mod state;
pub mod ui;

use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{self, Event, KeyEventKind};
use ratatui::DefaultTerminal;

use crate::session::Session;
use state::AppState;

/// Upper bound on how long the loop waits for a key before ticking.
const TICK_RATE: Duration = Duration::from_millis(250);

pub fn run_tui(session: &mut Session) -> Result<()> {
    let mut state = AppState::new(session.service());
    let loaded = state.first_page(session);
    state.report(loaded);

    let mut terminal = ratatui::init();
    let result = run(&mut terminal, &mut state, session);
    ratatui::restore();

    result
}

fn run(terminal: &mut DefaultTerminal, state: &mut AppState, session: &mut Session) -> Result<()> {
    loop {
        terminal.draw(|f| ui::render(f, state))?;
        if event::poll(TICK_RATE)?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
            && events::handle_key(key, state, session)
        {
            break;
        }
        let refreshed = state.tick(session, Instant::now());
        state.report(refreshed);
    }
    Ok(())
}
