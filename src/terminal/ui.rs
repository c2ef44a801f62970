use ratatui::{
    Frame,
    layout::{Constraint, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
};

use crate::terminal::state::{AppState, Focus, ViewMode};

const KEYS: [(&str, &str); 9] = [
    ("j/k", "move"),
    ("Enter", "open"),
    ("Tab", "focus"),
    ("n", "next page"),
    ("g", "first page"),
    ("d", "delete"),
    ("r", "auto-refresh"),
    ("s", "service"),
    ("q", "quit"),
];

fn border(focused: bool) -> Style {
    Style::default().fg(if focused { Color::Yellow } else { Color::DarkGray })
}

pub fn render(f: &mut Frame, state: &AppState) {
    let [main, footer] = Layout::vertical([Constraint::Min(0), Constraint::Length(1)]).areas(f.area());

    let split = state.mode == ViewMode::Split;
    let [left, right] = if split {
        Layout::horizontal([Constraint::Percentage(35), Constraint::Percentage(65)]).areas(main)
    } else {
        Layout::horizontal([Constraint::Percentage(100), Constraint::Percentage(0)]).areas(main)
    };

    // LEFT: list
    let more = if state.has_more { "+" } else { "" };
    let auto = if state.auto_refresh { ", auto" } else { "" };
    let list_block = Block::default()
        .title(format!(
            " {} (page {}{more}{auto}) ",
            state.service.label(),
            state.page + 1
        ))
        .borders(Borders::ALL)
        .border_style(border(state.focus == Focus::List));

    let items: Vec<ListItem> = state
        .items
        .iter()
        .map(|summary| {
            let entry = summary.list_entry();
            let mut title_style = Style::default().add_modifier(Modifier::BOLD);
            if entry.unread {
                title_style = title_style.fg(Color::Cyan);
            }
            let title = Span::styled(entry.title, title_style);
            let detail = Span::styled(entry.detail, Style::default().fg(Color::Gray));
            ListItem::new(Text::from(vec![Line::from(title), Line::from(detail)]))
        })
        .collect();

    let list = List::new(items)
        .block(list_block)
        .highlight_symbol("➜ ")
        .highlight_style(Style::default().fg(Color::Green));

    f.render_stateful_widget(list, left, &mut state.list_state.clone());

    // RIGHT: rendered message, shown verbatim
    if split {
        let body_block = Block::default()
            .title(" Message ")
            .borders(Borders::ALL)
            .border_style(border(state.focus == Focus::Body));

        let body_text = state.body.clone().unwrap_or_default();
        let p = Paragraph::new(body_text)
            .block(body_block)
            .wrap(Wrap { trim: false })
            .scroll((state.body_scroll, 0));
        f.render_widget(p, right);
    }

    let line = match &state.status {
        Some(status) => Line::from(Span::styled(
            status.clone(),
            Style::default().fg(Color::Red),
        )),
        None => Line::from(
            KEYS.iter()
                .flat_map(|(key, what)| {
                    [
                        Span::styled(*key, Style::default().add_modifier(Modifier::BOLD)),
                        Span::raw(format!(" {what}  ")),
                    ]
                })
                .collect::<Vec<_>>(),
        ),
    };
    f.render_widget(Paragraph::new(line), footer);
}
