use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};

use crate::metrics::format_compact;
use crate::scale::{LegendEntry, MISSING};
use crate::state::AppState;

fn value_text(value: Option<f64>) -> String {
    value.filter(|v| v.is_finite()).map(format_compact).unwrap_or_else(|| "no data".to_string())
}

fn rgb(hex: &str) -> Color {
    let channel = |i: usize| hex.get(i..i + 2).and_then(|s| u8::from_str_radix(s, 16).ok()).unwrap_or(0);
    Color::Rgb(channel(1), channel(3), channel(5))
}

fn legend_line(entry: &LegendEntry) -> Line<'static> {
    let range = match (entry.from, entry.to) {
        (None, Some(to)) => format!("< {}", format_compact(to)),
        (Some(from), Some(to)) => format!("{} – {}", format_compact(from), format_compact(to)),
        (Some(from), None) => format!("≥ {}", format_compact(from)),
        (None, None) => String::new(),
    };
    Line::from(vec![Span::styled("██ ", Style::default().fg(rgb(&entry.color))), Span::raw(range)])
}

pub fn draw(f: &mut Frame, state: &mut AppState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(22), Constraint::Percentage(56), Constraint::Percentage(22)])
        .split(f.area());

    // Ranking
    let mut title = state.region_name().to_string();
    if let Some(y) = state.shown_year {
        title.push_str(&format!(" · {y}"));
    }
    if let Some(v) = &state.shown_vintage {
        title.push_str(&format!(" ({v})"));
    }
    let block = Block::default().borders(Borders::ALL).title(title);
    if let Some(err) = &state.table_error {
        let p = Paragraph::new(err.as_str())
            .block(block)
            .style(Style::default().fg(Color::Red))
            .wrap(Wrap { trim: true });
        f.render_widget(p, chunks[0]);
    } else if state.rows.is_empty() {
        let msg = if state.loading { "Loading…" } else { "No data for this selection" };
        f.render_widget(Paragraph::new(msg).block(block), chunks[0]);
    } else {
        let items: Vec<ListItem> = state
            .ranked
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let mut item = ListItem::new(format!("{:>3}. {}  {}", i + 1, row.country, value_text(row.value)));
                if state.selected.as_deref() == Some(row.iso3.as_str()) {
                    item = item.style(Style::default().add_modifier(Modifier::BOLD));
                }
                item
            })
            .collect();
        let mut list_state = ListState::default();
        list_state.select(Some(state.cursor));
        let list = List::new(items)
            .block(block)
            .highlight_symbol(">> ")
            .highlight_style(Style::default().fg(Color::Red));
        f.render_stateful_widget(list, chunks[0], &mut list_state);
    }

    // Map
    let mut map_title = state.indicator_label().to_string();
    if state.loading {
        map_title.push_str(" (loading)");
    }
    match &state.map_error {
        Some(err) => {
            state.map_area = None;
            let p = Paragraph::new(err.as_str())
                .block(Block::default().borders(Borders::ALL).title(map_title))
                .style(Style::default().fg(Color::Red))
                .wrap(Wrap { trim: true });
            f.render_widget(p, chunks[1]);
        }
        None => {
            state.map_area = Some(chunks[1]);
            let colors = state.feature_colors();
            let highlight = state.highlighted();
            state.map.render(f, chunks[1], &map_title, &colors, &highlight);
        }
    }

    // Detail, legend, help
    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(30), Constraint::Percentage(25)])
        .split(chunks[2]);

    let mut lines: Vec<Line> = Vec::new();
    match state.detail() {
        Some(d) => {
            lines.push(Line::styled(d.row.country.clone(), Style::default().add_modifier(Modifier::BOLD)));
            lines.push(Line::raw(format!("Value: {}", value_text(d.row.value))));
            if let Some(rank) = d.rank {
                lines.push(Line::raw(format!("Rank: {rank} of {}", d.of)));
            }
            if let Some(share) = d.share {
                lines.push(Line::raw(format!("Share: {share:.2}%")));
            }
            if let Some(err) = &state.series_error {
                lines.push(Line::styled(err.clone(), Style::default().fg(Color::Red)));
            }
            for p in state.series.iter().rev().take(5) {
                let change = match p.delta_pct {
                    Some(pct) => format!("{pct:+.1}%"),
                    None => "–".to_string(),
                };
                lines.push(Line::raw(format!("{}: {} ({change})", p.year, value_text(p.value))));
            }
        }
        None => {
            lines.push(Line::raw("Select a country to see details"));
            lines.push(Line::raw(format!(
                "{} of {} map features matched",
                state.matched_features(),
                state.map.feature_count()
            )));
        }
    }
    let detail = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Detail"))
        .wrap(Wrap { trim: true });
    f.render_widget(detail, right[0]);

    let mut legend: Vec<Line> = state.scale.legend().iter().map(legend_line).collect();
    legend.push(Line::from(vec![
        Span::styled("██ ", Style::default().fg(Color::Rgb(MISSING[0], MISSING[1], MISSING[2]))),
        Span::raw("no data"),
    ]));
    let legend = Paragraph::new(legend).block(Block::default().borders(Borders::ALL).title("Legend"));
    f.render_widget(legend, right[1]);

    let help = Paragraph::new(AppState::HELP_TEXT)
        .block(Block::default().borders(Borders::ALL).title("Keys"))
        .wrap(Wrap { trim: true });
    f.render_widget(help, right[2]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legend_colours_parse_back() {
        assert_eq!(rgb("#08519c"), Color::Rgb(0x08, 0x51, 0x9c));
        assert_eq!(value_text(None), "no data");
        assert_eq!(value_text(Some(f64::NAN)), "no data");
    }
}
