//! TUI rendering for tasklab using ratatui.

mod input;
mod theme;

pub use input::{InputPump, handle_events};
pub use theme::{Glyphs, Palette, glyphs, palette, spinner_frame, styles};

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Padding, Paragraph, Wrap},
};

use tasklab_engine::{App, LineKind, Trigger};

/// Main draw function
pub fn draw(frame: &mut Frame, app: &App) {
    let options = app.ui_options();
    let palette = palette(options);
    let glyphs = glyphs(options);
    let bg_block = Block::default().style(Style::default().bg(palette.bg_dark));
    frame.render_widget(bg_block, frame.area());

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3), // Buttons
            Constraint::Length(4), // Text fields
            Constraint::Min(1),    // Transcript
            Constraint::Length(1), // Status bar
        ])
        .split(frame.area());

    draw_buttons(frame, app, chunks[0], &palette, &glyphs);
    draw_fields(frame, app, chunks[1], &palette);
    draw_transcript(frame, app, chunks[2], &palette, &glyphs);
    draw_status_bar(frame, app, chunks[3], &palette, &glyphs);
}

fn panel<'a>(title: &'a str, palette: &Palette) -> Block<'a> {
    Block::default()
        .title(Span::styled(
            format!(" {title} "),
            Style::default()
                .fg(palette.text_secondary)
                .add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(palette.bg_border))
        .style(Style::default().bg(palette.bg_dark))
}

fn draw_buttons(frame: &mut Frame, app: &App, area: Rect, palette: &Palette, glyphs: &Glyphs) {
    let selected = app.selected();
    let mut spans = Vec::with_capacity(Trigger::ALL.len() * 2);
    for trigger in Trigger::ALL {
        let (style, lead) = if trigger == selected {
            (styles::button_selected(palette), glyphs.selected)
        } else {
            (styles::button(palette), " ")
        };
        spans.push(Span::styled(
            format!("{lead}{} {} ", trigger.hotkey(), trigger.label()),
            style,
        ));
        spans.push(Span::raw(" "));
    }

    let buttons = Paragraph::new(Line::from(spans))
        .block(panel("Demos", palette))
        .wrap(Wrap { trim: false });
    frame.render_widget(buttons, area);
}

fn draw_fields(frame: &mut Frame, app: &App, area: Rect, palette: &Palette) {
    let counter = app.counter().to_string();
    let lines = vec![
        Line::from(vec![
            Span::styled("counter       ", styles::field_label(palette)),
            Span::styled(counter, styles::field_value(palette)),
        ]),
        Line::from(vec![
            Span::styled("async result  ", styles::field_label(palette)),
            Span::styled(app.async_result().to_string(), styles::field_value(palette)),
        ]),
    ];

    let fields = Paragraph::new(lines).block(panel("Fields", palette).padding(Padding::horizontal(1)));
    frame.render_widget(fields, area);
}

fn draw_transcript(frame: &mut Frame, app: &App, area: Rect, palette: &Palette, glyphs: &Glyphs) {
    let block = panel("Transcript", palette);
    let visible = usize::from(block.inner(area).height);

    // Newest lines at the bottom; no wrapping so the tail always fits.
    let skip = app.transcript().len().saturating_sub(visible);
    let lines: Vec<Line> = app
        .transcript()
        .skip(skip)
        .map(|line| match line.kind {
            LineKind::Print => Line::from(vec![
                Span::styled(format!("{} ", glyphs.marker), Style::default().fg(palette.marker)),
                Span::styled(
                    line.text.clone(),
                    Style::default()
                        .fg(palette.marker)
                        .add_modifier(Modifier::BOLD),
                ),
            ]),
            LineKind::Field => Line::from(vec![
                Span::styled(format!("{} ", glyphs.bullet), Style::default().fg(palette.field)),
                Span::styled(line.text.clone(), Style::default().fg(palette.field)),
            ]),
            LineKind::Log => Line::from(Span::styled(
                format!("  {}", line.text),
                Style::default().fg(palette.text_secondary),
            )),
        })
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

pub(crate) fn draw_status_bar(
    frame: &mut Frame,
    app: &App,
    area: Rect,
    palette: &Palette,
    glyphs: &Glyphs,
) {
    let live = app.active_tasks();
    let (status_text, status_style) = if live > 0 {
        let spinner = spinner_frame(app.tick_count(), app.ui_options());
        let noun = if live == 1 { "task" } else { "tasks" };
        (
            format!("{spinner} {live} {noun} running"),
            Style::default().fg(palette.busy),
        )
    } else {
        (
            format!("{} idle", glyphs.status_ready),
            Style::default().fg(palette.idle),
        )
    };

    let sep = format!(" {} ", glyphs.separator);
    let status = Paragraph::new(Line::from(vec![
        Span::raw(" "),
        Span::styled(status_text, status_style),
        Span::styled(sep, styles::key_hint(palette)),
        Span::styled("1-7", styles::key_highlight(palette)),
        Span::styled(" run  ", styles::key_hint(palette)),
        Span::styled("←/→", styles::key_highlight(palette)),
        Span::styled(" select  ", styles::key_hint(palette)),
        Span::styled("Enter", styles::key_highlight(palette)),
        Span::styled(" run selected  ", styles::key_hint(palette)),
        Span::styled("q", styles::key_highlight(palette)),
        Span::styled(" quit ", styles::key_hint(palette)),
    ]));
    frame.render_widget(status, area);
}
