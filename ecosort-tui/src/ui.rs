use chrono::Local;
use ecosort_core::{
    model::{BinState, WasteClass},
    source::ChannelStatus,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};

use crate::app::App;

pub(crate) fn draw(frame: &mut Frame<'_>, app: &App) {
    let area = frame.area();

    // Outer layout: title, main content, status line
    let layout_chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(area);

    let chunks = layout_chunks.as_ref();
    let [header_area, content_area, status_area] = chunks else {
        return;
    };

    draw_header(frame, app, *header_area);

    let content_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(*content_area);
    let [left_area, mapping_area] = content_chunks.as_ref() else {
        return;
    };

    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(6), Constraint::Length(6)])
        .split(*left_area);
    let [bins_area, detections_area] = left_chunks.as_ref() else {
        return;
    };

    draw_bins(frame, app, *bins_area);
    draw_detections(frame, app, *detections_area);
    draw_mapping(frame, app, *mapping_area);

    // Status bar
    let nav_hint = "↑/↓ select class · 1-9 assign bin · Esc clear · q/Ctrl-C quit";
    let (status_text, status_style) = match &app.error_message {
        Some(msg) => (format!("{msg} · {nav_hint}"), Style::default().fg(Color::Red)),
        None => (nav_hint.to_owned(), Style::default()),
    };

    let status = Paragraph::new(status_text)
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .style(status_style)
        .wrap(Wrap { trim: true });

    frame.render_widget(status, *status_area);
}

fn draw_header(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let health = if app.verified {
        Span::styled("healthy", Style::default().fg(Color::Green))
    } else {
        Span::styled("unverified", Style::default().fg(Color::Yellow))
    };

    let push = if app.feeds.push {
        Span::styled(
            format!("push {}", app.channel),
            Style::default().fg(channel_color(&app.channel)),
        )
    } else {
        Span::raw("push off")
    };

    let poll = if app.feeds.poll {
        format!("poll every {} ms", app.feeds.poll_interval.as_millis())
    } else {
        "poll off".to_owned()
    };

    let line = Line::from(vec![
        Span::raw(format!("Backend {} (", app.endpoint)),
        health,
        Span::raw(") · "),
        push,
        Span::raw(format!(" · {poll}")),
    ]);

    let header = Paragraph::new(line)
        .block(Block::default().borders(Borders::ALL).title("EcoSort – waste sorting kiosk"));
    frame.render_widget(header, area);
}

fn draw_bins(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let bins = app.board.bins();
    if bins.is_empty() {
        return;
    }

    let share = u32::try_from(bins.len()).unwrap_or(u32::MAX);
    let bin_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(vec![Constraint::Ratio(1, share); bins.len()])
        .split(area);

    for (bin, bin_area) in bins.iter().zip(bin_chunks.iter()) {
        frame.render_widget(bin_widget(app, bin), *bin_area);
    }
}

fn bin_widget(app: &App, bin: &BinState) -> Paragraph<'static> {
    let (state_label, border_style) = if bin.is_open {
        (
            Span::styled(
                "OPEN",
                Style::default()
                    .fg(Color::Green)
                    .add_modifier(Modifier::BOLD),
            ),
            Style::default().fg(Color::Green),
        )
    } else {
        (
            Span::styled("closed", Style::default().fg(Color::DarkGray)),
            Style::default(),
        )
    };

    let mut lines = vec![Line::from(state_label), Line::default()];
    let classes = app.mapping.classes_for(bin.index);
    if classes.is_empty() {
        lines.push(Line::styled("(no classes)", Style::default().fg(Color::DarkGray)));
    } else {
        lines.extend(classes.into_iter().map(|class| {
            Line::styled(class_label(class), Style::default().fg(class_color(class)))
        }));
    }

    Paragraph::new(lines)
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border_style)
                .title(format!("Bin {}", bin.index.0 + 1)),
        )
        .wrap(Wrap { trim: true })
}

fn draw_detections(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let frame_line = match app.frame_bytes {
        Some(bytes) => format!("Camera frame: {} KiB", bytes.div_ceil(1024)),
        None => "Camera frame: none yet".to_owned(),
    };

    let detection_line = match &app.last_batch {
        Some(batch) => {
            let at = batch.received_at.with_timezone(&Local).format("%H:%M:%S");
            let detections = batch
                .detections
                .iter()
                .map(|det| format!("{} {:.0}%", det.class, det.confidence * 100.0))
                .collect::<Vec<_>>()
                .join(", ");
            format!("Last detections ({} feed, {at}): {detections}", batch.feed)
        }
        None => "No detections yet.".to_owned(),
    };

    let paragraph = Paragraph::new(vec![Line::raw(detection_line), Line::raw(frame_line)])
        .block(Block::default().borders(Borders::ALL).title("Detections"))
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, area);
}

fn draw_mapping(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let items = WasteClass::ALL
        .iter()
        .map(|class| {
            let bin = app
                .mapping
                .bin_for(*class)
                .map_or_else(|| "unassigned".to_owned(), |bin| format!("bin {}", bin.0 + 1));
            ListItem::new(format!("{:<12} → {bin}", class_label(*class)))
                .style(Style::default().fg(class_color(*class)))
        })
        .collect::<Vec<ListItem<'_>>>();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Mapping (↑/↓, 1-9)"),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::REVERSED),
        );

    let mut state = ListState::default();
    state.select(Some(app.class_list_index));
    frame.render_stateful_widget(list, area, &mut state);
}

fn class_label(class: WasteClass) -> &'static str {
    match class {
        WasteClass::Plastic => "Plastic",
        WasteClass::Glass => "Glass",
        WasteClass::Metal => "Metal",
        WasteClass::Paper => "Paper",
        WasteClass::Cardboard => "Cardboard",
        WasteClass::Biological => "Biological",
    }
}

fn class_color(class: WasteClass) -> Color {
    match class {
        WasteClass::Plastic => Color::Yellow,
        WasteClass::Glass => Color::Cyan,
        WasteClass::Metal => Color::LightBlue,
        WasteClass::Paper => Color::Blue,
        WasteClass::Cardboard => Color::LightRed,
        WasteClass::Biological => Color::Green,
    }
}

fn channel_color(status: &ChannelStatus) -> Color {
    match status {
        ChannelStatus::Connected => Color::Green,
        ChannelStatus::Connecting => Color::Yellow,
        ChannelStatus::Idle => Color::Gray,
        ChannelStatus::Disconnected(_) => Color::Red,
    }
}
