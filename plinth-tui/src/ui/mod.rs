/*!
 * Plinth Console Interface
 * Conservative operator screen for the kiosk appliance
 */

use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};
use tui_input::Input;

use crate::app::{filter_zones, App, Dialog, FocusedPanel};

// Conservative color palette
const BLUE: Color = Color::Rgb(100, 149, 237);
const GRAY: Color = Color::Rgb(128, 128, 128);
const WHITE: Color = Color::Rgb(255, 255, 255);
const GREEN: Color = Color::Rgb(34, 139, 34);
const RED: Color = Color::Rgb(220, 20, 60);
const AMBER: Color = Color::Rgb(218, 165, 32);

pub fn render_ui(f: &mut Frame, app: &App) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(10),   // Panels
            Constraint::Length(3), // Messages / key help
        ])
        .split(f.area());

    render_header(f, rows[0], app);

    let panels = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(40), // Audio devices
            Constraint::Percentage(30), // Appliance controls
            Constraint::Percentage(30), // Media files
        ])
        .split(rows[1]);

    render_devices_panel(f, panels[0], app);
    render_controls_panel(f, panels[1], app);
    render_files_panel(f, panels[2], app);
    render_footer(f, rows[2], app);
    render_dialog(f, app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let bluetooth = match &app.adapter {
        Some(adapter) if adapter.powered => Span::styled("BT on", Style::default().fg(GREEN)),
        Some(_) => Span::styled("BT off", Style::default().fg(GRAY)),
        None => Span::styled("no adapter", Style::default().fg(RED)),
    };
    let clock = app
        .clock
        .as_ref()
        .map(|clock| format!("{}  {}", clock.local_time, clock.timezone))
        .unwrap_or_else(|| "clock unavailable".to_string());

    let line = Line::from(vec![
        Span::styled(
            "PLINTH CONSOLE",
            Style::default().fg(WHITE).add_modifier(Modifier::BOLD),
        ),
        Span::raw("   "),
        bluetooth,
        Span::raw("   "),
        Span::styled(clock, Style::default().fg(GRAY)),
    ]);

    let header = Paragraph::new(line)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(GRAY)),
        )
        .alignment(Alignment::Left);

    f.render_widget(header, area);
}

fn render_devices_panel(f: &mut Frame, area: Rect, app: &App) {
    let border_style = if matches!(app.focused_panel, FocusedPanel::Devices) {
        Style::default().fg(BLUE)
    } else {
        Style::default().fg(GRAY)
    };

    let scanning = app.scan.as_ref().map_or(false, |scan| scan.active);
    let mut items = Vec::new();
    let mut row = 0usize;

    if let Some(scan) = &app.scan {
        if scan.active {
            let mut spans = vec![Span::styled("● scanning", Style::default().fg(GREEN))];
            if scan.classic.abandoned {
                spans.push(Span::styled("  classic ✗", Style::default().fg(RED)));
            } else if scan.classic.retries > 0 {
                spans.push(Span::styled(
                    format!("  classic retry {}", scan.classic.retries),
                    Style::default().fg(AMBER),
                ));
            }
            if scan.le.abandoned {
                spans.push(Span::styled("  ble ✗", Style::default().fg(RED)));
            } else if scan.le.retries > 0 {
                spans.push(Span::styled(
                    format!("  ble retry {}", scan.le.retries),
                    Style::default().fg(AMBER),
                ));
            }
            items.push(ListItem::new(Line::from(spans)));
            items.push(ListItem::new(Line::from("")));
        }
    }

    items.push(ListItem::new(Line::from(vec![Span::styled(
        "━ Discovered ━",
        Style::default().fg(BLUE).add_modifier(Modifier::BOLD),
    )])));

    let discovered = app.scan.as_ref().map(|scan| &scan.devices);
    match discovered {
        Some(devices) if !devices.is_empty() => {
            for device in devices {
                let selected = app.selected_device == row;
                let prefix = if selected { "▶ " } else { "  " };
                let name = device.name.as_deref().unwrap_or("Unknown");
                let content = Line::from(vec![
                    Span::raw(prefix),
                    Span::styled(
                        format!("[{}] ", device.source.label()),
                        Style::default().fg(BLUE),
                    ),
                    Span::styled(name.to_string(), Style::default().fg(WHITE)),
                    Span::styled(
                        format!("  {}", device.address),
                        Style::default().fg(GRAY),
                    ),
                    Span::styled(
                        format!("  ({})", device.matched_rule),
                        Style::default().fg(AMBER),
                    ),
                ]);
                let item = if selected {
                    ListItem::new(content).style(Style::default().bg(BLUE).fg(WHITE))
                } else {
                    ListItem::new(content)
                };
                items.push(item);
                row += 1;
            }
        }
        _ => {
            let hint = if scanning { "  searching..." } else { "  none" };
            items.push(ListItem::new(Line::from(Span::styled(
                hint,
                Style::default().fg(GRAY),
            ))));
        }
    }

    items.push(ListItem::new(Line::from("")));
    items.push(ListItem::new(Line::from(vec![Span::styled(
        "━ Paired ━",
        Style::default().fg(BLUE).add_modifier(Modifier::BOLD),
    )])));

    if app.bonded.is_empty() {
        items.push(ListItem::new(Line::from(Span::styled(
            "  none",
            Style::default().fg(GRAY),
        ))));
    } else {
        for device in &app.bonded {
            let selected = app.selected_device == row;
            let prefix = if selected { "▶ " } else { "  " };
            let indicator = if device.connected { "●" } else { "○" };
            let indicator_color = if device.connected { GREEN } else { GRAY };
            let content = Line::from(vec![
                Span::raw(prefix),
                Span::styled(indicator, Style::default().fg(indicator_color)),
                Span::raw(" "),
                Span::styled(device.name.clone(), Style::default().fg(WHITE)),
                Span::styled(
                    format!("  {}", device.address),
                    Style::default().fg(GRAY),
                ),
            ]);
            let item = if selected {
                ListItem::new(content).style(Style::default().bg(BLUE).fg(WHITE))
            } else {
                ListItem::new(content)
            };
            items.push(item);
            row += 1;
        }
    }

    let title = if scanning {
        "Audio Devices [scanning]"
    } else {
        "Audio Devices"
    };
    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(border_style),
    );

    f.render_widget(list, area);
}

fn render_controls_panel(f: &mut Frame, area: Rect, app: &App) {
    let border_style = if matches!(app.focused_panel, FocusedPanel::Controls) {
        Style::default().fg(BLUE)
    } else {
        Style::default().fg(GRAY)
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .title("Controls")
        .border_style(border_style);
    f.render_widget(block, area);

    let sections = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Min(5),    // Bluetooth
            Constraint::Length(2), // Brightness gauge
            Constraint::Min(5),    // Clock
        ])
        .split(area);

    let bluetooth = match &app.adapter {
        Some(adapter) => vec![
            Line::from(Span::styled(
                "Bluetooth",
                Style::default().fg(WHITE).add_modifier(Modifier::BOLD),
            )),
            Line::from(vec![
                Span::styled("Adapter: ", Style::default().fg(GRAY)),
                Span::styled(
                    format!("{} ({})", adapter.adapter, adapter.address),
                    Style::default().fg(WHITE),
                ),
            ]),
            Line::from(vec![
                Span::styled("Power:   ", Style::default().fg(GRAY)),
                if adapter.powered {
                    Span::styled("on", Style::default().fg(GREEN))
                } else {
                    Span::styled("off", Style::default().fg(GRAY))
                },
            ]),
            Line::from(vec![
                Span::styled("Radio:   ", Style::default().fg(GRAY)),
                Span::styled(
                    if adapter.discovering { "discovering" } else { "idle" },
                    Style::default().fg(WHITE),
                ),
            ]),
        ],
        None => vec![
            Line::from(Span::styled(
                "Bluetooth",
                Style::default().fg(WHITE).add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled(
                "No adapter found",
                Style::default().fg(RED),
            )),
        ],
    };
    f.render_widget(Paragraph::new(bluetooth), sections[0]);

    let level = app
        .brightness
        .as_ref()
        .map_or(1.0, |status| status.level)
        .clamp(0.0, 1.0);
    let label = match &app.brightness {
        Some(status) if status.backlight.is_none() => {
            format!("{:.0}% (no backlight)", status.level * 100.0)
        }
        Some(status) => format!("{:.0}%", status.level * 100.0),
        None => "unknown".to_string(),
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::TOP).title("Brightness"))
        .gauge_style(Style::default().fg(BLUE))
        .label(label)
        .ratio(level as f64);
    f.render_widget(gauge, sections[1]);

    let clock = match &app.clock {
        Some(clock) => vec![
            Line::from(Span::styled(
                "Clock",
                Style::default().fg(WHITE).add_modifier(Modifier::BOLD),
            )),
            Line::from(vec![
                Span::styled("Time: ", Style::default().fg(GRAY)),
                Span::styled(clock.local_time.clone(), Style::default().fg(WHITE)),
            ]),
            Line::from(vec![
                Span::styled("Zone: ", Style::default().fg(GRAY)),
                Span::styled(clock.timezone.clone(), Style::default().fg(WHITE)),
            ]),
            Line::from(vec![
                Span::styled("NTP:  ", Style::default().fg(GRAY)),
                if clock.ntp_synchronized {
                    Span::styled("synchronized", Style::default().fg(GREEN))
                } else {
                    Span::styled("not synchronized", Style::default().fg(GRAY))
                },
            ]),
        ],
        None => vec![
            Line::from(Span::styled(
                "Clock",
                Style::default().fg(WHITE).add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled("unavailable", Style::default().fg(GRAY))),
        ],
    };
    f.render_widget(
        Paragraph::new(clock).block(Block::default().borders(Borders::TOP)),
        sections[2],
    );
}

fn render_files_panel(f: &mut Frame, area: Rect, app: &App) {
    let border_style = if matches!(app.focused_panel, FocusedPanel::Files) {
        Style::default().fg(BLUE)
    } else {
        Style::default().fg(GRAY)
    };

    let mut items = vec![
        ListItem::new(Line::from(Span::styled(
            app.media_dir.clone(),
            Style::default().fg(GRAY),
        ))),
        ListItem::new(Line::from("")),
    ];

    if app.files.is_empty() {
        items.push(ListItem::new(Line::from(Span::styled(
            "  (empty)",
            Style::default().fg(GRAY),
        ))));
    } else {
        for (i, name) in app.files.iter().enumerate() {
            let selected = i == app.selected_file;
            let prefix = if selected { "▶ " } else { "  " };
            let content = Line::from(vec![
                Span::raw(prefix),
                Span::styled(name.clone(), Style::default().fg(WHITE)),
            ]);
            let item = if selected {
                ListItem::new(content).style(Style::default().bg(BLUE).fg(WHITE))
            } else {
                ListItem::new(content)
            };
            items.push(item);
        }
    }

    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Media Files")
            .border_style(border_style),
    );

    f.render_widget(list, area);
}

fn render_footer(f: &mut Frame, area: Rect, app: &App) {
    let line = match &app.message {
        Some(message) => Line::from(Span::styled(
            message.clone(),
            Style::default().fg(AMBER),
        )),
        None => Line::from(Span::styled(
            "[Tab] panel  [↑↓] select  [s] scan  [p] pair  [f] forget  [b] power  [+/-] brightness  [w] write  [Enter] open  [t] time  [z] zone  [r] refresh  [q] quit",
            Style::default().fg(GRAY),
        )),
    };

    let footer = Paragraph::new(line).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(GRAY)),
    );

    f.render_widget(footer, area);
}

fn render_dialog(f: &mut Frame, app: &App) {
    match &app.dialog {
        Dialog::None => {}
        Dialog::WriteFile {
            name,
            content,
            editing_content,
        } => {
            let area = centered_rect(f.area(), 60, 8);
            f.render_widget(Clear, area);
            f.render_widget(
                Block::default()
                    .borders(Borders::ALL)
                    .title("Write File")
                    .border_style(Style::default().fg(BLUE)),
                area,
            );
            let rows = Layout::default()
                .direction(Direction::Vertical)
                .margin(1)
                .constraints([
                    Constraint::Length(2),
                    Constraint::Length(2),
                    Constraint::Min(1),
                ])
                .split(area);
            render_input_line(f, rows[0], "Name", name, !editing_content);
            render_input_line(f, rows[1], "Content", content, *editing_content);
            f.render_widget(
                Paragraph::new(Line::from(Span::styled(
                    "[Tab] field  [Enter] save  [Esc] cancel",
                    Style::default().fg(GRAY),
                ))),
                rows[2],
            );
        }
        Dialog::SetDateTime {
            date,
            time,
            editing_time,
        } => {
            let area = centered_rect(f.area(), 40, 8);
            f.render_widget(Clear, area);
            f.render_widget(
                Block::default()
                    .borders(Borders::ALL)
                    .title("Set Date and Time")
                    .border_style(Style::default().fg(BLUE)),
                area,
            );
            let rows = Layout::default()
                .direction(Direction::Vertical)
                .margin(1)
                .constraints([
                    Constraint::Length(2),
                    Constraint::Length(2),
                    Constraint::Min(1),
                ])
                .split(area);
            render_input_line(f, rows[0], "Date (YYYY-MM-DD)", date, !editing_time);
            render_input_line(f, rows[1], "Time (HH:MM)", time, *editing_time);
            f.render_widget(
                Paragraph::new(Line::from(Span::styled(
                    "[Tab] field  [Enter] apply  [Esc] cancel",
                    Style::default().fg(GRAY),
                ))),
                rows[2],
            );
        }
        Dialog::Timezones {
            filter,
            zones,
            selected,
        } => {
            let area = centered_rect(f.area(), 50, 20);
            f.render_widget(Clear, area);
            f.render_widget(
                Block::default()
                    .borders(Borders::ALL)
                    .title("Timezone")
                    .border_style(Style::default().fg(BLUE)),
                area,
            );
            let rows = Layout::default()
                .direction(Direction::Vertical)
                .margin(1)
                .constraints([
                    Constraint::Length(2),
                    Constraint::Min(1),
                    Constraint::Length(1),
                ])
                .split(area);
            render_input_line(f, rows[0], "Filter", filter, true);

            let filtered = filter_zones(zones, filter.value());
            let items: Vec<ListItem> = filtered
                .iter()
                .map(|zone| ListItem::new(zone.as_str()))
                .collect();
            let mut state = ListState::default().with_selected(if filtered.is_empty() {
                None
            } else {
                Some((*selected).min(filtered.len() - 1))
            });
            let list = List::new(items)
                .highlight_style(Style::default().bg(BLUE).fg(WHITE))
                .highlight_symbol("▶ ");
            f.render_stateful_widget(list, rows[1], &mut state);

            f.render_widget(
                Paragraph::new(Line::from(Span::styled(
                    "[↑↓] choose  [Enter] set  [Esc] cancel",
                    Style::default().fg(GRAY),
                ))),
                rows[2],
            );
        }
        Dialog::ViewFile { name, content } => {
            let height = (f.area().height * 7 / 10).max(5);
            let area = centered_rect(f.area(), 70, height);
            f.render_widget(Clear, area);
            let body = Paragraph::new(content.as_str())
                .wrap(Wrap { trim: false })
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .title(name.clone())
                        .border_style(Style::default().fg(BLUE)),
                );
            f.render_widget(body, area);
        }
    }
}

fn render_input_line(f: &mut Frame, area: Rect, label: &str, input: &Input, active: bool) {
    let value_style = if active {
        Style::default().fg(WHITE)
    } else {
        Style::default().fg(GRAY)
    };
    let line = Line::from(vec![
        Span::styled(format!("{}: ", label), Style::default().fg(GRAY)),
        Span::styled(input.value().to_string(), value_style),
    ]);
    f.render_widget(Paragraph::new(line), area);

    if active {
        let x = area.x + label.len() as u16 + 2 + input.visual_cursor() as u16;
        f.set_cursor_position((x.min(area.right().saturating_sub(1)), area.y));
    }
}

fn centered_rect(area: Rect, percent_x: u16, height: u16) -> Rect {
    let width = (area.width as u32 * percent_x as u32 / 100) as u16;
    let width = width.max(20).min(area.width);
    let x = area.x + area.width.saturating_sub(width) / 2;
    let y = area.y + area.height.saturating_sub(height) / 2;
    Rect::new(x, y, width, height.min(area.height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centered_rect_stays_inside_very_wide_terminals() {
        let area = Rect::new(0, 0, 2000, 50);
        let popup = centered_rect(area, 70, 12);
        assert_eq!(popup.width, 1400);
        assert!(popup.right() <= area.right());
        assert!(popup.bottom() <= area.bottom());
    }

    #[test]
    fn centered_rect_never_outgrows_a_tiny_terminal() {
        let area = Rect::new(0, 0, 12, 4);
        let popup = centered_rect(area, 70, 10);
        assert_eq!(popup.width, area.width);
        assert_eq!(popup.height, area.height);
    }
}
