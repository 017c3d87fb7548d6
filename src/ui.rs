use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Margin, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Bar, BarChart, BarGroup, Block, BorderType, Borders, Cell, Clear, List, ListItem, ListState, Paragraph,
    Row, Table, Wrap,
};

use crate::app::{App, ChartView, Focus, LoginField, MAX_LOGIN_ATTEMPTS, Mode};
use crate::dates::format_clock;
use crate::models::TimerStatus;
use crate::timer::Clock;

const SERIES_COLORS: [Color; 6] = [
    Color::Rgb(90, 180, 255),
    Color::Rgb(255, 210, 120),
    Color::Rgb(120, 220, 140),
    Color::Rgb(255, 120, 120),
    Color::Rgb(190, 150, 255),
    Color::Rgb(120, 220, 220),
];

pub fn draw<C: Clock>(frame: &mut Frame, app: &mut App<C>) {
    let size = frame.area();
    let theme = Theme::midnight();
    draw_background(frame, size, &theme);

    match app.mode {
        Mode::Charts => draw_charts(frame, app, size, &theme),
        Mode::Today => draw_today(frame, app, size, &theme),
        _ => draw_dashboard(frame, app, size, &theme),
    }

    match app.mode {
        Mode::Manage => draw_manage(frame, app, size, &theme),
        Mode::Login => draw_login(frame, app, size, &theme),
        Mode::BackupPrompt => draw_backup_prompt(frame, app, size, &theme),
        Mode::ClosePrompt => draw_prompt(
            frame,
            size,
            "Unsaved Session",
            &[
                "A session is still open.",
                "",
                "s  save and quit",
                "d  discard and quit",
                "c  cancel",
            ],
            &theme,
        ),
        Mode::Report => draw_report(frame, app, size, &theme),
        Mode::Dashboard | Mode::Charts | Mode::Today => {}
    }

    if !app.show_help {
        if let Some(toast) = app.active_toast() {
            draw_toast(frame, size, &toast.message, toast.is_error, &theme);
        }
    }

    if app.show_help {
        draw_help(frame, size, &theme);
    }
}

fn draw_dashboard<C: Clock>(frame: &mut Frame, app: &mut App<C>, area: Rect, theme: &Theme) {
    let content = area.inner(Margin {
        vertical: 1,
        horizontal: 2,
    });

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(7),
            Constraint::Min(0),
            Constraint::Length(2),
        ])
        .split(content);

    let header_block = Paragraph::new(header_line(app, theme))
        .alignment(Alignment::Left)
        .block(
            Block::default()
                .borders(Borders::BOTTOM)
                .border_style(theme.border_style())
                .style(theme.panel_style()),
        );
    frame.render_widget(header_block, chunks[0]);

    draw_timer_panel(frame, app, chunks[1], theme);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(chunks[2]);
    draw_catalog_lists(frame, app, body[0], body[1], theme);

    let footer_block = Paragraph::new(footer_line(app, theme))
        .alignment(Alignment::Left)
        .block(
            Block::default()
                .borders(Borders::TOP)
                .border_style(theme.border_style())
                .style(theme.panel_style()),
        );
    frame.render_widget(footer_block, chunks[3]);
}

fn draw_timer_panel<C: Clock>(frame: &mut Frame, app: &App<C>, area: Rect, theme: &Theme) {
    let timer = app.timer();
    let status = timer.status();
    let status_style = match status {
        TimerStatus::Running => Style::default().fg(theme.success).add_modifier(Modifier::BOLD),
        TimerStatus::Paused => Style::default().fg(theme.highlight).add_modifier(Modifier::BOLD),
        TimerStatus::Stopped => theme.muted_style(),
    };
    let selection = timer
        .selection()
        .map(|(project, package)| {
            format!("{project} / {}", app.config().work_package_label(project, package))
        })
        .unwrap_or_else(|| "No session".to_string());
    let forecast = app
        .forecast_hours
        .map(|hours| format!("{hours:.2}h"))
        .unwrap_or_else(|| "no history".to_string());

    let lines = vec![
        Line::from(Span::styled(
            format_clock(timer.elapsed_secs()),
            Style::default().fg(theme.accent).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(vec![
            Span::styled(status.label(), status_style),
            Span::raw("  "),
            Span::raw(selection),
        ]),
        Line::from(vec![
            Span::styled("Forecast", theme.muted_style()),
            Span::raw(": "),
            Span::raw(forecast),
        ]),
    ];

    let paragraph = Paragraph::new(lines)
        .alignment(Alignment::Center)
        .block(panel_block("Timer", theme));
    frame.render_widget(paragraph, area);
}

fn draw_catalog_lists<C: Clock>(
    frame: &mut Frame,
    app: &mut App<C>,
    left: Rect,
    right: Rect,
    theme: &Theme,
) {
    let active_highlight = Style::default()
        .bg(theme.accent)
        .fg(theme.accent_contrast())
        .add_modifier(Modifier::BOLD);
    let inactive_highlight = Style::default()
        .fg(theme.highlight)
        .add_modifier(Modifier::BOLD);

    let (project_highlight_style, project_highlight_symbol) = match app.focus {
        Focus::Projects => (active_highlight, "▍ "),
        Focus::WorkPackages => (inactive_highlight, "▏ "),
    };
    let (package_highlight_style, package_highlight_symbol) = match app.focus {
        Focus::WorkPackages => (active_highlight, "▍ "),
        Focus::Projects => (inactive_highlight, "▏ "),
    };

    let project_items: Vec<ListItem> = if app.projects().is_empty() {
        vec![ListItem::new(Line::from("No projects")).style(theme.panel_style())]
    } else {
        app.projects()
            .iter()
            .map(|project| {
                let count = app.config().work_packages_for(&project.id).count();
                ListItem::new(Line::from(vec![
                    Span::styled(project.name.clone(), Style::default().add_modifier(Modifier::BOLD)),
                    Span::styled(format!("  {count}"), theme.muted_style()),
                ]))
                .style(theme.panel_style())
            })
            .collect()
    };

    let package_items: Vec<ListItem> = {
        let packages = app.packages();
        if packages.is_empty() {
            vec![ListItem::new(Line::from("No work packages")).style(theme.panel_style())]
        } else {
            packages
                .iter()
                .map(|package| ListItem::new(Line::from(package.name.clone())).style(theme.panel_style()))
                .collect()
        }
    };

    let project_list = List::new(project_items)
        .block(panel_block("Projects", theme))
        .highlight_style(project_highlight_style)
        .highlight_symbol(project_highlight_symbol);
    frame.render_stateful_widget(project_list, left, &mut app.project_state);

    let package_list = List::new(package_items)
        .block(panel_block("Work Packages", theme))
        .highlight_style(package_highlight_style)
        .highlight_symbol(package_highlight_symbol);
    frame.render_stateful_widget(package_list, right, &mut app.package_state);
}

fn header_line<C: Clock>(app: &App<C>, theme: &Theme) -> Line<'static> {
    let account = app
        .connected_as
        .clone()
        .unwrap_or_else(|| "offline".to_string());
    let backup_project = app.config().redmine.backup_project.clone();
    let backup_project = if backup_project.is_empty() {
        "-".to_string()
    } else {
        backup_project
    };
    Line::from(vec![
        Span::styled("Zeiterfassung", theme.title_style()),
        Span::raw("  "),
        Span::styled("Redmine", theme.muted_style()),
        Span::raw(": "),
        Span::styled(account, Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        Span::styled("Backup project", theme.muted_style()),
        Span::raw(": "),
        Span::raw(backup_project),
    ])
}

fn footer_line<C: Clock>(app: &App<C>, theme: &Theme) -> Line<'static> {
    let status = app.visible_status().unwrap_or_default();
    Line::from(vec![
        Span::styled("s start", theme.muted_style()),
        Span::raw(" · "),
        Span::styled("p pause", theme.muted_style()),
        Span::raw(" · "),
        Span::styled("Enter save", theme.muted_style()),
        Span::raw(" · "),
        Span::styled("d discard", theme.muted_style()),
        Span::raw(" · "),
        Span::styled("h help", theme.muted_style()),
        Span::raw(" · "),
        Span::styled("q quit", theme.muted_style()),
        if status.is_empty() {
            Span::raw("")
        } else {
            Span::raw(format!("   |   {status}"))
        },
    ])
}

fn draw_charts<C: Clock>(frame: &mut Frame, app: &mut App<C>, area: Rect, theme: &Theme) {
    let content = area.inner(Margin {
        vertical: 1,
        horizontal: 2,
    });
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(2)])
        .split(content);

    let scope = match app.selected_project() {
        Some(project) if app.chart_project_only => project.name.clone(),
        _ => "All projects".to_string(),
    };
    let (view_label, detail) = match app.chart_view {
        ChartView::Averages => ("Average duration", app.duration_unit.label()),
        ChartView::Frequency => ("Frequency", app.bucket.label()),
    };
    let header = Line::from(vec![
        Span::styled("Charts", theme.title_style()),
        Span::raw("  "),
        Span::styled("View", theme.muted_style()),
        Span::raw(": "),
        Span::styled(view_label, Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(format!(" ({detail})")),
        Span::raw("  "),
        Span::styled("Scope", theme.muted_style()),
        Span::raw(": "),
        Span::raw(scope),
        Span::raw("  "),
        Span::styled("Period", theme.muted_style()),
        Span::raw(": "),
        Span::raw(app.chart_period.label()),
    ]);
    let header_block = Paragraph::new(header).block(
        Block::default()
            .borders(Borders::BOTTOM)
            .border_style(theme.border_style())
            .style(theme.panel_style()),
    );
    frame.render_widget(header_block, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(0), Constraint::Length(30)])
        .split(chunks[1]);

    if let Some(message) = app.chart_message.clone() {
        draw_overlay(frame, body[0], &message, theme);
    } else {
        match app.chart_view {
            ChartView::Averages => draw_average_chart(frame, app, body[0], theme),
            ChartView::Frequency => draw_frequency_chart(frame, app, body[0], theme),
        }
    }
    draw_chart_packages(frame, app, body[1], theme);

    let footer = Line::from(vec![
        Span::styled("Tab switch chart", theme.muted_style()),
        Span::raw(" · "),
        Span::styled("u unit", theme.muted_style()),
        Span::raw(" · "),
        Span::styled("b bucket", theme.muted_style()),
        Span::raw(" · "),
        Span::styled("f project filter", theme.muted_style()),
        Span::raw(" · "),
        Span::styled("Space pick package", theme.muted_style()),
        Span::raw(" · "),
        Span::styled("a all", theme.muted_style()),
        Span::raw(" · "),
        Span::styled("r period", theme.muted_style()),
        Span::raw(" · "),
        Span::styled("Esc back", theme.muted_style()),
    ]);
    let footer_block = Paragraph::new(footer).block(
        Block::default()
            .borders(Borders::TOP)
            .border_style(theme.border_style())
            .style(theme.panel_style()),
    );
    frame.render_widget(footer_block, chunks[2]);
}

fn draw_chart_packages<C: Clock>(frame: &mut Frame, app: &App<C>, area: Rect, theme: &Theme) {
    let packages = app.packages();
    let items: Vec<ListItem> = if packages.is_empty() {
        vec![ListItem::new(Line::from("No work packages")).style(theme.panel_style())]
    } else {
        packages
            .iter()
            .map(|package| {
                let mark = if app.chart_packages.contains(&package.id) { "[x] " } else { "[ ] " };
                ListItem::new(Line::from(vec![
                    Span::styled(mark, Style::default().fg(theme.accent)),
                    Span::raw(short_label(&package.name, 20)),
                ]))
                .style(theme.panel_style())
            })
            .collect()
    };
    let title = if app.chart_packages.is_empty() {
        "Packages (all)".to_string()
    } else {
        format!("Packages ({})", app.chart_packages.len())
    };
    let list = List::new(items)
        .block(panel_block(&title, theme))
        .highlight_style(Style::default().fg(theme.highlight).add_modifier(Modifier::BOLD))
        .highlight_symbol("▍ ");
    let mut state = ListState::default().with_selected((!packages.is_empty()).then_some(app.chart_cursor));
    frame.render_stateful_widget(list, area, &mut state);
}

fn draw_average_chart<C: Clock>(frame: &mut Frame, app: &App<C>, area: Rect, theme: &Theme) {
    if app.averages.is_empty() {
        draw_empty(frame, area, "No data for the selected work packages.", theme);
        return;
    }

    let bars: Vec<Bar> = app
        .averages
        .iter()
        .map(|row| {
            Bar::default()
                .value((row.value * 100.0).round().max(0.0) as u64)
                .text_value(format!("{:.2}", row.value))
                .label(Line::from(short_label(&row.work_package, 10)))
                .style(Style::default().fg(theme.accent))
        })
        .collect();

    let title = format!("Average per work package ({})", app.duration_unit.label());
    let chart = BarChart::default()
        .block(panel_block(&title, theme))
        .bar_width(10)
        .bar_gap(2)
        .value_style(Style::default().fg(theme.accent_contrast()).bg(theme.accent))
        .data(BarGroup::default().bars(&bars));
    frame.render_widget(chart, area);
}

fn draw_frequency_chart<C: Clock>(frame: &mut Frame, app: &App<C>, area: Rect, theme: &Theme) {
    if app.frequency.is_empty() {
        draw_empty(frame, area, "No entries yet.", theme);
        return;
    }

    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(3)])
        .split(area);

    let series = crate::reporting::frequency_series(&app.frequency);
    let groups: Vec<(String, Vec<Bar>)> = app
        .frequency
        .iter()
        .map(|bucket| {
            let bars = series
                .iter()
                .enumerate()
                .map(|(index, name)| {
                    let count = bucket.counts.get(name).copied().unwrap_or(0);
                    Bar::default()
                        .value(u64::from(count))
                        .style(Style::default().fg(series_color(index)))
                })
                .collect();
            (bucket.label.clone(), bars)
        })
        .collect();

    let mut chart = BarChart::default()
        .block(panel_block(&format!("Entries per {} bucket", app.bucket.label()), theme))
        .bar_width(3)
        .bar_gap(0)
        .group_gap(2);
    for (label, bars) in &groups {
        chart = chart.data(BarGroup::default().label(Line::from(label.clone())).bars(bars));
    }
    frame.render_widget(chart, sections[0]);

    let legend: Vec<Span> = series
        .iter()
        .enumerate()
        .flat_map(|(index, name)| {
            let label = app.chart_series_label(name);
            [
                Span::styled("■ ", Style::default().fg(series_color(index))),
                Span::raw(format!("{}   ", short_label(&label, 24))),
            ]
        })
        .collect();
    let legend = Paragraph::new(Line::from(legend))
        .block(panel_block("Legend", theme))
        .wrap(Wrap { trim: true });
    frame.render_widget(legend, sections[1]);
}

fn draw_today<C: Clock>(frame: &mut Frame, app: &mut App<C>, area: Rect, theme: &Theme) {
    let content = area.inner(Margin {
        vertical: 1,
        horizontal: 2,
    });
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(2)])
        .split(content);

    let header = Line::from(vec![
        Span::styled("Day", theme.title_style()),
        Span::raw("  "),
        Span::styled(
            app.day.format("%a %Y-%m-%d").to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled("Rounded total", theme.muted_style()),
        Span::raw(": "),
        Span::styled(
            format!("{:.2}h", app.daily.total_hours),
            Style::default().fg(theme.success).add_modifier(Modifier::BOLD),
        ),
    ]);
    frame.render_widget(
        Paragraph::new(header).block(
            Block::default()
                .borders(Borders::BOTTOM)
                .border_style(theme.border_style())
                .style(theme.panel_style()),
        ),
        chunks[0],
    );

    if app.daily.rows.is_empty() {
        draw_empty(frame, chunks[1], "No entries on this day.", theme);
    } else {
        let header_style = Style::default().add_modifier(Modifier::BOLD).fg(theme.accent);
        let rows: Vec<Row> = app
            .daily
            .rows
            .iter()
            .map(|row| {
                let entry = &row.entry;
                let ticket = entry
                    .remote_issue_id
                    .map(|id| format!("#{id}"))
                    .unwrap_or_default();
                Row::new(vec![
                    Cell::from(entry.started_at.format("%H:%M").to_string()),
                    Cell::from(entry.project.clone()),
                    Cell::from(app.config().work_package_label(&entry.project, &entry.work_package)),
                    Cell::from(format_clock(entry.duration_secs)),
                    Cell::from(format!("{:.2}h", row.rounded_hours)),
                    Cell::from(ticket),
                ])
            })
            .collect();
        let table = Table::new(
            rows,
            [
                Constraint::Length(6),
                Constraint::Percentage(20),
                Constraint::Min(16),
                Constraint::Length(9),
                Constraint::Length(7),
                Constraint::Length(8),
            ],
        )
        .header(
            Row::new(vec!["Start", "Project", "Work package", "Duration", "Hours", "Ticket"])
                .style(header_style),
        )
        .block(panel_block("Entries", theme))
        .column_spacing(2);
        frame.render_widget(table, chunks[1]);
    }

    let footer = Line::from(vec![
        Span::styled("Left/Right change day", theme.muted_style()),
        Span::raw(" · "),
        Span::styled("Esc back", theme.muted_style()),
    ]);
    frame.render_widget(
        Paragraph::new(footer).block(
            Block::default()
                .borders(Borders::TOP)
                .border_style(theme.border_style())
                .style(theme.panel_style()),
        ),
        chunks[2],
    );
}

fn draw_manage<C: Clock>(frame: &mut Frame, app: &mut App<C>, area: Rect, theme: &Theme) {
    let block = centered_rect(80, 70, area);
    frame.render_widget(Clear, block);

    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(5)])
        .split(block);
    let lists = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(sections[0]);
    draw_catalog_lists(frame, app, lists[0], lists[1], theme);

    let target = match app.focus {
        Focus::Projects => "project".to_string(),
        Focus::WorkPackages => match app.selected_project() {
            Some(project) => format!("work package in {}", project.name),
            None => "work package".to_string(),
        },
    };
    let lines = match &app.manage_input {
        Some(input) => vec![
            Line::from(vec![
                Span::styled(format!("New {target}: "), Style::default().add_modifier(Modifier::BOLD)),
                Span::styled(input.clone(), Style::default().fg(theme.accent)),
            ]),
            Line::from("Enter add • Esc cancel"),
        ],
        None => vec![
            Line::from(format!("Editing {target}s")),
            Line::from("Tab switch list • a add • r remove • Esc close"),
        ],
    };
    let hint = Paragraph::new(lines)
        .block(panel_block("Manage", theme))
        .wrap(Wrap { trim: true });
    frame.render_widget(hint, sections[1]);
}

fn draw_login<C: Clock>(frame: &mut Frame, app: &App<C>, area: Rect, theme: &Theme) {
    let block = centered_rect(60, 45, area);
    frame.render_widget(Clear, block);

    let form = &app.login;
    let active = form.active_field();
    let field_style = |field: LoginField| {
        if field == active {
            Style::default().fg(theme.accent).add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        }
    };
    let masked = "•".repeat(form.password.chars().count());
    let remember = if form.remember { "[x]" } else { "[ ]" };

    let mut lines = vec![
        Line::from(format!("Log in to {}", app.config().redmine.url)),
        Line::from(""),
        Line::from(vec![
            Span::styled("Username: ", Style::default().add_modifier(Modifier::BOLD)),
            Span::styled(form.username.clone(), field_style(LoginField::Username)),
        ]),
        Line::from(vec![
            Span::styled("Password: ", Style::default().add_modifier(Modifier::BOLD)),
            Span::styled(masked, field_style(LoginField::Password)),
        ]),
        Line::from(vec![
            Span::styled(remember, field_style(LoginField::Remember)),
            Span::raw(" Remember credentials"),
        ]),
        Line::from(""),
        Line::from("Tab next field • Space toggle • Enter connect • Esc cancel"),
    ];

    if form.failures > 0 {
        lines.push(Line::from(Span::styled(
            format!("Attempts left: {}", MAX_LOGIN_ATTEMPTS.saturating_sub(form.failures)),
            theme.muted_style(),
        )));
    }
    if let Some(message) = &form.message {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            message.clone(),
            Style::default().fg(theme.error),
        )));
    }

    let paragraph = Paragraph::new(lines)
        .alignment(Alignment::Left)
        .block(panel_block("Redmine Login", theme))
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, block);
}

fn draw_backup_prompt<C: Clock>(frame: &mut Frame, app: &App<C>, area: Rect, theme: &Theme) {
    let Some(backup) = app.pending_backup() else {
        return;
    };
    let summary = format!(
        "{} / {}",
        backup.project,
        app.config().work_package_label(&backup.project, &backup.work_package)
    );
    let elapsed = format!("Elapsed {} (saved {})", format_clock(backup.elapsed_secs), backup.saved_at);
    draw_prompt(
        frame,
        area,
        "Unfinished Session",
        &[
            "A session from the last run was found.",
            "",
            summary.as_str(),
            elapsed.as_str(),
            "",
            "r  resume",
            "s  save as entry",
            "d  delete backup",
        ],
        theme,
    );
}

fn draw_prompt(frame: &mut Frame, area: Rect, title: &str, lines: &[&str], theme: &Theme) {
    let block = centered_rect(50, 40, area);
    frame.render_widget(Clear, block);
    let lines: Vec<Line> = lines.iter().map(|line| Line::from(line.to_string())).collect();
    let paragraph = Paragraph::new(lines)
        .alignment(Alignment::Left)
        .block(panel_block(title, theme))
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, block);
}

fn draw_report<C: Clock>(frame: &mut Frame, app: &App<C>, area: Rect, theme: &Theme) {
    let block = centered_rect(85, 75, area);
    frame.render_widget(Clear, block);
    let lines: Vec<Line> = app
        .report_lines
        .iter()
        .map(|line| {
            if line.starts_with('!') {
                Line::from(Span::styled(line.clone(), Style::default().fg(theme.error)))
            } else {
                Line::from(line.clone())
            }
        })
        .collect();
    let paragraph = Paragraph::new(lines)
        .block(panel_block(&app.report_title, theme))
        .scroll((app.report_scroll, 0))
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, block);
}

fn draw_overlay(frame: &mut Frame, area: Rect, message: &str, theme: &Theme) {
    let block = centered_rect(60, 20, area);
    frame.render_widget(Clear, block);
    let paragraph = Paragraph::new(message.to_string())
        .alignment(Alignment::Center)
        .block(panel_block("Status", theme))
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, block);
}

fn draw_empty(frame: &mut Frame, area: Rect, message: &str, theme: &Theme) {
    let paragraph = Paragraph::new(Line::from(Span::styled(message.to_string(), theme.muted_style())))
        .alignment(Alignment::Center)
        .block(panel_block("Chart", theme));
    frame.render_widget(paragraph, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    let vertical = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1]);
    vertical[1]
}

fn draw_toast(frame: &mut Frame, area: Rect, message: &str, is_error: bool, theme: &Theme) {
    let width = (message.chars().count() as u16 + 6).clamp(20, area.width.saturating_sub(2));
    let height = 3;
    let x = area.x + area.width.saturating_sub(width + 1);
    let y = area.y + area.height.saturating_sub(height + 4);
    let rect = Rect::new(x, y, width, height);

    frame.render_widget(Clear, rect);
    let (style, title) = if is_error {
        (Style::default().fg(theme.error).add_modifier(Modifier::BOLD), "Error")
    } else {
        (Style::default().fg(theme.success).add_modifier(Modifier::BOLD), "Done")
    };
    let paragraph = Paragraph::new(Line::from(Span::styled(message.to_string(), style)))
        .alignment(Alignment::Center)
        .block(panel_block(title, theme));
    frame.render_widget(paragraph, rect);
}

fn help_rows(theme: &Theme) -> Vec<Row<'static>> {
    let header_style = Style::default().add_modifier(Modifier::BOLD).fg(theme.accent);
    let key_style = Style::default().fg(theme.highlight);
    let sections: [(&str, &[(&str, &str)]); 4] = [
        (
            "Timer",
            &[
                ("s", "Start with selected pair"),
                ("p / Space", "Pause or resume"),
                ("Enter", "Save session"),
                ("d", "Discard session"),
            ],
        ),
        (
            "Navigation",
            &[
                ("Up/Down", "Select project or work package"),
                ("Left/Right / Tab", "Switch list"),
                ("m", "Manage projects and work packages"),
            ],
        ),
        (
            "Reports",
            &[
                ("c", "Charts (Tab view, u unit, b bucket, f project, Space package, r period)"),
                ("t", "Daily view (Left/Right change day)"),
                ("x", "Export entries to xlsx"),
            ],
        ),
        (
            "Redmine",
            &[
                ("l", "Log in"),
                ("y", "Pull time entries"),
                ("i / I", "Import projects (I forces)"),
                ("v", "Verify bookings"),
                ("u", "Push last entry"),
            ],
        ),
    ];

    let mut rows = Vec::new();
    for (title, keys) in sections {
        rows.push(Row::new(vec![
            Cell::from(Span::styled(title, header_style)),
            Cell::from(""),
        ]));
        for (key, action) in keys {
            rows.push(Row::new(vec![
                Cell::from(Span::styled(*key, key_style)),
                Cell::from(*action),
            ]));
        }
        rows.push(Row::new(vec![Cell::from(""), Cell::from("")]));
    }
    rows.push(Row::new(vec![
        Cell::from(Span::styled("h / Esc", key_style)),
        Cell::from("Close help"),
    ]));
    rows.push(Row::new(vec![
        Cell::from(Span::styled("q", key_style)),
        Cell::from("Quit"),
    ]));
    rows
}

fn draw_help(frame: &mut Frame, area: Rect, theme: &Theme) {
    let block = centered_rect(70, 75, area);
    frame.render_widget(Clear, block);

    let table = Table::new(help_rows(theme), [Constraint::Length(20), Constraint::Min(10)])
        .block(panel_block("Help", theme))
        .column_spacing(2);

    frame.render_widget(table, block);
}

fn draw_background(frame: &mut Frame, area: Rect, theme: &Theme) {
    let block = Block::default().style(Style::default().bg(theme.bg).fg(theme.text));
    frame.render_widget(block, area);
}

fn panel_block(title: &str, theme: &Theme) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(theme.border_style())
        .style(theme.panel_style())
        .title(Line::from(Span::styled(
            format!(" {} ", title),
            theme.title_style(),
        )))
}

fn series_color(index: usize) -> Color {
    SERIES_COLORS[index % SERIES_COLORS.len()]
}

fn short_label(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let mut label: String = value.chars().take(max.saturating_sub(1)).collect();
    label.push('…');
    label
}

#[derive(Clone, Copy)]
struct Theme {
    bg: Color,
    panel: Color,
    border: Color,
    text: Color,
    muted: Color,
    accent: Color,
    highlight: Color,
    success: Color,
    error: Color,
}

impl Theme {
    fn midnight() -> Self {
        Theme {
            bg: Color::Rgb(12, 18, 36),
            panel: Color::Rgb(18, 28, 52),
            border: Color::Rgb(44, 72, 112),
            text: Color::Rgb(220, 230, 255),
            muted: Color::Rgb(150, 170, 200),
            accent: Color::Rgb(90, 180, 255),
            highlight: Color::Rgb(255, 210, 120),
            success: Color::Rgb(120, 220, 140),
            error: Color::Rgb(255, 120, 120),
        }
    }

    fn panel_style(&self) -> Style {
        Style::default().bg(self.panel).fg(self.text)
    }

    fn border_style(&self) -> Style {
        Style::default().fg(self.border)
    }

    fn title_style(&self) -> Style {
        Style::default().fg(self.accent).add_modifier(Modifier::BOLD)
    }

    fn muted_style(&self) -> Style {
        Style::default().fg(self.muted)
    }

    fn accent_contrast(&self) -> Color {
        Color::Black
    }
}
