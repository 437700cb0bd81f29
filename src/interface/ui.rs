use ratatui::{
    prelude::*,
    symbols::Marker,
    widgets::{
        Axis, Block, Borders, Cell, Chart, Dataset, Gauge, GraphType, List, ListItem, Paragraph,
        Row, Sparkline, Table, Tabs, Wrap,
    },
};

use crate::interface::state::{AppMode, AppState};
use crate::session::SessionStatus;

// --- Color Palette ---
const COL_FG: Color = Color::White;
const COL_HIGHLIGHT: Color = Color::Yellow;
const COL_ACCENT: Color = Color::Cyan;
const COL_DATA: Color = Color::LightBlue;
const COL_FIT: Color = Color::LightRed;
const COL_SUCCESS: Color = Color::Green;
const COL_FAIL: Color = Color::Red;
const COL_HEADER: Color = Color::Magenta;

pub fn draw(f: &mut Frame, app: &mut AppState) {
    if f.area().width < 40 || f.area().height < 10 {
        let p = Paragraph::new("Terminal too small.")
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(p, f.area());
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(f.area());

    draw_header(f, app, chunks[0]);

    match app.mode {
        AppMode::Dashboard => draw_dashboard(f, app, chunks[1]),
        AppMode::Pareto => draw_pareto(f, app, chunks[1]),
        AppMode::Config => draw_config(f, app, chunks[1]),
    }

    draw_footer(f, app, chunks[2]);
}

fn draw_header(f: &mut Frame, app: &AppState, area: Rect) {
    let titles = vec![" 1:Dash ", " 2:Pareto ", " 3:Config "];
    let idx = match app.mode {
        AppMode::Dashboard => 0,
        AppMode::Pareto => 1,
        AppMode::Config => 2,
    };

    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::BOTTOM))
        .select(idx)
        .highlight_style(Style::default().fg(COL_HIGHLIGHT).add_modifier(Modifier::BOLD));

    f.render_widget(tabs, area);
}

fn status_color(status: SessionStatus) -> Color {
    match status {
        SessionStatus::Running => COL_SUCCESS,
        SessionStatus::Stopping => COL_HIGHLIGHT,
        SessionStatus::Failed => COL_FAIL,
        _ => COL_FG,
    }
}

fn draw_footer(f: &mut Frame, app: &AppState, area: Rect) {
    let s = &app.session;
    let best = if s.has_best() { format!("{:.4}", s.best_score) } else { "-".to_string() };

    let text = Line::from(vec![
        Span::styled(
            format!(" STATUS: {:<8}", s.status.label()),
            Style::default().fg(status_color(s.status)).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::raw(format!("Iter: {}/{}", s.iteration, s.total_iterations)),
        Span::raw(" | "),
        Span::styled(format!("Best: {}", best), Style::default().fg(COL_ACCENT)),
        Span::raw(" | [Q]uit [S]top [P]areto-refresh"),
    ]);

    let p = Paragraph::new(text).style(Style::default().bg(Color::DarkGray).fg(Color::White));
    f.render_widget(p, area);
}

fn draw_dashboard(f: &mut Frame, app: &AppState, area: Rect) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(area);

    let left_rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(cols[0]);

    draw_curve(f, app, left_rows[0]);
    draw_score_history(f, app, left_rows[1]);

    let right_rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(55), Constraint::Length(3), Constraint::Min(0)])
        .split(cols[1]);

    draw_events(f, app, right_rows[0]);
    draw_progress(f, app, right_rows[1]);
    draw_stats(f, app, right_rows[2]);
}

fn padded(lo: f64, hi: f64) -> [f64; 2] {
    let pad = ((hi - lo).abs() * 0.05).max(1e-3);
    [lo - pad, hi + pad]
}

fn draw_curve(f: &mut Frame, app: &AppState, area: Rect) {
    let title = if app.session.best_expression.is_empty() {
        " Data ".to_string()
    } else {
        format!(" Data vs y = {} ", app.session.best_expression)
    };

    if app.curve().dims() != 1 {
        let p = Paragraph::new("Multi-dimensional input: no 2D plot.")
            .alignment(Alignment::Center)
            .block(Block::default().title(title).borders(Borders::ALL));
        f.render_widget(p, area);
        return;
    }

    let (x_lo, x_hi) = app.curve().x_range();
    let (mut y_lo, mut y_hi) = app.curve().y_range();
    // Keep the fit inside a sane window when it overshoots the data.
    let span = (y_hi - y_lo).abs().max(1e-6);
    for &(_, y) in &app.fitted_points {
        if y > y_lo - span && y < y_hi + span {
            y_lo = y_lo.min(y);
            y_hi = y_hi.max(y);
        }
    }
    let x_bounds = padded(x_lo, x_hi);
    let y_bounds = padded(y_lo, y_hi);

    let mut datasets = vec![Dataset::default()
        .name("data")
        .marker(Marker::Dot)
        .graph_type(GraphType::Scatter)
        .style(Style::default().fg(COL_DATA))
        .data(&app.data_points)];
    if !app.fitted_points.is_empty() {
        datasets.push(
            Dataset::default()
                .name("fit")
                .marker(Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(COL_FIT))
                .data(&app.fitted_points),
        );
    }

    let label = |v: f64| format!("{:.2}", v);
    let chart = Chart::new(datasets)
        .block(Block::default().title(title).borders(Borders::ALL))
        .x_axis(
            Axis::default()
                .title("x1")
                .style(Style::default().fg(Color::Gray))
                .bounds(x_bounds)
                .labels(vec![label(x_bounds[0]), label(x_bounds[1])]),
        )
        .y_axis(
            Axis::default()
                .title("y")
                .style(Style::default().fg(Color::Gray))
                .bounds(y_bounds)
                .labels(vec![label(y_bounds[0]), label(y_bounds[1])]),
        );

    f.render_widget(chart, area);
}

fn draw_score_history(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().title(" Best Score ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    if app.session.history.is_empty() {
        return;
    }

    // Scores live in [0, 100]; unscored units plot as zero.
    let width = inner.width as usize;
    let data: Vec<u64> = app.session.history.iter()
        .rev()
        .take(width)
        .map(|&(_, s)| if s.is_finite() { s.clamp(0.0, 100.0) as u64 } else { 0 })
        .collect();
    let data_rev: Vec<u64> = data.into_iter().rev().collect();

    let spark = Sparkline::default()
        .style(Style::default().fg(COL_ACCENT))
        .max(100)
        .data(&data_rev);
    f.render_widget(spark, inner);
}

fn draw_events(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().title(" Session Log ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let items: Vec<ListItem> = app.session.events.iter().rev().map(|line| {
        let style = if line.contains("FAILED") || line.contains("failed") {
            Style::default().fg(COL_FAIL)
        } else if line.contains(">>>") || line.contains("reached") {
            Style::default().fg(COL_SUCCESS)
        } else {
            Style::default().fg(Color::Gray)
        };

        ListItem::new(Line::from(vec![
            Span::styled(">", Style::default().fg(Color::DarkGray)),
            Span::raw(" "),
            Span::raw(line.as_str()),
        ])).style(style)
    }).collect();

    f.render_widget(List::new(items), inner);
}

fn draw_progress(f: &mut Frame, app: &AppState, area: Rect) {
    let s = &app.session;
    let label = format!(
        "Cycle {}/{} | {}/{} units | {:.0}%",
        s.cycle,
        app.config.cycles,
        s.iteration,
        s.total_iterations,
        s.progress() * 100.0
    );

    let g = Gauge::default()
        .block(Block::default().title(" Progress ").borders(Borders::ALL))
        .gauge_style(Style::default().fg(status_color(s.status)).bg(Color::DarkGray))
        .ratio(s.progress().clamp(0.0, 1.0))
        .label(label);
    f.render_widget(g, area);
}

fn draw_stats(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().title(" Statistics ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let s = &app.session;
    let kv = |k: &str, v: String, color: Color| {
        Line::from(vec![
            Span::styled(format!("{:<12}", k), Style::default().fg(Color::Gray)),
            Span::styled(v, Style::default().fg(color)),
        ])
    };

    let mut text = vec![
        kv("Engine:", app.engine_name.clone(), COL_HIGHLIGHT),
        kv("Elapsed:", format!("{:.1}s", s.elapsed().as_secs_f64()), COL_HIGHLIGHT),
        kv("API calls:", s.api_calls.to_string(), COL_HIGHLIGHT),
        kv("Rejected:", s.evaluation_failures.to_string(), COL_HIGHLIGHT),
        kv("Target:", format!("{:.1}", app.config.target_score), COL_HIGHLIGHT),
    ];
    if let Some(err) = &s.error_message {
        text.push(kv("Error:", err.clone(), COL_FAIL));
    }

    f.render_widget(Paragraph::new(text).wrap(Wrap { trim: true }), inner);
}

fn draw_pareto(f: &mut Frame, app: &mut AppState, area: Rect) {
    let header_cells = ["Complexity", "Score", "Expression"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(COL_HEADER)));
    let header = Row::new(header_cells).height(1).bottom_margin(1);

    if app.pareto.is_empty() {
        let msg = match &app.pareto_error {
            Some(e) => format!("Pareto frontier unavailable: {}", e),
            None => "No frontier yet. Press [P] to query the engine.".to_string(),
        };
        f.render_widget(
            Paragraph::new(msg)
                .block(Block::default().borders(Borders::ALL).title(" Pareto Frontier "))
                .alignment(Alignment::Center),
            area,
        );
        return;
    }

    let rows = app.pareto.iter().map(|p| {
        Row::new(vec![
            Cell::from(p.complexity.to_string()),
            Cell::from(format!("{:.4}", p.score)),
            Cell::from(p.expression.clone()),
        ])
        .height(1)
    });

    let t = Table::new(rows, &[
        Constraint::Length(12),
        Constraint::Length(12),
        Constraint::Min(10),
    ])
    .header(header)
    .block(Block::default().borders(Borders::ALL).title(format!(" Pareto Frontier ({}) ", app.pareto.len())))
    .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    f.render_stateful_widget(t, area, &mut app.pareto_state);
}

fn draw_config(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title(" Session Parameters ");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let c = &app.config;

    let kv = |k: &str, v: String| -> ListItem {
        ListItem::new(Line::from(vec![
            Span::styled(format!("{:<18}", k), Style::default().fg(COL_ACCENT)),
            Span::raw(v),
        ]))
    };

    let functions: Vec<&str> = c.functions.iter().map(|f| f.as_str()).collect();
    let models: Vec<String> = c.models.iter().map(|m| format!("{} (T={:.1})", m.name, m.temperature)).collect();

    let items = vec![
        kv("Islands:", c.islands.to_string()),
        kv("Cycles:", c.cycles.to_string()),
        kv("Interactions:", c.interactions_per_cycle.to_string()),
        kv("Target Score:", format!("{:.1}", c.target_score)),
        ListItem::new(Line::from(" ")),
        kv("Temperature:", format!("{:.1}", c.sample_temperature)),
        kv("Mutation:", c.enable_mutation.to_string()),
        kv("Crossover:", c.enable_crossover.to_string()),
        kv("Optimizer:", format!("{} x{}", c.optimizer, c.optimizer_trials)),
        kv("Functions:", functions.join(", ")),
        kv("Constants:", c.constant_whitelist.join(", ")),
        ListItem::new(Line::from(" ")),
        kv("Fuzzy:", c.fuzzy.to_string()),
        kv("Models:", if models.is_empty() { "-".to_string() } else { models.join(", ") }),
        kv("Points:", app.curve().len().to_string()),
    ];

    let list = List::new(items).block(Block::default().borders(Borders::NONE));
    f.render_widget(list, inner);
}
