use crate::consolidado::Consolidado;
use crate::dashboard::DashboardStats;
use crate::db::{Participant, PaymentRecord};
use crate::formatting::{format_currency, format_date_short};
use crate::month::MonthKey;
use crate::reports::{receipt_rows, ReceiptRow};
use crate::repository::{InMemoryRepository, ParticipantFilter, PaymentFilter, PaymentRepository};
use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Dashboard,
    Consolidado,
    Receipts,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Dashboard => Page::Consolidado,
            Page::Consolidado => Page::Receipts,
            Page::Receipts => Page::Dashboard,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Dashboard => Page::Receipts,
            Page::Consolidado => Page::Dashboard,
            Page::Receipts => Page::Consolidado,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Dashboard => "Dashboard",
            Page::Consolidado => "Consolidado",
            Page::Receipts => "Recibos",
        }
    }
}

/// Snapshot of the store the terminal UI browses
pub struct App {
    repo: InMemoryRepository,
    pub participants: Vec<Participant>,
    pub dashboard: DashboardStats,
    pub receipts: Vec<ReceiptRow>,
    pub consolidado: Option<Consolidado>,
    pub year: i32,
    pub monthly_fee: f64,
    pub current_page: Page,
    pub participant_state: TableState,
    pub receipt_state: TableState,
}

impl App {
    pub fn new(
        participants: Vec<Participant>,
        payments: Vec<PaymentRecord>,
        month: MonthKey,
        monthly_fee: f64,
    ) -> Result<Self> {
        let repo = InMemoryRepository::new(participants, payments);
        let active = repo.fetch_participants(&ParticipantFilter::active())?;
        let all_payments = repo.fetch_payments(&PaymentFilter::all())?;

        let mut participant_state = TableState::default();
        if !active.is_empty() {
            participant_state.select(Some(0));
        }

        let receipts = receipt_rows(&all_payments);
        let mut receipt_state = TableState::default();
        if !receipts.is_empty() {
            receipt_state.select(Some(0));
        }

        let mut app = Self {
            dashboard: DashboardStats::compute(month, &active, &all_payments, monthly_fee),
            repo,
            participants: active,
            receipts,
            consolidado: None,
            year: month.year,
            monthly_fee,
            current_page: Page::Dashboard,
            participant_state,
            receipt_state,
        };
        app.refresh_consolidado()?;
        Ok(app)
    }

    pub fn selected_participant(&self) -> Option<&Participant> {
        self.participant_state
            .selected()
            .and_then(|i| self.participants.get(i))
    }

    fn refresh_consolidado(&mut self) -> Result<()> {
        self.consolidado = match self.selected_participant() {
            Some(participant) => Some(Consolidado::load(
                &self.repo,
                participant,
                self.year,
                self.monthly_fee,
            )?),
            None => None,
        };
        Ok(())
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }

    pub fn next_year(&mut self) -> Result<()> {
        self.year += 1;
        self.refresh_consolidado()
    }

    pub fn previous_year(&mut self) -> Result<()> {
        self.year -= 1;
        self.refresh_consolidado()
    }

    pub fn next(&mut self) -> Result<()> {
        match self.current_page {
            Page::Consolidado => {
                step(&mut self.participant_state, self.participants.len(), true);
                self.refresh_consolidado()?;
            }
            Page::Receipts => step(&mut self.receipt_state, self.receipts.len(), true),
            Page::Dashboard => {}
        }
        Ok(())
    }

    pub fn previous(&mut self) -> Result<()> {
        match self.current_page {
            Page::Consolidado => {
                step(&mut self.participant_state, self.participants.len(), false);
                self.refresh_consolidado()?;
            }
            Page::Receipts => step(&mut self.receipt_state, self.receipts.len(), false),
            Page::Dashboard => {}
        }
        Ok(())
    }
}

// Wraps around at both ends
fn step(state: &mut TableState, len: usize, forward: bool) {
    if len == 0 {
        return;
    }
    let i = match state.selected() {
        Some(i) if forward => {
            if i >= len - 1 {
                0
            } else {
                i + 1
            }
        }
        Some(i) => {
            if i == 0 {
                len - 1
            } else {
                i - 1
            }
        }
        None => 0,
    };
    state.select(Some(i));
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Tab => {
                    if key.modifiers.contains(KeyModifiers::SHIFT) {
                        app.previous_page();
                    } else {
                        app.next_page();
                    }
                }
                KeyCode::BackTab => app.previous_page(),
                KeyCode::Char('1') => app.current_page = Page::Dashboard,
                KeyCode::Char('2') => app.current_page = Page::Consolidado,
                KeyCode::Char('3') => app.current_page = Page::Receipts,
                KeyCode::Char(']') if app.current_page == Page::Consolidado => app.next_year()?,
                KeyCode::Char('[') if app.current_page == Page::Consolidado => app.previous_year()?,
                KeyCode::Down | KeyCode::Char('j') => app.next()?,
                KeyCode::Up | KeyCode::Char('k') => app.previous()?,
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    match app.current_page {
        Page::Dashboard => render_dashboard(f, chunks[1], app),
        Page::Consolidado => render_consolidado(f, chunks[1], app),
        Page::Receipts => render_receipts(f, chunks[1], app),
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let pages = [Page::Dashboard, Page::Consolidado, Page::Receipts];

    let mut tab_spans = vec![];
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title().to_string(), style));
    }

    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Participantes: {}", app.dashboard.total_participants),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Recaudado: {}", format_currency(app.dashboard.total_collected)),
        Style::default().fg(Color::Green),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );

    f.render_widget(header, area);
}

fn stat_line<'a>(label: &'a str, value: String, color: Color) -> Line<'a> {
    Line::from(vec![
        Span::styled(
            format!("  {:<28}", label),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::styled(value, Style::default().fg(color)),
    ])
}

fn render_dashboard(f: &mut Frame, area: Rect, app: &App) {
    let stats = &app.dashboard;
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(3)])
        .split(area);

    let content = vec![
        Line::from(""),
        stat_line(
            "Participantes activos",
            stats.total_participants.to_string(),
            Color::White,
        ),
        stat_line(
            "Pagaron este mes",
            format!("{} ({}% del total)", stats.paid_this_month, stats.payment_rate),
            Color::Green,
        ),
        stat_line(
            "Pendientes",
            format!("{} ({}% del total)", stats.pending_this_month, stats.pending_rate()),
            Color::Red,
        ),
        Line::from(""),
        stat_line("Total recaudado", format_currency(stats.total_collected), Color::Green),
        stat_line("Total pendiente", format_currency(stats.total_pending), Color::Red),
    ];

    let panel = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" Resumen {} ", stats.month)),
    );
    f.render_widget(panel, chunks[0]);

    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" Tasa de pago "))
        .gauge_style(Style::default().fg(Color::Green))
        .percent(stats.payment_rate.min(100) as u16);
    f.render_widget(gauge, chunks[1]);
}

fn render_consolidado(f: &mut Frame, area: Rect, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(area);

    let rows = app.participants.iter().map(|p| {
        Row::new(vec![
            Cell::from(p.code.clone()).style(Style::default().fg(Color::Blue)),
            Cell::from(truncate(&p.full_name, 28)),
        ])
    });

    let table = Table::new(rows, [Constraint::Length(8), Constraint::Min(10)])
        .block(Block::default().borders(Borders::ALL).title(" Participantes "))
        .highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▶ ");

    f.render_stateful_widget(table, chunks[0], &mut app.participant_state);

    let Some(view) = &app.consolidado else {
        let empty = Paragraph::new("  Sin participantes activos")
            .block(Block::default().borders(Borders::ALL).title(" Consolidado "));
        f.render_widget(empty, chunks[1]);
        return;
    };

    let report = &view.report;
    let mut content = vec![
        Line::from(vec![Span::styled(
            format!("  {} - {}", view.participant.code, view.participant.full_name),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )]),
        Line::from(""),
    ];

    for (key, paid) in report.months() {
        let (mark, color) = if paid { ("✓", Color::Green) } else { ("✗", Color::Red) };
        content.push(Line::from(vec![
            Span::styled(format!("  {} ", mark), Style::default().fg(color)),
            Span::raw(format!("{:<12}", key.name())),
            Span::styled(
                if paid { "Pagado" } else { "Pendiente" },
                Style::default().fg(color),
            ),
        ]));
    }

    content.push(Line::from(""));
    content.push(stat_line(
        "Meses pagados",
        report.paid_count.to_string(),
        Color::Green,
    ));
    content.push(stat_line(
        "Meses pendientes",
        report.unpaid_count.to_string(),
        Color::Red,
    ));
    content.push(stat_line("Total pagado", format_currency(report.total_paid), Color::Green));
    content.push(stat_line("Total adeudado", format_currency(report.total_owed), Color::Red));

    let summary = view.paid_summary();
    if !summary.is_empty() {
        content.push(Line::from(""));
        content.push(Line::from(vec![
            Span::raw("  "),
            Span::styled(
                wrap_text(&summary, 50),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            ),
        ]));
    }

    let panel = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow))
            .title(format!(" Consolidado {} ", report.year)),
    );
    f.render_widget(panel, chunks[1]);
}

fn render_receipts(f: &mut Frame, area: Rect, app: &mut App) {
    let header_cells = ["Recibo", "Participantes", "Meses", "Monto", "Fecha", "Observaciones"]
        .iter()
        .map(|h| {
            Cell::from(*h).style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
        });

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows = app.receipts.iter().map(|r| {
        Row::new(vec![
            Cell::from(format!("#{}", r.receipt_number)),
            Cell::from(truncate(&r.participants.join("; "), 30)),
            Cell::from(truncate(&r.months, 34)),
            Cell::from(r.total.clone()).style(Style::default().fg(Color::Green)),
            Cell::from(r.date.clone()),
            Cell::from(truncate(&r.observations, 24)),
        ])
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(10),
            Constraint::Length(32),
            Constraint::Length(36),
            Constraint::Length(12),
            Constraint::Length(24),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .block(Block::default().borders(Borders::ALL).title(" Pagos por recibo "))
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("▶ ");

    f.render_stateful_widget(table, area, &mut app.receipt_state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let mut status_spans = vec![Span::styled(
        format!(" {} ", app.current_page.title()),
        Style::default().fg(Color::Cyan),
    )];

    if app.current_page == Page::Consolidado {
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled("[ ]", Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(format!(" Año {} | ", app.year)));
    } else {
        status_spans.push(Span::raw(" | "));
    }

    status_spans.push(Span::styled("Tab", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Página | "));
    status_spans.push(Span::styled("↑/↓", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Navegar | "));
    status_spans.push(Span::styled(
        format_date_short(chrono::Local::now().date_naive()),
        Style::default().fg(Color::DarkGray),
    ));
    status_spans.push(Span::raw(" | "));
    status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Salir"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn wrap_text(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut current_line = String::new();

    for word in text.split_whitespace() {
        if current_line.chars().count() + word.chars().count() + 1 <= width {
            if !current_line.is_empty() {
                current_line.push(' ');
            }
            current_line.push_str(word);
        } else {
            if !result.is_empty() {
                result.push_str("\n  ");
            }
            result.push_str(&current_line);
            current_line = word.to_string();
        }
    }

    if !current_line.is_empty() {
        if !result.is_empty() {
            result.push_str("\n  ");
        }
        result.push_str(&current_line);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn create_test_payment(participant: &Participant, month: u32, receipt: &str) -> PaymentRecord {
        PaymentRecord::new(
            &participant.id,
            MonthKey::new(2025, month).unwrap(),
            3000.0,
            NaiveDate::from_ymd_opt(2025, month, 3).unwrap(),
            receipt,
            "Admin",
        )
    }

    fn create_test_app() -> App {
        let ana = Participant::new("P001", "Ana");
        let beto = Participant::new("P002", "Beto");
        let payments = vec![
            create_test_payment(&ana, 1, "R-1"),
            create_test_payment(&ana, 2, "R-1"),
            create_test_payment(&beto, 5, "R-2"),
        ];
        App::new(vec![beto, ana], payments, MonthKey::new(2025, 5).unwrap(), 3000.0).unwrap()
    }

    #[test]
    fn test_app_loads_snapshot() {
        let app = create_test_app();

        assert_eq!(app.current_page, Page::Dashboard);
        assert_eq!(app.dashboard.paid_this_month, 1);
        assert_eq!(app.receipts.len(), 2);
        assert_eq!(app.selected_participant().map(|p| p.code.as_str()), Some("P001"));
        assert_eq!(app.consolidado.as_ref().unwrap().report.paid_count, 2);
    }

    #[test]
    fn test_navigation_refreshes_consolidado() {
        let mut app = create_test_app();
        app.next_page();
        assert_eq!(app.current_page, Page::Consolidado);

        app.next().unwrap();
        let view = app.consolidado.as_ref().unwrap();
        assert_eq!(view.participant.code, "P002");
        assert!(view.report.is_paid(5));

        app.next().unwrap();
        assert_eq!(app.selected_participant().unwrap().code, "P001");

        app.previous_year().unwrap();
        assert_eq!(app.consolidado.as_ref().unwrap().report.paid_count, 0);
        assert_eq!(Page::Dashboard.previous(), Page::Receipts);
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("María García", 20), "María García");
        assert_eq!(truncate("Peñalosa Ñuñez", 8), "Peñal...");
    }
}
