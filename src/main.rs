use anyhow::{bail, Context, Result};
use chrono::{Datelike, Utc};
use rusqlite::Connection;
use std::env;
use std::path::{Path, PathBuf};

use membership_fees::auth::{hash_password, require, Capability, Session, SessionStore};
use membership_fees::reports::{export_all, export_report, load_report, report_filename, ReportFilter, ReportSummary};
use membership_fees::{
    db, import_bulk, logging, setup_database, AppConfig, Consolidado, CredentialTable,
    SqliteRepository,
};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let config = AppConfig::load()?;

    // The TUI owns the terminal, so it runs without a log subscriber
    let command = args.get(1).map(String::as_str);
    if command.is_some() {
        logging::init(config.json_logs);
    }

    match command {
        Some("import") => run_import(&config, args.get(2))?,
        Some("consolidado") => run_consolidado(&config, args.get(2), args.get(3))?,
        Some("report") => run_report(&config, &args[2..])?,
        Some("export") => run_export(&config, args.get(2))?,
        Some("login") => run_login(&config, args.get(2), args.get(3))?,
        Some("logout") => run_logout(&config)?,
        Some("hash-password") => match args.get(2) {
            Some(password) => println!("{}", hash_password(password)),
            None => bail!("usage: membership-fees hash-password <password>"),
        },
        Some(other) => bail!("unknown command: {}", other),
        None => run_ui_mode(&config)?,
    }

    Ok(())
}

fn open_database(config: &AppConfig) -> Result<Connection> {
    let conn = Connection::open(&config.database_path)
        .with_context(|| format!("Failed to open {}", config.database_path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

fn require_session(config: &AppConfig, capability: Capability) -> Result<Session> {
    let Some(session) = SessionStore::new(&config.session_path).load() else {
        bail!("not signed in; run: membership-fees login <user> <password>");
    };
    require(Some(&session), capability)?;
    Ok(session)
}

fn run_import(config: &AppConfig, file: Option<&String>) -> Result<()> {
    let Some(file) = file else {
        bail!("usage: membership-fees import <participants.txt>");
    };
    require_session(config, Capability::ManageParticipants)?;

    println!("👥 Bulk participant upload");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let text = std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file))?;
    let conn = open_database(config)?;

    let inserted = import_bulk(&conn, &text)?;
    println!("✓ {} participantes cargados", inserted);
    println!("✓ Database contains {} participants", db::count_participants(&conn)?);

    Ok(())
}

fn run_consolidado(config: &AppConfig, code: Option<&String>, year: Option<&String>) -> Result<()> {
    let Some(code) = code else {
        bail!("usage: membership-fees consolidado <code> [year]");
    };
    let year = match year {
        Some(text) => text.parse().with_context(|| format!("invalid year: {}", text))?,
        None => Utc::now().year(),
    };
    require_session(config, Capability::ViewConsolidado)?;

    let conn = open_database(config)?;
    let participant = db::get_participant_by_code(&conn, code)?
        .with_context(|| format!("participant not found: {}", code))?;

    let view = Consolidado::load(&SqliteRepository::new(&conn), &participant, year, config.monthly_fee)?;
    let report = &view.report;

    println!("📒 {} - {} ({})", participant.code, participant.full_name, year);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for (key, paid) in report.months() {
        let mark = if paid { "✓" } else { "✗" };
        println!("  {} {}", mark, key.name());
    }
    println!();
    println!("  Meses pagados:    {}", report.paid_count);
    println!("  Meses pendientes: {}", report.unpaid_count);
    println!("  Total pagado:     {}", membership_fees::format_currency(report.total_paid));
    println!("  Total adeudado:   {}", membership_fees::format_currency(report.total_owed));

    let summary = view.paid_summary();
    if !summary.is_empty() {
        println!("\n  {}", summary);
    }

    Ok(())
}

fn run_report(config: &AppConfig, args: &[String]) -> Result<()> {
    let out = match args {
        [] => PathBuf::from(report_filename(Utc::now().date_naive())),
        [flag, path] if flag == "--out" => PathBuf::from(path),
        _ => bail!("usage: membership-fees report [--out <path>]"),
    };
    require_session(config, Capability::ViewReports)?;

    let conn = open_database(config)?;
    let payments = load_report(&SqliteRepository::new(&conn), &ReportFilter::default())?;
    let summary = ReportSummary::from_payments(&payments);

    export_report(&out, &payments)?;

    println!("📑 Reporte de pagos → {}", out.display());
    println!("  Pagos:          {}", summary.payment_count);
    println!("  Participantes:  {}", summary.unique_participants);
    println!("  Total:          {}", membership_fees::format_currency(summary.total_amount));

    Ok(())
}

fn run_export(config: &AppConfig, dir: Option<&String>) -> Result<()> {
    let dir = dir.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    require_session(config, Capability::ManageParticipants)?;

    let conn = open_database(config)?;
    let written = export_all(&SqliteRepository::new(&conn), &dir, Utc::now().date_naive())?;

    for path in written {
        println!("✓ {}", path.display());
    }
    Ok(())
}

fn run_login(config: &AppConfig, user: Option<&String>, password: Option<&String>) -> Result<()> {
    let (Some(user), Some(password)) = (user, password) else {
        bail!("usage: membership-fees login <user> <password>");
    };

    let table = load_credentials(&config.credentials_path)?;
    let session = SessionStore::new(&config.session_path).sign_in(&table, user, password)?;

    println!("✓ Bienvenido, {} ({})", session.full_name, session.role.label());
    Ok(())
}

fn run_logout(config: &AppConfig) -> Result<()> {
    SessionStore::new(&config.session_path).clear()?;
    println!("✓ Sesión cerrada");
    Ok(())
}

fn load_credentials(path: &Path) -> Result<CredentialTable> {
    if !path.exists() {
        bail!(
            "credentials file not found at {} (see credentials.example.json)",
            path.display()
        );
    }
    CredentialTable::from_file(path)
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &AppConfig) -> Result<()> {
    use membership_fees::{MonthKey, ParticipantFilter, PaymentFilter, PaymentRepository};

    require_session(config, Capability::ViewDashboard)?;

    let conn = open_database(config)?;
    let repo = SqliteRepository::new(&conn);
    let participants = repo.fetch_participants(&ParticipantFilter::all())?;
    let payments = repo.fetch_payments(&PaymentFilter::all())?;

    let mut app = membership_fees::ui::App::new(
        participants,
        payments,
        MonthKey::current(),
        config.monthly_fee,
    )?;
    membership_fees::ui::run_ui(&mut app)?;

    println!("\n✅ UI closed successfully");
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &AppConfig) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API: cargo run --bin fees-server --features server");
    std::process::exit(1);
}
