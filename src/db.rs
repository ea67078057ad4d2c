use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::month::MonthKey;
use crate::repository::{ParticipantFilter, PaymentFilter};

/// Fixed monthly fee owed by every participant
pub const DEFAULT_MONTHLY_FEE: f64 = 3000.0;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Current time at the precision the store keeps (microseconds)
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

// ============================================================================
// PARTICIPANT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,

    /// Short human code, unique across participants (e.g. "P001")
    pub code: String,

    pub full_name: String,

    pub is_active: bool,

    #[serde(default = "default_monthly_fee")]
    pub monthly_fee: f64,

    pub created_at: DateTime<Utc>,
}

fn default_monthly_fee() -> f64 {
    DEFAULT_MONTHLY_FEE
}

impl Participant {
    /// New active participant with the system-wide fee
    pub fn new(code: &str, full_name: &str) -> Self {
        Participant {
            id: uuid::Uuid::new_v4().to_string(),
            code: code.trim().to_string(),
            full_name: full_name.trim().to_string(),
            is_active: true,
            monthly_fee: DEFAULT_MONTHLY_FEE,
            created_at: now(),
        }
    }

    pub fn status_label(&self) -> &'static str {
        if self.is_active {
            "Activo"
        } else {
            "Inactivo"
        }
    }
}

// ============================================================================
// PAYMENT RECORD
// ============================================================================

/// One payment row: a participant settling one month key.
///
/// A single receipt covering several participants or months is stored as
/// several rows sharing `receipt_number`, each carrying its share of the amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: String,
    pub participant_id: String,

    /// Month key text, "YYYY-MM"
    pub month: String,

    pub amount: f64,

    /// Date the money was received (not the month it settles)
    pub payment_date: NaiveDate,

    pub receipt_number: String,

    #[serde(default)]
    pub observations: Option<String>,

    pub created_by: String,
    pub created_at: DateTime<Utc>,

    /// Owning participant, filled in by joined queries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<Participant>,
}

impl PaymentRecord {
    pub fn new(
        participant_id: &str,
        month: MonthKey,
        amount: f64,
        payment_date: NaiveDate,
        receipt_number: &str,
        created_by: &str,
    ) -> Self {
        PaymentRecord {
            id: uuid::Uuid::new_v4().to_string(),
            participant_id: participant_id.to_string(),
            month: month.to_string(),
            amount,
            payment_date,
            receipt_number: receipt_number.trim().to_string(),
            observations: None,
            created_by: created_by.to_string(),
            created_at: now(),
            participant: None,
        }
    }

    pub fn with_observations(mut self, observations: Option<String>) -> Self {
        self.observations = observations.filter(|o| !o.trim().is_empty());
        self
    }

    /// Parsed month key, None when the stored text is malformed
    pub fn month_key(&self) -> Option<MonthKey> {
        MonthKey::parse(&self.month)
    }

    /// Participant code when joined, else the raw participant id
    pub fn participant_code(&self) -> &str {
        self.participant
            .as_ref()
            .map(|p| p.code.as_str())
            .unwrap_or(&self.participant_id)
    }

    pub fn participant_name(&self) -> &str {
        self.participant
            .as_ref()
            .map(|p| p.full_name.as_str())
            .unwrap_or("")
    }

    /// Observations as display text, never None
    pub fn observations_text(&self) -> &str {
        self.observations.as_deref().unwrap_or("")
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; foreign keys so deleting a participant drops its payments
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS participants (
            id TEXT PRIMARY KEY,
            code TEXT UNIQUE NOT NULL,
            full_name TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            monthly_fee REAL NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            participant_id TEXT NOT NULL REFERENCES participants(id) ON DELETE CASCADE,
            month TEXT NOT NULL,
            amount REAL NOT NULL,
            payment_date TEXT NOT NULL,
            receipt_number TEXT NOT NULL,
            observations TEXT,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_participant ON payments(participant_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_month ON payments(month)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_receipt ON payments(receipt_number)",
        [],
    )?;

    Ok(())
}

// Timestamps are stored with fixed precision so text order matches time order
fn timestamp_text(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_date(idx: usize, text: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ============================================================================
// PARTICIPANTS
// ============================================================================

const PARTICIPANT_COLUMNS: &str = "id, code, full_name, is_active, monthly_fee, created_at";

fn participant_from_row(row: &Row, offset: usize) -> rusqlite::Result<Participant> {
    let created_at: String = row.get(offset + 5)?;

    Ok(Participant {
        id: row.get(offset)?,
        code: row.get(offset + 1)?,
        full_name: row.get(offset + 2)?,
        is_active: row.get(offset + 3)?,
        monthly_fee: row.get(offset + 4)?,
        created_at: parse_timestamp(offset + 5, &created_at)?,
    })
}

pub fn insert_participant(conn: &Connection, participant: &Participant) -> Result<()> {
    conn.execute(
        "INSERT INTO participants (id, code, full_name, is_active, monthly_fee, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            participant.id,
            participant.code,
            participant.full_name,
            participant.is_active,
            participant.monthly_fee,
            timestamp_text(&participant.created_at),
        ],
    )
    .with_context(|| format!("Failed to insert participant {}", participant.code))?;

    tracing::info!(code = %participant.code, "participant created");
    Ok(())
}

/// Insert a batch of participants in one transaction
pub fn insert_participants(conn: &Connection, participants: &[Participant]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    for participant in participants {
        insert_participant(&tx, participant)?;
    }
    tx.commit()?;

    tracing::info!(count = participants.len(), "participants imported");
    Ok(participants.len())
}

pub fn update_participant(conn: &Connection, participant: &Participant) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE participants
         SET code = ?2, full_name = ?3, is_active = ?4, monthly_fee = ?5
         WHERE id = ?1",
        params![
            participant.id,
            participant.code,
            participant.full_name,
            participant.is_active,
            participant.monthly_fee,
        ],
    )?;

    Ok(changed > 0)
}

/// Hard delete; the participant's payments go with it
pub fn delete_participant(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn.execute("DELETE FROM participants WHERE id = ?1", params![id])?;
    if changed > 0 {
        tracing::info!(participant_id = %id, "participant deleted");
    }
    Ok(changed > 0)
}

pub fn get_participant(conn: &Connection, id: &str) -> Result<Option<Participant>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM participants WHERE id = ?1",
        PARTICIPANT_COLUMNS
    ))?;

    let mut rows = stmt.query_map(params![id], |row| participant_from_row(row, 0))?;
    Ok(rows.next().transpose()?)
}

/// Codes are matched exactly, like the UNIQUE constraint on the column
pub fn get_participant_by_code(conn: &Connection, code: &str) -> Result<Option<Participant>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM participants WHERE code = ?1",
        PARTICIPANT_COLUMNS
    ))?;

    let mut rows = stmt.query_map(params![code.trim()], |row| participant_from_row(row, 0))?;
    Ok(rows.next().transpose()?)
}

pub fn query_participants(conn: &Connection, filter: &ParticipantFilter) -> Result<Vec<Participant>> {
    let mut sql = format!("SELECT {} FROM participants", PARTICIPANT_COLUMNS);
    let mut values: Vec<Value> = Vec::new();

    if let Some(active) = filter.active {
        sql.push_str(" WHERE is_active = ?1");
        values.push(Value::Integer(active as i64));
    }
    sql.push_str(" ORDER BY code");

    let mut stmt = conn.prepare(&sql)?;
    let participants = stmt
        .query_map(params_from_iter(values.iter()), |row| participant_from_row(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(participants)
}

/// Codes from `codes` that already exist in the store
pub fn find_existing_codes(conn: &Connection, codes: &[String]) -> Result<Vec<String>> {
    if codes.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; codes.len()].join(", ");
    let sql = format!(
        "SELECT code FROM participants WHERE code IN ({}) ORDER BY code",
        placeholders
    );

    let mut stmt = conn.prepare(&sql)?;
    let existing = stmt
        .query_map(params_from_iter(codes.iter()), |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;

    Ok(existing)
}

pub fn count_participants(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM participants", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// PAYMENTS
// ============================================================================

const PAYMENT_SELECT: &str = "SELECT
        p.id, p.participant_id, p.month, p.amount, p.payment_date,
        p.receipt_number, p.observations, p.created_by, p.created_at,
        pt.id, pt.code, pt.full_name, pt.is_active, pt.monthly_fee, pt.created_at
     FROM payments p
     LEFT JOIN participants pt ON pt.id = p.participant_id";

fn payment_from_row(row: &Row) -> rusqlite::Result<PaymentRecord> {
    let payment_date: String = row.get(4)?;
    let created_at: String = row.get(8)?;
    let joined_id: Option<String> = row.get(9)?;

    let participant = match joined_id {
        Some(_) => Some(participant_from_row(row, 9)?),
        None => None,
    };

    Ok(PaymentRecord {
        id: row.get(0)?,
        participant_id: row.get(1)?,
        month: row.get(2)?,
        amount: row.get(3)?,
        payment_date: parse_date(4, &payment_date)?,
        receipt_number: row.get(5)?,
        observations: row.get(6)?,
        created_by: row.get(7)?,
        created_at: parse_timestamp(8, &created_at)?,
        participant,
    })
}

fn insert_payment_row(conn: &Connection, payment: &PaymentRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO payments (
            id, participant_id, month, amount, payment_date,
            receipt_number, observations, created_by, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            payment.id,
            payment.participant_id,
            payment.month,
            payment.amount,
            payment.payment_date.format(DATE_FORMAT).to_string(),
            payment.receipt_number,
            payment.observations,
            payment.created_by,
            timestamp_text(&payment.created_at),
        ],
    )
    .with_context(|| {
        format!(
            "Failed to insert payment for {} ({})",
            payment.participant_id, payment.month
        )
    })?;

    Ok(())
}

/// Insert all rows of one registration
pub fn insert_payments(conn: &Connection, payments: &[PaymentRecord]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    for payment in payments {
        insert_payment_row(&tx, payment)?;
    }
    tx.commit()?;

    tracing::info!(rows = payments.len(), "payments inserted");
    Ok(payments.len())
}

pub fn update_payment(conn: &Connection, payment: &PaymentRecord) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE payments
         SET participant_id = ?2, month = ?3, amount = ?4, payment_date = ?5,
             receipt_number = ?6, observations = ?7, created_by = ?8
         WHERE id = ?1",
        params![
            payment.id,
            payment.participant_id,
            payment.month,
            payment.amount,
            payment.payment_date.format(DATE_FORMAT).to_string(),
            payment.receipt_number,
            payment.observations,
            payment.created_by,
        ],
    )?;

    if changed > 0 {
        tracing::info!(payment_id = %payment.id, "payment updated");
    }
    Ok(changed > 0)
}

pub fn delete_payment(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn.execute("DELETE FROM payments WHERE id = ?1", params![id])?;
    if changed > 0 {
        tracing::info!(payment_id = %id, "payment deleted");
    }
    Ok(changed > 0)
}

pub fn get_payment(conn: &Connection, id: &str) -> Result<Option<PaymentRecord>> {
    let sql = format!("{} WHERE p.id = ?1", PAYMENT_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params![id], payment_from_row)?;
    Ok(rows.next().transpose()?)
}

/// Payments matching `filter`, newest first, with the owning participant joined
pub fn query_payments(conn: &Connection, filter: &PaymentFilter) -> Result<Vec<PaymentRecord>> {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(participant_id) = &filter.participant_id {
        values.push(Value::Text(participant_id.clone()));
        clauses.push(format!("p.participant_id = ?{}", values.len()));
    }

    if let Some(ids) = &filter.participant_ids {
        if ids.is_empty() {
            clauses.push("0".to_string());
        } else {
            let mut placeholders = Vec::with_capacity(ids.len());
            for id in ids {
                values.push(Value::Text(id.clone()));
                placeholders.push(format!("?{}", values.len()));
            }
            clauses.push(format!("p.participant_id IN ({})", placeholders.join(", ")));
        }
    }

    if let Some(month) = &filter.month {
        values.push(Value::Text(month.clone()));
        clauses.push(format!("p.month = ?{}", values.len()));
    }

    if let Some(prefix) = &filter.year_prefix {
        values.push(Value::Text(format!("{}-%", prefix.trim_end_matches('-'))));
        clauses.push(format!("p.month LIKE ?{}", values.len()));
    }

    if let Some((from, to)) = &filter.date_range {
        values.push(Value::Text(from.format(DATE_FORMAT).to_string()));
        values.push(Value::Text(to.format(DATE_FORMAT).to_string()));
        clauses.push(format!(
            "p.payment_date BETWEEN ?{} AND ?{}",
            values.len() - 1,
            values.len()
        ));
    }

    let mut sql = PAYMENT_SELECT.to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY p.created_at DESC, p.id");

    tracing::debug!(%sql, "querying payments");

    let mut stmt = conn.prepare(&sql)?;
    let payments = stmt
        .query_map(params_from_iter(values.iter()), payment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(payments)
}

pub fn count_payments(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM payments", [], |row| row.get(0))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(text: &str) -> NaiveDate {
        NaiveDate::parse_from_str(text, DATE_FORMAT).unwrap()
    }

    fn open_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn create_test_payment(participant: &Participant, month: &str, receipt: &str) -> PaymentRecord {
        PaymentRecord::new(
            &participant.id,
            MonthKey::parse(month).unwrap(),
            3000.0,
            date("2025-03-10"),
            receipt,
            "Admin",
        )
    }

    #[test]
    fn test_participant_crud() {
        let conn = open_test_db();
        let mut participant = Participant::new("P001", "Juan Pérez");

        insert_participant(&conn, &participant).unwrap();
        assert_eq!(count_participants(&conn).unwrap(), 1);

        let loaded = get_participant(&conn, &participant.id).unwrap().unwrap();
        assert_eq!(loaded.code, "P001");
        assert_eq!(loaded.full_name, "Juan Pérez");
        assert!(loaded.is_active);
        assert_eq!(loaded.monthly_fee, DEFAULT_MONTHLY_FEE);

        participant.is_active = false;
        participant.full_name = "Juan P. Pérez".to_string();
        assert!(update_participant(&conn, &participant).unwrap());

        let by_code = get_participant_by_code(&conn, " P001 ").unwrap().unwrap();
        assert_eq!(by_code.full_name, "Juan P. Pérez");
        assert!(!by_code.is_active);

        assert!(delete_participant(&conn, &participant.id).unwrap());
        assert!(get_participant(&conn, &participant.id).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_code_rejected() {
        let conn = open_test_db();
        insert_participant(&conn, &Participant::new("P001", "Juan")).unwrap();
        assert!(insert_participant(&conn, &Participant::new("P001", "Otro")).is_err());
    }

    #[test]
    fn test_query_participants_active_filter() {
        let conn = open_test_db();
        let mut inactive = Participant::new("P002", "María");
        inactive.is_active = false;
        insert_participants(
            &conn,
            &[Participant::new("P003", "Carlos"), inactive, Participant::new("P001", "Juan")],
        )
        .unwrap();

        let all = query_participants(&conn, &ParticipantFilter::default()).unwrap();
        let codes: Vec<&str> = all.iter().map(|p| p.code.as_str()).collect();
        assert_eq!(codes, vec!["P001", "P002", "P003"]);

        let active = query_participants(&conn, &ParticipantFilter::active()).unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|p| p.is_active));
    }

    #[test]
    fn test_find_existing_codes() {
        let conn = open_test_db();
        insert_participant(&conn, &Participant::new("P001", "Juan")).unwrap();

        let existing =
            find_existing_codes(&conn, &["P001".to_string(), "P009".to_string()]).unwrap();
        assert_eq!(existing, vec!["P001".to_string()]);
        assert!(find_existing_codes(&conn, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_payments_join_participant() {
        let conn = open_test_db();
        let participant = Participant::new("P001", "Juan");
        insert_participant(&conn, &participant).unwrap();

        let payment = create_test_payment(&participant, "2025-01", "R-1")
            .with_observations(Some("efectivo".to_string()));
        insert_payments(&conn, &[payment.clone()]).unwrap();

        let loaded = get_payment(&conn, &payment.id).unwrap().unwrap();
        assert_eq!(loaded.month, "2025-01");
        assert_eq!(loaded.payment_date, date("2025-03-10"));
        assert_eq!(loaded.observations_text(), "efectivo");
        assert_eq!(loaded.participant_code(), "P001");
        assert_eq!(loaded.created_at, payment.created_at);
    }

    #[test]
    fn test_query_payments_filters() {
        let conn = open_test_db();
        let juan = Participant::new("P001", "Juan");
        let maria = Participant::new("P002", "María");
        insert_participants(&conn, &[juan.clone(), maria.clone()]).unwrap();

        let mut late = create_test_payment(&maria, "2024-12", "R-2");
        late.payment_date = date("2024-12-20");

        insert_payments(
            &conn,
            &[
                create_test_payment(&juan, "2025-01", "R-1"),
                create_test_payment(&juan, "2025-02", "R-1"),
                late,
            ],
        )
        .unwrap();

        let by_participant = query_payments(&conn, &PaymentFilter::for_participant(&juan.id)).unwrap();
        assert_eq!(by_participant.len(), 2);

        let by_month = query_payments(
            &conn,
            &PaymentFilter {
                month: Some("2025-02".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(by_month.len(), 1);

        let by_year = query_payments(
            &conn,
            &PaymentFilter {
                year_prefix: Some("2024".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(by_year.len(), 1);
        assert_eq!(by_year[0].participant_code(), "P002");

        let by_ids = query_payments(
            &conn,
            &PaymentFilter {
                participant_ids: Some(vec![juan.id.clone(), maria.id.clone()]),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(by_ids.len(), 3);

        let none = query_payments(
            &conn,
            &PaymentFilter {
                participant_ids: Some(vec![]),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(none.is_empty());

        let by_dates = query_payments(
            &conn,
            &PaymentFilter {
                date_range: Some((date("2025-01-01"), date("2025-12-31"))),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(by_dates.len(), 2);
    }

    #[test]
    fn test_delete_participant_cascades_payments() {
        let conn = open_test_db();
        let participant = Participant::new("P001", "Juan");
        insert_participant(&conn, &participant).unwrap();
        insert_payments(&conn, &[create_test_payment(&participant, "2025-01", "R-1")]).unwrap();
        assert_eq!(count_payments(&conn).unwrap(), 1);

        delete_participant(&conn, &participant.id).unwrap();
        assert_eq!(count_payments(&conn).unwrap(), 0);
    }

    #[test]
    fn test_update_and_delete_payment() {
        let conn = open_test_db();
        let participant = Participant::new("P001", "Juan");
        insert_participant(&conn, &participant).unwrap();

        let mut payment = create_test_payment(&participant, "2025-01", "R-1");
        insert_payments(&conn, &[payment.clone()]).unwrap();

        payment.month = "2025-04".to_string();
        payment.amount = 1500.0;
        assert!(update_payment(&conn, &payment).unwrap());

        let loaded = get_payment(&conn, &payment.id).unwrap().unwrap();
        assert_eq!(loaded.month, "2025-04");
        assert_eq!(loaded.amount, 1500.0);

        assert!(delete_payment(&conn, &payment.id).unwrap());
        assert!(!delete_payment(&conn, &payment.id).unwrap());
    }
}
