// 🌐 HTTP API - axum router over the shared SQLite connection
//
// Every route except /health and /login needs `Authorization: Bearer <token>`
// where the token comes from POST /login. Tokens expire after the session TTL.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Datelike, Duration, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;

use crate::auth::{require, AuthError, AuthProvider, Capability, Session};
use crate::config::DEFAULT_SESSION_TTL_HOURS;
use crate::consolidado::Consolidado;
use crate::dashboard::{load_dashboard, load_management, DashboardStats, ManagementStats};
use crate::db::{self, Participant, PaymentRecord};
use crate::grouping::{group_payments, GroupKey, GroupedPayment};
use crate::month::MonthKey;
use crate::participants::{import_bulk, search_participants, ParticipantError};
use crate::payments::{edit_payment, paid_months_for, register_payment, PaymentDraft, PaymentEdit, PaymentError};
use crate::reports::{
    load_report, receipt_rows, report_filename, write_payments_report, ReceiptRow, ReportFilter,
    ReportSummary,
};
use crate::repository::{ParticipantFilter, PaymentFilter, PaymentRepository, SqliteRepository};

/// A bearer token's session and when it was handed out
#[derive(Debug, Clone)]
struct IssuedToken {
    session: Session,
    issued_at: DateTime<Utc>,
}

impl IssuedToken {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.issued_at >= ttl
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub auth: Arc<dyn AuthProvider>,
    sessions: Arc<Mutex<HashMap<String, IssuedToken>>>,
    session_ttl: Duration,
    pub monthly_fee: f64,
}

impl AppState {
    pub fn new(conn: Connection, auth: Arc<dyn AuthProvider>, monthly_fee: f64) -> Self {
        AppState {
            db: Arc::new(Mutex::new(conn)),
            auth,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            session_ttl: Duration::hours(DEFAULT_SESSION_TTL_HOURS),
            monthly_fee,
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::Internal("database lock poisoned".to_string()))
    }

    fn sessions(&self) -> Result<MutexGuard<'_, HashMap<String, IssuedToken>>, ApiError> {
        self.sessions
            .lock()
            .map_err(|_| ApiError::Internal("session lock poisoned".to_string()))
    }

    fn session(&self, headers: &HeaderMap) -> Result<Session, ApiError> {
        let token = bearer_token(headers)?;
        let sessions = self.sessions()?;

        match sessions.get(token) {
            Some(issued) if !issued.is_expired(Utc::now(), self.session_ttl) => {
                Ok(issued.session.clone())
            }
            _ => Err(ApiError::Auth(AuthError::NotSignedIn)),
        }
    }

    fn authorize(&self, headers: &HeaderMap, capability: Capability) -> Result<Session, ApiError> {
        let session = self.session(headers)?;
        require(Some(&session), capability)?;
        Ok(session)
    }
}

/// API Response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Auth(AuthError),
    Internal(String),
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::Auth(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        if let Some(err) = e.downcast_ref::<PaymentError>() {
            return match err {
                PaymentError::NotFound(_) => ApiError::NotFound(err.to_string()),
                _ => ApiError::BadRequest(err.to_string()),
            };
        }
        if let Some(err) = e.downcast_ref::<ParticipantError>() {
            return ApiError::BadRequest(err.to_string());
        }
        ApiError::Internal(format!("{:#}", e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Auth(e @ AuthError::Forbidden(_)) => (StatusCode::FORBIDDEN, e.to_string()),
            ApiError::Auth(e) => (StatusCode::UNAUTHORIZED, e.to_string()),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(ApiError::Auth(AuthError::NotSignedIn))
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub session: Session,
}

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    pub month: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ParticipantQuery {
    pub search: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct BulkUploadRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct YearQuery {
    pub year: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct GroupQuery {
    /// "receipt" (default) or "participant"
    pub group: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaidMonthsQuery {
    /// Comma-separated participant ids
    pub participant_ids: String,
    pub year: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportResponse {
    pub summary: ReportSummary,
    pub receipts: Vec<ReceiptRow>,
}

fn current_year() -> i32 {
    Utc::now().year()
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> Json<ApiResponse<&'static str>> {
    ApiResponse::ok("OK")
}

/// POST /api/login - Exchange credentials for a bearer token
async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> ApiResult<LoginResponse> {
    let session = state.auth.authenticate(&req.username, &req.password)?;
    let token = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();

    let mut sessions = state
        .sessions
        .lock()
        .map_err(|_| ApiError::Auth(AuthError::SessionSave))?;
    sessions.retain(|_, issued| !issued.is_expired(now, state.session_ttl));
    sessions.insert(
        token.clone(),
        IssuedToken {
            session: session.clone(),
            issued_at: now,
        },
    );

    Ok(ApiResponse::ok(LoginResponse { token, session }))
}

/// POST /api/logout - Drop the caller's token
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<bool> {
    state.session(&headers)?;
    let token = bearer_token(&headers)?;
    state.sessions()?.remove(token);
    Ok(ApiResponse::ok(true))
}

/// GET /api/dashboard?month=YYYY-MM
async fn dashboard(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DashboardQuery>,
) -> ApiResult<DashboardStats> {
    state.authorize(&headers, Capability::ViewDashboard)?;

    let month = match query.month.as_deref() {
        Some(text) => MonthKey::parse(text)
            .ok_or_else(|| ApiError::BadRequest(format!("Mes inválido: {}", text)))?,
        None => MonthKey::current(),
    };

    let conn = state.conn()?;
    let stats = load_dashboard(&SqliteRepository::new(&conn), month, state.monthly_fee)?;
    Ok(ApiResponse::ok(stats))
}

/// GET /api/management - Participant and payment totals (admin)
async fn management(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<ManagementStats> {
    state.authorize(&headers, Capability::ManageParticipants)?;
    let conn = state.conn()?;
    Ok(ApiResponse::ok(load_management(&SqliteRepository::new(&conn))?))
}

/// GET /api/participants?search=&active=
async fn list_participants(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ParticipantQuery>,
) -> ApiResult<Vec<Participant>> {
    state.authorize(&headers, Capability::ViewConsolidado)?;

    let conn = state.conn()?;
    let participants = db::query_participants(&conn, &ParticipantFilter { active: query.active })?;
    let found = search_participants(&participants, query.search.as_deref().unwrap_or(""))
        .into_iter()
        .cloned()
        .collect();

    Ok(ApiResponse::ok(found))
}

/// POST /api/participants/bulk - "code,name" lines (admin)
async fn bulk_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BulkUploadRequest>,
) -> ApiResult<usize> {
    state.authorize(&headers, Capability::ManageParticipants)?;
    let conn = state.conn()?;
    Ok(ApiResponse::ok(import_bulk(&conn, &req.text)?))
}

/// GET /api/consolidado/:code?year=
async fn consolidado(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(code): Path<String>,
    Query(query): Query<YearQuery>,
) -> ApiResult<Consolidado> {
    state.authorize(&headers, Capability::ViewConsolidado)?;

    let decoded = urlencoding::decode(&code)
        .unwrap_or_else(|_| code.clone().into())
        .into_owned();

    let conn = state.conn()?;
    let participant = db::get_participant_by_code(&conn, &decoded)?
        .ok_or_else(|| ApiError::NotFound(format!("Participante no encontrado: {}", decoded)))?;

    let view = Consolidado::load(
        &SqliteRepository::new(&conn),
        &participant,
        query.year.unwrap_or_else(current_year),
        state.monthly_fee,
    )?;
    Ok(ApiResponse::ok(view))
}

/// GET /api/payments?group=receipt|participant
async fn list_payments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<GroupQuery>,
) -> ApiResult<Vec<GroupedPayment>> {
    state.authorize(&headers, Capability::ViewDashboard)?;

    let key = match query.group.as_deref() {
        None | Some("receipt") => GroupKey::ReceiptNumber,
        Some("participant") => GroupKey::Participant,
        Some(other) => return Err(ApiError::BadRequest(format!("Agrupación inválida: {}", other))),
    };

    let conn = state.conn()?;
    let payments = SqliteRepository::new(&conn).fetch_payments(&PaymentFilter::all())?;
    Ok(ApiResponse::ok(group_payments(&payments, key)))
}

/// GET /api/payments/paid-months?participant_ids=a,b&year=
async fn paid_months(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PaidMonthsQuery>,
) -> ApiResult<Vec<u32>> {
    state.authorize(&headers, Capability::RegisterPayment)?;

    let ids: Vec<String> = query
        .participant_ids
        .split(',')
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    let year = query.year.unwrap_or_else(current_year);

    let conn = state.conn()?;
    let payments = db::query_payments(&conn, &PaymentFilter::for_participants_in_year(&ids, year))?;
    Ok(ApiResponse::ok(paid_months_for(&ids, year, &payments).into_iter().collect()))
}

/// POST /api/payments - Register one receipt
async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(draft): Json<PaymentDraft>,
) -> Result<(StatusCode, Json<ApiResponse<Vec<PaymentRecord>>>), ApiError> {
    let session = state.authorize(&headers, Capability::RegisterPayment)?;
    let conn = state.conn()?;
    let rows = register_payment(&conn, &draft, &session.username)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(rows)))
}

/// PUT /api/payments/:id - Edit one row
async fn update_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(edit): Json<PaymentEdit>,
) -> ApiResult<PaymentRecord> {
    let session = state.authorize(&headers, Capability::EditPayment)?;
    let conn = state.conn()?;
    Ok(ApiResponse::ok(edit_payment(&conn, &id, &edit, &session.username)?))
}

/// DELETE /api/payments/:id (admin)
async fn delete_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<bool> {
    state.authorize(&headers, Capability::DeletePayment)?;
    let conn = state.conn()?;
    if !db::delete_payment(&conn, &id)? {
        return Err(ApiError::NotFound(format!("Pago no encontrado: {}", id)));
    }
    Ok(ApiResponse::ok(true))
}

/// GET /api/reports?start_date&end_date&participant_id&month (admin)
async fn report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filter): Query<ReportFilter>,
) -> ApiResult<ReportResponse> {
    state.authorize(&headers, Capability::ViewReports)?;

    let conn = state.conn()?;
    let payments = load_report(&SqliteRepository::new(&conn), &filter)?;

    Ok(ApiResponse::ok(ReportResponse {
        summary: ReportSummary::from_payments(&payments),
        receipts: receipt_rows(&payments),
    }))
}

/// GET /api/reports/csv - Same filter, as a download (admin)
async fn report_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filter): Query<ReportFilter>,
) -> Result<Response, ApiError> {
    state.authorize(&headers, Capability::ViewReports)?;

    let payments = {
        let conn = state.conn()?;
        load_report(&SqliteRepository::new(&conn), &filter)?
    };

    let mut body = Vec::new();
    write_payments_report(&mut body, &payments)?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        report_filename(Utc::now().date_naive())
    );
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

// ============================================================================
// Router
// ============================================================================

pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/dashboard", get(dashboard))
        .route("/management", get(management))
        .route("/participants", get(list_participants))
        .route("/participants/bulk", post(bulk_upload))
        .route("/consolidado/:code", get(consolidado))
        .route("/payments", get(list_payments).post(create_payment))
        .route("/payments/paid-months", get(paid_months))
        .route("/payments/:id", put(update_payment).delete(delete_payment))
        .route("/reports", get(report))
        .route("/reports/csv", get(report_csv))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}
