// Membership Fees - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod month;
pub mod db;
pub mod repository;
pub mod reconciliation; // Month-status reconciler
pub mod grouping;       // Receipt grouper
pub mod formatting;     // Consecutive-month formatter + locale helpers
pub mod payments;
pub mod participants;
pub mod dashboard;
pub mod consolidado;
pub mod reports;
pub mod auth;
pub mod config;
pub mod logging;

#[cfg(feature = "tui")]
pub mod ui;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use month::{month_name, MonthKey, MONTH_NAMES};
pub use db::{setup_database, Participant, PaymentRecord, DEFAULT_MONTHLY_FEE};
pub use repository::{
    InMemoryRepository, ParticipantFilter, PaymentFilter, PaymentRepository, SqliteRepository,
};
pub use reconciliation::{reconcile_months, MonthStatusReport, ReconciliationEngine};
pub use grouping::{group_by_key, group_by_participant, group_by_receipt, GroupKey, GroupedPayment};
pub use formatting::{format_consecutive_months, format_currency};
pub use payments::{register_payment, PaymentDraft, PaymentEdit, PaymentError};
pub use participants::{import_bulk, parse_bulk_text, ParticipantError, BULK_TEMPLATE};
pub use dashboard::{DashboardStats, ManagementStats};
pub use consolidado::Consolidado;
pub use reports::{ReceiptRow, ReportFilter, ReportSummary};
pub use auth::{AuthError, AuthProvider, CredentialTable, Role, Session, SessionStore};
pub use config::AppConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
