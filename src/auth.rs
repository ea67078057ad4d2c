// 🔐 Authentication - credential table, roles and the persisted session
//
// Passwords are never stored in clear: the table holds SHA-256 hex digests.
// Usernames match case-insensitively, passwords exactly.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// ROLES & CAPABILITIES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,

    #[serde(rename = "tutora")]
    Tutor,
}

/// Actions gated by role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ViewDashboard,
    ViewConsolidado,
    RegisterPayment,
    EditPayment,
    DeletePayment,
    ViewReports,
    ManageParticipants,
}

impl Role {
    pub fn allows(&self, capability: Capability) -> bool {
        match self {
            Role::Admin => true,
            Role::Tutor => !matches!(
                capability,
                Capability::DeletePayment | Capability::ViewReports | Capability::ManageParticipants
            ),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Tutor => "tutora",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Usuario o contraseña incorrectos")]
    InvalidCredentials,

    #[error("Error al guardar datos de usuario")]
    SessionSave,

    #[error("Sesión requerida")]
    NotSignedIn,

    #[error("Permiso denegado para el rol {0}")]
    Forbidden(&'static str),
}

/// Fail unless `session` exists and its role grants `capability`
pub fn require(session: Option<&Session>, capability: Capability) -> Result<&Session, AuthError> {
    let session = session.ok_or(AuthError::NotSignedIn)?;
    if session.role.allows(capability) {
        Ok(session)
    } else {
        Err(AuthError::Forbidden(session.role.label()))
    }
}

// ============================================================================
// CREDENTIALS
// ============================================================================

pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,

    /// SHA-256 hex digest of the password
    pub password_hash: String,

    pub role: Role,
    pub full_name: String,
}

impl Credential {
    pub fn new(username: &str, password: &str, role: Role, full_name: &str) -> Self {
        Credential {
            username: username.to_string(),
            password_hash: hash_password(password),
            role,
            full_name: full_name.to_string(),
        }
    }

    fn verify(&self, username: &str, password: &str) -> bool {
        self.username.eq_ignore_ascii_case(username.trim())
            && self.password_hash.eq_ignore_ascii_case(&hash_password(password))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub username: String,
    pub role: Role,
    pub full_name: String,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Where sign-in requests are checked
pub trait AuthProvider: Send + Sync {
    fn authenticate(&self, username: &str, password: &str) -> Result<Session, AuthError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialTable {
    pub users: Vec<Credential>,
}

impl CredentialTable {
    pub fn from_credentials(users: Vec<Credential>) -> Self {
        CredentialTable { users }
    }

    /// Load a JSON table: `{ "users": [{ "username", "password_hash", "role", "full_name" }] }`
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials from {}", path.display()))?;
        let table: CredentialTable = serde_json::from_str(&text)
            .with_context(|| format!("Invalid credentials file {}", path.display()))?;

        tracing::info!(users = table.users.len(), path = %path.display(), "credentials loaded");
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl AuthProvider for CredentialTable {
    fn authenticate(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        let user = self
            .users
            .iter()
            .find(|c| c.verify(username, password))
            .ok_or(AuthError::InvalidCredentials)?;

        tracing::info!(user = %user.username, role = user.role.label(), "signed in");
        Ok(Session {
            username: user.username.clone(),
            role: user.role,
            full_name: user.full_name.clone(),
        })
    }
}

// ============================================================================
// SESSION STORE
// ============================================================================

/// File-backed session, one JSON document
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SessionStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saved session, if any. A corrupt file is removed and treated as signed out.
    pub fn load(&self) -> Option<Session> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&text) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "discarding corrupt session");
                std::fs::remove_file(&self.path).ok();
                None
            }
        }
    }

    pub fn save(&self, session: &Session) -> Result<(), AuthError> {
        let json = serde_json::to_string_pretty(session).map_err(|_| AuthError::SessionSave)?;
        std::fs::write(&self.path, json).map_err(|e| {
            tracing::error!(path = %self.path.display(), error = %e, "session save failed");
            AuthError::SessionSave
        })
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }

    /// Authenticate and persist the session
    pub fn sign_in(
        &self,
        provider: &dyn AuthProvider,
        username: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let session = provider.authenticate(username, password)?;
        self.save(&session)?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_table() -> CredentialTable {
        CredentialTable::from_credentials(vec![
            Credential::new("Admin", "secreto", Role::Admin, "Administrador"),
            Credential::new("Sgalindo", "S2025", Role::Tutor, "Sandra Galindo"),
        ])
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{}-{}.json", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_hash_password_is_hex_sha256() {
        let hash = hash_password("secreto");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(hash, hash_password("Secreto"));
    }

    #[test]
    fn test_authenticate_case_insensitive_username() {
        let table = create_test_table();

        let session = table.authenticate("admin", "secreto").unwrap();
        assert_eq!(session.username, "Admin");
        assert!(session.is_admin());

        assert_eq!(
            table.authenticate("Admin", "SECRETO"),
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(
            AuthError::InvalidCredentials.to_string(),
            "Usuario o contraseña incorrectos"
        );
    }

    #[test]
    fn test_role_capabilities() {
        assert!(Role::Admin.allows(Capability::DeletePayment));
        assert!(Role::Admin.allows(Capability::ViewReports));
        assert!(Role::Tutor.allows(Capability::RegisterPayment));
        assert!(Role::Tutor.allows(Capability::EditPayment));
        assert!(!Role::Tutor.allows(Capability::DeletePayment));
        assert!(!Role::Tutor.allows(Capability::ManageParticipants));

        let tutor = create_test_table().authenticate("sgalindo", "S2025").unwrap();
        assert!(require(Some(&tutor), Capability::ViewConsolidado).is_ok());
        assert_eq!(
            require(Some(&tutor), Capability::ViewReports),
            Err(AuthError::Forbidden("tutora"))
        );
        assert_eq!(
            require(None, Capability::ViewDashboard),
            Err(AuthError::NotSignedIn)
        );
    }

    #[test]
    fn test_role_serde_names() {
        assert_eq!(serde_json::to_string(&Role::Tutor).unwrap(), "\"tutora\"");
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        let role: Role = serde_json::from_str("\"tutora\"").unwrap();
        assert_eq!(role, Role::Tutor);
    }

    #[test]
    fn test_credentials_file_round_trip() {
        let path = temp_path("fees-credentials");
        let table = create_test_table();
        std::fs::write(&path, serde_json::to_string(&table).unwrap()).unwrap();

        let loaded = CredentialTable::from_file(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.authenticate("SGALINDO", "S2025").is_ok());

        std::fs::remove_file(&path).ok();
        assert!(CredentialTable::from_file(&path).is_err());
    }

    #[test]
    fn test_session_store_lifecycle() {
        let store = SessionStore::new(temp_path("fees-session"));
        assert!(store.load().is_none());

        let session = store.sign_in(&create_test_table(), "Admin", "secreto").unwrap();
        assert_eq!(store.load(), Some(session));

        store.clear().unwrap();
        assert!(store.load().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn test_corrupt_session_is_discarded() {
        let store = SessionStore::new(temp_path("fees-session"));
        std::fs::write(store.path(), "{not json").unwrap();

        assert!(store.load().is_none());
        assert!(!store.path().exists());
    }
}
