use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DerivaError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Definition error in '{definition}': {message}")]
    Definition { definition: String, message: String },
    #[error("Parameter error: {0}")]
    Parameter(String),
    #[error("Mapping error: {0}")]
    Mapping(String),
    #[error("Query '{definition}' expected at most one result but matched several")]
    NotFoundAmbiguity { definition: String },
    #[error("Storage failure: {0}")]
    Storage(#[from] StorageFailure),
    #[error("Detached access: association '{association}' of {entity} was not fetched")]
    DetachedAccess { entity: String, association: String },
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

impl DerivaError {
    pub fn definition(definition: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Definition {
            definition: definition.into(),
            message: message.into(),
        }
    }
}

/// Failures reported by the storage interface. These pass through the engine
/// untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageFailure {
    #[error("connection failure: {0}")]
    Connection(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("lock timeout: {0}")]
    LockTimeout(String),
    #[error("statement failure: {0}")]
    Statement(String),
}

pub type Result<T> = std::result::Result<T, DerivaError>;

// Helper conversions
impl From<rusqlite::Error> for StorageFailure {
    fn from(e: rusqlite::Error) -> Self {
        let message = e.to_string();
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                Self::LockTimeout(message)
            }
            Some(ErrorCode::ConstraintViolation) => Self::Constraint(message),
            Some(ErrorCode::CannotOpen)
            | Some(ErrorCode::NotADatabase)
            | Some(ErrorCode::SystemIoFailure)
            | Some(ErrorCode::PermissionDenied) => Self::Connection(message),
            _ => Self::Statement(message),
        }
    }
}

impl From<rusqlite::Error> for DerivaError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.into())
    }
}

impl From<config::ConfigError> for DerivaError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
