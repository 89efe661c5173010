use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

use crate::crypto::CryptoError;

/// Failures of the registry, diagnostics and sync layer. Router I/O failures
/// inside a run are not errors here; they become report entries.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("Conflict: {0}")]
    ConflictViolation(String),
    #[error("A {kind} run is already in progress for connection profile {profile_id}")]
    Busy { profile_id: i32, kind: &'static str },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Database error: {0}")]
    Database(DbErr),
    #[error("Credential error: {0}")]
    Credential(#[from] CryptoError),
    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<DbErr> for CoreError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(msg)) => CoreError::ConflictViolation(msg),
            _ => CoreError::Database(err),
        }
    }
}
