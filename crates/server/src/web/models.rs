use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::entities::connection_profile::{self, TransportMode};

/// API view of a connection profile. Carries only whether a credential is
/// stored, never the credential.
#[derive(Debug, Serialize)]
pub struct ConnectionProfileView {
    pub id: i32,
    pub name: String,
    pub host: String,
    pub port: i32,
    pub username: String,
    pub has_credential: bool,
    pub transport: TransportMode,
    pub timeout_seconds: i32,
    pub is_active: bool,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<connection_profile::Model> for ConnectionProfileView {
    fn from(model: connection_profile::Model) -> Self {
        Self {
            id: model.id,
            has_credential: !model.secret_ciphertext.is_empty(),
            name: model.name,
            host: model.host,
            port: model.port,
            username: model.username,
            transport: model.transport,
            timeout_seconds: model.timeout_seconds,
            is_active: model.is_active,
            last_success_at: model.last_success_at,
            last_failure_at: model.last_failure_at,
            description: model.description,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}
