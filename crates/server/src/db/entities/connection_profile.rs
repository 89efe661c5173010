use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use ispnexus_routeros::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "transport_mode_enum")]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[sea_orm(string_value = "plain")]
    Plain,
    #[sea_orm(string_value = "tls")]
    Tls,
}

impl From<TransportMode> for Transport {
    fn from(mode: TransportMode) -> Self {
        match mode {
            TransportMode::Plain => Transport::Plain,
            TransportMode::Tls => Transport::Tls,
        }
    }
}

impl From<Transport> for TransportMode {
    fn from(transport: Transport) -> Self {
        match transport {
            Transport::Plain => TransportMode::Plain,
            Transport::Tls => TransportMode::Tls,
        }
    }
}

#[derive(Clone, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "connection_profiles")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
    pub host: String,
    pub port: i32,
    pub username: String,
    /// Hex of nonce and AES-256-GCM ciphertext. Never serialized.
    #[serde(skip_serializing)]
    pub secret_ciphertext: String,
    pub transport: TransportMode,
    pub timeout_seconds: i32,
    pub is_active: bool,
    pub last_success_at: Option<ChronoDateTimeUtc>,
    pub last_failure_at: Option<ChronoDateTimeUtc>,
    pub description: Option<String>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret_ciphertext", &"<redacted>")
            .field("transport", &self.transport)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("is_active", &self.is_active)
            .field("last_success_at", &self.last_success_at)
            .field("last_failure_at", &self.last_failure_at)
            .finish_non_exhaustive()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
