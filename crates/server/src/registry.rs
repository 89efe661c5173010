//! Named connection profiles and the single-active pointer.
//!
//! Every other component receives a resolved profile from here; nothing else
//! decides which profile is active.

use sea_orm::DatabaseConnection;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use ispnexus_routeros::{ConnectTarget, Transport};

use crate::crypto::CredentialCipher;
use crate::db::entities::connection_profile::{self, TransportMode};
use crate::db::services::{self, ConnectionProfileFields};
use crate::error::CoreError;

const MAX_TIMEOUT_SECONDS: u64 = 300;

/// Profile fields as submitted by an operator. An empty `password` on update
/// keeps the stored credential.
#[derive(Clone, Deserialize)]
pub struct ProfileInput {
    pub name: String,
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_transport")]
    pub transport: Transport,
    pub timeout_seconds: Option<u64>,
    pub description: Option<String>,
}

fn default_transport() -> Transport {
    Transport::Plain
}

impl fmt::Debug for ProfileInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileInput")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("transport", &self.transport)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish_non_exhaustive()
    }
}

impl ProfileInput {
    fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidInput("name must not be empty".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(CoreError::InvalidInput("host must not be empty".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(CoreError::InvalidInput("username must not be empty".to_string()));
        }
        if self.port == Some(0) {
            return Err(CoreError::InvalidInput("port must not be 0".to_string()));
        }
        if let Some(secs) = self.timeout_seconds {
            if secs == 0 || secs > MAX_TIMEOUT_SECONDS {
                return Err(CoreError::InvalidInput(format!(
                    "timeout_seconds must be between 1 and {MAX_TIMEOUT_SECONDS}"
                )));
            }
        }
        Ok(())
    }

    fn port_or_default(&self) -> u16 {
        self.port.unwrap_or_else(|| self.transport.default_port())
    }
}

pub struct ConnectionRegistry {
    db: DatabaseConnection,
    cipher: CredentialCipher,
    default_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(db: DatabaseConnection, cipher: CredentialCipher, default_timeout: Duration) -> Self {
        Self {
            db,
            cipher,
            default_timeout,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn list(&self) -> Result<Vec<connection_profile::Model>, CoreError> {
        Ok(services::list_connection_profiles(&self.db).await?)
    }

    pub async fn get(&self, id: i32) -> Result<connection_profile::Model, CoreError> {
        services::get_connection_profile(&self.db, id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    /// `None` is the normal state before any profile is configured.
    pub async fn get_active(&self) -> Result<Option<connection_profile::Model>, CoreError> {
        Ok(services::get_active_connection_profile(&self.db).await?)
    }

    /// Deactivates every other profile and activates `id` in one transaction.
    pub async fn activate(&self, id: i32) -> Result<connection_profile::Model, CoreError> {
        let activated = services::activate_connection_profile(&self.db, id)
            .await?
            .ok_or_else(|| not_found(id))?;
        info!(profile_id = id, name = %activated.name, "Connection profile activated.");
        Ok(activated)
    }

    pub async fn deactivate(&self, id: i32) -> Result<connection_profile::Model, CoreError> {
        let model = services::deactivate_connection_profile(&self.db, id)
            .await?
            .ok_or_else(|| not_found(id))?;
        info!(profile_id = id, "Connection profile deactivated.");
        Ok(model)
    }

    pub async fn create(&self, input: ProfileInput) -> Result<connection_profile::Model, CoreError> {
        input.validate()?;
        if input.password.is_empty() {
            return Err(CoreError::InvalidInput("password must not be empty".to_string()));
        }
        let fields = self.fields(&input)?;
        let model = services::create_connection_profile(&self.db, fields).await?;
        info!(profile_id = model.id, name = %model.name, host = %model.host, "Connection profile created.");
        Ok(model)
    }

    pub async fn update(
        &self,
        id: i32,
        input: ProfileInput,
    ) -> Result<connection_profile::Model, CoreError> {
        input.validate()?;
        let fields = self.fields(&input)?;
        let model = services::update_connection_profile(&self.db, id, fields)
            .await?
            .ok_or_else(|| not_found(id))?;
        info!(
            profile_id = id,
            credential_changed = !input.password.is_empty(),
            "Connection profile updated."
        );
        Ok(model)
    }

    /// Rejected while the profile is active.
    pub async fn delete(&self, id: i32) -> Result<(), CoreError> {
        let result = services::delete_inactive_connection_profile(&self.db, id).await?;
        if result.rows_affected == 0 {
            // Nothing deleted: either missing or active.
            self.get(id).await?;
            return Err(CoreError::ConflictViolation(format!(
                "connection profile {id} is active and cannot be deleted"
            )));
        }
        info!(profile_id = id, "Connection profile deleted.");
        Ok(())
    }

    pub async fn mark_success(&self, id: i32) {
        self.record_outcome(id, true).await;
    }

    pub async fn mark_failure(&self, id: i32) {
        self.record_outcome(id, false).await;
    }

    async fn record_outcome(&self, id: i32, success: bool) {
        // Bookkeeping only; a failed stamp never fails the run that caused it.
        if let Err(e) = services::record_connection_outcome(&self.db, id, success).await {
            warn!(profile_id = id, success, error = %e, "Failed to record connection outcome.");
        }
    }

    /// Decrypts the stored credential into a ready-to-use target.
    pub fn connect_target(&self, profile: &connection_profile::Model) -> Result<ConnectTarget, CoreError> {
        let port = u16::try_from(profile.port).map_err(|_| {
            CoreError::InvalidInput(format!("stored port {} is out of range", profile.port))
        })?;
        Ok(ConnectTarget {
            host: profile.host.clone(),
            port,
            username: profile.username.clone(),
            password: self.cipher.decrypt(&profile.secret_ciphertext)?,
            transport: profile.transport.into(),
            timeout: self.timeout_of(profile.timeout_seconds),
        })
    }

    /// Target for an unsaved profile. An empty password falls back to the
    /// stored credential of `fallback`.
    pub fn target_from_input(
        &self,
        input: &ProfileInput,
        fallback: Option<&connection_profile::Model>,
    ) -> Result<ConnectTarget, CoreError> {
        input.validate()?;
        let password = match (input.password.is_empty(), fallback) {
            (false, _) => input.password.clone(),
            (true, Some(stored)) => self.cipher.decrypt(&stored.secret_ciphertext)?,
            (true, None) => {
                return Err(CoreError::InvalidInput("password must not be empty".to_string()))
            }
        };
        let timeout = input
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        Ok(ConnectTarget {
            host: input.host.trim().to_string(),
            port: input.port_or_default(),
            username: input.username.trim().to_string(),
            password,
            transport: input.transport,
            timeout,
        })
    }

    fn timeout_of(&self, seconds: i32) -> Duration {
        u64::try_from(seconds)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
    }

    fn fields(&self, input: &ProfileInput) -> Result<ConnectionProfileFields, CoreError> {
        let secret_ciphertext = if input.password.is_empty() {
            None
        } else {
            Some(self.cipher.encrypt(&input.password)?)
        };
        let timeout_seconds = input
            .timeout_seconds
            .unwrap_or(self.default_timeout.as_secs());
        Ok(ConnectionProfileFields {
            name: input.name.trim().to_string(),
            host: input.host.trim().to_string(),
            port: i32::from(input.port_or_default()),
            username: input.username.trim().to_string(),
            secret_ciphertext,
            transport: TransportMode::from(input.transport),
            timeout_seconds: i32::try_from(timeout_seconds).unwrap_or(i32::MAX),
            description: input.description.clone().filter(|d| !d.is_empty()),
        })
    }
}

fn not_found(id: i32) -> CoreError {
    CoreError::NotFound(format!("Connection profile {id}"))
}
