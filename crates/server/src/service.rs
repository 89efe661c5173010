//! The four operations the dashboard consumes. Each run is executed on its
//! own task so a hung router never stalls request handling, and dropping the
//! caller's future aborts the run.

use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use ispnexus_routeros::{commands, ConnectTarget, Connector, RouterIdentity};

use crate::crypto::CredentialCipher;
use crate::diagnostics::{DiagnosticsReport, DiagnosticsRunner};
use crate::error::CoreError;
use crate::guard::{AbortOnDrop, SingleFlight};
use crate::registry::{ConnectionRegistry, ProfileInput};
use crate::sync::{SyncCounts, SyncEngine, SyncKind, SyncReport, SyncStatus};

#[derive(Debug, Deserialize)]
pub struct ConnectionTestRequest {
    /// Existing profile whose stored credential is used when `password` is empty.
    pub profile_id: Option<i32>,
    #[serde(flatten)]
    pub profile: ProfileInput,
}

#[derive(Debug, Serialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    /// Router identity, when the login succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<RouterIdentity>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct SyncTriggerResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<SyncCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SyncReport>,
}

pub struct RouterService {
    registry: Arc<ConnectionRegistry>,
    diagnostics: Arc<DiagnosticsRunner>,
    engine: Arc<SyncEngine>,
    connector: Arc<dyn Connector>,
}

async fn off_loop<T, F>(future: F) -> Result<T, CoreError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, CoreError>> + Send + 'static,
{
    AbortOnDrop::spawn(future)
        .await
        .map_err(|e| CoreError::Task(e.to_string()))?
}

impl RouterService {
    pub fn new(
        db: DatabaseConnection,
        cipher: CredentialCipher,
        default_timeout: Duration,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(db, cipher, default_timeout));
        let guard = SingleFlight::new();
        let diagnostics = Arc::new(DiagnosticsRunner::new(
            registry.clone(),
            connector.clone(),
            guard.clone(),
        ));
        let engine = Arc::new(SyncEngine::new(registry.clone(), connector.clone(), guard));
        Self {
            registry,
            diagnostics,
            engine,
            connector,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn db(&self) -> &DatabaseConnection {
        self.registry.db()
    }

    /// Opens a session with unsaved (or saved and edited) settings, queries
    /// the router identity and closes it again.
    pub async fn test_connection(
        &self,
        request: ConnectionTestRequest,
    ) -> Result<ConnectionTestResult, CoreError> {
        let stored = match request.profile_id {
            Some(id) => Some(self.registry.get(id).await?),
            None => None,
        };
        let target = self.registry.target_from_input(&request.profile, stored.as_ref())?;
        let connector = self.connector.clone();
        let result = off_loop(async move { Ok(try_connect(connector.as_ref(), &target).await) }).await?;

        if let Some(profile) = &stored {
            if result.success {
                self.registry.mark_success(profile.id).await;
            } else {
                self.registry.mark_failure(profile.id).await;
            }
        }
        Ok(result)
    }

    pub async fn run_diagnostics(&self, profile_id: i32) -> Result<DiagnosticsReport, CoreError> {
        let profile = self.registry.get(profile_id).await?;
        let runner = self.diagnostics.clone();
        off_loop(async move { runner.run(&profile).await }).await
    }

    /// Runs `kind` against the active profile. `Ok(None)` when no profile is
    /// active.
    pub async fn sync_active(&self, kind: SyncKind) -> Result<Option<SyncReport>, CoreError> {
        let Some(profile) = self.registry.get_active().await? else {
            return Ok(None);
        };
        let engine = self.engine.clone();
        off_loop(async move { engine.run(&profile, kind).await })
            .await
            .map(Some)
    }

    pub async fn trigger_sync(&self, kind: SyncKind) -> Result<SyncTriggerResult, CoreError> {
        info!(kind = %kind, "Sync triggered.");
        let result = match self.sync_active(kind).await? {
            None => SyncTriggerResult {
                success: false,
                message: "No active connection profile; sync is unavailable.".to_string(),
                counts: None,
                report: None,
            },
            Some(report) => SyncTriggerResult {
                success: !report.is_failed(),
                message: report.summary(),
                counts: Some(report.totals),
                report: Some(report),
            },
        };
        Ok(result)
    }

    pub async fn sync_status(&self) -> Result<SyncStatus, CoreError> {
        let active = self.registry.get_active().await?;
        let engine = self.engine.clone();
        off_loop(async move { engine.status(active.as_ref()).await }).await
    }
}

async fn try_connect(connector: &dyn Connector, target: &ConnectTarget) -> ConnectionTestResult {
    let started = Instant::now();
    let elapsed = |started: Instant| u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let mut session = match connector.connect(target).await {
        Ok(session) => session,
        Err(e) => {
            warn!(peer = %target.peer(), error = %e, "Connection test failed.");
            return ConnectionTestResult {
                success: false,
                message: e.to_string(),
                error_kind: Some(e.kind()),
                details: None,
                elapsed_ms: elapsed(started),
            };
        }
    };
    let identity = tokio::time::timeout(target.timeout, commands::identity(session.as_mut())).await;
    session.close().await;

    let (message, details) = match identity {
        Ok(Ok(identity)) => (format!("Connected to {}", identity.name), Some(identity)),
        Ok(Err(e)) => (format!("Connected; identity unavailable: {e}"), None),
        Err(_) => ("Connected; identity query timed out".to_string(), None),
    };
    info!(peer = %target.peer(), "Connection test succeeded.");
    ConnectionTestResult {
        success: true,
        message,
        error_kind: None,
        details,
        elapsed_ms: elapsed(started),
    }
}
