//! Layered connectivity checks against one connection profile.
//!
//! Stages run in a fixed order and every stage runs regardless of the
//! earlier ones, so a report always isolates which fault domain is broken.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use ispnexus_routeros::{commands, net, ConnectTarget, ConnectionError, Connector, RouterIdentity};

use crate::db::entities::connection_profile;
use crate::error::CoreError;
use crate::guard::{RunKind, SingleFlight};
use crate::registry::ConnectionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "N/A")]
    NotApplicable,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub status: StageStatus,
    pub message: String,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl StageOutcome {
    fn ok(message: impl Into<String>, started: Instant) -> Self {
        Self {
            status: StageStatus::Ok,
            message: message.into(),
            elapsed_ms: elapsed_ms(started),
            error_kind: None,
        }
    }

    fn failed(err: &ConnectionError, started: Instant) -> Self {
        Self {
            status: StageStatus::Failed,
            message: err.to_string(),
            elapsed_ms: elapsed_ms(started),
            error_kind: Some(err.kind()),
        }
    }

    fn not_applicable(message: impl Into<String>) -> Self {
        Self {
            status: StageStatus::NotApplicable,
            message: message.into(),
            elapsed_ms: 0,
            error_kind: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.status != StageStatus::Failed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<i32>,
    pub target: String,
    pub network: StageOutcome,
    pub dns: StageOutcome,
    pub port: StageOutcome,
    pub api: StageOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<RouterIdentity>,
    pub healthy: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Bounds a stage by the profile timeout, mapping expiry to `Timeout`.
async fn bounded<T, F>(limit: Duration, stage: F) -> Result<T, ConnectionError>
where
    F: Future<Output = Result<T, ConnectionError>>,
{
    tokio::time::timeout(limit, stage)
        .await
        .unwrap_or(Err(ConnectionError::Timeout(limit)))
}

async fn network_stage(target: &ConnectTarget) -> StageOutcome {
    let started = Instant::now();
    match bounded(target.timeout, net::connect_host(&target.host, target.port, target.timeout)).await {
        Ok(stream) => {
            let peer = stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| target.peer());
            StageOutcome::ok(format!("TCP connection to {peer} established"), started)
        }
        Err(e) => StageOutcome::failed(&e, started),
    }
}

async fn dns_stage(target: &ConnectTarget) -> StageOutcome {
    if let Some(addr) = net::literal_address(&target.host) {
        return StageOutcome::not_applicable(format!("{addr} is a literal address"));
    }
    let started = Instant::now();
    match bounded(target.timeout, net::resolve(&target.host, target.port, target.timeout)).await {
        Ok(addrs) => {
            let listed: Vec<String> = addrs.iter().map(|a| a.ip().to_string()).collect();
            StageOutcome::ok(format!("{} resolved to {}", target.host, listed.join(", ")), started)
        }
        Err(e) => StageOutcome::failed(&e, started),
    }
}

/// Checks the configured port on every resolved address individually. All
/// addresses share one deadline.
async fn port_stage(target: &ConnectTarget) -> StageOutcome {
    let started = Instant::now();
    let deadline = tokio::time::Instant::now() + target.timeout;
    let attempt = async {
        let addrs = net::resolve(&target.host, target.port, target.timeout).await?;
        let mut open = 0usize;
        let mut last_err = None;
        for addr in &addrs {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match net::connect_any(std::slice::from_ref(addr), remaining).await {
                Ok(_) => open += 1,
                Err(ConnectionError::Timeout(_)) => {
                    last_err = Some(ConnectionError::Timeout(target.timeout));
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        match (open, last_err) {
            (0, Some(e)) => Err(e),
            (0, None) => Err(ConnectionError::DnsFailure(format!(
                "{} has no addresses",
                target.host
            ))),
            (open, _) => Ok((open, addrs.len())),
        }
    };
    match bounded(target.timeout, attempt).await {
        Ok((open, total)) => StageOutcome::ok(
            format!("port {} open on {open} of {total} address(es)", target.port),
            started,
        ),
        Err(e) => StageOutcome::failed(&e, started),
    }
}

/// Connect, login and identity query under a single timeout. A session cut
/// off by the timeout is dropped, which closes its socket.
async fn api_stage(
    connector: &dyn Connector,
    target: &ConnectTarget,
) -> (StageOutcome, Option<RouterIdentity>) {
    let started = Instant::now();
    let attempt = async {
        let mut session = connector.connect(target).await?;
        let identity = commands::identity(session.as_mut()).await;
        session.close().await;
        Ok::<_, ConnectionError>(identity)
    };

    match bounded(target.timeout, attempt).await {
        Ok(Ok(identity)) => {
            let mut message = format!("authenticated as {} on {}", target.username, identity.name);
            if let Some(version) = &identity.version {
                message.push_str(&format!(" (RouterOS {version})"));
            }
            (StageOutcome::ok(message, started), Some(identity))
        }
        Ok(Err(e)) => {
            debug!(peer = %target.peer(), error = %e, "Identity query failed after login.");
            (
                StageOutcome::ok(format!("authenticated; identity unavailable: {e}"), started),
                None,
            )
        }
        Err(e) => (StageOutcome::failed(&e, started), None),
    }
}

/// Runs all four stages against `target`. Never fails; errors become
/// `FAILED` stages.
pub async fn run_stages(
    connector: &dyn Connector,
    target: &ConnectTarget,
    profile_id: Option<i32>,
) -> DiagnosticsReport {
    let started_at = Utc::now();
    let started = Instant::now();

    let network = network_stage(target).await;
    let dns = dns_stage(target).await;
    let port = port_stage(target).await;
    let (api, identity) = api_stage(connector, target).await;

    let healthy = [&network, &dns, &port, &api].iter().all(|s| s.passed());
    DiagnosticsReport {
        profile_id,
        target: target.peer(),
        network,
        dns,
        port,
        api,
        identity,
        healthy,
        started_at,
        duration_ms: elapsed_ms(started),
    }
}

pub struct DiagnosticsRunner {
    registry: Arc<ConnectionRegistry>,
    connector: Arc<dyn Connector>,
    guard: Arc<SingleFlight>,
}

impl DiagnosticsRunner {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        connector: Arc<dyn Connector>,
        guard: Arc<SingleFlight>,
    ) -> Self {
        Self {
            registry,
            connector,
            guard,
        }
    }

    /// Only the API stage outcome is written back, as the profile's
    /// last-success or last-failure timestamp.
    pub async fn run(&self, profile: &connection_profile::Model) -> Result<DiagnosticsReport, CoreError> {
        let _permit = self.guard.try_acquire(profile.id, RunKind::Diagnostics)?;
        let target = self.registry.connect_target(profile)?;
        info!(profile_id = profile.id, peer = %target.peer(), "Running connection diagnostics.");

        let report = run_stages(self.connector.as_ref(), &target, Some(profile.id)).await;

        if report.api.status == StageStatus::Ok {
            self.registry.mark_success(profile.id).await;
        } else {
            self.registry.mark_failure(profile.id).await;
        }
        if report.healthy {
            info!(profile_id = profile.id, duration_ms = report.duration_ms, "Diagnostics passed.");
        } else {
            warn!(
                profile_id = profile.id,
                network = ?report.network.status,
                dns = ?report.dns.status,
                port = ?report.port.status,
                api = ?report.api.status,
                "Diagnostics found problems."
            );
        }
        Ok(report)
    }
}
