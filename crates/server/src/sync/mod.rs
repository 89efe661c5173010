//! Pull and push reconciliation between the local store and the router.

mod mirror;
pub mod report;
pub mod scheduler;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use ispnexus_routeros::{commands, Connector, RemoteSecret, RemoteServiceProfile, RouterApi};

use crate::db::entities::connection_profile;
use crate::db::services::{self, LAST_SYNC_AT, LAST_SYNC_SUMMARY};
use crate::error::CoreError;
use crate::guard::{RunKind, SingleFlight};
use crate::registry::ConnectionRegistry;

use mirror::{ProfileMirror, SecretMirror};
pub use report::{ItemFailure, Phase, PhaseReport, SyncCounts, SyncKind, SyncOutcome, SyncReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Connecting,
    Pulling,
    Pushing,
    Reporting,
    Failed,
}

/// Local and router-side row counts for one entity kind.
#[derive(Debug, Clone, Serialize)]
pub struct EntityCounts {
    pub local: u64,
    pub remote: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub profile_id: Option<i32>,
    pub state: SyncState,
    pub secrets: EntityCounts,
    pub profiles: EntityCounts,
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_summary: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_error: Option<String>,
}

/// Publishes a run's state and falls back to idle when dropped, including
/// when the run is aborted.
struct StateTracker<'a> {
    states: &'a DashMap<i32, SyncState>,
    profile_id: i32,
}

impl<'a> StateTracker<'a> {
    fn new(states: &'a DashMap<i32, SyncState>, profile_id: i32) -> Self {
        states.insert(profile_id, SyncState::Connecting);
        Self { states, profile_id }
    }

    fn set(&self, state: SyncState) {
        self.states.insert(self.profile_id, state);
    }
}

impl Drop for StateTracker<'_> {
    fn drop(&mut self) {
        self.states.remove(&self.profile_id);
    }
}

pub struct SyncEngine {
    registry: Arc<ConnectionRegistry>,
    connector: Arc<dyn Connector>,
    guard: Arc<SingleFlight>,
    states: DashMap<i32, SyncState>,
}

impl SyncEngine {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        connector: Arc<dyn Connector>,
        guard: Arc<SingleFlight>,
    ) -> Self {
        Self {
            registry,
            connector,
            guard,
            states: DashMap::new(),
        }
    }

    fn db(&self) -> &DatabaseConnection {
        self.registry.db()
    }

    pub async fn pull_profiles(&self, profile: &connection_profile::Model) -> Result<SyncReport, CoreError> {
        self.run(profile, SyncKind::ProfilesPull).await
    }

    pub async fn pull_secrets(&self, profile: &connection_profile::Model) -> Result<SyncReport, CoreError> {
        self.run(profile, SyncKind::SecretsPull).await
    }

    pub async fn push_profiles(&self, profile: &connection_profile::Model) -> Result<SyncReport, CoreError> {
        self.run(profile, SyncKind::ProfilesPush).await
    }

    pub async fn push_secrets(&self, profile: &connection_profile::Model) -> Result<SyncReport, CoreError> {
        self.run(profile, SyncKind::SecretsPush).await
    }

    pub async fn sync_all(&self, profile: &connection_profile::Model) -> Result<SyncReport, CoreError> {
        self.run(profile, SyncKind::All).await
    }

    pub fn state(&self, profile_id: i32) -> SyncState {
        self.states
            .get(&profile_id)
            .map(|state| *state)
            .unwrap_or(SyncState::Idle)
    }

    /// One session, the kind's phases in order, one report. Only `Busy` and
    /// configuration problems are errors; router failures land in the report.
    pub async fn run(
        &self,
        profile: &connection_profile::Model,
        kind: SyncKind,
    ) -> Result<SyncReport, CoreError> {
        let _permit = self.guard.try_acquire(profile.id, RunKind::Sync)?;
        let target = self.registry.connect_target(profile)?;
        let started_at = Utc::now();
        let tracker = StateTracker::new(&self.states, profile.id);
        info!(profile_id = profile.id, kind = %kind, peer = %target.peer(), "Sync run started.");

        let mut session = match self.connector.connect(&target).await {
            Ok(session) => session,
            Err(e) => {
                tracker.set(SyncState::Failed);
                self.registry.mark_failure(profile.id).await;
                warn!(profile_id = profile.id, kind = %kind, error = %e, "Sync run could not connect.");
                let report = SyncReport::failed(kind, profile.id, e.kind(), e.to_string(), started_at);
                self.record(&report).await;
                return Ok(report);
            }
        };
        self.registry.mark_success(profile.id).await;

        let mut phases = Vec::with_capacity(kind.phases().len());
        for &phase in kind.phases() {
            tracker.set(if phase.is_pull() {
                SyncState::Pulling
            } else {
                SyncState::Pushing
            });
            phases.push(self.run_phase(session.as_mut(), phase).await);
        }
        session.close().await;

        tracker.set(SyncState::Reporting);
        let report = SyncReport::completed(kind, profile.id, phases, started_at);
        self.record(&report).await;
        info!(
            profile_id = profile.id,
            kind = %kind,
            created = report.totals.created,
            updated = report.totals.updated,
            unchanged = report.totals.unchanged,
            failed = report.totals.failed,
            duration_ms = report.duration_ms,
            "Sync run finished."
        );
        Ok(report)
    }

    async fn run_phase(&self, api: &mut dyn RouterApi, phase: Phase) -> PhaseReport {
        let db = self.db();
        match phase {
            Phase::PullProfiles => mirror::pull(&ProfileMirror, db, api, phase).await,
            Phase::PullSecrets => mirror::pull(&SecretMirror, db, api, phase).await,
            Phase::PushProfiles => mirror::push(&ProfileMirror, db, api, phase).await,
            Phase::PushSecrets => mirror::push(&SecretMirror, db, api, phase).await,
        }
    }

    async fn record(&self, report: &SyncReport) {
        let summary = serde_json::json!({
            "kind": report.kind,
            "profile_id": report.profile_id,
            "outcome": report.outcome,
            "totals": report.totals,
            "finished_at": report.finished_at,
        });
        if let Err(e) = services::update_setting(self.db(), LAST_SYNC_SUMMARY, &summary).await {
            warn!(error = %e, "Failed to store sync summary.");
        }
        if report.is_failed() {
            return;
        }
        let finished_at = serde_json::json!(report.finished_at);
        if let Err(e) = services::update_setting(self.db(), LAST_SYNC_AT, &finished_at).await {
            warn!(error = %e, "Failed to store last sync time.");
        }
    }

    pub async fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>, CoreError> {
        let setting = services::get_setting(self.db(), LAST_SYNC_AT).await?;
        Ok(setting.and_then(|s| serde_json::from_value(s.value).ok()))
    }

    /// Side-by-side counts. The only router I/O is one short session with two
    /// count-only queries; an unreachable router is reported, not raised.
    pub async fn status(
        &self,
        active: Option<&connection_profile::Model>,
    ) -> Result<SyncStatus, CoreError> {
        let db = self.db();
        let mut status = SyncStatus {
            profile_id: active.map(|p| p.id),
            state: active.map(|p| self.state(p.id)).unwrap_or(SyncState::Idle),
            secrets: EntityCounts {
                local: services::count_secrets(db).await?,
                remote: None,
            },
            profiles: EntityCounts {
                local: services::count_service_profiles(db).await?,
                remote: None,
            },
            last_sync_at: self.last_sync_at().await?,
            last_summary: services::get_setting(db, LAST_SYNC_SUMMARY)
                .await?
                .map(|s| s.value),
            remote_error: None,
        };

        let Some(profile) = active else {
            return Ok(status);
        };
        let target = self.registry.connect_target(profile)?;
        let mut session = match self.connector.connect(&target).await {
            Ok(session) => session,
            Err(e) => {
                status.remote_error = Some(e.to_string());
                return Ok(status);
            }
        };
        let secrets = commands::count::<RemoteSecret>(session.as_mut()).await;
        let profiles = commands::count::<RemoteServiceProfile>(session.as_mut()).await;
        session.close().await;

        match (secrets, profiles) {
            (Ok(secrets), Ok(profiles)) => {
                status.secrets.remote = Some(secrets);
                status.profiles.remote = Some(profiles);
            }
            (Err(e), _) | (_, Err(e)) => status.remote_error = Some(e.to_string()),
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::services::{SecretInput, ServiceProfileInput};
    use crate::testing::{memory_db, profile_input, test_cipher, FakeRouter, PROFILE_MENU, SECRET_MENU};
    use std::time::Duration;

    struct Harness {
        engine: SyncEngine,
        router: FakeRouter,
        profile: connection_profile::Model,
    }

    impl Harness {
        async fn new(router: FakeRouter) -> Self {
            let registry = Arc::new(ConnectionRegistry::new(
                memory_db().await,
                test_cipher(),
                Duration::from_secs(2),
            ));
            let profile = registry.create(profile_input("edge", "10.0.0.1")).await.unwrap();
            let profile = registry.activate(profile.id).await.unwrap();
            let engine = SyncEngine::new(registry, Arc::new(router.clone()), SingleFlight::new());
            Self {
                engine,
                router,
                profile,
            }
        }

        fn db(&self) -> &DatabaseConnection {
            self.engine.db()
        }
    }

    fn secret(name: &str, profile: &str) -> SecretInput {
        SecretInput {
            name: name.to_string(),
            password: format!("{name}-pw"),
            service: "pppoe".to_string(),
            profile: profile.to_string(),
            remote_address: None,
            disabled: false,
            comment: None,
        }
    }

    fn seed_remote_secret(router: &FakeRouter, name: &str) -> String {
        router.seed(
            SECRET_MENU,
            &[
                ("name", name),
                ("password", "pw"),
                ("service", "pppoe"),
                ("profile", "default"),
                ("disabled", "false"),
            ],
        )
    }

    fn counts(created: u32, updated: u32, unchanged: u32, failed: u32) -> SyncCounts {
        SyncCounts {
            created,
            updated,
            unchanged,
            failed,
        }
    }

    #[tokio::test]
    async fn test_pull_secrets_twice_is_idempotent() {
        let h = Harness::new(FakeRouter::new()).await;
        seed_remote_secret(&h.router, "alice");
        seed_remote_secret(&h.router, "bob");
        h.router.seed(
            SECRET_MENU,
            &[("name", "carol"), ("password", "pw"), ("remote-address", "10.9.0.7"), ("disabled", "true")],
        );

        let first = h.engine.pull_secrets(&h.profile).await.unwrap();
        assert_eq!(first.totals, counts(3, 0, 0, 0));

        let second = h.engine.pull_secrets(&h.profile).await.unwrap();
        assert_eq!(second.totals, counts(0, 0, 3, 0));

        let carol = services::list_secrets(h.db())
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.name == "carol")
            .unwrap();
        assert!(carol.disabled);
        assert_eq!(carol.remote_address.as_deref(), Some("10.9.0.7"));
        assert_eq!(carol.service, "any");
    }

    #[tokio::test]
    async fn test_push_then_pull_keeps_remote_key_join() {
        let h = Harness::new(FakeRouter::new()).await;
        let local = services::create_secret(h.db(), &secret("dave", "default"), None)
            .await
            .unwrap();

        let push = h.engine.push_secrets(&h.profile).await.unwrap();
        assert_eq!(push.totals, counts(1, 0, 0, 0));

        let stored = services::get_secret(h.db(), local.id).await.unwrap().unwrap();
        let remote_key = stored.remote_key.clone().unwrap();
        let remote = h.router.row_named(SECRET_MENU, "dave").unwrap();
        assert_eq!(remote.get(".id"), Some(remote_key.as_str()));

        let pull = h.engine.pull_secrets(&h.profile).await.unwrap();
        assert_eq!(pull.totals, counts(0, 0, 1, 0));
        assert_eq!(services::count_secrets(h.db()).await.unwrap(), 1);

        // A second push issues no writes.
        h.router.clear_log();
        let again = h.engine.push_secrets(&h.profile).await.unwrap();
        assert_eq!(again.totals, counts(0, 0, 1, 0));
        assert_eq!(h.router.log(), vec!["/ppp/secret/print"]);
    }

    #[tokio::test]
    async fn test_push_isolates_single_item_failure() {
        let h = Harness::new(FakeRouter::new()).await;
        services::create_secret(h.db(), &secret("erin", "default"), None).await.unwrap();
        services::create_secret(h.db(), &secret("frank", "no-such-tier"), None).await.unwrap();
        services::create_secret(h.db(), &secret("grace", "default"), None).await.unwrap();

        let report = h.engine.push_secrets(&h.profile).await.unwrap();

        assert!(!report.is_failed());
        assert_eq!(report.totals, counts(2, 0, 0, 1));
        let failure = report.failures().next().unwrap();
        assert_eq!(failure.identifier, "frank");
        assert!(failure.reason.contains("no-such-tier"));
        assert!(h.router.row_named(SECRET_MENU, "erin").is_some());
        assert!(h.router.row_named(SECRET_MENU, "grace").is_some());
        assert!(h.router.row_named(SECRET_MENU, "frank").is_none());
    }

    #[tokio::test]
    async fn test_sync_all_runs_phases_in_order() {
        let h = Harness::new(FakeRouter::new()).await;
        h.router.seed(PROFILE_MENU, &[("name", "gold"), ("rate-limit", "50M/50M")]);
        seed_remote_secret(&h.router, "heidi");
        services::create_service_profile(
            h.db(),
            &ServiceProfileInput {
                name: "silver".to_string(),
                rate_limit: Some("20M/20M".to_string()),
                local_address: None,
                remote_pool: None,
                comment: None,
            },
            None,
        )
        .await
        .unwrap();
        services::create_secret(h.db(), &secret("ivan", "silver"), None).await.unwrap();

        let report = h.engine.sync_all(&h.profile).await.unwrap();

        let phases: Vec<Phase> = report.phases.iter().map(|p| p.phase).collect();
        assert_eq!(phases, SyncKind::All.phases());
        assert_eq!(
            h.router.log(),
            vec![
                "/ppp/profile/print",
                "/ppp/secret/print",
                "/ppp/profile/print",
                "/ppp/profile/add",
                "/ppp/secret/print",
                "/ppp/secret/add",
            ]
        );
        // ivan references a profile created earlier in the same run.
        assert_eq!(report.totals.failed, 0);
        assert_eq!(h.router.open_sessions(), 0);
        assert_eq!(h.router.connects(), 1);
        assert!(h.engine.last_sync_at().await.unwrap().is_some());
        assert_eq!(h.engine.state(h.profile.id), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_unreachable_router_yields_failed_report() {
        let h = Harness::new(FakeRouter::unreachable()).await;
        services::create_secret(h.db(), &secret("judy", "default"), None).await.unwrap();

        let report = h.engine.sync_all(&h.profile).await.unwrap();

        assert!(report.is_failed());
        assert!(report.phases.is_empty());
        assert_eq!(report.totals, SyncCounts::default());
        assert!(matches!(
            &report.outcome,
            SyncOutcome::Failed { error_kind, .. } if error_kind == "network_unreachable"
        ));
        assert!(h.engine.last_sync_at().await.unwrap().is_none());

        let profile = h.engine.registry.get(h.profile.id).await.unwrap();
        assert!(profile.last_failure_at.is_some());
    }

    #[tokio::test]
    async fn test_item_failures_do_not_fail_the_run() {
        let h = Harness::new(FakeRouter::new()).await;
        services::create_secret(h.db(), &secret("kim", "default"), None).await.unwrap();
        h.router.reject_name("kim");

        let report = h.engine.push_secrets(&h.profile).await.unwrap();

        assert!(!report.is_failed());
        assert_eq!(report.totals, counts(0, 0, 0, 1));
        assert!(h.engine.last_sync_at().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pull_overwrites_local_edits() {
        let h = Harness::new(FakeRouter::new()).await;
        let id = seed_remote_secret(&h.router, "leo");
        h.engine.pull_secrets(&h.profile).await.unwrap();

        let local = services::find_secret_by_remote_key(h.db(), &id).await.unwrap().unwrap();
        let mut edited = secret("leo", "default");
        edited.comment = Some("local note".to_string());
        services::update_secret(h.db(), local.id, &edited, None).await.unwrap();
        h.router.set_field(SECRET_MENU, &id, "comment", "router note");

        let report = h.engine.pull_secrets(&h.profile).await.unwrap();
        assert_eq!(report.totals, counts(0, 1, 0, 0));
        let local = services::get_secret(h.db(), local.id).await.unwrap().unwrap();
        assert_eq!(local.comment.as_deref(), Some("router note"));
        assert_eq!(local.password, "pw");
    }

    #[tokio::test]
    async fn test_push_overwrites_remote_edits() {
        let h = Harness::new(FakeRouter::new()).await;
        let id = seed_remote_secret(&h.router, "mallory");
        h.engine.pull_secrets(&h.profile).await.unwrap();
        h.router.set_field(SECRET_MENU, &id, "password", "changed-on-router");

        let report = h.engine.push_secrets(&h.profile).await.unwrap();

        assert_eq!(report.totals, counts(0, 1, 0, 0));
        let remote = h.router.row_named(SECRET_MENU, "mallory").unwrap();
        assert_eq!(remote.get("password"), Some("pw"));
    }

    #[tokio::test]
    async fn test_push_clears_optional_field_on_router() {
        let h = Harness::new(FakeRouter::new()).await;
        h.router.seed(
            SECRET_MENU,
            &[("name", "mia"), ("password", "pw"), ("remote-address", "10.9.0.7")],
        );
        h.engine.pull_secrets(&h.profile).await.unwrap();
        let local = services::list_secrets(h.db()).await.unwrap().remove(0);
        let mut input = SecretInput {
            name: local.name.clone(),
            password: local.password.clone(),
            service: local.service.clone(),
            profile: local.profile.clone(),
            remote_address: local.remote_address.clone(),
            disabled: local.disabled,
            comment: local.comment.clone(),
        };
        input.remote_address = None;
        services::update_secret(h.db(), local.id, &input, None).await.unwrap();

        let first = h.engine.push_secrets(&h.profile).await.unwrap();
        assert_eq!(first.totals, counts(0, 1, 0, 0));
        let remote = h.router.row_named(SECRET_MENU, "mia").unwrap();
        assert_eq!(remote.get_non_empty("remote-address"), None);

        let second = h.engine.push_secrets(&h.profile).await.unwrap();
        assert_eq!(second.totals, counts(0, 0, 1, 0));

        h.engine.pull_secrets(&h.profile).await.unwrap();
        let after = services::get_secret(h.db(), local.id).await.unwrap().unwrap();
        assert_eq!(after.remote_address, None);
    }

    #[tokio::test]
    async fn test_push_profiles_updates_changed_tier() {
        let h = Harness::new(FakeRouter::new()).await;
        h.router.seed(
            PROFILE_MENU,
            &[("name", "bronze"), ("rate-limit", "5M/5M"), ("local-address", "10.0.0.1")],
        );
        h.engine.pull_profiles(&h.profile).await.unwrap();
        let local = services::list_service_profiles(h.db()).await.unwrap().remove(0);
        let input = ServiceProfileInput {
            name: local.name.clone(),
            rate_limit: Some("8M/8M".to_string()),
            local_address: None,
            remote_pool: Some("pool-bronze".to_string()),
            comment: local.comment.clone(),
        };
        services::update_service_profile(h.db(), local.id, &input, None).await.unwrap();

        let report = h.engine.push_profiles(&h.profile).await.unwrap();

        assert_eq!(report.totals, counts(0, 1, 0, 0));
        let remote = h.router.row_named(PROFILE_MENU, "bronze").unwrap();
        assert_eq!(remote.get("rate-limit"), Some("8M/8M"));
        assert_eq!(remote.get("remote-address"), Some("pool-bronze"));
        assert_eq!(remote.get_non_empty("local-address"), None);

        let again = h.engine.push_profiles(&h.profile).await.unwrap();
        assert_eq!(again.totals, counts(0, 0, 1, 0));
    }

    #[tokio::test]
    async fn test_push_reports_vanished_remote_row() {
        let h = Harness::new(FakeRouter::new()).await;
        let id = seed_remote_secret(&h.router, "nina");
        h.engine.pull_secrets(&h.profile).await.unwrap();
        h.router.remove(SECRET_MENU, &id);

        let report = h.engine.push_secrets(&h.profile).await.unwrap();

        assert_eq!(report.totals, counts(0, 0, 0, 1));
        let phase = report.phase(Phase::PushSecrets).unwrap();
        assert_eq!(phase.orphans, 1);
        assert_eq!(phase.failures[0].reason, "remote row no longer exists");
        assert!(h.router.rows(SECRET_MENU).is_empty());
    }

    #[tokio::test]
    async fn test_pull_keeps_local_orphans() {
        let h = Harness::new(FakeRouter::new()).await;
        let id = seed_remote_secret(&h.router, "oscar");
        h.engine.pull_secrets(&h.profile).await.unwrap();
        h.router.remove(SECRET_MENU, &id);

        let report = h.engine.pull_secrets(&h.profile).await.unwrap();

        assert_eq!(report.phase(Phase::PullSecrets).unwrap().orphans, 1);
        assert_eq!(services::count_secrets(h.db()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pull_adopts_pending_local_row_by_name() {
        let h = Harness::new(FakeRouter::new()).await;
        let local = services::create_secret(h.db(), &secret("peggy", "default"), None)
            .await
            .unwrap();
        let id = seed_remote_secret(&h.router, "peggy");

        let report = h.engine.pull_secrets(&h.profile).await.unwrap();

        assert_eq!(report.totals, counts(0, 1, 0, 0));
        let adopted = services::get_secret(h.db(), local.id).await.unwrap().unwrap();
        assert_eq!(adopted.remote_key, Some(id));
        assert_eq!(services::count_secrets(h.db()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_malformed_remote_row_is_item_failure() {
        let h = Harness::new(FakeRouter::new()).await;
        seed_remote_secret(&h.router, "quinn");
        h.router.seed(SECRET_MENU, &[("password", "nameless")]);

        let report = h.engine.pull_secrets(&h.profile).await.unwrap();

        assert_eq!(report.totals, counts(1, 0, 0, 1));
    }

    #[tokio::test]
    async fn test_concurrent_sync_is_busy() {
        let h = Harness::new(FakeRouter::new()).await;
        let _held = h.engine.guard.try_acquire(h.profile.id, RunKind::Sync).unwrap();

        assert!(matches!(
            h.engine.sync_all(&h.profile).await,
            Err(CoreError::Busy { .. })
        ));
    }

    #[tokio::test]
    async fn test_status_reports_both_sides() {
        let h = Harness::new(FakeRouter::new()).await;
        seed_remote_secret(&h.router, "rita");
        seed_remote_secret(&h.router, "sam");
        services::create_secret(h.db(), &secret("trent", "default"), None).await.unwrap();

        let status = h.engine.status(Some(&h.profile)).await.unwrap();
        assert_eq!(status.secrets.local, 1);
        assert_eq!(status.secrets.remote, Some(2));
        assert_eq!(status.profiles.remote, Some(0));
        assert!(status.last_sync_at.is_none());
        assert_eq!(h.router.open_sessions(), 0);

        let offline = h.engine.status(None).await.unwrap();
        assert_eq!(offline.secrets.remote, None);
        assert!(offline.remote_error.is_none());
    }

    #[tokio::test]
    async fn test_status_with_unreachable_router_reports_error() {
        let h = Harness::new(FakeRouter::unreachable()).await;
        let status = h.engine.status(Some(&h.profile)).await.unwrap();
        assert!(status.remote_error.unwrap().contains("no route"));
        assert_eq!(status.secrets.remote, None);
    }
}
