//! Per-entity glue between router records and local rows, plus the generic
//! pull and push passes built on it.

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, DbErr};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use ispnexus_routeros::{commands, ApiError, RemoteEntity, RemoteSecret, RemoteServiceProfile, RouterApi};

use crate::db::entities::{service_profile, subscriber_secret};
use crate::db::services::{self, SecretInput, ServiceProfileInput};

use super::report::{Phase, PhaseReport};

/// A mirrored collection. `Local` rows join `Remote` rows on the router's
/// `.id`, stored locally as `remote_key`.
#[async_trait]
pub(crate) trait Mirror: Send + Sync {
    type Remote: RemoteEntity;
    type Local: Send + Sync;

    async fn list_local(&self, db: &DatabaseConnection) -> Result<Vec<Self::Local>, DbErr>;

    async fn find_by_remote_key(
        &self,
        db: &DatabaseConnection,
        remote_key: &str,
    ) -> Result<Option<Self::Local>, DbErr>;

    /// A never-pushed local row with the same name, adopted by pull instead
    /// of creating a duplicate.
    async fn find_pending_by_name(
        &self,
        db: &DatabaseConnection,
        name: &str,
    ) -> Result<Option<Self::Local>, DbErr>;

    async fn insert(&self, db: &DatabaseConnection, remote: &Self::Remote) -> Result<(), DbErr>;

    /// Replaces every mirrored field of `local_id`, remote key included.
    async fn overwrite(
        &self,
        db: &DatabaseConnection,
        local_id: i32,
        remote: &Self::Remote,
    ) -> Result<(), DbErr>;

    async fn set_remote_key(
        &self,
        db: &DatabaseConnection,
        local_id: i32,
        remote_key: &str,
    ) -> Result<(), DbErr>;

    fn local_id(&self, local: &Self::Local) -> i32;

    /// The router record this local row should correspond to.
    fn to_remote(&self, local: &Self::Local) -> Self::Remote;
}

pub(crate) struct SecretMirror;
pub(crate) struct ProfileMirror;

impl From<&RemoteSecret> for SecretInput {
    fn from(remote: &RemoteSecret) -> Self {
        SecretInput {
            name: remote.name.clone(),
            password: remote.password.clone(),
            service: remote.service.clone(),
            profile: remote.profile.clone(),
            remote_address: remote.remote_address.clone(),
            disabled: remote.disabled,
            comment: remote.comment.clone(),
        }
    }
}

impl From<&RemoteServiceProfile> for ServiceProfileInput {
    fn from(remote: &RemoteServiceProfile) -> Self {
        ServiceProfileInput {
            name: remote.name.clone(),
            rate_limit: remote.rate_limit.clone(),
            local_address: remote.local_address.clone(),
            remote_pool: remote.remote_pool.clone(),
            comment: remote.comment.clone(),
        }
    }
}

fn vanished(kind: &str, local_id: i32) -> DbErr {
    DbErr::RecordNotFound(format!("local {kind} {local_id} was deleted during sync"))
}

#[async_trait]
impl Mirror for SecretMirror {
    type Remote = RemoteSecret;
    type Local = subscriber_secret::Model;

    async fn list_local(&self, db: &DatabaseConnection) -> Result<Vec<Self::Local>, DbErr> {
        services::list_secrets(db).await
    }

    async fn find_by_remote_key(
        &self,
        db: &DatabaseConnection,
        remote_key: &str,
    ) -> Result<Option<Self::Local>, DbErr> {
        services::find_secret_by_remote_key(db, remote_key).await
    }

    async fn find_pending_by_name(
        &self,
        db: &DatabaseConnection,
        name: &str,
    ) -> Result<Option<Self::Local>, DbErr> {
        services::find_pending_secret_by_name(db, name).await
    }

    async fn insert(&self, db: &DatabaseConnection, remote: &RemoteSecret) -> Result<(), DbErr> {
        services::create_secret(db, &SecretInput::from(remote), remote.remote_key.clone()).await?;
        Ok(())
    }

    async fn overwrite(
        &self,
        db: &DatabaseConnection,
        local_id: i32,
        remote: &RemoteSecret,
    ) -> Result<(), DbErr> {
        services::update_secret(db, local_id, &SecretInput::from(remote), remote.remote_key.clone())
            .await?
            .map(|_| ())
            .ok_or_else(|| vanished(RemoteSecret::KIND, local_id))
    }

    async fn set_remote_key(
        &self,
        db: &DatabaseConnection,
        local_id: i32,
        remote_key: &str,
    ) -> Result<(), DbErr> {
        services::set_secret_remote_key(db, local_id, remote_key).await
    }

    fn local_id(&self, local: &Self::Local) -> i32 {
        local.id
    }

    fn to_remote(&self, local: &Self::Local) -> RemoteSecret {
        RemoteSecret {
            remote_key: local.remote_key.clone(),
            name: local.name.clone(),
            password: local.password.clone(),
            service: local.service.clone(),
            profile: local.profile.clone(),
            remote_address: local.remote_address.clone(),
            disabled: local.disabled,
            comment: local.comment.clone(),
        }
    }
}

#[async_trait]
impl Mirror for ProfileMirror {
    type Remote = RemoteServiceProfile;
    type Local = service_profile::Model;

    async fn list_local(&self, db: &DatabaseConnection) -> Result<Vec<Self::Local>, DbErr> {
        services::list_service_profiles(db).await
    }

    async fn find_by_remote_key(
        &self,
        db: &DatabaseConnection,
        remote_key: &str,
    ) -> Result<Option<Self::Local>, DbErr> {
        services::find_service_profile_by_remote_key(db, remote_key).await
    }

    async fn find_pending_by_name(
        &self,
        db: &DatabaseConnection,
        name: &str,
    ) -> Result<Option<Self::Local>, DbErr> {
        services::find_pending_service_profile_by_name(db, name).await
    }

    async fn insert(&self, db: &DatabaseConnection, remote: &RemoteServiceProfile) -> Result<(), DbErr> {
        services::create_service_profile(
            db,
            &ServiceProfileInput::from(remote),
            remote.remote_key.clone(),
        )
        .await?;
        Ok(())
    }

    async fn overwrite(
        &self,
        db: &DatabaseConnection,
        local_id: i32,
        remote: &RemoteServiceProfile,
    ) -> Result<(), DbErr> {
        services::update_service_profile(
            db,
            local_id,
            &ServiceProfileInput::from(remote),
            remote.remote_key.clone(),
        )
        .await?
        .map(|_| ())
        .ok_or_else(|| vanished(RemoteServiceProfile::KIND, local_id))
    }

    async fn set_remote_key(
        &self,
        db: &DatabaseConnection,
        local_id: i32,
        remote_key: &str,
    ) -> Result<(), DbErr> {
        services::set_service_profile_remote_key(db, local_id, remote_key).await
    }

    fn local_id(&self, local: &Self::Local) -> i32 {
        local.id
    }

    fn to_remote(&self, local: &Self::Local) -> RemoteServiceProfile {
        RemoteServiceProfile {
            remote_key: local.remote_key.clone(),
            name: local.name.clone(),
            rate_limit: local.rate_limit.clone(),
            local_address: local.local_address.clone(),
            remote_pool: local.remote_pool.clone(),
            comment: local.comment.clone(),
        }
    }
}

enum Applied {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug)]
enum ItemError {
    Api(ApiError),
    Store(DbErr),
    RemoteMissing,
    /// The router accepted the row but its key could not be stored. The next
    /// pull adopts the row by name.
    Unlinked { remote_key: String, source: DbErr },
}

impl std::fmt::Display for ItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemError::Api(e) => write!(f, "{e}"),
            ItemError::Store(e) => write!(f, "local store: {e}"),
            ItemError::RemoteMissing => f.write_str("remote row no longer exists"),
            ItemError::Unlinked { remote_key, source } => write!(
                f,
                "created on router as {remote_key} but the local key was not saved: {source}"
            ),
        }
    }
}

fn tally(report: &mut PhaseReport, applied: Applied) {
    match applied {
        Applied::Created => report.counts.created += 1,
        Applied::Updated => report.counts.updated += 1,
        Applied::Unchanged => report.counts.unchanged += 1,
    }
}

/// Records an item failure. Returns `true` when the session can no longer be
/// used and the phase must stop.
fn fail_item(report: &mut PhaseReport, kind: &str, identifier: &str, err: ItemError) -> bool {
    warn!(kind, identifier, error = %err, phase = ?report.phase, "Sync item failed.");
    report.record_failure(kind, identifier, err.to_string());
    match err {
        ItemError::Api(e) if e.poisons_session() => {
            report.error = Some(format!("session lost: {e}"));
            true
        }
        _ => false,
    }
}

async fn pull_one<M: Mirror>(
    mirror: &M,
    db: &DatabaseConnection,
    remote: &M::Remote,
    remote_key: &str,
) -> Result<Applied, DbErr> {
    if let Some(local) = mirror.find_by_remote_key(db, remote_key).await? {
        if mirror.to_remote(&local) == *remote {
            return Ok(Applied::Unchanged);
        }
        mirror.overwrite(db, mirror.local_id(&local), remote).await?;
        return Ok(Applied::Updated);
    }
    if let Some(local) = mirror.find_pending_by_name(db, remote.name()).await? {
        mirror.overwrite(db, mirror.local_id(&local), remote).await?;
        return Ok(Applied::Updated);
    }
    mirror.insert(db, remote).await?;
    Ok(Applied::Created)
}

/// Router to store. Remote wins on every matched row; local rows are never
/// deleted, only counted as orphans when the router no longer lists them.
pub(crate) async fn pull<M: Mirror>(
    mirror: &M,
    db: &DatabaseConnection,
    api: &mut dyn RouterApi,
    phase: Phase,
) -> PhaseReport {
    let kind = M::Remote::KIND;
    let mut report = PhaseReport::new(phase);

    let rows = match commands::print_rows::<M::Remote>(api).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(kind, error = %e, "Could not list remote rows.");
            report.error = Some(e.to_string());
            return report;
        }
    };

    let mut seen = HashSet::with_capacity(rows.len());
    for row in &rows {
        let remote = match M::Remote::from_row(row) {
            Ok(remote) => remote,
            Err(e) => {
                let identifier = row.get(".id").or_else(|| row.get("name")).unwrap_or("?");
                fail_item(&mut report, kind, identifier, ItemError::Api(e));
                continue;
            }
        };
        let Some(remote_key) = remote.remote_key().map(str::to_string) else {
            continue;
        };
        seen.insert(remote_key.clone());

        match pull_one(mirror, db, &remote, &remote_key).await {
            Ok(applied) => {
                debug!(kind, remote_key = %remote_key, name = remote.name(), "Pulled row.");
                tally(&mut report, applied);
            }
            Err(e) => {
                fail_item(&mut report, kind, remote.name(), ItemError::Store(e));
            }
        }
    }

    match mirror.list_local(db).await {
        Ok(locals) => {
            report.orphans = locals
                .iter()
                .filter_map(|local| mirror.to_remote(local).remote_key().map(str::to_string))
                .filter(|key| !seen.contains(key))
                .count() as u32;
        }
        Err(e) => warn!(kind, error = %e, "Could not count local orphans."),
    }
    report
}

async fn push_one<M: Mirror>(
    mirror: &M,
    db: &DatabaseConnection,
    api: &mut dyn RouterApi,
    local: &M::Local,
    snapshot: &HashMap<String, Option<M::Remote>>,
) -> Result<Applied, ItemError> {
    let desired = mirror.to_remote(local);
    let Some(remote_key) = desired.remote_key() else {
        let remote_key = commands::create(api, &desired).await.map_err(ItemError::Api)?;
        let local_id = mirror.local_id(local);
        if let Err(first) = mirror.set_remote_key(db, local_id, &remote_key).await {
            warn!(kind = M::Remote::KIND, remote_key = %remote_key, error = %first, "Retrying remote key write.");
            if let Err(source) = mirror.set_remote_key(db, local_id, &remote_key).await {
                return Err(ItemError::Unlinked { remote_key, source });
            }
        }
        return Ok(Applied::Created);
    };

    match snapshot.get(remote_key) {
        None => Err(ItemError::RemoteMissing),
        Some(Some(current)) if *current == desired => Ok(Applied::Unchanged),
        Some(_) => {
            commands::update(api, remote_key, &desired)
                .await
                .map_err(ItemError::Api)?;
            Ok(Applied::Updated)
        }
    }
}

/// Store to router. Local wins; rows already equal to the router snapshot
/// are left alone, and rows whose remote counterpart vanished are reported,
/// never recreated.
pub(crate) async fn push<M: Mirror>(
    mirror: &M,
    db: &DatabaseConnection,
    api: &mut dyn RouterApi,
    phase: Phase,
) -> PhaseReport {
    let kind = M::Remote::KIND;
    let mut report = PhaseReport::new(phase);

    let rows = match commands::print_rows::<M::Remote>(api).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(kind, error = %e, "Could not snapshot remote rows.");
            report.error = Some(e.to_string());
            return report;
        }
    };
    // Rows that fail to parse still exist remotely; they are always rewritten.
    let snapshot: HashMap<String, Option<M::Remote>> = rows
        .iter()
        .filter_map(|row| {
            let key = row.get_non_empty(".id")?.to_string();
            Some((key, M::Remote::from_row(row).ok()))
        })
        .collect();

    let locals = match mirror.list_local(db).await {
        Ok(locals) => locals,
        Err(e) => {
            report.error = Some(format!("local store: {e}"));
            return report;
        }
    };

    for local in &locals {
        let desired = mirror.to_remote(local);
        let missing_remotely = desired
            .remote_key()
            .is_some_and(|key| !snapshot.contains_key(key));
        if missing_remotely {
            report.orphans += 1;
        }
        match push_one(mirror, db, api, local, &snapshot).await {
            Ok(applied) => {
                debug!(kind, name = desired.name(), "Pushed row.");
                tally(&mut report, applied);
            }
            Err(e) => {
                if fail_item(&mut report, kind, desired.name(), e) {
                    break;
                }
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlinked_failure_names_router_key() {
        let mut report = PhaseReport::new(Phase::PushSecrets);
        let err = ItemError::Unlinked {
            remote_key: "*2A".to_string(),
            source: DbErr::Custom("disk full".to_string()),
        };

        let stop = fail_item(&mut report, "secret", "quinn", err);

        assert!(!stop);
        assert_eq!(report.counts.failed, 1);
        assert!(report.failures[0].reason.contains("*2A"));
        assert!(report.failures[0].reason.contains("disk full"));
    }
}
