use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncKind {
    ProfilesPull,
    SecretsPull,
    ProfilesPush,
    SecretsPush,
    All,
}

impl SyncKind {
    /// Phases in execution order. Profiles come first because secrets
    /// reference them by name.
    pub fn phases(self) -> &'static [Phase] {
        match self {
            SyncKind::ProfilesPull => &[Phase::PullProfiles],
            SyncKind::SecretsPull => &[Phase::PullSecrets],
            SyncKind::ProfilesPush => &[Phase::PushProfiles],
            SyncKind::SecretsPush => &[Phase::PushSecrets],
            SyncKind::All => &[
                Phase::PullProfiles,
                Phase::PullSecrets,
                Phase::PushProfiles,
                Phase::PushSecrets,
            ],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncKind::ProfilesPull => "profiles-pull",
            SyncKind::SecretsPull => "secrets-pull",
            SyncKind::ProfilesPush => "profiles-push",
            SyncKind::SecretsPush => "secrets-push",
            SyncKind::All => "all",
        }
    }
}

impl fmt::Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "profiles-pull" => Ok(SyncKind::ProfilesPull),
            "secrets-pull" => Ok(SyncKind::SecretsPull),
            "profiles-push" => Ok(SyncKind::ProfilesPush),
            "secrets-push" => Ok(SyncKind::SecretsPush),
            "all" => Ok(SyncKind::All),
            other => Err(format!("unknown sync kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PullProfiles,
    PullSecrets,
    PushProfiles,
    PushSecrets,
}

impl Phase {
    pub fn is_pull(self) -> bool {
        matches!(self, Phase::PullProfiles | Phase::PullSecrets)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub failed: u32,
}

impl SyncCounts {
    pub fn total(&self) -> u32 {
        self.created + self.updated + self.unchanged + self.failed
    }

    fn add(&mut self, other: &SyncCounts) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// `secret` or `profile`.
    pub entity: String,
    /// Record name, or the remote key when the name is unknown.
    pub identifier: String,
    pub reason: String,
}

/// Outcome of one pull or push pass over one entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub counts: SyncCounts,
    pub failures: Vec<ItemFailure>,
    /// Pull: local records whose remote key the router no longer lists.
    /// Push: local records whose remote row has disappeared.
    pub orphans: u32,
    /// Set when the phase could not list the remote collection at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PhaseReport {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            counts: SyncCounts::default(),
            failures: Vec::new(),
            orphans: 0,
            error: None,
        }
    }

    pub fn record_failure(&mut self, entity: &str, identifier: &str, reason: impl Into<String>) {
        self.counts.failed += 1;
        self.failures.push(ItemFailure {
            entity: entity.to_string(),
            identifier: identifier.to_string(),
            reason: reason.into(),
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The session was established; item failures may still be present.
    Completed,
    /// No session could be established. No phase ran.
    Failed { error_kind: String, reason: String },
}

/// Immutable summary of one sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub kind: SyncKind,
    pub profile_id: i32,
    pub outcome: SyncOutcome,
    pub phases: Vec<PhaseReport>,
    pub totals: SyncCounts,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl SyncReport {
    pub(crate) fn completed(
        kind: SyncKind,
        profile_id: i32,
        phases: Vec<PhaseReport>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self::build(kind, profile_id, SyncOutcome::Completed, phases, started_at)
    }

    pub(crate) fn failed(
        kind: SyncKind,
        profile_id: i32,
        error_kind: &str,
        reason: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        let outcome = SyncOutcome::Failed {
            error_kind: error_kind.to_string(),
            reason,
        };
        Self::build(kind, profile_id, outcome, Vec::new(), started_at)
    }

    fn build(
        kind: SyncKind,
        profile_id: i32,
        outcome: SyncOutcome,
        phases: Vec<PhaseReport>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let mut totals = SyncCounts::default();
        for phase in &phases {
            totals.add(&phase.counts);
        }
        let finished_at = Utc::now();
        let duration_ms = u64::try_from((finished_at - started_at).num_milliseconds()).unwrap_or(0);
        Self {
            kind,
            profile_id,
            outcome,
            phases,
            totals,
            started_at,
            finished_at,
            duration_ms,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, SyncOutcome::Failed { .. })
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemFailure> {
        self.phases.iter().flat_map(|p| p.failures.iter())
    }

    /// One-line summary for logs and trigger responses.
    pub fn summary(&self) -> String {
        match &self.outcome {
            SyncOutcome::Failed { reason, .. } => format!("{} sync failed: {reason}", self.kind),
            SyncOutcome::Completed => {
                let phase_errors = self.phases.iter().filter(|p| p.error.is_some()).count();
                let mut summary = format!(
                    "{} sync finished: {} created, {} updated, {} unchanged, {} failed",
                    self.kind,
                    self.totals.created,
                    self.totals.updated,
                    self.totals.unchanged,
                    self.totals.failed
                );
                if phase_errors > 0 {
                    summary.push_str(&format!(" ({phase_errors} phase(s) could not run)"));
                }
                summary
            }
        }
    }
}
