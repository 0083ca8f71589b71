//! Domain types for the devgrid state store.
//!
//! These types represent the persisted state of workspaces, their builds,
//! templates, template versions, users and lifecycle claims. All types are
//! serializable to/from JSON for storage in redb tables.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a workspace.
pub type WorkspaceId = String;

/// Unique identifier for a template.
pub type TemplateId = String;

/// Unique identifier for a template version.
pub type TemplateVersionId = String;

/// Unique identifier for a user.
pub type UserId = String;

/// Unique identifier for an organization.
pub type OrganizationId = String;

/// Convert a stored millisecond count into a duration. Zero means disabled.
pub fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

// ── Workspace ──────────────────────────────────────────────────────

/// A user-owned development environment instantiated from a template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub owner_id: UserId,
    pub organization_id: OrganizationId,
    pub template_id: TemplateId,
    pub last_used_at: DateTime<Utc>,
    pub dormant_at: Option<DateTime<Utc>>,
    pub deleting_at: Option<DateTime<Utc>>,
    /// Weekly cron expression, optionally prefixed with `CRON_TZ=<zone>`.
    pub autostart_schedule: Option<String>,
    /// Per-workspace TTL override in milliseconds.
    pub ttl_ms: Option<u64>,
    #[serde(default)]
    pub automatic_updates: AutomaticUpdates,
    #[serde(default)]
    pub deleted: bool,
    /// Bumped by the store on every write to this row.
    #[serde(default)]
    pub revision: u64,
}

impl Workspace {
    pub fn is_dormant(&self) -> bool {
        self.dormant_at.is_some()
    }
}

/// Whether autostart should move the workspace onto the template's active version.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AutomaticUpdates {
    #[default]
    Never,
    Always,
}

// ── Builds ─────────────────────────────────────────────────────────

/// Lifecycle transition performed by a build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Start,
    Stop,
    Delete,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Why a build was created.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuildReason {
    #[default]
    Initiator,
    Autostart,
    Autostop,
    AutostopRequirement,
    Dormancy,
    FailedStop,
    Autodelete,
    Suspended,
}

impl std::fmt::Display for BuildReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initiator => "initiator",
            Self::Autostart => "autostart",
            Self::Autostop => "autostop",
            Self::AutostopRequirement => "autostop_requirement",
            Self::Dormancy => "dormancy",
            Self::FailedStop => "failedstop",
            Self::Autodelete => "autodelete",
            Self::Suspended => "suspended",
        };
        write!(f, "{s}")
    }
}

/// Status of the provisioner job backing a build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_completed(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// Provisioner job attached to a build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisionerJob {
    pub status: JobStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ProvisionerJob {
    pub fn pending() -> Self {
        Self {
            status: JobStatus::Pending,
            completed_at: None,
            error: None,
        }
    }

    pub fn succeeded(at: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Succeeded,
            completed_at: Some(at),
            error: None,
        }
    }

    pub fn failed(at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            completed_at: Some(at),
            error: Some(error.into()),
        }
    }
}

/// A rich parameter value supplied to a build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildParameter {
    pub name: String,
    pub value: String,
}

/// One lifecycle transition attempt for a workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceBuild {
    pub workspace_id: WorkspaceId,
    /// Assigned by the store, monotonic per workspace.
    pub build_number: u32,
    pub transition: Transition,
    pub template_version_id: TemplateVersionId,
    pub initiator_id: UserId,
    pub reason: BuildReason,
    pub created_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub job: ProvisionerJob,
    #[serde(default)]
    pub parameters: Vec<BuildParameter>,
}

impl WorkspaceBuild {
    pub fn table_key(&self) -> String {
        crate::tables::build_key(&self.workspace_id, self.build_number)
    }

    /// A successful Start build: the workspace is running.
    pub fn is_running(&self) -> bool {
        self.transition == Transition::Start && self.job.status == JobStatus::Succeeded
    }

    /// A successful Stop build: the workspace is stopped.
    pub fn is_stopped(&self) -> bool {
        self.transition == Transition::Stop && self.job.status == JobStatus::Succeeded
    }

    pub fn is_failed(&self) -> bool {
        self.job.status == JobStatus::Failed
    }
}

// ── Templates ──────────────────────────────────────────────────────

/// Blueprint a workspace is created from, carrying its lifecycle policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Template {
    pub id: TemplateId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub active_version_id: TemplateVersionId,
    #[serde(default)]
    pub default_ttl_ms: u64,
    /// Bit 0 = Monday through bit 6 = Sunday.
    #[serde(default)]
    pub autostop_requirement_days: u8,
    #[serde(default = "default_weeks")]
    pub autostop_requirement_weeks: u32,
    /// Days on which autostart may fire; 0 allows every day.
    #[serde(default)]
    pub autostart_allowed_days: u8,
    #[serde(default)]
    pub failure_ttl_ms: u64,
    #[serde(default)]
    pub time_til_dormant_ms: u64,
    #[serde(default)]
    pub time_til_dormant_autodelete_ms: u64,
    #[serde(default = "default_true")]
    pub allow_user_autostart: bool,
    #[serde(default = "default_true")]
    pub allow_user_autostop: bool,
    #[serde(default)]
    pub require_active_version: bool,
    #[serde(default)]
    pub deleted: bool,
}

fn default_weeks() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// Parameter declared by a template version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateParameter {
    pub name: String,
    pub required: bool,
    #[serde(default = "default_true")]
    pub mutable: bool,
    pub default_value: Option<String>,
}

/// A published revision of a template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateVersion {
    pub id: TemplateVersionId,
    pub template_id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<TemplateParameter>,
}

// ── Users ──────────────────────────────────────────────────────────

/// Account status of a workspace owner.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Active,
    Suspended,
    Dormant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub status: UserStatus,
    /// Daily cron giving the stop time used by autostop requirements.
    pub quiet_hours_schedule: Option<String>,
}

// ── Claims ─────────────────────────────────────────────────────────

/// Record of the scheduler instance that last acted on a workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimRecord {
    pub workspace_id: WorkspaceId,
    pub instance_id: String,
    pub tick: DateTime<Utc>,
    pub revision: u64,
}
