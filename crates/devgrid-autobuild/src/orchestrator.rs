//! Build orchestration.
//!
//! The scheduler never writes builds itself; it asks a [`BuildOrchestrator`]
//! to create them. [`StoreOrchestrator`] is the implementation backed by the
//! local [`StateStore`]. It either leaves new jobs pending for an external
//! provisioner or completes them on the spot.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use devgrid_schedule::TemplatePolicyProvider;
use devgrid_state::{
    BuildReason, JobStatus, ProvisionerJob, StateStore, TemplateVersionId, Transition,
    UserStatus, Workspace, WorkspaceBuild, WorkspaceId, millis,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::decision::after;
use crate::error::OrchestratorError;

/// Initiator recorded on builds created by the scheduler.
pub const AUTOBUILD_INITIATOR: &str = "autobuild";

/// A request to run one lifecycle transition.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRequest {
    pub workspace_id: WorkspaceId,
    pub transition: Transition,
    pub initiator_id: String,
    pub template_version_id: TemplateVersionId,
    pub reason: BuildReason,
    /// Tick instant the request was made at; used as the build's creation time.
    pub requested_at: DateTime<Utc>,
}

#[async_trait]
pub trait BuildOrchestrator: Send + Sync {
    /// Create and enqueue a build.
    async fn create_build(
        &self,
        request: BuildRequest,
    ) -> Result<WorkspaceBuild, OrchestratorError>;

    /// Set (or clear, with `None`) the workspace's dormancy.
    async fn update_dormancy(
        &self,
        workspace_id: &str,
        dormant_at: Option<DateTime<Utc>>,
    ) -> Result<Workspace, OrchestratorError>;
}

/// What happens to a newly created provisioner job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobCompletion {
    /// Leave the job pending for a provisioner to pick up.
    #[default]
    Pending,
    /// Succeed the job immediately.
    Immediate,
}

/// Orchestrator writing builds straight into the state store.
#[derive(Clone)]
pub struct StoreOrchestrator {
    store: StateStore,
    policy: Arc<dyn TemplatePolicyProvider>,
    completion: JobCompletion,
}

impl StoreOrchestrator {
    pub fn new(store: StateStore, policy: Arc<dyn TemplatePolicyProvider>) -> Self {
        Self {
            store,
            policy,
            completion: JobCompletion::Pending,
        }
    }

    pub fn with_completion(mut self, completion: JobCompletion) -> Self {
        self.completion = completion;
        self
    }

    /// Record the outcome of a build's job, as a provisioner would.
    pub fn complete_job(
        &self,
        workspace_id: &str,
        build_number: u32,
        job: ProvisionerJob,
    ) -> Result<WorkspaceBuild, OrchestratorError> {
        let build = self
            .store
            .update_build(workspace_id, build_number, |b| b.job = job)?;
        self.after_completion(&build)?;
        Ok(build)
    }

    fn after_completion(&self, build: &WorkspaceBuild) -> Result<(), OrchestratorError> {
        if build.transition == Transition::Delete && build.job.status == JobStatus::Succeeded {
            self.store
                .update_workspace(&build.workspace_id, |ws| ws.deleted = true)?;
            info!(workspace_id = %build.workspace_id, "workspace deleted");
        }
        Ok(())
    }

    fn load_workspace(&self, workspace_id: &str) -> Result<Workspace, OrchestratorError> {
        match self.store.get_workspace(workspace_id)? {
            Some(ws) if !ws.deleted => Ok(ws),
            Some(_) => Err(OrchestratorError::Rejected(format!(
                "workspace {workspace_id} is deleted"
            ))),
            None => Err(OrchestratorError::Rejected(format!(
                "workspace {workspace_id} not found"
            ))),
        }
    }
}

#[async_trait]
impl BuildOrchestrator for StoreOrchestrator {
    async fn create_build(
        &self,
        request: BuildRequest,
    ) -> Result<WorkspaceBuild, OrchestratorError> {
        let workspace = self.load_workspace(&request.workspace_id)?;
        let template = self
            .store
            .get_template(&workspace.template_id)?
            .ok_or_else(|| {
                OrchestratorError::Rejected(format!("template {} not found", workspace.template_id))
            })?;

        let deadline = if request.transition == Transition::Start {
            let owner = self.store.get_user(&workspace.owner_id)?;
            if owner.is_some_and(|o| o.status == UserStatus::Suspended) {
                return Err(OrchestratorError::Rejected(format!(
                    "owner {} is suspended",
                    workspace.owner_id
                )));
            }
            let options = self.policy.get(&template).await?;
            let ttl = match workspace.ttl_ms {
                Some(ms) if options.user_autostop_enabled => millis(ms),
                _ => options.default_ttl,
            };
            if ttl.is_zero() {
                None
            } else {
                after(request.requested_at, ttl)
            }
        } else {
            None
        };

        let parameters = self
            .store
            .latest_build(&workspace.id)?
            .map(|b| b.parameters)
            .unwrap_or_default();

        let job = match self.completion {
            JobCompletion::Pending => ProvisionerJob::pending(),
            JobCompletion::Immediate => ProvisionerJob::succeeded(request.requested_at),
        };

        let build = self.store.append_build(&WorkspaceBuild {
            workspace_id: request.workspace_id,
            build_number: 0,
            transition: request.transition,
            template_version_id: request.template_version_id,
            initiator_id: request.initiator_id,
            reason: request.reason,
            created_at: request.requested_at,
            deadline,
            job,
            parameters,
        })?;
        info!(
            workspace_id = %build.workspace_id,
            build_number = build.build_number,
            transition = %build.transition,
            reason = %build.reason,
            "build created"
        );
        self.after_completion(&build)?;
        Ok(build)
    }

    async fn update_dormancy(
        &self,
        workspace_id: &str,
        dormant_at: Option<DateTime<Utc>>,
    ) -> Result<Workspace, OrchestratorError> {
        let workspace = self.load_workspace(workspace_id)?;
        let deleting_at = match (dormant_at, self.store.get_template(&workspace.template_id)?) {
            (Some(at), Some(template)) => {
                let options = self.policy.get(&template).await?;
                if options.time_til_dormant_autodelete.is_zero() {
                    None
                } else {
                    after(at, options.time_til_dormant_autodelete)
                }
            }
            _ => None,
        };
        let updated = self
            .store
            .set_workspace_dormancy(workspace_id, dormant_at, deleting_at)?;
        info!(
            %workspace_id,
            dormant = dormant_at.is_some(),
            deleting_at = ?deleting_at,
            "workspace dormancy updated"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use devgrid_schedule::{Entitlements, Feature, GovernedPolicy, OpenPolicy};
    use devgrid_state::{AutomaticUpdates, BuildParameter, Template, User};

    const HOUR_MS: u64 = 3_600_000;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap()
    }

    fn seed(store: &StateStore, ttl_ms: Option<u64>) {
        store
            .put_template(&Template {
                id: "tpl".into(),
                organization_id: "org".into(),
                name: "tpl".into(),
                active_version_id: "v1".into(),
                default_ttl_ms: 8 * HOUR_MS,
                autostop_requirement_days: 0,
                autostop_requirement_weeks: 1,
                autostart_allowed_days: 0,
                failure_ttl_ms: 0,
                time_til_dormant_ms: 0,
                time_til_dormant_autodelete_ms: 48 * HOUR_MS,
                allow_user_autostart: true,
                allow_user_autostop: false,
                require_active_version: false,
                deleted: false,
            })
            .unwrap();
        store
            .put_user(&User {
                id: "owner".into(),
                username: "owner".into(),
                status: UserStatus::Active,
                quiet_hours_schedule: None,
            })
            .unwrap();
        store
            .put_workspace(&Workspace {
                id: "ws".into(),
                name: "ws".into(),
                owner_id: "owner".into(),
                organization_id: "org".into(),
                template_id: "tpl".into(),
                last_used_at: now(),
                dormant_at: None,
                deleting_at: None,
                autostart_schedule: None,
                ttl_ms,
                automatic_updates: AutomaticUpdates::Never,
                deleted: false,
                revision: 0,
            })
            .unwrap();
    }

    fn request(transition: Transition) -> BuildRequest {
        BuildRequest {
            workspace_id: "ws".into(),
            transition,
            initiator_id: AUTOBUILD_INITIATOR.into(),
            template_version_id: "v1".into(),
            reason: BuildReason::Autostart,
            requested_at: now(),
        }
    }

    #[tokio::test]
    async fn start_deadline_uses_workspace_ttl_when_user_autostop_enabled() {
        let store = StateStore::open_in_memory().unwrap();
        seed(&store, Some(HOUR_MS));
        let orchestrator = StoreOrchestrator::new(store.clone(), Arc::new(OpenPolicy));

        let build = orchestrator.create_build(request(Transition::Start)).await.unwrap();
        assert_eq!(build.build_number, 1);
        assert_eq!(build.job.status, JobStatus::Pending);
        assert_eq!(build.deadline, Some(now() + chrono::Duration::hours(1)));
    }

    #[tokio::test]
    async fn start_deadline_falls_back_to_template_ttl() {
        let store = StateStore::open_in_memory().unwrap();
        seed(&store, Some(HOUR_MS));
        // The template disallows user autostop, so the workspace TTL is ignored.
        let policy = GovernedPolicy::new(Arc::new(Entitlements::new([
            Feature::AdvancedTemplateScheduling,
        ])));
        let orchestrator = StoreOrchestrator::new(store, Arc::new(policy));

        let build = orchestrator.create_build(request(Transition::Start)).await.unwrap();
        assert_eq!(build.deadline, Some(now() + chrono::Duration::hours(8)));
    }

    #[tokio::test]
    async fn start_rejected_for_suspended_owner() {
        let store = StateStore::open_in_memory().unwrap();
        seed(&store, None);
        store
            .put_user(&User {
                id: "owner".into(),
                username: "owner".into(),
                status: UserStatus::Suspended,
                quiet_hours_schedule: None,
            })
            .unwrap();
        let orchestrator = StoreOrchestrator::new(store, Arc::new(OpenPolicy));

        let err = orchestrator.create_build(request(Transition::Start)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Rejected(_)));
        // Stopping is still allowed.
        assert!(orchestrator.create_build(request(Transition::Stop)).await.is_ok());
    }

    #[tokio::test]
    async fn parameters_carry_over_from_previous_build() {
        let store = StateStore::open_in_memory().unwrap();
        seed(&store, None);
        let orchestrator = StoreOrchestrator::new(store.clone(), Arc::new(OpenPolicy))
            .with_completion(JobCompletion::Immediate);
        let first = orchestrator.create_build(request(Transition::Start)).await.unwrap();
        store
            .update_build("ws", first.build_number, |b| {
                b.parameters = vec![BuildParameter {
                    name: "region".into(),
                    value: "us".into(),
                }]
            })
            .unwrap();

        let second = orchestrator.create_build(request(Transition::Stop)).await.unwrap();
        assert_eq!(second.parameters.len(), 1);
        assert_eq!(second.job.status, JobStatus::Succeeded);
        assert_eq!(second.deadline, None);
    }

    #[tokio::test]
    async fn completed_delete_marks_workspace_deleted() {
        let store = StateStore::open_in_memory().unwrap();
        seed(&store, None);
        let orchestrator = StoreOrchestrator::new(store.clone(), Arc::new(OpenPolicy));

        let build = orchestrator.create_build(request(Transition::Delete)).await.unwrap();
        assert!(!store.get_workspace("ws").unwrap().unwrap().deleted);

        orchestrator
            .complete_job("ws", build.build_number, ProvisionerJob::succeeded(now()))
            .unwrap();
        assert!(store.get_workspace("ws").unwrap().unwrap().deleted);

        let err = orchestrator.create_build(request(Transition::Start)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Rejected(_)));
    }

    #[tokio::test]
    async fn dormancy_sets_deleting_at_from_policy() {
        let store = StateStore::open_in_memory().unwrap();
        seed(&store, None);
        let policy = GovernedPolicy::new(Arc::new(Entitlements::new([
            Feature::AdvancedTemplateScheduling,
        ])));
        let orchestrator = StoreOrchestrator::new(store.clone(), Arc::new(policy));

        let ws = orchestrator.update_dormancy("ws", Some(now())).await.unwrap();
        assert_eq!(ws.dormant_at, Some(now()));
        assert_eq!(ws.deleting_at, Some(now() + chrono::Duration::hours(48)));

        let ws = orchestrator.update_dormancy("ws", None).await.unwrap();
        assert_eq!(ws.dormant_at, None);
        assert_eq!(ws.deleting_at, None);
    }
}
