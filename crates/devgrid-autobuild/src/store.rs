//! The store surface the scheduler reads from, and the claim coordinator.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use devgrid_state::{
    StateResult, StateStore, Template, TemplateVersion, User, Workspace, WorkspaceBuild,
};
use tracing::debug;

/// Read queries and the atomic claim the scheduler needs from durable state.
///
/// Implementations must make [`LifecycleStore::claim_workspace`] atomic
/// across every scheduler instance sharing the store.
pub trait LifecycleStore: Send + Sync {
    /// Non-deleted workspaces ordered by id, starting after `after`.
    fn workspaces_eligible(&self, after: Option<&str>, limit: usize)
    -> StateResult<Vec<Workspace>>;

    fn latest_build(&self, workspace_id: &str) -> StateResult<Option<WorkspaceBuild>>;

    fn owner(&self, user_id: &str) -> StateResult<Option<User>>;

    fn template(&self, template_id: &str) -> StateResult<Option<Template>>;

    fn template_version(&self, version_id: &str) -> StateResult<Option<TemplateVersion>>;

    /// Compare-and-set claim on the workspace revision observed at fetch time.
    fn claim_workspace(
        &self,
        workspace_id: &str,
        expected_revision: u64,
        instance_id: &str,
        tick: DateTime<Utc>,
    ) -> StateResult<bool>;
}

impl LifecycleStore for StateStore {
    fn workspaces_eligible(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> StateResult<Vec<Workspace>> {
        self.list_workspaces_page(after, limit)
    }

    fn latest_build(&self, workspace_id: &str) -> StateResult<Option<WorkspaceBuild>> {
        StateStore::latest_build(self, workspace_id)
    }

    fn owner(&self, user_id: &str) -> StateResult<Option<User>> {
        self.get_user(user_id)
    }

    fn template(&self, template_id: &str) -> StateResult<Option<Template>> {
        self.get_template(template_id)
    }

    fn template_version(&self, version_id: &str) -> StateResult<Option<TemplateVersion>> {
        self.get_template_version(version_id)
    }

    fn claim_workspace(
        &self,
        workspace_id: &str,
        expected_revision: u64,
        instance_id: &str,
        tick: DateTime<Utc>,
    ) -> StateResult<bool> {
        StateStore::claim_workspace(self, workspace_id, expected_revision, instance_id, tick)
    }
}

/// Ensures only one scheduler instance acts on a workspace per tick.
#[derive(Clone)]
pub struct ClaimCoordinator {
    store: Arc<dyn LifecycleStore>,
    instance_id: String,
}

impl ClaimCoordinator {
    pub fn new(store: Arc<dyn LifecycleStore>, instance_id: impl Into<String>) -> Self {
        Self {
            store,
            instance_id: instance_id.into(),
        }
    }

    /// Try to claim `workspace` as fetched. `Ok(false)` means another
    /// instance (or a concurrent write) got there first.
    pub fn claim(&self, workspace: &Workspace, tick: DateTime<Utc>) -> StateResult<bool> {
        let claimed = self.store.claim_workspace(
            &workspace.id,
            workspace.revision,
            &self.instance_id,
            tick,
        )?;
        if !claimed {
            debug!(
                workspace_id = %workspace.id,
                instance_id = %self.instance_id,
                "claim lost"
            );
        }
        Ok(claimed)
    }
}
