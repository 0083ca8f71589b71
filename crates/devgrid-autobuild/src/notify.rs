//! Notifications raised by lifecycle transitions.
//!
//! The scheduler only enqueues; delivery belongs to whatever implements
//! [`NotificationEnqueuer`]. Enqueue failures are logged and never undo the
//! transition that caused them.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use devgrid_state::Workspace;
use tracing::warn;

use crate::error::NotifyError;

/// Notification template: workspace marked dormant.
pub const TEMPLATE_WORKSPACE_DORMANT: &str = "workspace_dormant";
/// Notification template: dormant workspace deleted.
pub const TEMPLATE_WORKSPACE_AUTODELETED: &str = "workspace_autodeleted";
/// Notification template: autostart moved the workspace to a new template version.
pub const TEMPLATE_WORKSPACE_AUTO_UPDATED: &str = "workspace_auto_updated";

/// One queued notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub template_id: String,
    pub user_id: String,
    pub targets: Vec<String>,
    pub labels: HashMap<String, String>,
}

#[async_trait]
pub trait NotificationEnqueuer: Send + Sync {
    async fn enqueue(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEnqueuer;

#[async_trait]
impl NotificationEnqueuer for NoopEnqueuer {
    async fn enqueue(&self, _notification: Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Records notifications in memory, for tests and the one-shot CLI.
#[derive(Debug, Default)]
pub struct FakeEnqueuer {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl FakeEnqueuer {
    /// An enqueuer that rejects every notification.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

#[async_trait]
impl NotificationEnqueuer for FakeEnqueuer {
    async fn enqueue(&self, notification: Notification) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError("enqueuer unavailable".into()));
        }
        self.sent
            .lock()
            .map_err(|e| NotifyError(e.to_string()))?
            .push(notification);
        Ok(())
    }
}

/// Workspace, template, organization and owner ids.
fn targets(workspace: &Workspace) -> Vec<String> {
    vec![
        workspace.id.clone(),
        workspace.template_id.clone(),
        workspace.organization_id.clone(),
        workspace.owner_id.clone(),
    ]
}

/// Coarse human rendering such as "3 days" or "90 minutes".
fn humanize(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    let (value, unit) = match secs {
        s if s >= 86_400 && s % 86_400 == 0 => (s / 86_400, "day"),
        s if s >= 3_600 && s % 3_600 == 0 => (s / 3_600, "hour"),
        s if s >= 60 && s % 60 == 0 => (s / 60, "minute"),
        s => (s, "second"),
    };
    if value == 1 {
        format!("1 {unit}")
    } else {
        format!("{value} {unit}s")
    }
}

fn labels<const N: usize>(pairs: [(&str, String); N]) -> HashMap<String, String> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

pub fn workspace_dormant(
    workspace: &Workspace,
    time_til_dormant: std::time::Duration,
) -> Notification {
    Notification {
        template_id: TEMPLATE_WORKSPACE_DORMANT.into(),
        user_id: workspace.owner_id.clone(),
        targets: targets(workspace),
        labels: labels([
            ("name", workspace.name.clone()),
            ("reason", "inactivity exceeded the dormancy threshold".into()),
            ("timeTilDormant", humanize(time_til_dormant)),
        ]),
    }
}

pub fn workspace_autodeleted(workspace: &Workspace) -> Notification {
    Notification {
        template_id: TEMPLATE_WORKSPACE_AUTODELETED.into(),
        user_id: workspace.owner_id.clone(),
        targets: targets(workspace),
        labels: labels([
            ("name", workspace.name.clone()),
            ("reason", "autodeleted due to dormancy".into()),
            ("initiator", "autobuild".into()),
        ]),
    }
}

pub fn workspace_auto_updated(workspace: &Workspace, version_name: &str) -> Notification {
    Notification {
        template_id: TEMPLATE_WORKSPACE_AUTO_UPDATED.into(),
        user_id: workspace.owner_id.clone(),
        targets: targets(workspace),
        labels: labels([
            ("name", workspace.name.clone()),
            ("template_version_name", version_name.to_string()),
            ("initiator", "autobuild".into()),
            ("reason", "autostart".into()),
        ]),
    }
}

/// Enqueue, logging instead of failing.
pub async fn dispatch(enqueuer: &dyn NotificationEnqueuer, notification: Notification) {
    let template_id = notification.template_id.clone();
    let user_id = notification.user_id.clone();
    if let Err(e) = enqueuer.enqueue(notification).await {
        warn!(%template_id, %user_id, error = %e, "notification enqueue failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use devgrid_state::AutomaticUpdates;

    fn workspace() -> Workspace {
        Workspace {
            id: "ws".into(),
            name: "dev-box".into(),
            owner_id: "owner".into(),
            organization_id: "org".into(),
            template_id: "tpl".into(),
            last_used_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            dormant_at: None,
            deleting_at: None,
            autostart_schedule: None,
            ttl_ms: None,
            automatic_updates: AutomaticUpdates::Never,
            deleted: false,
            revision: 0,
        }
    }

    #[test]
    fn dormant_notification_targets_everything() {
        let n = workspace_dormant(&workspace(), std::time::Duration::from_secs(3 * 86_400));
        assert_eq!(n.template_id, TEMPLATE_WORKSPACE_DORMANT);
        assert_eq!(n.user_id, "owner");
        for target in ["ws", "tpl", "org", "owner"] {
            assert!(n.targets.iter().any(|t| t == target));
        }
        assert_eq!(n.labels["timeTilDormant"], "3 days");
    }

    #[test]
    fn auto_updated_labels() {
        let n = workspace_auto_updated(&workspace(), "brave-otter");
        assert_eq!(n.labels["template_version_name"], "brave-otter");
        assert_eq!(n.labels["initiator"], "autobuild");
        assert_eq!(n.labels["reason"], "autostart");
    }

    #[test]
    fn humanized_durations() {
        assert_eq!(humanize(std::time::Duration::from_secs(86_400)), "1 day");
        assert_eq!(humanize(std::time::Duration::from_secs(5_400)), "90 minutes");
        assert_eq!(humanize(std::time::Duration::from_secs(7_200)), "2 hours");
        assert_eq!(humanize(std::time::Duration::from_secs(45)), "45 seconds");
    }

    #[tokio::test]
    async fn fake_enqueuer_records_and_clears() {
        let enqueuer = FakeEnqueuer::default();
        dispatch(&enqueuer, workspace_autodeleted(&workspace())).await;
        assert_eq!(enqueuer.sent().len(), 1);
        enqueuer.clear();
        assert!(enqueuer.sent().is_empty());
    }

    #[tokio::test]
    async fn failing_enqueuer_is_swallowed() {
        let enqueuer = FakeEnqueuer::failing();
        dispatch(&enqueuer, workspace_autodeleted(&workspace())).await;
        assert!(enqueuer.sent().is_empty());
    }
}
