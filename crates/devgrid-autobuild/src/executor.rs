//! The executor loop.
//!
//! Each tick fetches every eligible workspace, decides what to do with each
//! one, claims the workspaces that need action, hands the actions to the
//! [`BuildOrchestrator`] and publishes a [`Stats`] summary.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use devgrid_schedule::{Schedule, ScheduleError, TemplatePolicyProvider, TemplateScheduleOptions};
use devgrid_state::{BuildReason, Transition, Workspace};
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::decision::{Decision, DecisionInput, Plan, decide};
use crate::error::{AutobuildError, TransitionError};
use crate::notify::{self, NotificationEnqueuer};
use crate::orchestrator::{AUTOBUILD_INITIATOR, BuildOrchestrator, BuildRequest};
use crate::stats::{Stats, StatsReporter};
use crate::store::{ClaimCoordinator, LifecycleStore};
use crate::ticker::TickSource;

/// Quiet hours for owners who have not set their own: midnight UTC.
pub const DEFAULT_QUIET_HOURS: &str = "CRON_TZ=UTC 0 0 * * *";

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub instance_id: String,
    /// Workspaces fetched per page.
    pub batch_size: usize,
    /// Workspaces decided concurrently.
    pub max_concurrency: usize,
    pub default_quiet_hours: Schedule,
}

impl ExecutorConfig {
    pub fn new(instance_id: impl Into<String>) -> Result<Self, ScheduleError> {
        Ok(Self {
            instance_id: instance_id.into(),
            batch_size: 500,
            max_concurrency: 16,
            default_quiet_hours: Schedule::daily(DEFAULT_QUIET_HOURS)?,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }
}

/// A due action for one workspace, waiting for its claim.
struct Due {
    workspace: Workspace,
    plan: Plan,
    options: TemplateScheduleOptions,
}

enum Outcome {
    Idle,
    Due(Box<Due>),
    Failed(Workspace, TransitionError),
}

pub struct Executor {
    store: Arc<dyn LifecycleStore>,
    policy: Arc<dyn TemplatePolicyProvider>,
    orchestrator: Arc<dyn BuildOrchestrator>,
    enqueuer: Arc<dyn NotificationEnqueuer>,
    claims: ClaimCoordinator,
    reporter: StatsReporter,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        policy: Arc<dyn TemplatePolicyProvider>,
        orchestrator: Arc<dyn BuildOrchestrator>,
        enqueuer: Arc<dyn NotificationEnqueuer>,
        reporter: StatsReporter,
        config: ExecutorConfig,
    ) -> Self {
        let claims = ClaimCoordinator::new(store.clone(), config.instance_id.clone());
        Self {
            store,
            policy,
            orchestrator,
            enqueuer,
            claims,
            reporter,
            config,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    pub fn reporter(&self) -> &StatsReporter {
        &self.reporter
    }

    /// Run one tick evaluated at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Stats, AutobuildError> {
        debug!(%now, phase = "fetching", "tick");
        let workspaces = self.fetch_all()?;

        debug!(%now, phase = "deciding", count = workspaces.len(), "tick");
        let outcomes: Vec<Outcome> = stream::iter(workspaces)
            .map(|workspace| self.evaluate(workspace, now))
            .buffered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let mut stats = Stats::new(now, self.config.instance_id.clone());
        debug!(%now, phase = "executing", "tick");
        for outcome in outcomes {
            match outcome {
                Outcome::Idle => {}
                Outcome::Failed(workspace, err) => {
                    warn!(workspace_id = %workspace.id, error = %err, "workspace skipped");
                    stats.errors.insert(workspace.id, err);
                }
                Outcome::Due(due) => self.apply(*due, now, &mut stats).await,
            }
        }

        debug!(%now, phase = "reporting", "tick");
        info!(
            %now,
            transitions = stats.transitions.len(),
            dormant = stats.dormant.len(),
            errors = stats.errors.len(),
            "tick complete"
        );
        self.reporter.publish(stats.clone());
        Ok(stats)
    }

    /// Tick on every instant `ticks` yields until it ends or `shutdown` flips.
    pub async fn run<T: TickSource>(&self, mut ticks: T, mut shutdown: watch::Receiver<bool>) {
        info!(instance_id = %self.config.instance_id, "lifecycle executor started");

        loop {
            tokio::select! {
                next = ticks.next_tick() => {
                    let Some(now) = next else {
                        info!("tick source closed");
                        break;
                    };
                    if let Err(e) = self.tick(now).await {
                        error!(error = %e, %now, "tick aborted");
                    }
                }
                _ = shutdown.changed() => {
                    info!("lifecycle executor shutting down");
                    break;
                }
            }
        }
    }

    fn fetch_all(&self) -> Result<Vec<Workspace>, AutobuildError> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .store
                .workspaces_eligible(cursor.as_deref(), self.config.batch_size.max(1))
                .map_err(AutobuildError::Fetch)?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.id.clone());
            all.extend(page);
        }
        Ok(all)
    }

    async fn evaluate(&self, workspace: Workspace, now: DateTime<Utc>) -> Outcome {
        match self.decide_one(&workspace, now).await {
            Ok((Decision::NoOp, _)) => {
                debug!(workspace_id = %workspace.id, "no action");
                Outcome::Idle
            }
            Ok((Decision::Reject(err), _)) | Err(err) => Outcome::Failed(workspace, err),
            Ok((Decision::Apply(plan), options)) => Outcome::Due(Box::new(Due {
                workspace,
                plan,
                options,
            })),
        }
    }

    async fn decide_one(
        &self,
        workspace: &Workspace,
        now: DateTime<Utc>,
    ) -> Result<(Decision, TemplateScheduleOptions), TransitionError> {
        let build = self
            .store
            .latest_build(&workspace.id)?
            .ok_or(TransitionError::NoBuilds)?;
        let template = self
            .store
            .template(&workspace.template_id)?
            .ok_or_else(|| TransitionError::TemplateNotFound(workspace.template_id.clone()))?;
        let owner = self
            .store
            .owner(&workspace.owner_id)?
            .ok_or_else(|| TransitionError::OwnerNotFound(workspace.owner_id.clone()))?;
        let options = self.policy.get(&template).await?;

        let active_version = if template.active_version_id != build.template_version_id {
            self.store.template_version(&template.active_version_id)?
        } else {
            None
        };

        let owner_quiet_hours = owner
            .quiet_hours_schedule
            .as_deref()
            .and_then(|expr| match Schedule::daily(expr) {
                Ok(schedule) => Some(schedule),
                Err(e) => {
                    debug!(user_id = %owner.id, error = %e, "invalid quiet hours, using default");
                    None
                }
            });
        let quiet_hours = owner_quiet_hours
            .as_ref()
            .unwrap_or(&self.config.default_quiet_hours);

        let decision = decide(&DecisionInput {
            now,
            workspace,
            latest_build: &build,
            owner: &owner,
            template: &template,
            active_version: active_version.as_ref(),
            options: &options,
            quiet_hours,
        });
        Ok((decision, options))
    }

    async fn apply(&self, due: Due, now: DateTime<Utc>, stats: &mut Stats) {
        let Due {
            workspace,
            plan,
            options,
        } = due;

        match self.claims.claim(&workspace, now) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!(workspace_id = %workspace.id, error = %e, "claim failed");
                stats.errors.insert(workspace.id, e.into());
                return;
            }
        }

        // Dormancy is only recorded once the build exists; a dormant
        // workspace is never revisited for its Stop.
        if let Some(transition) = plan.transition {
            let request = BuildRequest {
                workspace_id: workspace.id.clone(),
                transition,
                initiator_id: AUTOBUILD_INITIATOR.to_string(),
                template_version_id: plan.template_version_id.clone(),
                reason: plan.reason,
                requested_at: now,
            };
            match self.orchestrator.create_build(request).await {
                Ok(build) => {
                    info!(
                        workspace_id = %workspace.id,
                        %transition,
                        reason = %plan.reason,
                        build_number = build.build_number,
                        "transition enqueued"
                    );
                    stats.transitions.insert(workspace.id.clone(), transition);
                }
                Err(e) => {
                    let err = TransitionError::from(e);
                    warn!(
                        workspace_id = %workspace.id,
                        %transition,
                        error = %err,
                        "transition failed"
                    );
                    stats.errors.insert(workspace.id, err);
                    return;
                }
            }

            if transition == Transition::Delete
                && plan.reason == BuildReason::Autodelete
                && workspace.is_dormant()
            {
                notify::dispatch(
                    self.enqueuer.as_ref(),
                    notify::workspace_autodeleted(&workspace),
                )
                .await;
            }
            if let Some(update) = &plan.updated_version {
                info!(
                    workspace_id = %workspace.id,
                    from = %update.from,
                    to = %update.to,
                    "workspace moved to active template version"
                );
                notify::dispatch(
                    self.enqueuer.as_ref(),
                    notify::workspace_auto_updated(&workspace, &update.to_name),
                )
                .await;
            }
        }

        if plan.mark_dormant {
            if let Err(e) = self.orchestrator.update_dormancy(&workspace.id, Some(now)).await {
                let err = TransitionError::from(e);
                warn!(workspace_id = %workspace.id, error = %err, "mark dormant failed");
                stats.errors.insert(workspace.id, err);
                return;
            }
            info!(workspace_id = %workspace.id, "workspace marked dormant");
            stats.dormant.push(workspace.id.clone());
            notify::dispatch(
                self.enqueuer.as_ref(),
                notify::workspace_dormant(&workspace, options.time_til_dormant),
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use devgrid_schedule::OpenPolicy;
    use devgrid_state::{
        AutomaticUpdates, BuildReason, ProvisionerJob, StateStore, Template, User, UserStatus,
        WorkspaceBuild,
    };

    use crate::notify::FakeEnqueuer;
    use crate::orchestrator::StoreOrchestrator;
    use crate::ticker::ManualTicker;

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    fn seed(store: &StateStore, id: &str, deadline: Option<DateTime<Utc>>) {
        store
            .put_workspace(&Workspace {
                id: id.into(),
                name: id.into(),
                owner_id: "owner".into(),
                organization_id: "org".into(),
                template_id: "tpl".into(),
                last_used_at: t(8, 0),
                dormant_at: None,
                deleting_at: None,
                autostart_schedule: None,
                ttl_ms: None,
                automatic_updates: AutomaticUpdates::Never,
                deleted: false,
                revision: 0,
            })
            .unwrap();
        store
            .put_build(&WorkspaceBuild {
                workspace_id: id.into(),
                build_number: 1,
                transition: Transition::Start,
                template_version_id: "v1".into(),
                initiator_id: "owner".into(),
                reason: BuildReason::Initiator,
                created_at: t(8, 0),
                deadline,
                job: ProvisionerJob::succeeded(t(8, 1)),
                parameters: Vec::new(),
            })
            .unwrap();
    }

    fn store() -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_template(&Template {
                id: "tpl".into(),
                organization_id: "org".into(),
                name: "tpl".into(),
                active_version_id: "v1".into(),
                default_ttl_ms: 0,
                autostop_requirement_days: 0,
                autostop_requirement_weeks: 1,
                autostart_allowed_days: 0,
                failure_ttl_ms: 0,
                time_til_dormant_ms: 0,
                time_til_dormant_autodelete_ms: 0,
                allow_user_autostart: true,
                allow_user_autostop: true,
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
    }

    fn executor(store: &StateStore, batch_size: usize) -> Executor {
        let policy: Arc<dyn TemplatePolicyProvider> = Arc::new(OpenPolicy);
        Executor::new(
            Arc::new(store.clone()),
            policy.clone(),
            Arc::new(StoreOrchestrator::new(store.clone(), policy)),
            Arc::new(FakeEnqueuer::default()),
            StatsReporter::new(4),
            ExecutorConfig::new("replica-1")
                .unwrap()
                .with_batch_size(batch_size)
                .with_max_concurrency(2),
        )
    }

    #[tokio::test]
    async fn tick_walks_every_page() {
        let store = store();
        for id in ["ws-a", "ws-b", "ws-c", "ws-d", "ws-e"] {
            seed(&store, id, Some(t(9, 0)));
        }
        let executor = executor(&store, 2);

        let stats = executor.tick(t(9, 0)).await.unwrap();
        assert_eq!(stats.transitions.len(), 5);
        assert!(stats.transitions.values().all(|t| *t == Transition::Stop));
        assert!(stats.errors.is_empty());
    }

    #[tokio::test]
    async fn tick_before_deadline_does_nothing() {
        let store = store();
        seed(&store, "ws-a", Some(t(9, 0)));
        let executor = executor(&store, 10);

        let stats = executor.tick(t(8, 59)).await.unwrap();
        assert!(stats.transitions.is_empty());
        assert_eq!(store.latest_build("ws-a").unwrap().unwrap().build_number, 1);
    }

    #[tokio::test]
    async fn missing_owner_is_recorded() {
        let store = store();
        seed(&store, "ws-a", Some(t(9, 0)));
        store
            .update_workspace("ws-a", |ws| ws.owner_id = "ghost".into())
            .unwrap();
        let executor = executor(&store, 10);

        let stats = executor.tick(t(9, 0)).await.unwrap();
        assert_eq!(
            stats.errors.get("ws-a"),
            Some(&TransitionError::OwnerNotFound("ghost".into()))
        );
    }

    #[tokio::test]
    async fn run_publishes_stats_and_stops_on_shutdown() {
        let store = store();
        seed(&store, "ws-a", Some(t(9, 0)));
        let executor = Arc::new(executor(&store, 10));
        let mut stats_rx = executor.reporter().subscribe();
        let (ticks, ticker) = ManualTicker::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.run(ticker, shutdown_rx).await })
        };

        assert!(ticks.tick(t(9, 0)).await);
        let stats = stats_rx.recv().await.unwrap();
        assert_eq!(stats.transitions.get("ws-a"), Some(&Transition::Stop));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn run_ends_when_tick_source_closes() {
        let store = store();
        let executor = executor(&store, 10);
        let (ticks, ticker) = ManualTicker::channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(ticks);

        executor.run(ticker, shutdown_rx).await;
    }
}
