//! devgrid-autobuild — the workspace lifecycle scheduler.
//!
//! On every tick the [`Executor`] walks all workspaces and starts, stops,
//! marks dormant or deletes the ones whose schedules and template policies
//! say so. Several executors may share one store; the claim keeps them from
//! acting on the same workspace twice.
//!
//! # Architecture
//!
//! ```text
//!  TickSource ──► Executor::tick(now)
//!                   │
//!                   ├─ fetch      LifecycleStore::workspaces_eligible (paged)
//!                   ├─ decide     TemplatePolicyProvider + decision::decide (parallel)
//!                   ├─ claim      ClaimCoordinator (revision compare-and-set)
//!                   ├─ execute    BuildOrchestrator + NotificationEnqueuer
//!                   └─ report     StatsReporter (broadcast)
//! ```

pub mod decision;
pub mod error;
pub mod executor;
pub mod notify;
pub mod orchestrator;
pub mod stats;
pub mod store;
pub mod ticker;

pub use decision::{Decision, DecisionInput, Plan, VersionUpdate, decide, next_allowed_autostart};
pub use error::{AutobuildError, NotifyError, OrchestratorError, TransitionError};
pub use executor::{DEFAULT_QUIET_HOURS, Executor, ExecutorConfig};
pub use notify::{FakeEnqueuer, NoopEnqueuer, Notification, NotificationEnqueuer};
pub use orchestrator::{
    AUTOBUILD_INITIATOR, BuildOrchestrator, BuildRequest, JobCompletion, StoreOrchestrator,
};
pub use stats::{Stats, StatsReporter, render_prometheus};
pub use store::{ClaimCoordinator, LifecycleStore};
pub use ticker::{IntervalTicker, ManualTicker, TickSender, TickSource};
