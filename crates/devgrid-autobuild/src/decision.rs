//! Lifecycle decisions.
//!
//! [`decide`] is a pure function of one workspace's snapshot, its resolved
//! template options and the tick instant. It never touches the store, so the
//! same inputs always produce the same decision. Rules are checked in order
//! and the first match wins:
//!
//! 1. a build still in flight is left alone
//! 2. a running workspace whose owner is suspended is stopped
//! 3. a workspace past its deletion time, or dormant past the auto-delete
//!    window, is deleted (a failed delete is retried once a day)
//! 4. any other dormant workspace is left alone
//! 5. a workspace idle past the dormancy threshold is marked dormant, and
//!    stopped if it is running
//! 6. a failed start older than the failure TTL is stopped
//! 7. a running workspace past its deadline, or past today's forced-restart
//!    time, is stopped (whichever came first)
//! 8. a stopped workspace whose autostart schedule came due is started,
//!    possibly on the template's active version
//!
//! Every "has passed" comparison is inclusive (`now >= instant`) and every
//! zero duration disables its rule.

use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use devgrid_schedule::{AutostartRequirement, Schedule, TemplateScheduleOptions};
use devgrid_state::{
    AutomaticUpdates, BuildParameter, BuildReason, Template, TemplateVersion,
    TemplateVersionId, Transition, User, UserStatus, Workspace, WorkspaceBuild,
};

use crate::error::TransitionError;

/// A failed delete is not retried until this long after it completed.
pub const FAILED_DELETE_RETRY: Duration = Duration::from_secs(24 * 60 * 60);

/// Everything the engine looks at for one workspace in one tick.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub now: DateTime<Utc>,
    pub workspace: &'a Workspace,
    pub latest_build: &'a WorkspaceBuild,
    pub owner: &'a User,
    pub template: &'a Template,
    /// The template's active version, when the workspace is pinned to another.
    pub active_version: Option<&'a TemplateVersion>,
    pub options: &'a TemplateScheduleOptions,
    /// The owner's daily quiet-hours schedule (forced-restart stop time).
    pub quiet_hours: &'a Schedule,
}

/// The template version an autostart moves the workspace onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionUpdate {
    pub from: TemplateVersionId,
    pub to: TemplateVersionId,
    pub to_name: String,
}

/// What to do to a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub transition: Option<Transition>,
    pub reason: BuildReason,
    pub mark_dormant: bool,
    pub template_version_id: TemplateVersionId,
    pub updated_version: Option<VersionUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    NoOp,
    Apply(Plan),
    /// Action was due but cannot be taken; reported as a workspace error.
    Reject(TransitionError),
}

impl Decision {
    fn transition(input: &DecisionInput<'_>, transition: Transition, reason: BuildReason) -> Self {
        Self::Apply(Plan {
            transition: Some(transition),
            reason,
            mark_dormant: false,
            template_version_id: input.latest_build.template_version_id.clone(),
            updated_version: None,
        })
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp)
    }
}

pub(crate) fn after(instant: DateTime<Utc>, duration: Duration) -> Option<DateTime<Utc>> {
    let delta = chrono::Duration::from_std(duration).ok()?;
    instant.checked_add_signed(delta)
}

/// `now >= at + duration`, false when the duration is zero (disabled).
fn elapsed(now: DateTime<Utc>, at: DateTime<Utc>, duration: Duration) -> bool {
    !duration.is_zero() && after(at, duration).is_some_and(|due| now >= due)
}

/// Decide the lifecycle action for one workspace.
pub fn decide(input: &DecisionInput<'_>) -> Decision {
    let DecisionInput {
        now,
        workspace,
        latest_build: build,
        owner,
        template,
        options,
        ..
    } = *input;

    if workspace.deleted || template.deleted || !build.job.status.is_completed() {
        return Decision::NoOp;
    }

    if owner.status == UserStatus::Suspended && build.is_running() {
        return Decision::transition(input, Transition::Stop, BuildReason::Suspended);
    }

    if delete_due(workspace, build, options, now) {
        return Decision::transition(input, Transition::Delete, BuildReason::Autodelete);
    }

    if workspace.is_dormant() {
        return Decision::NoOp;
    }

    if elapsed(now, workspace.last_used_at, options.time_til_dormant) {
        return Decision::Apply(Plan {
            transition: build.is_running().then_some(Transition::Stop),
            reason: BuildReason::Dormancy,
            mark_dormant: true,
            template_version_id: build.template_version_id.clone(),
            updated_version: None,
        });
    }

    if build.transition == Transition::Start
        && build.is_failed()
        && build
            .job
            .completed_at
            .is_some_and(|at| elapsed(now, at, options.failure_ttl))
    {
        return Decision::transition(input, Transition::Stop, BuildReason::FailedStop);
    }

    if build.is_running()
        && let Some(reason) = autostop_due(input)
    {
        return Decision::transition(input, Transition::Stop, reason);
    }

    if build.is_stopped() && autostart_due(input) {
        return start(input);
    }

    Decision::NoOp
}

fn delete_due(
    workspace: &Workspace,
    build: &WorkspaceBuild,
    options: &TemplateScheduleOptions,
    now: DateTime<Utc>,
) -> bool {
    let marked = workspace.deleting_at.is_some_and(|at| now >= at);
    let dormant_expired = workspace
        .dormant_at
        .is_some_and(|at| elapsed(now, at, options.time_til_dormant_autodelete));
    if !marked && !dormant_expired {
        return false;
    }
    if build.transition == Transition::Delete && build.is_failed() {
        return build
            .job
            .completed_at
            .is_some_and(|at| elapsed(now, at, FAILED_DELETE_RETRY));
    }
    true
}

/// The earliest passed stop instant of a running workspace, with its reason.
fn autostop_due(input: &DecisionInput<'_>) -> Option<BuildReason> {
    let DecisionInput {
        now,
        latest_build: build,
        options,
        quiet_hours,
        ..
    } = *input;

    let deadline = build
        .deadline
        .filter(|deadline| now >= *deadline)
        .map(|deadline| (deadline, BuildReason::Autostop));

    let requirement = &options.autostop_requirement;
    let forced = if requirement.is_enabled() {
        let today = now.with_timezone(&quiet_hours.timezone()).date_naive();
        quiet_hours
            .first_on(today)
            .filter(|stop_at| {
                requirement.applies_on(today) && build.created_at < *stop_at && now >= *stop_at
            })
            .map(|stop_at| (stop_at, BuildReason::AutostopRequirement))
    } else {
        None
    };

    [deadline, forced]
        .into_iter()
        .flatten()
        .min_by_key(|(at, _)| *at)
        .map(|(_, reason)| reason)
}

fn autostart_due(input: &DecisionInput<'_>) -> bool {
    let DecisionInput {
        now,
        workspace,
        latest_build: build,
        owner,
        options,
        ..
    } = *input;

    if !options.user_autostart_enabled || owner.status != UserStatus::Active {
        return false;
    }
    let Some(expr) = workspace.autostart_schedule.as_deref() else {
        return false;
    };
    // An unparseable schedule never fires.
    let Ok(schedule) = Schedule::weekly(expr) else {
        return false;
    };
    next_allowed_autostart(&schedule, build.created_at, &options.autostart_requirement)
        .is_some_and(|next| next <= now)
}

/// The first schedule trigger after `from` that lands on an allowed day.
pub fn next_allowed_autostart(
    schedule: &Schedule,
    from: DateTime<Utc>,
    requirement: &AutostartRequirement,
) -> Option<DateTime<Utc>> {
    let tz = schedule.timezone();
    let mut cursor = from;
    // One iteration per disallowed day is enough to cover a full week.
    for _ in 0..8 {
        let next = schedule.next(cursor)?;
        let local = next.with_timezone(&tz);
        if requirement.allows(local.weekday()) {
            return Some(next);
        }
        // Jump past the rest of that local day.
        let next_day = local.date_naive().succ_opt()?;
        cursor = next_day
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| tz.from_local_datetime(&midnight).earliest())
            .map(|midnight| midnight.with_timezone(&Utc) - chrono::Duration::seconds(1))
            .unwrap_or(next);
    }
    None
}

/// Build the Start plan, resolving which template version to use.
fn start(input: &DecisionInput<'_>) -> Decision {
    let DecisionInput {
        workspace,
        latest_build: build,
        template,
        active_version,
        options,
        ..
    } = *input;

    let wants_active = options.require_active_version
        || workspace.automatic_updates == AutomaticUpdates::Always;
    if !wants_active || build.template_version_id == template.active_version_id {
        return Decision::transition(input, Transition::Start, BuildReason::Autostart);
    }

    let Some(active) = active_version else {
        return Decision::Reject(TransitionError::TemplateVersionNotFound(
            template.active_version_id.clone(),
        ));
    };
    let missing = missing_parameters(active, &build.parameters);
    if !missing.is_empty() {
        return Decision::Reject(TransitionError::IncompatibleParameters {
            version: active.name.clone(),
            missing,
        });
    }

    Decision::Apply(Plan {
        transition: Some(Transition::Start),
        reason: BuildReason::Autostart,
        mark_dormant: false,
        template_version_id: active.id.clone(),
        updated_version: Some(VersionUpdate {
            from: build.template_version_id.clone(),
            to: active.id.clone(),
            to_name: active.name.clone(),
        }),
    })
}

/// Required parameters of `version` that have neither a default nor a prior value.
pub fn missing_parameters(version: &TemplateVersion, values: &[BuildParameter]) -> Vec<String> {
    version
        .parameters
        .iter()
        .filter(|p| p.required && p.default_value.is_none())
        .filter(|p| !values.iter().any(|v| v.name == p.name))
        .map(|p| p.name.clone())
        .collect()
}
