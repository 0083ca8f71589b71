//! devgrid-schedule — when workspaces may run.
//!
//! - [`cron`]: timezone-aware cron schedules with optional week intervals,
//!   used for workspace autostart and owner quiet hours.
//! - [`requirement`]: template autostop/autostart day requirements.
//! - [`policy`]: the pluggable provider that resolves a template's effective
//!   lifecycle options, with open and governed implementations.

pub mod cron;
pub mod error;
pub mod policy;
pub mod requirement;

pub use cron::Schedule;
pub use error::{PolicyError, ScheduleError};
pub use policy::{
    Entitlements, Feature, GovernedPolicy, OpenPolicy, TemplatePolicyProvider,
    TemplateScheduleOptions,
};
pub use requirement::{AutostartRequirement, AutostopRequirement, DaysOfWeek};
