//! Error types for schedule parsing and policy resolution.

use thiserror::Error;

/// Errors reported when constructing a schedule or requirement.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("expected 5 cron fields, found {0}")]
    FieldCount(usize),

    #[error("invalid {field} field {value:?}: {reason}")]
    Field {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("unknown timezone {0:?}")]
    Timezone(String),

    #[error("{0} schedules must use '*' for {1}")]
    Shape(&'static str, &'static str),

    #[error("week interval must be at least 1")]
    ZeroWeeks,

    #[error("invalid days-of-week mask {0:#x}")]
    DaysOfWeek(u8),
}

/// Errors returned by a template policy provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("template {template_id} has invalid schedule policy: {source}")]
    InvalidTemplate {
        template_id: String,
        #[source]
        source: ScheduleError,
    },

    #[error("policy backend unavailable: {0}")]
    Unavailable(String),
}
