//! Template schedule policy.
//!
//! A [`TemplatePolicyProvider`] turns a stored [`Template`] into the
//! [`TemplateScheduleOptions`] the lifecycle engine acts on. Two providers
//! ship with devgrid:
//!
//! - [`OpenPolicy`] honours the template TTL and the user's own autostart
//!   and autostop settings, and nothing else.
//! - [`GovernedPolicy`] additionally enforces autostop/autostart
//!   requirements, failure cleanup, dormancy and active-version rules, each
//!   gated on an [`Entitlements`] feature.
//!
//! Options are resolved on every call; nothing is cached between ticks.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use devgrid_state::{Template, millis};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{PolicyError, ScheduleError};
use crate::requirement::{AutostartRequirement, AutostopRequirement};

/// Lifecycle options in effect for a template. A zero duration disables the feature.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateScheduleOptions {
    pub user_autostart_enabled: bool,
    pub user_autostop_enabled: bool,
    pub default_ttl: Duration,
    pub autostop_requirement: AutostopRequirement,
    pub autostart_requirement: AutostartRequirement,
    pub failure_ttl: Duration,
    pub time_til_dormant: Duration,
    pub time_til_dormant_autodelete: Duration,
    pub require_active_version: bool,
}

impl TemplateScheduleOptions {
    /// Options for a template under the open policy.
    pub fn open(template: &Template) -> Self {
        Self {
            user_autostart_enabled: true,
            user_autostop_enabled: true,
            default_ttl: millis(template.default_ttl_ms),
            autostop_requirement: AutostopRequirement::default(),
            autostart_requirement: AutostartRequirement::default(),
            failure_ttl: Duration::ZERO,
            time_til_dormant: Duration::ZERO,
            time_til_dormant_autodelete: Duration::ZERO,
            require_active_version: false,
        }
    }
}

/// Resolves lifecycle options for a template.
#[async_trait]
pub trait TemplatePolicyProvider: Send + Sync {
    async fn get(&self, template: &Template) -> Result<TemplateScheduleOptions, PolicyError>;
}

/// Policy without governance features.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenPolicy;

#[async_trait]
impl TemplatePolicyProvider for OpenPolicy {
    async fn get(&self, template: &Template) -> Result<TemplateScheduleOptions, PolicyError> {
        Ok(TemplateScheduleOptions::open(template))
    }
}

// ── Entitlements ───────────────────────────────────────────────────

/// A licensed capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Autostop/autostart requirements, failure TTL, dormancy, user overrides.
    AdvancedTemplateScheduling,
    /// Require workspaces to build from the active template version.
    AccessControl,
}

impl std::str::FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "advanced_template_scheduling" => Ok(Self::AdvancedTemplateScheduling),
            "access_control" => Ok(Self::AccessControl),
            other => Err(format!("unknown feature {other:?}")),
        }
    }
}

/// The set of entitled features, shared between the policy and whatever refreshes it.
#[derive(Debug, Default)]
pub struct Entitlements {
    features: RwLock<HashSet<Feature>>,
    // Refreshes are applied one at a time.
    refresh: Mutex<()>,
}

impl Entitlements {
    pub fn new(features: impl IntoIterator<Item = Feature>) -> Self {
        Self {
            features: RwLock::new(features.into_iter().collect()),
            refresh: Mutex::new(()),
        }
    }

    pub async fn has(&self, feature: Feature) -> bool {
        self.features.read().await.contains(&feature)
    }

    /// Replace the entitled feature set.
    pub async fn update(&self, features: impl IntoIterator<Item = Feature>) {
        let _guard = self.refresh.lock().await;
        let next: HashSet<Feature> = features.into_iter().collect();
        let mut current = self.features.write().await;
        if *current != next {
            info!(features = ?next, "entitlements updated");
            *current = next;
        }
    }
}

/// Policy that enforces template governance when entitled.
#[derive(Debug, Clone)]
pub struct GovernedPolicy {
    entitlements: Arc<Entitlements>,
}

impl GovernedPolicy {
    pub fn new(entitlements: Arc<Entitlements>) -> Self {
        Self { entitlements }
    }
}

#[async_trait]
impl TemplatePolicyProvider for GovernedPolicy {
    async fn get(&self, template: &Template) -> Result<TemplateScheduleOptions, PolicyError> {
        let mut options = TemplateScheduleOptions::open(template);

        if self.entitlements.has(Feature::AdvancedTemplateScheduling).await {
            let invalid = |source: ScheduleError| PolicyError::InvalidTemplate {
                template_id: template.id.clone(),
                source,
            };
            options.user_autostart_enabled = template.allow_user_autostart;
            options.user_autostop_enabled = template.allow_user_autostop;
            options.autostop_requirement = AutostopRequirement::new(
                template.autostop_requirement_days,
                template.autostop_requirement_weeks,
            )
            .map_err(invalid)?;
            options.autostart_requirement =
                AutostartRequirement::new(template.autostart_allowed_days).map_err(invalid)?;
            options.failure_ttl = millis(template.failure_ttl_ms);
            options.time_til_dormant = millis(template.time_til_dormant_ms);
            options.time_til_dormant_autodelete = millis(template.time_til_dormant_autodelete_ms);
        } else {
            debug!(template_id = %template.id, "advanced scheduling not entitled");
        }

        if self.entitlements.has(Feature::AccessControl).await {
            options.require_active_version = template.require_active_version;
        }

        Ok(options)
    }
}
