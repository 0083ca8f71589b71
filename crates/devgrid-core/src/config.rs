//! devgrid.toml configuration parser.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level daemon configuration. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevgridConfig {
    pub state: StateConfig,
    pub autobuild: AutobuildConfig,
    pub policy: PolicyConfig,
    pub provisioner: ProvisionerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub data_dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/devgrid"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutobuildConfig {
    pub interval_secs: u64,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub instance_id: Option<String>,
    /// Tick summaries buffered per stats subscriber.
    pub stats_buffer: usize,
}

impl Default for AutobuildConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            batch_size: 500,
            max_concurrency: 16,
            instance_id: None,
            stats_buffer: 16,
        }
    }
}

impl AutobuildConfig {
    pub fn instance_id(&self) -> &str {
        self.instance_id.as_deref().unwrap_or("devgridd")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    #[default]
    Open,
    Governed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub mode: PolicyMode,
    /// Entitled features under the governed policy, e.g. `advanced_template_scheduling`.
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// Jobs wait for an external provisioner.
    #[default]
    Pending,
    /// Jobs succeed as soon as they are created.
    Immediate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    pub completion: CompletionMode,
}

impl DevgridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DevgridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Path of the redb database under the data directory.
    pub fn db_path(&self) -> PathBuf {
        self.state.data_dir.join("devgrid.redb")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config: DevgridConfig = toml::from_str("").unwrap();
        assert_eq!(config, DevgridConfig::default());
        assert_eq!(config.autobuild.interval_secs, 60);
        assert_eq!(config.autobuild.instance_id(), "devgridd");
        assert_eq!(config.policy.mode, PolicyMode::Open);
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/devgrid/devgrid.redb"));
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
[state]
data_dir = "/tmp/devgrid"

[autobuild]
interval_secs = 15
batch_size = 50
max_concurrency = 4
instance_id = "replica-1"

[policy]
mode = "governed"
features = ["advanced_template_scheduling"]

[provisioner]
completion = "immediate"
"#;
        let config: DevgridConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.state.data_dir, PathBuf::from("/tmp/devgrid"));
        assert_eq!(config.autobuild.batch_size, 50);
        assert_eq!(config.autobuild.stats_buffer, 16);
        assert_eq!(config.autobuild.instance_id(), "replica-1");
        assert_eq!(config.policy.mode, PolicyMode::Governed);
        assert_eq!(config.policy.features, vec!["advanced_template_scheduling"]);
        assert_eq!(config.provisioner.completion, CompletionMode::Immediate);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(toml::from_str::<DevgridConfig>("[policy]\nmode = \"strict\"\n").is_err());
    }

    #[test]
    fn test_from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devgrid.toml");
        let mut config = DevgridConfig::default();
        config.autobuild.max_concurrency = 2;
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        assert_eq!(DevgridConfig::from_file(&path).unwrap(), config);
    }
}
