pub mod config;

pub use config::{
    AutobuildConfig, CompletionMode, DevgridConfig, PolicyConfig, PolicyMode, ProvisionerConfig,
    StateConfig,
};
