//! redb table definitions for the devgrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Builds use the composite key `{workspace_id}:{build_number:010}` so that a
//! prefix range yields a workspace's builds in build-number order.

use redb::TableDefinition;

/// Workspaces keyed by `{workspace_id}`.
pub const WORKSPACES: TableDefinition<&str, &[u8]> = TableDefinition::new("workspaces");

/// Workspace builds keyed by `{workspace_id}:{build_number:010}`.
pub const BUILDS: TableDefinition<&str, &[u8]> = TableDefinition::new("workspace_builds");

/// Templates keyed by `{template_id}`.
pub const TEMPLATES: TableDefinition<&str, &[u8]> = TableDefinition::new("templates");

/// Template versions keyed by `{template_version_id}`.
pub const TEMPLATE_VERSIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("template_versions");

/// Users keyed by `{user_id}`.
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Last lifecycle claim per workspace, keyed by `{workspace_id}`.
pub const CLAIMS: TableDefinition<&str, &[u8]> = TableDefinition::new("lifecycle_claims");

/// Build table key for a workspace build.
pub fn build_key(workspace_id: &str, build_number: u32) -> String {
    format!("{workspace_id}:{build_number:010}")
}

/// Half-open key range `[start, end)` covering every build of a workspace.
///
/// `;` sorts directly after `:`, so the end key bounds the prefix.
pub fn build_range(workspace_id: &str) -> (String, String) {
    (format!("{workspace_id}:"), format!("{workspace_id};"))
}

/// Shape shared by every table: string keys, JSON byte values.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;
