//! StateStore — redb-backed state persistence for devgrid.
//!
//! Provides typed operations over workspaces, builds, templates, template
//! versions, users and lifecycle claims. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).
//!
//! Every write that touches a workspace row bumps its `revision`. Write
//! transactions are serialized by redb, so a compare-and-set on the revision
//! inside one transaction is atomic for every holder of the same store.

use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, Table};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type WriteTable<'txn> = Table<'txn, &'static str, &'static [u8]>;

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Load a workspace inside a write transaction, apply `mutate` and bump its revision.
fn modify_workspace(
    table: &mut WriteTable<'_>,
    workspace_id: &str,
    mutate: impl FnOnce(&mut Workspace),
) -> StateResult<Workspace> {
    let mut workspace: Workspace = match table.get(workspace_id).map_err(map_err!(Read))? {
        Some(guard) => decode(guard.value())?,
        None => return Err(StateError::NotFound(format!("workspace {workspace_id}"))),
    };
    mutate(&mut workspace);
    workspace.revision += 1;
    table
        .insert(workspace_id, encode(&workspace)?.as_slice())
        .map_err(map_err!(Write))?;
    Ok(workspace)
}

/// Highest-numbered build of a workspace, read through any table handle.
fn last_build<T>(table: &T, workspace_id: &str) -> StateResult<Option<WorkspaceBuild>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let (start, end) = build_range(workspace_id);
    let mut range = table
        .range::<&str>(start.as_str()..end.as_str())
        .map_err(map_err!(Read))?;
    match range.next_back() {
        Some(entry) => {
            let (_, value) = entry.map_err(map_err!(Read))?;
            Ok(Some(decode(value.value())?))
        }
        None => Ok(None),
    }
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [WORKSPACES, BUILDS, TEMPLATES, TEMPLATE_VERSIONS, USERS, CLAIMS] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put_json<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = encode(value)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    // ── Workspaces ─────────────────────────────────────────────────

    /// Insert or replace a workspace. Replacing bumps the stored revision.
    pub fn put_workspace(&self, workspace: &Workspace) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(WORKSPACES).map_err(map_err!(Table))?;
            let mut stored = workspace.clone();
            if let Some(guard) = table.get(workspace.id.as_str()).map_err(map_err!(Read))? {
                let existing: Workspace = decode(guard.value())?;
                stored.revision = existing.revision + 1;
            }
            table
                .insert(workspace.id.as_str(), encode(&stored)?.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(workspace_id = %workspace.id, "workspace stored");
        Ok(())
    }

    pub fn get_workspace(&self, workspace_id: &str) -> StateResult<Option<Workspace>> {
        self.get_json(WORKSPACES, workspace_id)
    }

    /// Page through non-deleted workspaces in id order, starting after `after`.
    pub fn list_workspaces_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> StateResult<Vec<Workspace>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORKSPACES).map_err(map_err!(Table))?;
        let lower = match after {
            Some(cursor) => Bound::Excluded(cursor),
            None => Bound::Unbounded,
        };
        let mut results = Vec::new();
        for entry in table
            .range::<&str>((lower, Bound::Unbounded))
            .map_err(map_err!(Read))?
        {
            if results.len() >= limit {
                break;
            }
            let (_, value) = entry.map_err(map_err!(Read))?;
            let workspace: Workspace = decode(value.value())?;
            if !workspace.deleted {
                results.push(workspace);
            }
        }
        Ok(results)
    }

    /// Apply `mutate` to a stored workspace and bump its revision.
    pub fn update_workspace(
        &self,
        workspace_id: &str,
        mutate: impl FnOnce(&mut Workspace),
    ) -> StateResult<Workspace> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(WORKSPACES).map_err(map_err!(Table))?;
            modify_workspace(&mut table, workspace_id, mutate)?
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%workspace_id, revision = updated.revision, "workspace updated");
        Ok(updated)
    }

    /// Set or clear the dormancy markers of a workspace.
    pub fn set_workspace_dormancy(
        &self,
        workspace_id: &str,
        dormant_at: Option<DateTime<Utc>>,
        deleting_at: Option<DateTime<Utc>>,
    ) -> StateResult<Workspace> {
        self.update_workspace(workspace_id, |ws| {
            ws.dormant_at = dormant_at;
            ws.deleting_at = deleting_at;
        })
    }

    // ── Builds ─────────────────────────────────────────────────────

    /// Append a build, assigning the next build number for its workspace.
    ///
    /// Fails with `Conflict` while the previous build's job is still running.
    pub fn append_build(&self, build: &WorkspaceBuild) -> StateResult<WorkspaceBuild> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let appended = {
            let mut builds = txn.open_table(BUILDS).map_err(map_err!(Table))?;
            let previous = last_build(&builds, &build.workspace_id)?;
            if let Some(prev) = &previous
                && !prev.job.status.is_completed()
            {
                return Err(StateError::Conflict(format!(
                    "workspace {} already has build {} in progress",
                    build.workspace_id, prev.build_number
                )));
            }
            let mut appended = build.clone();
            appended.build_number = previous.map_or(1, |prev| prev.build_number + 1);
            builds
                .insert(appended.table_key().as_str(), encode(&appended)?.as_slice())
                .map_err(map_err!(Write))?;

            let mut workspaces = txn.open_table(WORKSPACES).map_err(map_err!(Table))?;
            modify_workspace(&mut workspaces, &build.workspace_id, |_| {})?;
            appended
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            workspace_id = %appended.workspace_id,
            build_number = appended.build_number,
            transition = %appended.transition,
            "build appended"
        );
        Ok(appended)
    }

    /// Insert or replace a build under its own build number.
    pub fn put_build(&self, build: &WorkspaceBuild) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut builds = txn.open_table(BUILDS).map_err(map_err!(Table))?;
            builds
                .insert(build.table_key().as_str(), encode(build)?.as_slice())
                .map_err(map_err!(Write))?;
            let mut workspaces = txn.open_table(WORKSPACES).map_err(map_err!(Table))?;
            modify_workspace(&mut workspaces, &build.workspace_id, |_| {})?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn latest_build(&self, workspace_id: &str) -> StateResult<Option<WorkspaceBuild>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BUILDS).map_err(map_err!(Table))?;
        last_build(&table, workspace_id)
    }

    /// All builds of a workspace, oldest first.
    pub fn list_builds(&self, workspace_id: &str) -> StateResult<Vec<WorkspaceBuild>> {
        let (start, end) = build_range(workspace_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BUILDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range::<&str>(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Apply `mutate` to a stored build; the owning workspace's revision is bumped.
    pub fn update_build(
        &self,
        workspace_id: &str,
        build_number: u32,
        mutate: impl FnOnce(&mut WorkspaceBuild),
    ) -> StateResult<WorkspaceBuild> {
        let key = build_key(workspace_id, build_number);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut builds = txn.open_table(BUILDS).map_err(map_err!(Table))?;
            let mut build: WorkspaceBuild = match builds
                .get(key.as_str())
                .map_err(map_err!(Read))?
            {
                Some(guard) => decode(guard.value())?,
                None => return Err(StateError::NotFound(format!("build {key}"))),
            };
            mutate(&mut build);
            builds
                .insert(key.as_str(), encode(&build)?.as_slice())
                .map_err(map_err!(Write))?;
            let mut workspaces = txn.open_table(WORKSPACES).map_err(map_err!(Table))?;
            modify_workspace(&mut workspaces, workspace_id, |_| {})?;
            build
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    // ── Templates ──────────────────────────────────────────────────

    pub fn put_template(&self, template: &Template) -> StateResult<()> {
        self.put_json(TEMPLATES, &template.id, template)
    }

    pub fn get_template(&self, template_id: &str) -> StateResult<Option<Template>> {
        self.get_json(TEMPLATES, template_id)
    }

    pub fn put_template_version(&self, version: &TemplateVersion) -> StateResult<()> {
        self.put_json(TEMPLATE_VERSIONS, &version.id, version)
    }

    pub fn get_template_version(&self, version_id: &str) -> StateResult<Option<TemplateVersion>> {
        self.get_json(TEMPLATE_VERSIONS, version_id)
    }

    // ── Users ──────────────────────────────────────────────────────

    pub fn put_user(&self, user: &User) -> StateResult<()> {
        self.put_json(USERS, &user.id, user)
    }

    pub fn get_user(&self, user_id: &str) -> StateResult<Option<User>> {
        self.get_json(USERS, user_id)
    }

    // ── Claims ─────────────────────────────────────────────────────

    /// Claim a workspace for one lifecycle action.
    ///
    /// Succeeds only if the workspace still carries `expected_revision` (the
    /// revision observed when it was fetched) and no claim exists for the
    /// same or a later tick. A successful claim bumps the revision, so every
    /// other claimant holding the same snapshot loses.
    pub fn claim_workspace(
        &self,
        workspace_id: &str,
        expected_revision: u64,
        instance_id: &str,
        tick: DateTime<Utc>,
    ) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let claimed = {
            let mut workspaces = txn.open_table(WORKSPACES).map_err(map_err!(Table))?;
            let current: Option<Workspace> =
                match workspaces.get(workspace_id).map_err(map_err!(Read))? {
                    Some(guard) => Some(decode(guard.value())?),
                    None => None,
                };
            let mut claims = txn.open_table(CLAIMS).map_err(map_err!(Table))?;
            let previous: Option<ClaimRecord> =
                match claims.get(workspace_id).map_err(map_err!(Read))? {
                    Some(guard) => Some(decode(guard.value())?),
                    None => None,
                };
            let tick_taken = previous.is_some_and(|claim| claim.tick >= tick);
            match current {
                Some(ws) if ws.revision == expected_revision && !ws.deleted && !tick_taken => {
                    let ws = modify_workspace(&mut workspaces, workspace_id, |_| {})?;
                    let record = ClaimRecord {
                        workspace_id: workspace_id.to_string(),
                        instance_id: instance_id.to_string(),
                        tick,
                        revision: ws.revision,
                    };
                    claims
                        .insert(workspace_id, encode(&record)?.as_slice())
                        .map_err(map_err!(Write))?;
                    true
                }
                _ => false,
            }
        };
        if claimed {
            txn.commit().map_err(map_err!(Transaction))?;
        } else {
            txn.abort().map_err(map_err!(Transaction))?;
        }
        debug!(%workspace_id, %instance_id, claimed, "workspace claim attempted");
        Ok(claimed)
    }

    pub fn get_claim(&self, workspace_id: &str) -> StateResult<Option<ClaimRecord>> {
        self.get_json(CLAIMS, workspace_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, 0, 0).unwrap()
    }

    fn test_workspace(id: &str) -> Workspace {
        Workspace {
            id: id.to_string(),
            name: format!("{id}-name"),
            owner_id: "user-1".to_string(),
            organization_id: "org-1".to_string(),
            template_id: "tpl-1".to_string(),
            last_used_at: at(0),
            dormant_at: None,
            deleting_at: None,
            autostart_schedule: None,
            ttl_ms: None,
            automatic_updates: AutomaticUpdates::Never,
            deleted: false,
            revision: 0,
        }
    }

    fn test_build(workspace_id: &str, transition: Transition) -> WorkspaceBuild {
        WorkspaceBuild {
            workspace_id: workspace_id.to_string(),
            build_number: 0,
            transition,
            template_version_id: "v1".to_string(),
            initiator_id: "user-1".to_string(),
            reason: BuildReason::Initiator,
            created_at: at(1),
            deadline: None,
            job: ProvisionerJob::succeeded(at(1)),
            parameters: vec![],
        }
    }

    // ── Workspaces ─────────────────────────────────────────────────

    #[test]
    fn workspace_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let ws = test_workspace("ws-1");

        store.put_workspace(&ws).unwrap();
        let retrieved = store.get_workspace("ws-1").unwrap();

        assert_eq!(retrieved, Some(ws));
    }

    #[test]
    fn workspace_replace_bumps_revision() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_workspace(&test_workspace("ws-1")).unwrap();
        store.put_workspace(&test_workspace("ws-1")).unwrap();

        assert_eq!(store.get_workspace("ws-1").unwrap().unwrap().revision, 1);
    }

    #[test]
    fn workspace_page_skips_deleted_and_respects_cursor() {
        let store = StateStore::open_in_memory().unwrap();
        for id in ["ws-a", "ws-b", "ws-c", "ws-d"] {
            store.put_workspace(&test_workspace(id)).unwrap();
        }
        store
            .update_workspace("ws-b", |ws| ws.deleted = true)
            .unwrap();

        let first = store.list_workspaces_page(None, 2).unwrap();
        let ids: Vec<_> = first.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["ws-a", "ws-c"]);

        let rest = store.list_workspaces_page(Some("ws-c"), 10).unwrap();
        let ids: Vec<_> = rest.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["ws-d"]);
    }

    #[test]
    fn dormancy_markers_set_and_clear() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_workspace(&test_workspace("ws-1")).unwrap();

        let ws = store
            .set_workspace_dormancy("ws-1", Some(at(2)), Some(at(2) + Duration::days(7)))
            .unwrap();
        assert!(ws.is_dormant());
        assert_eq!(ws.revision, 1);

        let ws = store.set_workspace_dormancy("ws-1", None, None).unwrap();
        assert!(!ws.is_dormant());
        assert!(ws.deleting_at.is_none());
    }

    #[test]
    fn update_missing_workspace_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.update_workspace("nope", |_| {}).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    // ── Builds ─────────────────────────────────────────────────────

    #[test]
    fn append_build_assigns_monotonic_numbers() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_workspace(&test_workspace("ws-1")).unwrap();

        let first = store.append_build(&test_build("ws-1", Transition::Start)).unwrap();
        let second = store.append_build(&test_build("ws-1", Transition::Stop)).unwrap();

        assert_eq!(first.build_number, 1);
        assert_eq!(second.build_number, 2);
        let latest = store.latest_build("ws-1").unwrap().unwrap();
        assert_eq!(latest.transition, Transition::Stop);
        assert_eq!(store.list_builds("ws-1").unwrap().len(), 2);
    }

    #[test]
    fn append_build_rejects_while_job_in_flight() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_workspace(&test_workspace("ws-1")).unwrap();
        let mut pending = test_build("ws-1", Transition::Start);
        pending.job = ProvisionerJob::pending();
        store.append_build(&pending).unwrap();

        let err = store
            .append_build(&test_build("ws-1", Transition::Stop))
            .unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
    }

    #[test]
    fn latest_build_ignores_neighbouring_workspaces() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_workspace(&test_workspace("ws-1")).unwrap();
        store.put_workspace(&test_workspace("ws-10")).unwrap();
        store.append_build(&test_build("ws-1", Transition::Start)).unwrap();
        store.append_build(&test_build("ws-10", Transition::Delete)).unwrap();

        let latest = store.latest_build("ws-1").unwrap().unwrap();
        assert_eq!(latest.transition, Transition::Start);
        assert!(store.latest_build("ws-2").unwrap().is_none());
    }

    #[test]
    fn update_build_extends_deadline() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_workspace(&test_workspace("ws-1")).unwrap();
        store.append_build(&test_build("ws-1", Transition::Start)).unwrap();

        let updated = store
            .update_build("ws-1", 1, |b| b.deadline = Some(at(9)))
            .unwrap();
        assert_eq!(updated.deadline, Some(at(9)));
        assert_eq!(
            store.latest_build("ws-1").unwrap().unwrap().deadline,
            Some(at(9))
        );
    }

    // ── Claims ─────────────────────────────────────────────────────

    #[test]
    fn claim_is_compare_and_set_on_revision() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_workspace(&test_workspace("ws-1")).unwrap();
        let snapshot = store.get_workspace("ws-1").unwrap().unwrap();

        assert!(store
            .claim_workspace("ws-1", snapshot.revision, "replica-a", at(3))
            .unwrap());
        assert!(!store
            .claim_workspace("ws-1", snapshot.revision, "replica-b", at(3))
            .unwrap());

        let claim = store.get_claim("ws-1").unwrap().unwrap();
        assert_eq!(claim.instance_id, "replica-a");
        assert_eq!(claim.tick, at(3));
    }

    #[test]
    fn claim_loses_when_tick_already_claimed() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_workspace(&test_workspace("ws-1")).unwrap();
        let first = store.get_workspace("ws-1").unwrap().unwrap();
        assert!(store
            .claim_workspace("ws-1", first.revision, "replica-a", at(3))
            .unwrap());

        // Fetched after the first claim: the revision matches, the tick does not.
        let late = store.get_workspace("ws-1").unwrap().unwrap();
        assert!(!store
            .claim_workspace("ws-1", late.revision, "replica-b", at(3))
            .unwrap());
        assert!(store
            .claim_workspace("ws-1", late.revision, "replica-b", at(4))
            .unwrap());
    }

    #[test]
    fn claim_fails_after_concurrent_build() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_workspace(&test_workspace("ws-1")).unwrap();
        let snapshot = store.get_workspace("ws-1").unwrap().unwrap();

        store.append_build(&test_build("ws-1", Transition::Start)).unwrap();

        assert!(!store
            .claim_workspace("ws-1", snapshot.revision, "replica-a", at(3))
            .unwrap());
    }

    #[test]
    fn claim_missing_or_deleted_workspace_loses() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(!store.claim_workspace("ghost", 0, "replica-a", at(3)).unwrap());

        store.put_workspace(&test_workspace("ws-1")).unwrap();
        let ws = store.update_workspace("ws-1", |ws| ws.deleted = true).unwrap();
        assert!(!store
            .claim_workspace("ws-1", ws.revision, "replica-a", at(3))
            .unwrap());
    }

    // ── Templates & users ──────────────────────────────────────────

    #[test]
    fn template_user_and_version_round_trip() {
        let store = StateStore::open_in_memory().unwrap();
        let template = Template {
            id: "tpl-1".into(),
            organization_id: "org-1".into(),
            name: "go".into(),
            active_version_id: "v2".into(),
            default_ttl_ms: 3_600_000,
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
        };
        store.put_template(&template).unwrap();
        assert_eq!(store.get_template("tpl-1").unwrap(), Some(template));

        let version = TemplateVersion {
            id: "v2".into(),
            template_id: "tpl-1".into(),
            name: "brave-otter".into(),
            parameters: vec![],
        };
        store.put_template_version(&version).unwrap();
        assert_eq!(store.get_template_version("v2").unwrap(), Some(version));

        let user = User {
            id: "user-1".into(),
            username: "ada".into(),
            status: UserStatus::Suspended,
            quiet_hours_schedule: None,
        };
        store.put_user(&user).unwrap();
        assert_eq!(store.get_user("user-1").unwrap(), Some(user));
        assert!(store.get_user("user-2").unwrap().is_none());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_workspace(&test_workspace("ws-1")).unwrap();
            store.append_build(&test_build("ws-1", Transition::Start)).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let ws = store.get_workspace("ws-1").unwrap().unwrap();
        assert_eq!(ws.revision, 1);
        assert_eq!(store.latest_build("ws-1").unwrap().unwrap().build_number, 1);
    }
}
