//! StateStore: redb-backed deployment record persistence.
//!
//! Records are JSON-serialized into the `deployments` table. Every write
//! rewrites the record's secondary index entries inside the same write
//! transaction, so readers never observe an index pointing at a stale
//! version. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, MultimapTableDefinition, ReadableDatabase, ReadableTable, WriteTransaction};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::repository::DeploymentRepository;
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe deployment store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "deployment store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory deployment store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_multimap_table(BY_DEPLOYMENT).map_err(map_err!(Table))?;
        txn.open_multimap_table(BY_PREVIOUS_DEPLOYMENT)
            .map_err(map_err!(Table))?;
        txn.open_table(BY_STATE).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Merge a patch into the record at `key`, creating it if absent.
    pub fn update_record(
        &self,
        key: &RecordKey,
        patch: RecordPatch,
    ) -> StateResult<DeploymentRecord> {
        let id = key.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let (previous, record) = {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let previous = read_record(&table, &id)?;
            let mut record = previous
                .clone()
                .unwrap_or_else(|| DeploymentRecord::new(key));
            record.apply(patch);

            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            (previous, record)
        };
        if let Some(previous) = &previous {
            remove_indexes(&txn, previous)?;
        }
        write_indexes(&txn, &record)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, state = %record.state, created = previous.is_none(), "deployment record stored");
        Ok(record)
    }

    /// Delete a record and its index entries. Returns true if it existed.
    pub fn delete_record(&self, key: &RecordKey) -> StateResult<bool> {
        let id = key.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existing = {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let existing = read_record(&table, &id)?;
            table.remove(id.as_str()).map_err(map_err!(Write))?;
            existing
        };
        if let Some(existing) = &existing {
            remove_indexes(&txn, existing)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, existed = existing.is_some(), "deployment record deleted");
        Ok(existing.is_some())
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Get a record by key.
    pub fn get_record(&self, key: &RecordKey) -> StateResult<Option<DeploymentRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        read_record(&table, &key.table_key())
    }

    /// List all records.
    pub fn all_records(&self) -> StateResult<Vec<DeploymentRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: DeploymentRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Records whose current rollout is `rollout_id`.
    pub fn records_by_deployment(&self, rollout_id: &str) -> StateResult<Vec<DeploymentRecord>> {
        self.records_by_rollout(BY_DEPLOYMENT, rollout_id)
    }

    /// Records whose previous rollout is `rollout_id`.
    pub fn records_by_previous_deployment(
        &self,
        rollout_id: &str,
    ) -> StateResult<Vec<DeploymentRecord>> {
        self.records_by_rollout(BY_PREVIOUS_DEPLOYMENT, rollout_id)
    }

    /// Records matching a state query, oldest heartbeat first.
    pub fn records_by_state(&self, query: StateQuery) -> StateResult<Vec<DeploymentRecord>> {
        let (lower, upper) = match query {
            StateQuery::Running { updated_before } => {
                let state = DeploymentState::Running.as_str();
                (format!("{state}/"), state_bound(state, updated_before))
            }
            // '0' sorts right after '/', so this covers every key of the state.
            StateQuery::Finished => {
                let state = DeploymentState::Finished.as_str();
                (format!("{state}/"), format!("{state}0"))
            }
        };

        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let index = txn.open_table(BY_STATE).map_err(map_err!(Table))?;
        let mut ids = Vec::new();
        for entry in index
            .range(lower.as_str()..upper.as_str())
            .map_err(map_err!(Read))?
        {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if let Some(id) = id_from_state_key(key.value()) {
                ids.push(id.to_string());
            }
        }

        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        read_records(&table, &ids)
    }

    fn records_by_rollout(
        &self,
        definition: MultimapTableDefinition<'static, &'static str, &'static str>,
        rollout_id: &str,
    ) -> StateResult<Vec<DeploymentRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let index = txn
            .open_multimap_table(definition)
            .map_err(map_err!(Table))?;
        let mut ids = Vec::new();
        for id in index.get(rollout_id).map_err(map_err!(Read))? {
            ids.push(id.map_err(map_err!(Read))?.value().to_string());
        }

        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        read_records(&table, &ids)
    }
}

#[async_trait]
impl DeploymentRepository for StateStore {
    async fn update(&self, key: &RecordKey, patch: RecordPatch) -> StateResult<DeploymentRecord> {
        self.update_record(key, patch)
    }

    async fn delete(&self, key: &RecordKey) -> StateResult<bool> {
        self.delete_record(key)
    }

    async fn find_by_deployment(&self, rollout_id: &str) -> StateResult<Vec<DeploymentRecord>> {
        self.records_by_deployment(rollout_id)
    }

    async fn find_by_previous_deployment(
        &self,
        rollout_id: &str,
    ) -> StateResult<Vec<DeploymentRecord>> {
        self.records_by_previous_deployment(rollout_id)
    }

    async fn find_by_state(&self, query: StateQuery) -> StateResult<Vec<DeploymentRecord>> {
        self.records_by_state(query)
    }

    async fn list_records(&self) -> StateResult<Vec<DeploymentRecord>> {
        self.all_records()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn read_record(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    id: &str,
) -> StateResult<Option<DeploymentRecord>> {
    match table.get(id).map_err(map_err!(Read))? {
        Some(guard) => {
            let record: DeploymentRecord =
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

/// Load records by id. Ids whose record vanished are skipped.
fn read_records(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    ids: &[String],
) -> StateResult<Vec<DeploymentRecord>> {
    let mut results = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(record) = read_record(table, id)? {
            results.push(record);
        }
    }
    Ok(results)
}

fn write_indexes(txn: &WriteTransaction, record: &DeploymentRecord) -> StateResult<()> {
    let id = record.id.as_str();
    if let Some(deployment) = &record.deployment {
        let mut index = txn
            .open_multimap_table(BY_DEPLOYMENT)
            .map_err(map_err!(Table))?;
        index
            .insert(deployment.as_str(), id)
            .map_err(map_err!(Write))?;
    }
    if let Some(previous) = &record.previous_deployment {
        let mut index = txn
            .open_multimap_table(BY_PREVIOUS_DEPLOYMENT)
            .map_err(map_err!(Table))?;
        index.insert(previous.as_str(), id).map_err(map_err!(Write))?;
    }
    let mut index = txn.open_table(BY_STATE).map_err(map_err!(Table))?;
    let key = state_key(record.state.as_str(), record.last_updated_at, id);
    index.insert(key.as_str(), ()).map_err(map_err!(Write))?;
    Ok(())
}

fn remove_indexes(txn: &WriteTransaction, record: &DeploymentRecord) -> StateResult<()> {
    let id = record.id.as_str();
    if let Some(deployment) = &record.deployment {
        let mut index = txn
            .open_multimap_table(BY_DEPLOYMENT)
            .map_err(map_err!(Table))?;
        index
            .remove(deployment.as_str(), id)
            .map_err(map_err!(Write))?;
    }
    if let Some(previous) = &record.previous_deployment {
        let mut index = txn
            .open_multimap_table(BY_PREVIOUS_DEPLOYMENT)
            .map_err(map_err!(Table))?;
        index.remove(previous.as_str(), id).map_err(map_err!(Write))?;
    }
    let mut index = txn.open_table(BY_STATE).map_err(map_err!(Table))?;
    let key = state_key(record.state.as_str(), record.last_updated_at, id);
    index.remove(key.as_str()).map_err(map_err!(Write))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(service: &str) -> RecordKey {
        RecordKey::new("prod", service)
    }

    fn begin(store: &StateStore, service: &str, new: &str, old: &str, at: u64) {
        store
            .update_record(&key(service), RecordPatch::begin(new, old, at))
            .unwrap();
    }

    // ── Update / delete ────────────────────────────────────────────

    #[test]
    fn update_creates_missing_record() {
        let store = StateStore::open_in_memory().unwrap();
        begin(&store, "api", "new", "old", 1000);

        let record = store.get_record(&key("api")).unwrap().unwrap();
        assert_eq!(record.id, "prod,api");
        assert_eq!(record.cluster, "prod");
        assert_eq!(record.service, "api");
        assert_eq!(record.deployment.as_deref(), Some("new"));
        assert_eq!(record.previous_deployment.as_deref(), Some("old"));
        assert_eq!(record.state, DeploymentState::Running);
        assert_eq!(record.last_updated_at, 1000);
    }

    #[test]
    fn update_merges_into_existing_record() {
        let store = StateStore::open_in_memory().unwrap();
        begin(&store, "api", "new", "old", 1000);

        let record = store
            .update_record(&key("api"), RecordPatch::heartbeat(2000))
            .unwrap();

        assert_eq!(record.last_updated_at, 2000);
        assert_eq!(record.deployment.as_deref(), Some("new"));
        assert_eq!(record.previous_deployment.as_deref(), Some("old"));
    }

    #[test]
    fn delete_is_idempotent() {
        let store = StateStore::open_in_memory().unwrap();
        begin(&store, "api", "new", "old", 1000);

        assert!(store.delete_record(&key("api")).unwrap());
        assert!(!store.delete_record(&key("api")).unwrap());
        assert!(store.get_record(&key("api")).unwrap().is_none());
    }

    #[test]
    fn delete_drops_index_entries() {
        let store = StateStore::open_in_memory().unwrap();
        begin(&store, "api", "new", "old", 1000);
        store.delete_record(&key("api")).unwrap();

        assert!(store.records_by_deployment("new").unwrap().is_empty());
        assert!(store.records_by_previous_deployment("old").unwrap().is_empty());
        assert!(
            store
                .records_by_state(StateQuery::Running { updated_before: u64::MAX })
                .unwrap()
                .is_empty()
        );
    }

    // ── Indexes ────────────────────────────────────────────────────

    #[test]
    fn rollout_indexes_follow_restart() {
        let store = StateStore::open_in_memory().unwrap();
        begin(&store, "api", "v2", "v1", 1000);
        begin(&store, "api", "v3", "v2", 2000);

        assert!(store.records_by_deployment("v2").unwrap().is_empty());
        assert!(store.records_by_previous_deployment("v1").unwrap().is_empty());
        assert_eq!(store.records_by_deployment("v3").unwrap().len(), 1);
        assert_eq!(store.records_by_previous_deployment("v2").unwrap().len(), 1);
    }

    #[test]
    fn running_query_is_strictly_older() {
        let store = StateStore::open_in_memory().unwrap();
        begin(&store, "a", "a2", "a1", 100);
        begin(&store, "b", "b2", "b1", 200);
        begin(&store, "c", "c2", "c1", 300);

        let stale = store
            .records_by_state(StateQuery::Running { updated_before: 200 })
            .unwrap();
        let ids: Vec<_> = stale.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["prod,a"]);
    }

    #[test]
    fn heartbeat_moves_state_index_entry() {
        let store = StateStore::open_in_memory().unwrap();
        begin(&store, "api", "new", "old", 100);
        store
            .update_record(&key("api"), RecordPatch::heartbeat(500))
            .unwrap();

        let stale = store
            .records_by_state(StateQuery::Running { updated_before: 200 })
            .unwrap();
        assert!(stale.is_empty());

        let all = store
            .records_by_state(StateQuery::Running { updated_before: 501 })
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn finished_query_ignores_running() {
        let store = StateStore::open_in_memory().unwrap();
        begin(&store, "a", "a2", "a1", 100);
        begin(&store, "b", "b2", "b1", 100);
        store
            .update_record(
                &key("b"),
                RecordPatch::finish(FinishedReason::Succeeded, None, 150),
            )
            .unwrap();

        let finished = store.records_by_state(StateQuery::Finished).unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].id, "prod,b");
        assert_eq!(finished[0].finished_reason, Some(FinishedReason::Succeeded));

        let running = store
            .records_by_state(StateQuery::Running { updated_before: u64::MAX })
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, "prod,a");
    }

    // ── Repository contract ────────────────────────────────────────

    #[tokio::test]
    async fn deployment_type_current() {
        let store = StateStore::open_in_memory().unwrap();
        begin(&store, "api", "new", "old", 1000);

        match store.find_deployment_type("new").await.unwrap() {
            DeploymentMatch::Current(record) => assert_eq!(record.id, "prod,api"),
            other => panic!("expected Current, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deployment_type_previous() {
        let store = StateStore::open_in_memory().unwrap();
        begin(&store, "api", "new", "old", 1000);

        match store.find_deployment_type("old").await.unwrap() {
            DeploymentMatch::Previous(record) => assert_eq!(record.id, "prod,api"),
            other => panic!("expected Previous, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deployment_type_empty() {
        let store = StateStore::open_in_memory().unwrap();
        begin(&store, "api", "new", "old", 1000);

        assert_eq!(
            store.find_deployment_type("unknown").await.unwrap(),
            DeploymentMatch::Empty
        );
    }

    #[tokio::test]
    async fn duplicate_current_is_integrity_violation() {
        let store = StateStore::open_in_memory().unwrap();
        begin(&store, "a", "shared", "a1", 1000);
        begin(&store, "b", "shared", "b1", 1000);

        let err = store.find_deployment_type("shared").await.unwrap_err();
        assert!(err.is_integrity_violation());
        assert_eq!(
            err.to_string(),
            "integrity violation: found 2 current deployments for shared"
        );
    }

    #[tokio::test]
    async fn duplicate_previous_is_integrity_violation() {
        let store = StateStore::open_in_memory().unwrap();
        begin(&store, "a", "a2", "shared", 1000);
        begin(&store, "b", "b2", "shared", 1000);
        begin(&store, "c", "c2", "shared", 1000);

        let err = store.find_deployment_type("shared").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "integrity violation: found 3 previous deployments for shared"
        );
    }

    #[tokio::test]
    async fn expired_uses_wall_clock() {
        let store = StateStore::open_in_memory().unwrap();
        begin(&store, "stale", "s2", "s1", 1000);
        let now = crate::repository::epoch_secs();
        begin(&store, "fresh", "f2", "f1", now);

        let expired = store.find_expired(360).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "prod,stale");
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            begin(&store, "api", "new", "old", 1000);
        }

        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.records_by_deployment("new").unwrap().len(), 1);
        assert_eq!(store.all_records().unwrap().len(), 1);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.all_records().unwrap().is_empty());
        assert!(store.records_by_deployment("any").unwrap().is_empty());
        assert!(store.records_by_state(StateQuery::Finished).unwrap().is_empty());
        assert!(!store.delete_record(&key("nope")).unwrap());
    }
}
