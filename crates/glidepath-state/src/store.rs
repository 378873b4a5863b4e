//! StateStore: redb-backed state persistence for Glidepath.
//!
//! Provides typed operations over rollouts, rollout history, revisions,
//! and traffic records. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use glide_core::PodTemplate;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
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
        txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        txn.open_table(ROLLOUT_HISTORY).map_err(map_err!(Table))?;
        txn.open_table(REVISIONS).map_err(map_err!(Table))?;
        txn.open_table(TRAFFIC).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        def: redb::TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_json<T: DeserializeOwned>(
        &self,
        def: redb::TableDefinition<'static, &'static str, &'static [u8]>,
        prefix: &str,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(item);
            }
        }
        Ok(results)
    }

    fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(map_err!(Serialize))
    }

    // ── Rollouts ───────────────────────────────────────────────────

    /// Start tracking a new rollout for its workload.
    ///
    /// Fails with `Conflict` if a different rollout for the same workload
    /// is still in progress: at most one rollout per workload may own
    /// traffic. Callers supersede (abort and persist) the old one first.
    ///
    /// A retry of the generation already stored gets the next attempt, so
    /// its history entry does not replace the earlier one. Returns the
    /// state as stored.
    pub fn begin_rollout(&self, rollout: &RolloutState) -> StateResult<RolloutState> {
        let key = rollout.workload_id.as_str();
        let mut stored = rollout.clone();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            let existing: Option<RolloutState> = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            if let Some(existing) = existing {
                if existing.phase.is_in_progress()
                    && existing.current_revision != rollout.current_revision
                {
                    return Err(StateError::Conflict(format!(
                        "{key}: generation {} still {}",
                        existing.current_revision, existing.phase
                    )));
                }
                if existing.current_revision == rollout.current_revision {
                    stored.attempt = existing.attempt.saturating_add(1);
                }
            }
            let value = Self::encode(&stored)?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;

            let mut history = txn.open_table(ROLLOUT_HISTORY).map_err(map_err!(Table))?;
            history
                .insert(stored.history_key().as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, generation = stored.current_revision, attempt = stored.attempt, "rollout begun");
        Ok(stored)
    }

    /// Persist an updated rollout (current slot and its history entry).
    pub fn put_rollout(&self, rollout: &RolloutState) -> StateResult<()> {
        let key = rollout.workload_id.as_str();
        let value = Self::encode(rollout)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            // A superseded rollout must not overwrite its successor.
            let current_generation = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice::<RolloutState>(guard.value())
                        .map_err(map_err!(Deserialize))?
                        .current_revision,
                ),
                None => None,
            };
            if current_generation.is_none_or(|g| g <= rollout.current_revision) {
                table
                    .insert(key, value.as_slice())
                    .map_err(map_err!(Write))?;
            }

            let mut history = txn.open_table(ROLLOUT_HISTORY).map_err(map_err!(Table))?;
            history
                .insert(rollout.history_key().as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, phase = %rollout.phase, step = rollout.current_step_index, "rollout stored");
        Ok(())
    }

    /// Get the current rollout for a workload.
    pub fn get_rollout(&self, workload_id: &str) -> StateResult<Option<RolloutState>> {
        self.get_json(ROLLOUTS, workload_id)
    }

    /// List the current rollout of every workload.
    pub fn list_rollouts(&self) -> StateResult<Vec<RolloutState>> {
        self.list_json(ROLLOUTS, "")
    }

    /// Rollouts still in progress (for resuming after a restart).
    pub fn list_in_progress(&self) -> StateResult<Vec<RolloutState>> {
        Ok(self
            .list_rollouts()?
            .into_iter()
            .filter(|r| r.phase.is_in_progress())
            .collect())
    }

    /// Every rollout a workload has had, oldest first.
    pub fn rollout_history(&self, workload_id: &str) -> StateResult<Vec<RolloutState>> {
        self.list_json(ROLLOUT_HISTORY, &format!("{workload_id}:"))
    }

    // ── Revisions ──────────────────────────────────────────────────

    /// Record a template as a revision of `workload_id`.
    ///
    /// If the template is identical to the latest revision, that revision
    /// is returned with `false`. Otherwise a new revision is minted with
    /// the next generation and returned with `true`. Both the scan and
    /// the insert happen in one write transaction, so concurrent callers
    /// never mint the same generation.
    pub fn record_revision(
        &self,
        workload_id: &str,
        template: &PodTemplate,
        now_ms: u64,
    ) -> StateResult<(Revision, bool)> {
        let prefix = format!("{workload_id}:");
        let hash = template.template_hash();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result;
        {
            let mut table = txn.open_table(REVISIONS).map_err(map_err!(Table))?;
            let mut latest: Option<Revision> = None;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                if key.value().starts_with(&prefix) {
                    let rev: Revision =
                        serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                    if latest.as_ref().is_none_or(|l| rev.generation > l.generation) {
                        latest = Some(rev);
                    }
                }
            }

            match latest {
                Some(rev) if rev.template_hash == hash => {
                    result = (rev, false);
                }
                other => {
                    let rev = Revision {
                        workload_id: workload_id.to_string(),
                        generation: other.map(|r| r.generation + 1).unwrap_or(1),
                        template_hash: hash,
                        template: template.clone(),
                        created_at_ms: now_ms,
                    };
                    let value = Self::encode(&rev)?;
                    table
                        .insert(rev.table_key().as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    result = (rev, true);
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            %workload_id,
            generation = result.0.generation,
            created = result.1,
            "revision recorded"
        );
        Ok(result)
    }

    /// Get one revision.
    pub fn get_revision(
        &self,
        workload_id: &str,
        generation: Generation,
    ) -> StateResult<Option<Revision>> {
        self.get_json(REVISIONS, &generation_key(workload_id, generation))
    }

    /// All revisions of a workload, oldest first.
    pub fn list_revisions(&self, workload_id: &str) -> StateResult<Vec<Revision>> {
        self.list_json(REVISIONS, &format!("{workload_id}:"))
    }

    // ── Traffic ────────────────────────────────────────────────────

    /// Record the routing applied to a workload.
    pub fn put_traffic(&self, record: &TrafficRecord) -> StateResult<()> {
        let value = Self::encode(record)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TRAFFIC).map_err(map_err!(Table))?;
            table
                .insert(record.workload_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Last routing applied to a workload.
    pub fn get_traffic(&self, workload_id: &str) -> StateResult<Option<TrafficRecord>> {
        self.get_json(TRAFFIC, workload_id)
    }

    /// Routing of every workload.
    pub fn list_traffic(&self) -> StateResult<Vec<TrafficRecord>> {
        self.list_json(TRAFFIC, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glide_core::{CanarySpec, ContainerSpec, ResourceRequirements};

    fn template(image: &str) -> PodTemplate {
        PodTemplate {
            containers: vec![ContainerSpec {
                name: "front-end".to_string(),
                image: image.to_string(),
                ports: vec![],
                resources: ResourceRequirements::default(),
                readiness_probe: None,
                liveness_probe: None,
            }],
            ..Default::default()
        }
    }

    fn canary_rollout(workload: &str, generation: Generation) -> RolloutState {
        RolloutState::new(
            workload,
            StrategySpec::Canary(CanarySpec {
                steps: vec![Step::SetWeight(50)],
            }),
            generation,
            generation.checked_sub(1).filter(|g| *g > 0),
            1_000,
        )
    }

    // ── Rollouts ───────────────────────────────────────────────────

    #[test]
    fn rollout_begin_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let rollout = canary_rollout("shop/front-end", 1);

        store.begin_rollout(&rollout).unwrap();
        let retrieved = store.get_rollout("shop/front-end").unwrap();

        assert_eq!(retrieved, Some(rollout));
    }

    #[test]
    fn rollout_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_rollout("nope/nothing").unwrap().is_none());
    }

    #[test]
    fn second_in_progress_rollout_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        store.begin_rollout(&canary_rollout("shop/front-end", 1)).unwrap();

        let err = store
            .begin_rollout(&canary_rollout("shop/front-end", 2))
            .unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
    }

    #[test]
    fn begin_after_terminal_rollout_succeeds() {
        let store = StateStore::open_in_memory().unwrap();
        let mut first = canary_rollout("shop/front-end", 1);
        store.begin_rollout(&first).unwrap();

        first.phase = RolloutPhase::RolledBack;
        store.put_rollout(&first).unwrap();

        store.begin_rollout(&canary_rollout("shop/front-end", 2)).unwrap();
        let current = store.get_rollout("shop/front-end").unwrap().unwrap();
        assert_eq!(current.current_revision, 2);

        let history = store.rollout_history("shop/front-end").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].phase, RolloutPhase::RolledBack);
        assert_eq!(history[1].current_revision, 2);
    }

    #[test]
    fn stale_put_does_not_overwrite_successor() {
        let store = StateStore::open_in_memory().unwrap();
        let mut old = canary_rollout("shop/front-end", 1);
        store.begin_rollout(&old).unwrap();
        old.phase = RolloutPhase::RolledBack;
        store.put_rollout(&old).unwrap();
        store.begin_rollout(&canary_rollout("shop/front-end", 2)).unwrap();

        // A late write from the superseded worker.
        old.message = Some("late".to_string());
        store.put_rollout(&old).unwrap();

        let current = store.get_rollout("shop/front-end").unwrap().unwrap();
        assert_eq!(current.current_revision, 2);
        let history = store.rollout_history("shop/front-end").unwrap();
        assert_eq!(history[0].message.as_deref(), Some("late"));
    }

    #[test]
    fn list_in_progress_filters_terminal() {
        let store = StateStore::open_in_memory().unwrap();
        store.begin_rollout(&canary_rollout("shop/a", 1)).unwrap();
        let mut done = canary_rollout("shop/b", 1);
        done.phase = RolloutPhase::Complete;
        store.begin_rollout(&done).unwrap();

        assert_eq!(store.list_rollouts().unwrap().len(), 2);
        let active = store.list_in_progress().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].workload_id, "shop/a");
    }

    #[test]
    fn retried_generation_keeps_rolled_back_history() {
        let store = StateStore::open_in_memory().unwrap();
        let mut first = store.begin_rollout(&canary_rollout("shop/front-end", 2)).unwrap();
        assert_eq!(first.attempt, 0);
        first.phase = RolloutPhase::RolledBack;
        first.message = Some("health check failed".to_string());
        store.put_rollout(&first).unwrap();

        let retry = store.begin_rollout(&canary_rollout("shop/front-end", 2)).unwrap();
        assert_eq!(retry.attempt, 1);
        assert_eq!(store.get_rollout("shop/front-end").unwrap(), Some(retry.clone()));

        let history = store.rollout_history("shop/front-end").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].phase, RolloutPhase::RolledBack);
        assert_eq!(history[0].message.as_deref(), Some("health check failed"));
        assert_eq!(history[1], retry);
    }

    // ── Revisions ──────────────────────────────────────────────────

    #[test]
    fn revisions_get_monotonic_generations() {
        let store = StateStore::open_in_memory().unwrap();
        let (r1, created1) = store
            .record_revision("shop/front-end", &template("fe:1"), 1_000)
            .unwrap();
        let (r2, created2) = store
            .record_revision("shop/front-end", &template("fe:2"), 2_000)
            .unwrap();
        let (r3, _) = store
            .record_revision("shop/front-end", &template("fe:1"), 3_000)
            .unwrap();

        assert!(created1 && created2);
        assert_eq!((r1.generation, r2.generation, r3.generation), (1, 2, 3));
        assert_eq!(store.list_revisions("shop/front-end").unwrap().len(), 3);
    }

    #[test]
    fn unchanged_template_reuses_latest_revision() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .record_revision("shop/front-end", &template("fe:1"), 1_000)
            .unwrap();
        let (again, created) = store
            .record_revision("shop/front-end", &template("fe:1"), 2_000)
            .unwrap();
        assert!(!created);
        assert_eq!(again.generation, 1);
        assert_eq!(again.created_at_ms, 1_000);
    }

    #[test]
    fn revisions_are_scoped_per_workload() {
        let store = StateStore::open_in_memory().unwrap();
        store.record_revision("shop/a", &template("a:1"), 1).unwrap();
        store.record_revision("shop/a", &template("a:2"), 2).unwrap();
        let (b, _) = store.record_revision("shop/ab", &template("b:1"), 3).unwrap();

        assert_eq!(b.generation, 1);
        assert_eq!(store.list_revisions("shop/a").unwrap().len(), 2);
        assert_eq!(
            store.get_revision("shop/a", 2).unwrap().unwrap().template,
            template("a:2")
        );
        assert!(store.get_revision("shop/a", 9).unwrap().is_none());
    }

    // ── Traffic ────────────────────────────────────────────────────

    #[test]
    fn traffic_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let record = TrafficRecord {
            workload_id: "shop/front-end".to_string(),
            routing: Routing::Weighted(TrafficSplit::new(Some(1), Some(2), 20)),
            updated_at_ms: 5,
        };
        store.put_traffic(&record).unwrap();
        assert_eq!(store.get_traffic("shop/front-end").unwrap(), Some(record));
        assert_eq!(store.list_traffic().unwrap().len(), 1);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("glidepath.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.begin_rollout(&canary_rollout("db/mongodb", 1)).unwrap();
            store.record_revision("db/mongodb", &template("mongo:6"), 1).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert!(store.get_rollout("db/mongodb").unwrap().is_some());
        assert_eq!(store.list_revisions("db/mongodb").unwrap().len(), 1);
    }

    #[test]
    fn corrupt_record_is_deserialize_error() {
        let store = StateStore::open_in_memory().unwrap();
        let txn = store.db.begin_write().unwrap();
        {
            let mut table = txn.open_table(ROLLOUTS).unwrap();
            table.insert("shop/front-end", b"not json".as_slice()).unwrap();
        }
        txn.commit().unwrap();

        assert!(matches!(
            store.get_rollout("shop/front-end"),
            Err(StateError::Deserialize(_))
        ));
        assert!(matches!(
            store.begin_rollout(&canary_rollout("shop/front-end", 1)),
            Err(StateError::Deserialize(_))
        ));
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.list_rollouts().unwrap().is_empty());
        assert!(store.rollout_history("any").unwrap().is_empty());
        assert!(store.list_revisions("any").unwrap().is_empty());
        assert!(store.get_traffic("any").unwrap().is_none());
    }
}
