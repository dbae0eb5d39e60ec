//! Store kept in one JSON file inside the state directory.
//!
//! The whole snapshot is read at startup and written back once the command
//! has finished.

use anyhow::{Context, Result};
use jitai_core::{
    DecisionExplanation, InterventionRecord, MemoryStore, Outcome, PruneReport, RecordQuery,
    SessionRecord, Store, StoreSnapshot,
};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

const STORE_FILE: &str = "store.json";
const USER_ID_FILE: &str = "user_id";

pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl FileStore {
    pub fn open(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(STORE_FILE);
        let inner = if path.exists() {
            let file = File::open(&path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let snapshot: StoreSnapshot = serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("Corrupt store file {}", path.display()))?;
            MemoryStore::from_snapshot(snapshot)
        } else {
            MemoryStore::new()
        };
        Ok(Self { path, inner })
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let snapshot = self.inner.snapshot().context("Failed to snapshot store")?;
        let tmp = self.path.with_extension("json.tmp");
        let file = File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        serde_json::to_writer_pretty(file, &snapshot)?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Reads the anonymous user id, creating one on first use.
pub fn load_or_create_user_id(state_dir: &Path) -> Result<String> {
    let path = state_dir.join(USER_ID_FILE);
    if path.exists() {
        let id = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let id = id.trim();
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }
    std::fs::create_dir_all(state_dir)?;
    let id = uuid::Uuid::new_v4().to_string();
    std::fs::write(&path, &id).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(id)
}

impl Store for FileStore {
    fn get(&self, key: &str) -> jitai_core::Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> jitai_core::Result<()> {
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> jitai_core::Result<()> {
        self.inner.remove(key)
    }

    fn append_intervention(&self, record: &InterventionRecord) -> jitai_core::Result<()> {
        self.inner.append_intervention(record)
    }

    fn update_intervention(&self, record: &InterventionRecord) -> jitai_core::Result<()> {
        self.inner.update_intervention(record)
    }

    fn intervention(&self, id: &str) -> jitai_core::Result<Option<InterventionRecord>> {
        self.inner.intervention(id)
    }

    fn interventions(&self, query: &RecordQuery) -> jitai_core::Result<Vec<InterventionRecord>> {
        self.inner.interventions(query)
    }

    fn append_session(&self, session: &SessionRecord) -> jitai_core::Result<()> {
        self.inner.append_session(session)
    }

    fn sessions(&self, query: &RecordQuery) -> jitai_core::Result<Vec<SessionRecord>> {
        self.inner.sessions(query)
    }

    fn append_explanation(&self, explanation: &DecisionExplanation) -> jitai_core::Result<()> {
        self.inner.append_explanation(explanation)
    }

    fn explanations(&self, query: &RecordQuery) -> jitai_core::Result<Vec<DecisionExplanation>> {
        self.inner.explanations(query)
    }

    fn insert_outcome(&self, outcome: &Outcome) -> jitai_core::Result<()> {
        self.inner.insert_outcome(outcome)
    }

    fn update_outcome(&self, outcome: &Outcome) -> jitai_core::Result<()> {
        self.inner.update_outcome(outcome)
    }

    fn outcome(&self, intervention_id: &str) -> jitai_core::Result<Option<Outcome>> {
        self.inner.outcome(intervention_id)
    }

    fn outcomes(&self, query: &RecordQuery) -> jitai_core::Result<Vec<Outcome>> {
        self.inner.outcomes(query)
    }

    fn prune_before(&self, cutoff_ms: i64) -> jitai_core::Result<PruneReport> {
        self.inner.prune_before(cutoff_ms)
    }
}
