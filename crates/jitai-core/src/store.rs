//! Persistence seam: string-keyed state plus append/query record tables.

use crate::error::{Result, StoreError};
use crate::explanation::DecisionExplanation;
use crate::records::{InterventionRecord, Outcome, SessionRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Filter for record queries. Results are returned newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordQuery {
    /// Inclusive lower bound on the record timestamp.
    pub since_ms: Option<i64>,
    /// Exclusive upper bound on the record timestamp.
    pub until_ms: Option<i64>,
    pub target_app: Option<String>,
    pub limit: Option<usize>,
}

impl RecordQuery {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn since(mut self, since_ms: i64) -> Self {
        self.since_ms = Some(since_ms);
        self
    }

    #[must_use]
    pub fn until(mut self, until_ms: i64) -> Self {
        self.until_ms = Some(until_ms);
        self
    }

    #[must_use]
    pub fn app(mut self, target_app: impl Into<String>) -> Self {
        self.target_app = Some(target_app.into());
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn matches(&self, timestamp_ms: i64, target_app: &str) -> bool {
        self.since_ms.map_or(true, |s| timestamp_ms >= s)
            && self.until_ms.map_or(true, |u| timestamp_ms < u)
            && self
                .target_app
                .as_deref()
                .map_or(true, |app| app == target_app)
    }

    /// Applies the filter, newest-first ordering and limit to `rows`.
    pub fn select<T: Clone>(
        &self,
        rows: &[T],
        timestamp: impl Fn(&T) -> i64,
        target_app: impl Fn(&T) -> &str,
    ) -> Vec<T> {
        let mut selected: Vec<T> = rows
            .iter()
            .filter(|row| self.matches(timestamp(*row), target_app(*row)))
            .cloned()
            .collect();
        selected.sort_by_key(|row| std::cmp::Reverse(timestamp(row)));
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

/// Row counts removed by a retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub interventions: usize,
    pub sessions: usize,
    pub explanations: usize,
    pub outcomes: usize,
}

impl PruneReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.interventions + self.sessions + self.explanations + self.outcomes
    }
}

/// Key-value plus relational storage consumed by every stateful component.
///
/// Implementations must be safe to share between concurrent evaluations.
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;

    fn append_intervention(&self, record: &InterventionRecord) -> Result<()>;
    fn update_intervention(&self, record: &InterventionRecord) -> Result<()>;
    fn intervention(&self, id: &str) -> Result<Option<InterventionRecord>>;
    fn interventions(&self, query: &RecordQuery) -> Result<Vec<InterventionRecord>>;

    fn append_session(&self, session: &SessionRecord) -> Result<()>;
    fn sessions(&self, query: &RecordQuery) -> Result<Vec<SessionRecord>>;

    fn append_explanation(&self, explanation: &DecisionExplanation) -> Result<()>;
    fn explanations(&self, query: &RecordQuery) -> Result<Vec<DecisionExplanation>>;

    fn insert_outcome(&self, outcome: &Outcome) -> Result<()>;
    fn update_outcome(&self, outcome: &Outcome) -> Result<()>;
    fn outcome(&self, intervention_id: &str) -> Result<Option<Outcome>>;
    /// Outcomes are filtered and ordered by their show time.
    fn outcomes(&self, query: &RecordQuery) -> Result<Vec<Outcome>>;

    /// Deletes every row older than `cutoff_ms`. Key-value state is kept.
    fn prune_before(&self, cutoff_ms: i64) -> Result<PruneReport>;
}

/// Serializable image of a whole store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSnapshot {
    pub values: BTreeMap<String, String>,
    pub interventions: Vec<InterventionRecord>,
    pub sessions: Vec<SessionRecord>,
    pub explanations: Vec<DecisionExplanation>,
    pub outcomes: Vec<Outcome>,
}

/// In-process [`Store`] backed by a mutex-guarded snapshot.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<StoreSnapshot>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            inner: Mutex::new(snapshot),
        }
    }

    /// Copies out the current contents.
    pub fn snapshot(&self) -> Result<StoreSnapshot> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreSnapshot>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.values.remove(key);
        Ok(())
    }

    fn append_intervention(&self, record: &InterventionRecord) -> Result<()> {
        self.lock()?.interventions.push(record.clone());
        Ok(())
    }

    fn update_intervention(&self, record: &InterventionRecord) -> Result<()> {
        let mut inner = self.lock()?;
        let slot = inner
            .interventions
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| StoreError::NotFound(record.id.clone()))?;
        *slot = record.clone();
        Ok(())
    }

    fn intervention(&self, id: &str) -> Result<Option<InterventionRecord>> {
        Ok(self.lock()?.interventions.iter().find(|r| r.id == id).cloned())
    }

    fn interventions(&self, query: &RecordQuery) -> Result<Vec<InterventionRecord>> {
        let inner = self.lock()?;
        Ok(query.select(&inner.interventions, |r| r.timestamp_ms, |r| r.target_app.as_str()))
    }

    fn append_session(&self, session: &SessionRecord) -> Result<()> {
        self.lock()?.sessions.push(session.clone());
        Ok(())
    }

    fn sessions(&self, query: &RecordQuery) -> Result<Vec<SessionRecord>> {
        let inner = self.lock()?;
        Ok(query.select(&inner.sessions, |s| s.start_ms, |s| s.target_app.as_str()))
    }

    fn append_explanation(&self, explanation: &DecisionExplanation) -> Result<()> {
        self.lock()?.explanations.push(explanation.clone());
        Ok(())
    }

    fn explanations(&self, query: &RecordQuery) -> Result<Vec<DecisionExplanation>> {
        let inner = self.lock()?;
        Ok(query.select(&inner.explanations, |e| e.timestamp_ms, |e| e.target_app.as_str()))
    }

    fn insert_outcome(&self, outcome: &Outcome) -> Result<()> {
        let mut inner = self.lock()?;
        if inner
            .outcomes
            .iter()
            .any(|o| o.intervention_id == outcome.intervention_id)
        {
            return Err(StoreError::Backend(format!(
                "outcome for {} already exists",
                outcome.intervention_id
            )));
        }
        inner.outcomes.push(outcome.clone());
        Ok(())
    }

    fn update_outcome(&self, outcome: &Outcome) -> Result<()> {
        let mut inner = self.lock()?;
        let slot = inner
            .outcomes
            .iter_mut()
            .find(|o| o.intervention_id == outcome.intervention_id)
            .ok_or_else(|| StoreError::NotFound(outcome.intervention_id.clone()))?;
        *slot = outcome.clone();
        Ok(())
    }

    fn outcome(&self, intervention_id: &str) -> Result<Option<Outcome>> {
        Ok(self
            .lock()?
            .outcomes
            .iter()
            .find(|o| o.intervention_id == intervention_id)
            .cloned())
    }

    fn outcomes(&self, query: &RecordQuery) -> Result<Vec<Outcome>> {
        let inner = self.lock()?;
        Ok(query.select(&inner.outcomes, |o| o.shown_at_ms, |o| o.target_app.as_str()))
    }

    fn prune_before(&self, cutoff_ms: i64) -> Result<PruneReport> {
        let mut inner = self.lock()?;
        let mut report = PruneReport::default();

        let before = inner.interventions.len();
        inner.interventions.retain(|r| r.timestamp_ms >= cutoff_ms);
        report.interventions = before - inner.interventions.len();

        let before = inner.sessions.len();
        inner.sessions.retain(|s| s.start_ms >= cutoff_ms);
        report.sessions = before - inner.sessions.len();

        let before = inner.explanations.len();
        inner.explanations.retain(|e| e.timestamp_ms >= cutoff_ms);
        report.explanations = before - inner.explanations.len();

        let before = inner.outcomes.len();
        inner.outcomes.retain(|o| o.shown_at_ms >= cutoff_ms);
        report.outcomes = before - inner.outcomes.len();

        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn session(app: &str, start_ms: i64) -> SessionRecord {
        SessionRecord {
            target_app: app.into(),
            start_ms,
            duration_ms: 1_000,
        }
    }

    #[test]
    fn query_filters_orders_and_limits() {
        let store = MemoryStore::new();
        for (app, ts) in [("a", 10), ("b", 20), ("a", 30), ("a", 40)] {
            store.append_session(&session(app, ts)).unwrap();
        }
        let rows = store
            .sessions(&RecordQuery::all().app("a").since(15).limit(5))
            .unwrap();
        let starts: Vec<i64> = rows.iter().map(|s| s.start_ms).collect();
        assert_eq!(starts, vec![40, 30]);

        let rows = store.sessions(&RecordQuery::all().until(30)).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn key_value_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("k").unwrap().is_none());
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn prune_keeps_recent_rows_and_values() {
        let store = MemoryStore::new();
        store.set("bandit", "{}").unwrap();
        store.append_session(&session("a", 5)).unwrap();
        store.append_session(&session("a", 50)).unwrap();
        let report = store.prune_before(10).unwrap();
        assert_eq!(report.sessions, 1);
        assert_eq!(report.total(), 1);
        assert_eq!(store.sessions(&RecordQuery::all()).unwrap().len(), 1);
        assert!(store.get("bandit").unwrap().is_some());
    }

    #[test]
    fn snapshot_roundtrip_restores_tables() {
        let store = MemoryStore::new();
        store.append_session(&session("a", 5)).unwrap();
        store.set("x", "1").unwrap();
        let json = serde_json::to_string(&store.snapshot().unwrap()).unwrap();
        let restored = MemoryStore::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.sessions(&RecordQuery::all()).unwrap().len(), 1);
        assert_eq!(restored.get("x").unwrap().as_deref(), Some("1"));
    }
}
