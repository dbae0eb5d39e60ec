//! Persistence and aggregation of decision explanations.

use jitai_core::clock::DAY_MS;
use jitai_core::{
    BlockingReason, ContentType, DecisionExplanation, DecisionKind, PruneReport, RecordQuery,
    Store, Variant,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Aggregate view over the decisions of the last `days_back` days.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionSummary {
    pub days_back: i64,
    pub since_ms: i64,
    pub total: usize,
    pub shown: usize,
    pub skipped: usize,
    pub show_rate: f64,
    pub by_reason: BTreeMap<BlockingReason, usize>,
    pub by_variant: BTreeMap<Variant, usize>,
    pub by_content: BTreeMap<ContentType, usize>,
    pub mean_opportunity: Option<f64>,
}

impl DecisionSummary {
    #[must_use]
    pub fn from_explanations(
        explanations: &[DecisionExplanation],
        days_back: i64,
        since_ms: i64,
    ) -> Self {
        let mut summary = Self {
            days_back,
            since_ms,
            total: explanations.len(),
            ..Self::default()
        };
        let mut score_sum = 0_u64;
        let mut scored = 0_u32;
        for explanation in explanations {
            match explanation.decision {
                DecisionKind::Show => {
                    summary.shown += 1;
                    *summary.by_variant.entry(explanation.variant).or_default() += 1;
                    if let Some(content) = &explanation.content {
                        *summary.by_content.entry(content.content_type).or_default() += 1;
                    }
                }
                DecisionKind::Skip => {
                    summary.skipped += 1;
                    let reason = explanation.blocking_reason.unwrap_or(BlockingReason::Other);
                    *summary.by_reason.entry(reason).or_default() += 1;
                }
            }
            if let Some(op) = &explanation.opportunity {
                score_sum += u64::from(op.score);
                scored += 1;
            }
        }
        if summary.total > 0 {
            #[allow(clippy::cast_precision_loss)]
            {
                summary.show_rate = summary.shown as f64 / summary.total as f64;
            }
        }
        if scored > 0 {
            #[allow(clippy::cast_precision_loss)]
            {
                summary.mean_opportunity = Some(score_sum as f64 / f64::from(scored));
            }
        }
        summary
    }
}

/// Writes one explanation row per evaluation and answers queries over them.
#[derive(Clone)]
pub struct DecisionLogger {
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for DecisionLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionLogger").finish_non_exhaustive()
    }
}

impl DecisionLogger {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Appends the row. A failed write is logged and dropped.
    pub fn log(&self, explanation: &DecisionExplanation) -> bool {
        match self.store.append_explanation(explanation) {
            Ok(()) => {
                debug!(
                    id = %explanation.id,
                    app = %explanation.target_app,
                    summary = %explanation.summary_line(),
                    "decision logged"
                );
                true
            }
            Err(err) => {
                warn!(id = %explanation.id, error = %err, "decision log write failed, dropping row");
                false
            }
        }
    }

    pub fn recent(&self, limit: usize) -> jitai_core::Result<Vec<DecisionExplanation>> {
        self.store.explanations(&RecordQuery::all().limit(limit))
    }

    pub fn decision_summary(
        &self,
        now_ms: i64,
        days_back: i64,
    ) -> jitai_core::Result<DecisionSummary> {
        let days_back = days_back.max(1);
        let since_ms = now_ms - days_back.saturating_mul(DAY_MS);
        let explanations = self.store.explanations(&RecordQuery::all().since(since_ms))?;
        Ok(DecisionSummary::from_explanations(&explanations, days_back, since_ms))
    }

    /// Deletes rows older than `retention_days`.
    pub fn prune(&self, now_ms: i64, retention_days: i64) -> jitai_core::Result<PruneReport> {
        let cutoff = now_ms - retention_days.max(0).saturating_mul(DAY_MS);
        let report = self.store.prune_before(cutoff)?;
        info!(
            cutoff_ms = cutoff,
            removed = report.total(),
            explanations = report.explanations,
            outcomes = report.outcomes,
            "retention pass finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use jitai_core::{ContentSelection, MemoryStore, SelectionMethod};

    const NOW: i64 = 1_700_000_000_000;

    fn shown(at: i64, content: ContentType, variant: Variant) -> DecisionExplanation {
        let mut e = DecisionExplanation::new(at, "video");
        e.decision = DecisionKind::Show;
        e.variant = variant;
        e.content = Some(ContentSelection {
            content_type: content,
            method: SelectionMethod::WeightedRandom,
            weights: BTreeMap::new(),
            excluded: Vec::new(),
        });
        e
    }

    fn skipped(at: i64, reason: BlockingReason) -> DecisionExplanation {
        let mut e = DecisionExplanation::new(at, "video");
        e.blocking_reason = Some(reason);
        e
    }

    #[test]
    fn summary_counts_reasons_and_variants() {
        let store = Arc::new(MemoryStore::new());
        let logger = DecisionLogger::new(store);
        assert!(logger.log(&shown(NOW - 1_000, ContentType::Quote, Variant::Control)));
        assert!(logger.log(&shown(NOW - 2_000, ContentType::Quote, Variant::Treatment)));
        assert!(logger.log(&skipped(NOW - 3_000, BlockingReason::BasicCooldown)));
        assert!(logger.log(&skipped(NOW - 4_000, BlockingReason::BasicCooldown)));
        assert!(logger.log(&skipped(NOW - 10 * DAY_MS, BlockingReason::UserSnooze)));

        let summary = logger.decision_summary(NOW, 7).unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.shown, 2);
        assert!((summary.show_rate - 0.5).abs() < 1e-12);
        assert_eq!(summary.by_reason[&BlockingReason::BasicCooldown], 2);
        assert!(!summary.by_reason.contains_key(&BlockingReason::UserSnooze));
        assert_eq!(summary.by_content[&ContentType::Quote], 2);
        assert_eq!(summary.by_variant[&Variant::Treatment], 1);
        assert_eq!(summary.mean_opportunity, None);
    }

    #[test]
    fn summary_serializes_enum_keys() {
        let summary = DecisionSummary::from_explanations(
            &[skipped(NOW, BlockingReason::PoorOpportunity)],
            1,
            NOW - DAY_MS,
        );
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["by_reason"]["POOR_OPPORTUNITY"], 1);
    }

    #[test]
    fn prune_drops_old_rows() {
        let store = Arc::new(MemoryStore::new());
        let logger = DecisionLogger::new(store.clone());
        logger.log(&skipped(NOW - 100 * DAY_MS, BlockingReason::Other));
        logger.log(&skipped(NOW - DAY_MS, BlockingReason::Other));
        let report = logger.prune(NOW, 90).unwrap();
        assert_eq!(report.explanations, 1);
        assert_eq!(logger.recent(10).unwrap().len(), 1);
    }
}
