//! Audit row written for every evaluation, SHOW or SKIP.

use crate::persona::Persona;
use crate::records::InterventionId;
use crate::types::{
    BlockingReason, BurdenLevel, ContentType, DecisionKind, FrictionLevel, InterventionAction,
    OpportunityLevel, Variant,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityFactor {
    TimeReceptiveness,
    SessionPattern,
    CognitiveLoad,
    HistoricalSuccess,
    UserState,
    BehavioralCues,
}

impl OpportunityFactor {
    pub const ALL: [OpportunityFactor; 6] = [
        OpportunityFactor::TimeReceptiveness,
        OpportunityFactor::SessionPattern,
        OpportunityFactor::CognitiveLoad,
        OpportunityFactor::HistoricalSuccess,
        OpportunityFactor::UserState,
        OpportunityFactor::BehavioralCues,
    ];

    /// Upper bound of the factor's sub-score. Every factor starts at zero.
    #[must_use]
    pub fn max_points(self) -> u32 {
        match self {
            OpportunityFactor::TimeReceptiveness => 25,
            OpportunityFactor::SessionPattern | OpportunityFactor::HistoricalSuccess => 20,
            OpportunityFactor::CognitiveLoad
            | OpportunityFactor::UserState
            | OpportunityFactor::BehavioralCues => 15,
        }
    }

    #[must_use]
    pub fn max_total() -> u32 {
        Self::ALL.iter().map(|f| f.max_points()).sum()
    }
}

/// Scored assessment of whether now is a good moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityDetection {
    pub target_app: String,
    pub score: u32,
    pub level: OpportunityLevel,
    pub action: InterventionAction,
    pub factors: BTreeMap<OpportunityFactor, u32>,
    /// Whether the time factor came from learned per-user timing.
    pub personalized_timing: bool,
    pub computed_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BurdenSnapshot {
    pub level: BurdenLevel,
    pub score: f64,
    pub cooldown_multiplier: f64,
    pub recovery_credit: f64,
    pub relief_eligible: bool,
    pub escalating: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionMethod {
    WeightedRandom,
    ThompsonSampling,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSelection {
    pub content_type: ContentType,
    pub method: SelectionMethod,
    /// Table weights (control) or sampled θ values (treatment).
    pub weights: BTreeMap<ContentType, f64>,
    pub excluded: Vec<ContentType>,
}

/// Pass/fail flags of the rate-limit stage; `None` means the check never ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitChecks {
    pub feature_enabled: Option<bool>,
    pub permission_granted: Option<bool>,
    pub snooze_clear: Option<bool>,
    pub cooldown_passed: Option<bool>,
    pub persona_frequency_passed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionExplanation {
    pub id: String,
    pub timestamp_ms: i64,
    pub target_app: String,
    pub decision: DecisionKind,
    pub blocking_reason: Option<BlockingReason>,
    pub intervention_id: Option<InterventionId>,
    pub opportunity: Option<OpportunityDetection>,
    pub persona: Persona,
    pub persona_confidence: f64,
    pub rate_limits: RateLimitChecks,
    pub burden: Option<BurdenSnapshot>,
    pub content: Option<ContentSelection>,
    pub variant: Variant,
    pub friction: Option<FrictionLevel>,
    pub rationale: Vec<String>,
}

impl DecisionExplanation {
    #[must_use]
    pub fn new(timestamp_ms: i64, target_app: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp_ms,
            target_app: target_app.into(),
            decision: DecisionKind::Skip,
            blocking_reason: None,
            intervention_id: None,
            opportunity: None,
            persona: Persona::Unknown,
            persona_confidence: 0.0,
            rate_limits: RateLimitChecks::default(),
            burden: None,
            content: None,
            variant: Variant::Control,
            friction: None,
            rationale: Vec::new(),
        }
    }

    pub fn note(&mut self, line: impl Into<String>) {
        self.rationale.push(line.into());
    }

    /// One-line human readable explanation.
    #[must_use]
    pub fn summary_line(&self) -> String {
        let score = self
            .opportunity
            .as_ref()
            .map_or_else(|| "-".to_string(), |o| o.score.to_string());
        match (self.decision, self.blocking_reason) {
            (DecisionKind::Show, _) => format!(
                "SHOW {} on {} (opportunity {}, {} variant)",
                self.content
                    .as_ref()
                    .map_or("default content", |c| c.content_type.as_str()),
                self.target_app,
                score,
                self.variant
            ),
            (DecisionKind::Skip, reason) => format!(
                "SKIP on {}: {} (opportunity {})",
                self.target_app,
                reason.unwrap_or(BlockingReason::Other).describe(),
                score
            ),
        }
    }

    /// Multi-line breakdown of every stage.
    #[must_use]
    pub fn detailed_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.summary_line());
        let _ = writeln!(
            out,
            "persona: {:?} ({:.0}% confidence)",
            self.persona,
            self.persona_confidence * 100.0
        );
        if let Some(op) = &self.opportunity {
            let _ = writeln!(out, "opportunity: {} ({:?}, {:?})", op.score, op.level, op.action);
            for (factor, points) in &op.factors {
                let _ = writeln!(out, "  {factor:?}: {points}/{}", factor.max_points());
            }
        }
        let checks = &self.rate_limits;
        let _ = writeln!(
            out,
            "rate limits: enabled={:?} permission={:?} snooze_clear={:?} cooldown={:?} persona_cap={:?}",
            checks.feature_enabled,
            checks.permission_granted,
            checks.snooze_clear,
            checks.cooldown_passed,
            checks.persona_frequency_passed
        );
        if let Some(b) = &self.burden {
            let _ = writeln!(
                out,
                "burden: {:?} score={:.1} cooldown x{:.1} credit={:.2} relief={} escalating={}",
                b.level, b.score, b.cooldown_multiplier, b.recovery_credit, b.relief_eligible, b.escalating
            );
        }
        if let Some(c) = &self.content {
            let _ = writeln!(out, "content: {} via {:?}", c.content_type, c.method);
            if !c.excluded.is_empty() {
                let excluded: Vec<&str> = c.excluded.iter().map(|t| t.as_str()).collect();
                let _ = writeln!(out, "  excluded: {}", excluded.join(", "));
            }
        }
        for line in &self.rationale {
            let _ = writeln!(out, "- {line}");
        }
        out
    }
}
