//! Shared domain enums used across the engine crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A selectable content variant for the friction overlay.
///
/// Each variant is one arm in the bandit sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    Reflection,
    TimeAlternative,
    BreathingExercise,
    EmotionalAppeal,
    UsageStats,
    Quote,
    Gamification,
    ActivitySuggestion,
}

impl ContentType {
    pub const ALL: [ContentType; 8] = [
        ContentType::Reflection,
        ContentType::TimeAlternative,
        ContentType::BreathingExercise,
        ContentType::EmotionalAppeal,
        ContentType::UsageStats,
        ContentType::Quote,
        ContentType::Gamification,
        ContentType::ActivitySuggestion,
    ];

    /// Content that energizes rather than calms; unsuitable late at night.
    #[must_use]
    pub fn is_high_stimulation(self) -> bool {
        matches!(self, ContentType::Gamification | ContentType::UsageStats)
    }

    /// Content that asks for analysis or carries weight; unsuitable right after waking.
    #[must_use]
    pub fn is_analytical(self) -> bool {
        matches!(
            self,
            ContentType::UsageStats | ContentType::TimeAlternative | ContentType::EmotionalAppeal
        )
    }

    #[must_use]
    pub fn is_emotionally_heavy(self) -> bool {
        matches!(self, ContentType::EmotionalAppeal | ContentType::Reflection)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Reflection => "REFLECTION",
            ContentType::TimeAlternative => "TIME_ALTERNATIVE",
            ContentType::BreathingExercise => "BREATHING_EXERCISE",
            ContentType::EmotionalAppeal => "EMOTIONAL_APPEAL",
            ContentType::UsageStats => "USAGE_STATS",
            ContentType::Quote => "QUOTE",
            ContentType::Gamification => "GAMIFICATION",
            ContentType::ActivitySuggestion => "ACTIVITY_SUGGESTION",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the user did when the overlay was shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserChoice {
    GoBack,
    Continue,
    Dismissed,
    Timeout,
}

impl UserChoice {
    #[must_use]
    pub fn is_success(self) -> bool {
        self == UserChoice::GoBack
    }
}

/// Explicit rating the user may attach to an overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Feedback {
    Helpful,
    Disruptive,
}

/// How strongly the overlay resists continued use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrictionLevel {
    #[default]
    Gentle,
    Moderate,
    Firm,
    Locked,
}

impl FrictionLevel {
    #[must_use]
    pub fn softened(self) -> Self {
        match self {
            FrictionLevel::Locked => FrictionLevel::Firm,
            FrictionLevel::Firm => FrictionLevel::Moderate,
            FrictionLevel::Moderate | FrictionLevel::Gentle => FrictionLevel::Gentle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpportunityLevel {
    Poor,
    Moderate,
    Good,
    Excellent,
}

impl OpportunityLevel {
    /// Maps a total opportunity score to its category.
    #[must_use]
    pub fn from_score(score: u32) -> Self {
        match score {
            s if s >= 70 => OpportunityLevel::Excellent,
            s if s >= 50 => OpportunityLevel::Good,
            s if s >= 30 => OpportunityLevel::Moderate,
            _ => OpportunityLevel::Poor,
        }
    }

    #[must_use]
    pub fn action(self) -> InterventionAction {
        match self {
            OpportunityLevel::Excellent => InterventionAction::InterveneNow,
            OpportunityLevel::Good => InterventionAction::InterveneWithConsideration,
            OpportunityLevel::Moderate => InterventionAction::Wait,
            OpportunityLevel::Poor => InterventionAction::Skip,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterventionAction {
    InterveneNow,
    InterveneWithConsideration,
    Wait,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BurdenLevel {
    #[default]
    Low,
    Moderate,
    High,
    Critical,
}

impl BurdenLevel {
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score < 5.0 {
            BurdenLevel::Low
        } else if score < 10.0 {
            BurdenLevel::Moderate
        } else if score < 15.0 {
            BurdenLevel::High
        } else {
            BurdenLevel::Critical
        }
    }

    /// Factor applied to the base cooldown between interventions.
    #[must_use]
    pub fn cooldown_multiplier(self) -> f64 {
        match self {
            BurdenLevel::Low => 1.0,
            BurdenLevel::Moderate => 1.5,
            BurdenLevel::High => 2.0,
            BurdenLevel::Critical => 3.0,
        }
    }

    #[must_use]
    pub fn lowered(self) -> Self {
        match self {
            BurdenLevel::Critical => BurdenLevel::High,
            BurdenLevel::High => BurdenLevel::Moderate,
            BurdenLevel::Moderate | BurdenLevel::Low => BurdenLevel::Low,
        }
    }
}

/// Experiment bucket: static rule-based selection vs. bandit selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Variant {
    #[default]
    Control,
    Treatment,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Variant::Control => "CONTROL",
            Variant::Treatment => "TREATMENT",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionKind {
    Show,
    Skip,
}

/// The single reason attached to every SKIP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockingReason {
    BasicCooldown,
    PersonaFrequency,
    PoorOpportunity,
    BurdenMitigation,
    UserSnooze,
    PermissionDenied,
    FeatureDisabled,
    Other,
}

impl BlockingReason {
    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            BlockingReason::BasicCooldown => "cooldown since the last intervention has not elapsed",
            BlockingReason::PersonaFrequency => "hourly frequency cap for this persona reached",
            BlockingReason::PoorOpportunity => "moment scored as a poor opportunity",
            BlockingReason::BurdenMitigation => "intervention burden is too high",
            BlockingReason::UserSnooze => "user snoozed interventions",
            BlockingReason::PermissionDenied => "overlay permission not granted",
            BlockingReason::FeatureDisabled => "interventions are disabled",
            BlockingReason::Other => "internal fallback",
        }
    }
}

/// Sample-size derived confidence label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    VeryLow,
    Low,
    Medium,
    High,
}

/// Direction of a metric over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    Improving,
    #[default]
    Stable,
    Declining,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opportunity_levels_follow_thresholds() {
        assert_eq!(OpportunityLevel::from_score(0), OpportunityLevel::Poor);
        assert_eq!(OpportunityLevel::from_score(29), OpportunityLevel::Poor);
        assert_eq!(OpportunityLevel::from_score(30), OpportunityLevel::Moderate);
        assert_eq!(OpportunityLevel::from_score(50), OpportunityLevel::Good);
        assert_eq!(OpportunityLevel::from_score(70), OpportunityLevel::Excellent);
        assert_eq!(OpportunityLevel::from_score(110), OpportunityLevel::Excellent);
        assert_eq!(
            OpportunityLevel::Moderate.action(),
            InterventionAction::Wait
        );
    }

    #[test]
    fn burden_levels_and_multipliers() {
        assert_eq!(BurdenLevel::from_score(4.9), BurdenLevel::Low);
        assert_eq!(BurdenLevel::from_score(9.0), BurdenLevel::Moderate);
        assert_eq!(BurdenLevel::from_score(14.0), BurdenLevel::High);
        assert_eq!(BurdenLevel::from_score(20.0), BurdenLevel::Critical);
        assert!(BurdenLevel::Critical.cooldown_multiplier() > BurdenLevel::High.cooldown_multiplier());
        assert_eq!(BurdenLevel::Low.lowered(), BurdenLevel::Low);
    }

    #[test]
    fn content_type_serializes_screaming_case() {
        let json = serde_json::to_string(&ContentType::EmotionalAppeal).expect("serialize");
        assert_eq!(json, "\"EMOTIONAL_APPEAL\"");
        assert_eq!(ContentType::EmotionalAppeal.to_string(), "EMOTIONAL_APPEAL");
    }
}
