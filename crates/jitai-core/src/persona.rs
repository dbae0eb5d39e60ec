//! Persona labels and the per-persona content and frequency rules.
//!
//! Classification itself happens outside the engine; the engine only consumes
//! the label and its confidence through [`PersonaClassifier`].

use crate::types::ContentType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Persona {
    NewUser,
    CasualUser,
    CompulsiveChecker,
    BingeScroller,
    ProblematicPattern,
    Improving,
    #[default]
    Unknown,
}

/// Label plus classifier confidence in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersonaAssessment {
    pub persona: Persona,
    pub confidence: f64,
}

impl Default for PersonaAssessment {
    fn default() -> Self {
        Self {
            persona: Persona::Unknown,
            confidence: 0.0,
        }
    }
}

/// External persona source.
pub trait PersonaClassifier: Send + Sync {
    fn classify(&self, target_app: &str) -> PersonaAssessment;
}

/// Classifier that always reports the same label.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticPersona(pub PersonaAssessment);

impl StaticPersona {
    #[must_use]
    pub fn new(persona: Persona, confidence: f64) -> Self {
        Self(PersonaAssessment {
            persona,
            confidence: confidence.clamp(0.0, 1.0),
        })
    }
}

impl PersonaClassifier for StaticPersona {
    fn classify(&self, _target_app: &str) -> PersonaAssessment {
        self.0
    }
}

impl Persona {
    /// Content families this persona must never see.
    #[must_use]
    pub fn forbidden(self) -> &'static [ContentType] {
        match self {
            Persona::NewUser => &[ContentType::EmotionalAppeal, ContentType::UsageStats],
            Persona::CasualUser => &[ContentType::EmotionalAppeal],
            Persona::CompulsiveChecker => &[ContentType::Gamification],
            Persona::Improving => &[ContentType::EmotionalAppeal],
            Persona::BingeScroller | Persona::ProblematicPattern | Persona::Unknown => &[],
        }
    }

    /// Content families whose weight doubles for this persona.
    #[must_use]
    pub fn boosted(self) -> &'static [ContentType] {
        match self {
            Persona::NewUser => &[ContentType::BreathingExercise, ContentType::Quote],
            Persona::CasualUser => &[ContentType::Quote, ContentType::ActivitySuggestion],
            Persona::CompulsiveChecker => &[ContentType::Reflection, ContentType::BreathingExercise],
            Persona::BingeScroller => &[ContentType::TimeAlternative, ContentType::UsageStats],
            Persona::ProblematicPattern => &[
                ContentType::EmotionalAppeal,
                ContentType::UsageStats,
                ContentType::Reflection,
            ],
            Persona::Improving => &[ContentType::Gamification],
            Persona::Unknown => &[],
        }
    }

    /// Base weight of a content type in the static selection table.
    #[must_use]
    pub fn base_weight(self, content: ContentType) -> u32 {
        use ContentType::*;
        match (self, content) {
            (Persona::NewUser, BreathingExercise | Quote | ActivitySuggestion) => 15,
            (Persona::NewUser, Reflection | TimeAlternative) => 10,
            (Persona::CompulsiveChecker, Reflection | BreathingExercise) => 15,
            (Persona::BingeScroller, TimeAlternative | UsageStats | ActivitySuggestion) => 15,
            (Persona::ProblematicPattern, EmotionalAppeal | UsageStats) => 15,
            (Persona::Improving, Gamification | Quote) => 15,
            (Persona::CasualUser, Quote | ActivitySuggestion) => 12,
            _ => 10,
        }
    }

    /// Maximum number of shown interventions per rolling hour.
    #[must_use]
    pub fn max_per_hour(self) -> u32 {
        match self {
            Persona::NewUser | Persona::Improving => 2,
            Persona::CasualUser => 3,
            Persona::BingeScroller | Persona::Unknown => 4,
            Persona::CompulsiveChecker | Persona::ProblematicPattern => 6,
        }
    }
}
