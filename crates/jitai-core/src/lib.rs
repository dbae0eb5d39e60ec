#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Core types and seams for the jitai intervention engine.
//!
//! Everything stateful in the other crates talks to the outside world through
//! the traits defined here: [`Store`] for persistence, [`Clock`] for time and
//! [`PersonaClassifier`] for the user's behavioral label.

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod explanation;
pub mod persona;
pub mod policy;
pub mod records;
pub mod state;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use context::InterventionContext;
pub use error::{Result, StoreError};
pub use explanation::{
    BurdenSnapshot, ContentSelection, DecisionExplanation, OpportunityDetection,
    OpportunityFactor, RateLimitChecks, SelectionMethod,
};
pub use persona::{Persona, PersonaAssessment, PersonaClassifier, StaticPersona};
pub use policy::{Policy, PolicyChoice, SelectionRequest};
pub use records::{
    Horizon, InterventionId, InterventionRecord, LongTermSignals, MediumTermSignals, Outcome,
    ProximalSignals, SessionRecord, ShortTermSignals, UsageChange,
};
pub use store::{MemoryStore, PruneReport, RecordQuery, Store, StoreSnapshot};
pub use types::{
    BlockingReason, BurdenLevel, Confidence, ContentType, DecisionKind, Feedback, FrictionLevel,
    InterventionAction, OpportunityLevel, Trend, UserChoice, Variant,
};
