//! Selection-policy seam shared by the static table and the bandit.

use crate::types::ContentType;
use serde_json::Value;
use std::collections::BTreeMap;

/// Candidate arms plus the static weights a table-driven policy may use.
#[derive(Debug, Clone, Copy)]
pub struct SelectionRequest<'a> {
    pub eligible: &'a [ContentType],
    pub weights: &'a BTreeMap<ContentType, u32>,
}

/// What a policy picked and the per-arm scores that led there.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyChoice {
    pub content_type: ContentType,
    pub scores: BTreeMap<ContentType, f64>,
}

pub trait Policy {
    /// Picks one of `request.eligible`; `None` only when nothing is eligible.
    fn select(&mut self, request: &SelectionRequest<'_>) -> Option<PolicyChoice>;
    /// Feeds a reward in `[0, 1]` back for `arm`.
    fn feedback(&mut self, arm: ContentType, reward: f64);
    fn snapshot(&self) -> Value;
    fn load(&mut self, snapshot: Value);
}
