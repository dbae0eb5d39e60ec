//! Static weighted-random selection, the CONTROL policy.

use jitai_core::{ContentType, Policy, PolicyChoice, SelectionRequest};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct WeightedSelector {
    rng: StdRng,
}

impl Default for WeightedSelector {
    fn default() -> Self {
        Self::new(None)
    }
}

impl WeightedSelector {
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Picks from `table` proportionally to its integer weights.
    ///
    /// Draws `r` in `[0, total)` and walks the table subtracting weights until
    /// `r` goes negative. Zero-weight entries are never picked.
    pub fn pick(&mut self, table: &[(ContentType, u32)]) -> Option<ContentType> {
        let total: i64 = table.iter().map(|(_, w)| i64::from(*w)).sum();
        if total <= 0 {
            return None;
        }
        let mut r = self.rng.gen_range(0..total);
        for (content, weight) in table {
            r -= i64::from(*weight);
            if r < 0 {
                return Some(*content);
            }
        }
        table.last().map(|(content, _)| *content)
    }
}

impl Policy for WeightedSelector {
    fn select(&mut self, request: &SelectionRequest<'_>) -> Option<PolicyChoice> {
        let table: Vec<(ContentType, u32)> = request
            .eligible
            .iter()
            .map(|arm| (*arm, request.weights.get(arm).copied().unwrap_or(1)))
            .collect();
        let content_type = self.pick(&table)?;
        let scores: BTreeMap<ContentType, f64> = table
            .iter()
            .map(|(arm, w)| (*arm, f64::from(*w)))
            .collect();
        Some(PolicyChoice {
            content_type,
            scores,
        })
    }

    /// The static table does not learn.
    fn feedback(&mut self, _arm: ContentType, _reward: f64) {}

    fn snapshot(&self) -> Value {
        json!({"policy": "weighted-random"})
    }

    fn load(&mut self, _snapshot: Value) {}
}
