//! Beta-Bernoulli Thompson-sampling bandit with one arm per content type.

use crate::error::{BanditError, Result};
use crate::sampling::sample_beta;
use jitai_core::state::{self, VersionedState, KEY_BANDIT};
use jitai_core::{Confidence, ContentType, Policy, PolicyChoice, SelectionRequest, Store};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Total pulls across all arms after which the posterior is trusted.
pub const SUFFICIENT_DATA_PULLS: f64 = 30.0;
/// Floor for posterior parameters after a revision.
pub const MIN_SHAPE: f64 = 1e-3;

/// Posterior `Beta(alpha, beta)` for one arm, starting from the uniform prior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmState {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for ArmState {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }
}

impl ArmState {
    /// Observations absorbed since the prior.
    #[must_use]
    pub fn pulls(&self) -> f64 {
        (self.alpha + self.beta - 2.0).max(0.0)
    }

    #[must_use]
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    #[must_use]
    pub fn confidence(&self) -> Confidence {
        let pulls = self.pulls();
        if pulls < 10.0 {
            Confidence::VeryLow
        } else if pulls < 20.0 {
            Confidence::Low
        } else if pulls < 50.0 {
            Confidence::Medium
        } else {
            Confidence::High
        }
    }

    fn is_valid(&self) -> bool {
        self.alpha.is_finite() && self.beta.is_finite() && self.alpha > 0.0 && self.beta > 0.0
    }
}

/// Persisted arm table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BanditState {
    pub arms: BTreeMap<ContentType, ArmState>,
}

impl VersionedState for BanditState {
    const VERSION: u32 = 1;
}

#[derive(Debug)]
pub struct BetaBandit {
    state: BanditState,
    rng: StdRng,
    sufficient_data_pulls: f64,
}

impl Default for BetaBandit {
    fn default() -> Self {
        Self::new(None)
    }
}

impl BetaBandit {
    /// Creates a bandit with uniform priors; a seed makes sampling reproducible.
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            state: BanditState::default(),
            rng,
            sufficient_data_pulls: SUFFICIENT_DATA_PULLS,
        }
    }

    #[must_use]
    pub fn with_sufficient_data_pulls(mut self, pulls: f64) -> Self {
        self.sufficient_data_pulls = pulls;
        self
    }

    /// Reads the persisted arms. Unreadable or invalid state becomes the prior.
    #[must_use]
    pub fn load_from(store: &dyn Store, seed: Option<u64>) -> Self {
        let mut bandit = Self::new(seed);
        let mut loaded: BanditState = state::load_or_default(store, KEY_BANDIT);
        let before = loaded.arms.len();
        loaded.arms.retain(|_, arm| arm.is_valid());
        if loaded.arms.len() != before {
            warn!(dropped = before - loaded.arms.len(), "discarded invalid arm state");
        }
        bandit.state = loaded;
        bandit
    }

    /// Writes the arms back; failure is logged and the update lost.
    pub fn save_to(&self, store: &dyn Store) -> bool {
        state::save_or_log(store, KEY_BANDIT, &self.state)
    }

    #[must_use]
    pub fn arm(&self, arm: ContentType) -> ArmState {
        self.state.arms.get(&arm).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn state(&self) -> &BanditState {
        &self.state
    }

    /// Thompson-samples every non-excluded arm and returns the argmax with all draws.
    pub fn select(
        &mut self,
        excluded: &BTreeSet<ContentType>,
    ) -> Option<(ContentType, BTreeMap<ContentType, f64>)> {
        let candidates: Vec<ContentType> = ContentType::ALL
            .iter()
            .copied()
            .filter(|arm| !excluded.contains(arm))
            .collect();
        self.sample_among(&candidates)
    }

    fn sample_among(
        &mut self,
        candidates: &[ContentType],
    ) -> Option<(ContentType, BTreeMap<ContentType, f64>)> {
        let mut draws = BTreeMap::new();
        let mut best: Option<(ContentType, f64)> = None;
        for &arm in candidates {
            let ArmState { alpha, beta } = self.arm(arm);
            let theta = sample_beta(&mut self.rng, alpha, beta);
            draws.insert(arm, theta);
            if best.map_or(true, |(_, top)| theta > top) {
                best = Some((arm, theta));
            }
        }
        best.map(|(arm, _)| (arm, draws))
    }

    /// Conjugate update: `alpha += reward`, `beta += 1 - reward`.
    pub fn update(&mut self, arm: ContentType, reward: f64) -> Result<()> {
        if !reward.is_finite() {
            return Err(BanditError::InvalidParameter("reward must be finite"));
        }
        let reward = reward.clamp(0.0, 1.0);
        let entry = self.state.arms.entry(arm).or_default();
        entry.alpha += reward;
        entry.beta += 1.0 - reward;
        debug!(%arm, reward, alpha = entry.alpha, beta = entry.beta, "bandit arm updated");
        Ok(())
    }

    /// Replaces an earlier reward for `arm` with one `delta` higher.
    ///
    /// The arm's pull count is unchanged; both parameters stay at or above
    /// [`MIN_SHAPE`].
    pub fn revise(&mut self, arm: ContentType, delta: f64) -> Result<()> {
        if !delta.is_finite() {
            return Err(BanditError::InvalidParameter("reward delta must be finite"));
        }
        let delta = delta.clamp(-1.0, 1.0);
        let entry = self.state.arms.entry(arm).or_default();
        entry.alpha = (entry.alpha + delta).max(MIN_SHAPE);
        entry.beta = (entry.beta - delta).max(MIN_SHAPE);
        debug!(%arm, delta, alpha = entry.alpha, beta = entry.beta, "bandit arm revised");
        Ok(())
    }

    #[must_use]
    pub fn confidence(&self, arm: ContentType) -> Confidence {
        self.arm(arm).confidence()
    }

    #[must_use]
    pub fn total_pulls(&self) -> f64 {
        self.state.arms.values().map(ArmState::pulls).sum()
    }

    #[must_use]
    pub fn has_sufficient_data(&self) -> bool {
        self.total_pulls() >= self.sufficient_data_pulls
    }

    /// Posterior mean for every arm, priors included.
    #[must_use]
    pub fn posterior_means(&self) -> BTreeMap<ContentType, f64> {
        ContentType::ALL
            .iter()
            .map(|&arm| (arm, self.arm(arm).mean()))
            .collect()
    }

    /// Drops all learning. Only for explicit resets.
    pub fn reset(&mut self) {
        self.state = BanditState::default();
    }

    /// Sets an arm's posterior directly.
    pub fn set_arm(&mut self, arm: ContentType, state: ArmState) -> Result<()> {
        if !state.is_valid() {
            return Err(BanditError::InvalidParameter("alpha and beta must be positive"));
        }
        self.state.arms.insert(arm, state);
        Ok(())
    }
}

impl Policy for BetaBandit {
    fn select(&mut self, request: &SelectionRequest<'_>) -> Option<PolicyChoice> {
        self.sample_among(request.eligible)
            .map(|(content_type, scores)| PolicyChoice {
                content_type,
                scores,
            })
    }

    fn feedback(&mut self, arm: ContentType, reward: f64) {
        if let Err(err) = self.update(arm, reward) {
            warn!(%arm, error = %err, "ignored bandit feedback");
        }
    }

    fn snapshot(&self) -> Value {
        serde_json::to_value(&self.state).unwrap_or(Value::Null)
    }

    fn load(&mut self, snapshot: Value) {
        match serde_json::from_value::<BanditState>(snapshot) {
            Ok(mut loaded) => {
                loaded.arms.retain(|_, arm| arm.is_valid());
                self.state = loaded;
            }
            Err(err) => {
                warn!(error = %err, "bandit snapshot unreadable, resetting to prior");
                self.state = BanditState::default();
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jitai_core::MemoryStore;
    use proptest::prelude::*;

    #[test]
    fn update_moves_alpha_and_beta_by_reward() {
        let mut bandit = BetaBandit::new(Some(1));
        bandit.update(ContentType::Quote, 0.3).unwrap();
        let arm = bandit.arm(ContentType::Quote);
        assert!((arm.alpha - 1.3).abs() < 1e-12);
        assert!((arm.beta - 1.7).abs() < 1e-12);
        assert!((arm.pulls() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_finite_reward() {
        let mut bandit = BetaBandit::new(Some(1));
        assert!(bandit.update(ContentType::Quote, f64::NAN).is_err());
        assert_eq!(bandit.arm(ContentType::Quote), ArmState::default());
    }

    #[test]
    fn revise_swaps_the_reward_without_adding_a_pull() {
        let mut bandit = BetaBandit::new(Some(1));
        bandit.update(ContentType::Quote, 0.9).unwrap();
        bandit.revise(ContentType::Quote, 0.1).unwrap();
        let arm = bandit.arm(ContentType::Quote);
        assert!((arm.alpha - 2.0).abs() < 1e-12);
        assert!((arm.beta - 1.0).abs() < 1e-12);
        assert!((arm.pulls() - 1.0).abs() < 1e-12);

        bandit.revise(ContentType::Quote, -1.0).unwrap();
        let arm = bandit.arm(ContentType::Quote);
        assert!((arm.alpha - 1.0).abs() < 1e-12);
        assert!((arm.beta - 2.0).abs() < 1e-12);
        assert!(bandit.revise(ContentType::Quote, f64::INFINITY).is_err());
    }

    #[test]
    fn confidence_labels_follow_pull_counts() {
        let mut bandit = BetaBandit::new(Some(1));
        assert_eq!(bandit.confidence(ContentType::Reflection), Confidence::VeryLow);
        for _ in 0..10 {
            bandit.update(ContentType::Reflection, 1.0).unwrap();
        }
        assert_eq!(bandit.confidence(ContentType::Reflection), Confidence::Low);
        for _ in 0..10 {
            bandit.update(ContentType::Reflection, 0.0).unwrap();
        }
        assert_eq!(bandit.confidence(ContentType::Reflection), Confidence::Medium);
        for _ in 0..30 {
            bandit.update(ContentType::Reflection, 0.5).unwrap();
        }
        assert_eq!(bandit.confidence(ContentType::Reflection), Confidence::High);
    }

    #[test]
    fn sufficient_data_is_global() {
        let mut bandit = BetaBandit::new(Some(1));
        for i in 0..29 {
            let arm = ContentType::ALL[i % ContentType::ALL.len()];
            bandit.update(arm, 1.0).unwrap();
        }
        assert!(!bandit.has_sufficient_data());
        bandit.update(ContentType::Quote, 0.0).unwrap();
        assert!(bandit.has_sufficient_data());
    }

    #[test]
    fn select_never_returns_excluded_arm() {
        let mut bandit = BetaBandit::new(Some(9));
        let excluded: BTreeSet<ContentType> = ContentType::ALL
            .iter()
            .copied()
            .filter(|t| *t != ContentType::Quote && *t != ContentType::Reflection)
            .collect();
        for _ in 0..200 {
            let (arm, draws) = bandit.select(&excluded).unwrap();
            assert!(!excluded.contains(&arm));
            assert_eq!(draws.len(), 2);
        }
        let everything: BTreeSet<ContentType> = ContentType::ALL.iter().copied().collect();
        assert!(bandit.select(&everything).is_none());
    }

    #[test]
    fn rewarded_arm_wins_more_often() {
        let mut bandit = BetaBandit::new(Some(42));
        for _ in 0..10 {
            bandit.update(ContentType::Reflection, 1.0).unwrap();
        }
        let excluded: BTreeSet<ContentType> = ContentType::ALL
            .iter()
            .copied()
            .filter(|t| *t != ContentType::Reflection && *t != ContentType::Quote)
            .collect();
        let wins = (0..1000)
            .filter(|_| bandit.select(&excluded).map(|(arm, _)| arm) == Some(ContentType::Reflection))
            .count();
        // Beta(11,1) vs Beta(1,1): P(win) is about 0.92.
        assert!(wins > 800, "reflection won {wins} of 1000");
    }

    #[test]
    fn persists_through_store() {
        let store = MemoryStore::new();
        let mut bandit = BetaBandit::new(Some(1));
        bandit.update(ContentType::Gamification, 1.0).unwrap();
        assert!(bandit.save_to(&store));
        let restored = BetaBandit::load_from(&store, Some(2));
        assert_eq!(restored.arm(ContentType::Gamification), ArmState { alpha: 2.0, beta: 1.0 });
    }

    #[test]
    fn corrupt_store_state_becomes_prior() {
        let store = MemoryStore::new();
        store.set(KEY_BANDIT, "REFLECTION:3.0,1.0|QUOTE:x").unwrap();
        let bandit = BetaBandit::load_from(&store, Some(1));
        assert!(bandit.total_pulls().abs() < f64::EPSILON);

        store
            .set(KEY_BANDIT, r#"{"version":1,"data":{"arms":{"QUOTE":{"alpha":-1.0,"beta":2.0}}}}"#)
            .unwrap();
        let bandit = BetaBandit::load_from(&store, Some(1));
        assert_eq!(bandit.arm(ContentType::Quote), ArmState::default());
    }

    #[test]
    fn policy_snapshot_roundtrip() {
        let mut bandit = BetaBandit::new(Some(5));
        Policy::feedback(&mut bandit, ContentType::UsageStats, 1.0);
        let snap = bandit.snapshot();
        let mut restored = BetaBandit::new(Some(6));
        restored.load(snap);
        assert_eq!(restored.arm(ContentType::UsageStats), bandit.arm(ContentType::UsageStats));
        restored.load(serde_json::json!({"arms": "garbage"}));
        assert!(restored.total_pulls().abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn each_update_adds_exactly_one_pull(rewards in proptest::collection::vec(0.0f64..=1.0, 1..40)) {
            let mut bandit = BetaBandit::new(Some(3));
            for (i, reward) in rewards.iter().enumerate() {
                let before = bandit.arm(ContentType::Quote);
                bandit.update(ContentType::Quote, *reward).unwrap();
                let after = bandit.arm(ContentType::Quote);
                prop_assert!((after.alpha - before.alpha - reward).abs() < 1e-9);
                prop_assert!((after.beta - before.beta - (1.0 - reward)).abs() < 1e-9);
                #[allow(clippy::cast_precision_loss)]
                let expected = (i + 1) as f64;
                prop_assert!((after.pulls() - expected).abs() < 1e-9);
            }
        }
    }
}
