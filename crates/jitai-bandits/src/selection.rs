//! Content selection: exclusion rules, then either the static weighted table
//! (CONTROL) or the bandit (TREATMENT).
//!
//! Both variants draw from the same eligible set. Persona boosts and the
//! context/effectiveness multipliers only shape the static table; the bandit
//! learns its own preferences.

use crate::beta::BetaBandit;
use crate::weighted::WeightedSelector;
use jitai_core::{
    ContentSelection, ContentType, InterventionContext, OpportunityLevel, Persona, Policy,
    SelectionMethod, SelectionRequest, Variant,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

/// Shown when every type is excluded.
pub const FALLBACK_CONTENT: ContentType = ContentType::BreathingExercise;

const BOOST_FACTOR: f64 = 2.0;
const CONTEXT_FACTOR: f64 = 1.5;
const EFFECTIVE_RATE: f64 = 0.6;
const INEFFECTIVE_RATE: f64 = 0.2;

/// Inputs for one selection.
#[derive(Debug, Clone, Copy)]
pub struct SelectionInput<'a> {
    pub context: &'a InterventionContext,
    pub persona: Persona,
    pub opportunity: OpportunityLevel,
    /// Historical go-back rate per content type, where known.
    pub effectiveness: &'a BTreeMap<ContentType, f64>,
}

/// Builds the set of content types that must not be shown right now.
#[must_use]
pub fn exclusions(input: &SelectionInput<'_>) -> BTreeSet<ContentType> {
    let mut excluded = BTreeSet::new();
    for content in ContentType::ALL {
        let by_time = (input.context.is_late_night() && content.is_high_stimulation())
            || (input.context.is_early_morning() && content.is_analytical());
        let by_opportunity =
            input.opportunity == OpportunityLevel::Poor && content.is_emotionally_heavy();
        if by_time || by_opportunity {
            excluded.insert(content);
        }
    }
    excluded.extend(input.persona.forbidden().iter().copied());
    excluded
}

/// Static weights for the CONTROL table.
#[must_use]
pub fn weight_table(
    input: &SelectionInput<'_>,
    eligible: &[ContentType],
) -> BTreeMap<ContentType, u32> {
    let ctx = input.context;
    eligible
        .iter()
        .map(|&content| {
            let mut weight = f64::from(input.persona.base_weight(content));
            if input.persona.boosted().contains(&content) {
                weight *= BOOST_FACTOR;
            }
            let context_match = match content {
                ContentType::BreathingExercise => ctx.is_late_night() || ctx.rapid_app_switching,
                ContentType::Reflection => ctx.quick_reopen_attempt,
                ContentType::UsageStats | ContentType::TimeAlternative => ctx.is_over_goal,
                ContentType::ActivitySuggestion => ctx.extended_session,
                _ => false,
            };
            if context_match {
                weight *= CONTEXT_FACTOR;
            }
            match input.effectiveness.get(&content) {
                Some(rate) if *rate >= EFFECTIVE_RATE => weight *= 1.5,
                Some(rate) if *rate <= INEFFECTIVE_RATE => weight *= 0.5,
                _ => {}
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let rounded = weight.round().max(1.0) as u32;
            (content, rounded)
        })
        .collect()
}

/// Selection policy with a short anti-repetition memory.
#[derive(Debug)]
pub struct ContentSelectionPolicy {
    history: VecDeque<ContentType>,
    history_len: usize,
    weighted: WeightedSelector,
}

impl Default for ContentSelectionPolicy {
    fn default() -> Self {
        Self::new(10, None)
    }
}

impl ContentSelectionPolicy {
    #[must_use]
    pub fn new(history_len: usize, seed: Option<u64>) -> Self {
        Self {
            history: VecDeque::with_capacity(history_len),
            history_len,
            weighted: WeightedSelector::new(seed),
        }
    }

    #[must_use]
    pub fn recent(&self) -> Vec<ContentType> {
        self.history.iter().copied().collect()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Eligible types after hard exclusions, avoiding recent picks when possible.
    fn eligible(&self, excluded: &BTreeSet<ContentType>) -> Vec<ContentType> {
        let allowed: Vec<ContentType> = ContentType::ALL
            .iter()
            .copied()
            .filter(|c| !excluded.contains(c))
            .collect();
        let fresh: Vec<ContentType> = allowed
            .iter()
            .copied()
            .filter(|c| !self.history.contains(c))
            .collect();
        if fresh.is_empty() {
            allowed
        } else {
            fresh
        }
    }

    /// Starts a new rotation once every type `persona` may see has been shown.
    fn remember(&mut self, content: ContentType, persona: Persona) {
        self.history.push_back(content);
        while self.history.len() > self.history_len {
            self.history.pop_front();
        }
        let forbidden = persona.forbidden();
        let complete = ContentType::ALL
            .iter()
            .filter(|c| !forbidden.contains(*c))
            .all(|c| self.history.contains(c));
        if complete {
            self.history.clear();
        }
    }

    /// Picks content for `variant`. Never fails: with nothing eligible it
    /// returns [`FALLBACK_CONTENT`].
    pub fn select(
        &mut self,
        input: &SelectionInput<'_>,
        variant: Variant,
        bandit: &mut BetaBandit,
    ) -> ContentSelection {
        let excluded = exclusions(input);
        let eligible = self.eligible(&excluded);
        let weights = weight_table(input, &eligible);
        let request = SelectionRequest {
            eligible: &eligible,
            weights: &weights,
        };

        let (choice, method) = match variant {
            Variant::Treatment => (Policy::select(bandit, &request), SelectionMethod::ThompsonSampling),
            Variant::Control => (
                Policy::select(&mut self.weighted, &request),
                SelectionMethod::WeightedRandom,
            ),
        };

        let selection = match choice {
            Some(choice) => ContentSelection {
                content_type: choice.content_type,
                method,
                weights: choice.scores,
                excluded: excluded.iter().copied().collect(),
            },
            None => ContentSelection {
                content_type: FALLBACK_CONTENT,
                method: SelectionMethod::Fallback,
                weights: BTreeMap::new(),
                excluded: excluded.iter().copied().collect(),
            },
        };
        debug!(
            content = %selection.content_type,
            method = ?selection.method,
            eligible = eligible.len(),
            "content selected"
        );
        self.remember(selection.content_type, input.persona);
        selection
    }
}
