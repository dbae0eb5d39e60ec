#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Content selection for jitai.
//!
//! [`BetaBandit`] runs Thompson sampling over the eight content types,
//! [`WeightedSelector`] draws from a static weight table, and
//! [`ContentSelectionPolicy`] applies exclusion rules before handing the
//! eligible set to whichever of the two the user's [`Variant`] calls for.
//! [`RolloutController`] decides that variant.
//!
//! [`Variant`]: jitai_core::Variant

pub mod beta;
pub mod error;
pub mod rollout;
pub mod sampling;
pub mod selection;
pub mod weighted;

pub use beta::{ArmState, BanditState, BetaBandit, SUFFICIENT_DATA_PULLS};
pub use error::{BanditError, Result};
pub use rollout::{RolloutCheck, RolloutController, RolloutState, RolloutStatus, VariantStats};
pub use selection::{exclusions, weight_table, ContentSelectionPolicy, SelectionInput, FALLBACK_CONTENT};
pub use weighted::WeightedSelector;
