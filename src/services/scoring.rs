//! Scoring policy shared by the co-occurrence index and the recommendation engine

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::cmp::Ordering;

use crate::models::{InteractionType, ProductId};

/// Per-type multipliers applied to raw interaction weights
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypeWeights {
    pub view: f64,
    pub click: f64,
    pub purchase: f64,
}

impl Default for TypeWeights {
    fn default() -> Self {
        Self {
            view: 1.0,
            click: 2.0,
            purchase: 5.0,
        }
    }
}

impl TypeWeights {
    pub fn weight_for(&self, interaction_type: InteractionType) -> f64 {
        match interaction_type {
            InteractionType::View => self.view,
            InteractionType::Click => self.click,
            InteractionType::Purchase => self.purchase,
        }
    }
}

/// How one customer's affinities for two products combine into a pair score
///
/// Both variants satisfy `combine(0, x) == 0`, so a product a customer has
/// not touched never contributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairCombiner {
    #[default]
    Product,
    Min,
}

impl PairCombiner {
    pub fn combine(&self, a: f64, b: f64) -> f64 {
        match self {
            PairCombiner::Product => a * b,
            PairCombiner::Min => a.min(b),
        }
    }
}

/// The configurable f(weight, type) policy used to derive the index
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringPolicy {
    pub type_weights: TypeWeights,
    pub combiner: PairCombiner,
    /// Only this many most recently touched products of a customer take part
    /// in co-visitation, bounding rebuild cost at O(n * window²)
    pub max_products_per_customer: usize,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            type_weights: TypeWeights::default(),
            combiner: PairCombiner::default(),
            max_products_per_customer: 500,
        }
    }
}

impl ScoringPolicy {
    /// Affinity contributed by a single interaction
    pub fn contribution(&self, interaction_type: InteractionType, weight: f64) -> f64 {
        weight * self.type_weights.weight_for(interaction_type)
    }

    pub fn pair_score(&self, a: f64, b: f64) -> f64 {
        self.combiner.combine(a, b)
    }
}

/// Exponential decay of a seed interaction's vote by its age
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecencyDecay {
    half_life_hours: Option<f64>,
}

impl RecencyDecay {
    /// A half-life of zero disables decay
    pub fn new(half_life_hours: f64) -> Self {
        let half_life_hours = (half_life_hours.is_finite() && half_life_hours > 0.0)
            .then_some(half_life_hours);
        Self { half_life_hours }
    }

    pub fn disabled() -> Self {
        Self {
            half_life_hours: None,
        }
    }

    /// Multiplier in (0, 1]; timestamps after `as_of` are not decayed
    pub fn factor(&self, last_touch: DateTime<Utc>, as_of: DateTime<Utc>) -> f64 {
        let Some(half_life) = self.half_life_hours else {
            return 1.0;
        };
        let age_hours = (as_of - last_touch).num_seconds() as f64 / 3600.0;
        if age_hours <= 0.0 {
            return 1.0;
        }
        0.5_f64.powf(age_hours / half_life)
    }
}

/// Ranking order used everywhere: score descending, then raw interaction
/// count descending, then identifier ascending.
pub fn rank_order(
    (a_id, a_score, a_count): (&ProductId, f64, u64),
    (b_id, b_score, b_count): (&ProductId, f64, u64),
) -> Ordering {
    b_score
        .total_cmp(&a_score)
        .then_with(|| b_count.cmp(&a_count))
        .then_with(|| a_id.cmp(b_id))
}
