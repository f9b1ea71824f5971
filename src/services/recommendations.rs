use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::{
    error::{AppError, AppResult},
    models::{
        CustomerId, ProductId, Reason, Recommendation, RecommendationSource, RecommendedItem,
        SeedContribution,
    },
    services::{
        cooccurrence::{CoOccurrenceIndex, PairStats},
        scoring::{rank_order, RecencyDecay},
    },
};

/// Item-based collaborative filtering over a co-occurrence index snapshot
///
/// Purely a read-time computation: nothing here mutates the index, so any
/// number of requests can share one snapshot.
#[derive(Debug, Clone)]
pub struct RecommendationEngine {
    decay: RecencyDecay,
    reasons_per_item: usize,
}

impl Default for RecommendationEngine {
    fn default() -> Self {
        Self::new(RecencyDecay::disabled(), 3)
    }
}

#[derive(Default)]
struct Candidate {
    score: f64,
    seeds: Vec<SeedContribution>,
}

impl RecommendationEngine {
    pub fn new(decay: RecencyDecay, reasons_per_item: usize) -> Self {
        Self {
            decay,
            reasons_per_item,
        }
    }

    /// Top `k` products the customer has not interacted with yet
    ///
    /// Each product in the customer's history votes for its co-occurring
    /// products with weight `affinity * recency_decay`; votes are summed per
    /// candidate.
    pub fn recommend_for_customer(
        &self,
        index: &CoOccurrenceIndex,
        customer: &CustomerId,
        k: usize,
        as_of: DateTime<Utc>,
    ) -> AppResult<Recommendation> {
        let profile = index
            .customer_profile(customer)
            .filter(|profile| !profile.is_empty())
            .ok_or_else(|| {
                AppError::UnknownEntity(format!("customer '{}' has no interactions", customer))
            })?;

        let mut candidates: HashMap<&ProductId, Candidate> = HashMap::new();
        if k > 0 {
            for (seed, entry) in profile.products() {
                let seed_weight = entry.affinity * self.decay.factor(entry.last_touch, as_of);
                for (other, score) in index.scores_for(seed) {
                    if profile.contains(other) {
                        continue;
                    }
                    let vote = seed_weight * score;
                    let candidate = candidates.entry(other).or_default();
                    candidate.score += vote;
                    candidate.seeds.push(SeedContribution {
                        product_id: seed.clone(),
                        contribution: vote,
                    });
                }
            }
        }

        let mut ranked: Vec<(&ProductId, Candidate)> = candidates.into_iter().collect();
        ranked.sort_by(|(a, a_candidate), (b, b_candidate)| {
            rank_order(
                (*a, a_candidate.score, index.interaction_count(a)),
                (*b, b_candidate.score, index.interaction_count(b)),
            )
        });
        ranked.truncate(k);

        let items = ranked
            .into_iter()
            .map(|(product_id, mut candidate)| {
                candidate.seeds.sort_by(|a, b| {
                    b.contribution
                        .total_cmp(&a.contribution)
                        .then_with(|| a.product_id.cmp(&b.product_id))
                });
                candidate.seeds.truncate(self.reasons_per_item);
                RecommendedItem {
                    product_id: product_id.clone(),
                    score: candidate.score,
                    reason: Reason::CoInteraction {
                        seeds: candidate.seeds,
                    },
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            customer_id = %customer,
            seeds = profile.len(),
            returned = items.len(),
            "Computed customer recommendations"
        );

        Ok(Recommendation {
            source: RecommendationSource::Customer(customer.clone()),
            items,
            index_version: index.version(),
        })
    }

    /// Item-to-item mode: the product's strongest co-occurrences
    pub fn recommend_for_product(
        &self,
        index: &CoOccurrenceIndex,
        product: &ProductId,
        k: usize,
    ) -> AppResult<Recommendation> {
        if index.interaction_count(product) == 0 {
            return Err(AppError::UnknownEntity(format!(
                "product '{}' has no interactions",
                product
            )));
        }

        let items = index
            .scores_for(product)
            .filter(|(other, _)| *other != product)
            .take(k)
            .map(|(other, score)| RecommendedItem {
                product_id: other.clone(),
                score,
                reason: Reason::SimilarTo {
                    seed: product.clone(),
                    shared_customers: index
                        .pair(product, other)
                        .map_or(0, PairStats::shared_customers),
                },
            })
            .collect();

        Ok(Recommendation {
            source: RecommendationSource::Product(product.clone()),
            items,
            index_version: index.version(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Interaction, InteractionType};
    use crate::services::scoring::ScoringPolicy;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn at(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    fn index_from(entries: &[(&str, &str, InteractionType, f64, i64)]) -> CoOccurrenceIndex {
        let log: Vec<Arc<Interaction>> = entries
            .iter()
            .enumerate()
            .map(|(n, (customer, product, kind, weight, hours))| {
                Arc::new(Interaction {
                    sequence: n as u64 + 1,
                    customer_id: CustomerId::from(*customer),
                    product_id: ProductId::from(*product),
                    interaction_type: *kind,
                    weight: *weight,
                    timestamp: at(*hours),
                })
            })
            .collect();
        CoOccurrenceIndex::from_interactions(ScoringPolicy::default(), &log)
    }

    fn scenario() -> CoOccurrenceIndex {
        use InteractionType::*;
        index_from(&[
            ("C1", "A", Purchase, 3.0, 0),
            ("C1", "B", View, 1.0, 0),
            ("C2", "A", Purchase, 2.0, 0),
            ("C2", "C", Purchase, 2.0, 0),
        ])
    }

    fn catalog() -> CoOccurrenceIndex {
        use InteractionType::*;
        index_from(&[
            ("u1", "A", Purchase, 1.0, 0),
            ("u1", "B", Purchase, 1.0, 0),
            ("u1", "C", View, 1.0, 0),
            ("u2", "A", Click, 1.0, 0),
            ("u2", "D", Purchase, 1.0, 0),
            ("u3", "B", View, 2.0, 0),
            ("u3", "E", Click, 1.0, 0),
            ("u3", "D", View, 1.0, 0),
            ("u4", "A", View, 1.0, 0),
            ("u4", "F", View, 1.0, 0),
        ])
    }

    #[test]
    fn test_scenario_prefers_copurchased_product() {
        let engine = RecommendationEngine::default();
        let result = engine
            .recommend_for_customer(&scenario(), &CustomerId::from("C1"), 1, at(0))
            .unwrap();
        assert_eq!(result.product_ids(), vec![&ProductId::from("C")]);
        match &result.items[0].reason {
            Reason::CoInteraction { seeds } => {
                assert_eq!(seeds[0].product_id, ProductId::from("A"));
            }
            other => panic!("unexpected reason {:?}", other),
        }
    }

    #[test]
    fn test_excludes_interacted_products_and_respects_k() {
        let engine = RecommendationEngine::default();
        let index = catalog();
        let customer = CustomerId::from("u1");
        let profile = index.customer_profile(&customer).unwrap();
        for k in 0..6 {
            let result = engine
                .recommend_for_customer(&index, &customer, k, at(0))
                .unwrap();
            assert!(result.items.len() <= k);
            assert!(result.items.iter().all(|item| !profile.contains(&item.product_id)));
        }
    }

    #[test]
    fn test_cold_start_customer_is_unknown_entity() {
        let engine = RecommendationEngine::default();
        let err = engine
            .recommend_for_customer(&catalog(), &CustomerId::from("ghost"), 5, at(0))
            .unwrap_err();
        assert!(matches!(err, AppError::UnknownEntity(_)));
    }

    #[test]
    fn test_cold_start_product_is_unknown_entity() {
        let engine = RecommendationEngine::default();
        let err = engine
            .recommend_for_product(&catalog(), &ProductId::from("ghost"), 5)
            .unwrap_err();
        assert!(matches!(err, AppError::UnknownEntity(_)));
    }

    #[test]
    fn test_item_mode_excludes_seed_and_reports_support() {
        let engine = RecommendationEngine::default();
        let seed = ProductId::from("A");
        let result = engine.recommend_for_product(&catalog(), &seed, 10).unwrap();
        assert!(!result.items.is_empty());
        assert!(result.items.iter().all(|item| item.product_id != seed));
        for item in &result.items {
            match &item.reason {
                Reason::SimilarTo { shared_customers, .. } => assert!(*shared_customers >= 1),
                other => panic!("unexpected reason {:?}", other),
            }
        }
    }

    #[test]
    fn test_recent_seeds_dominate_with_decay() {
        use InteractionType::*;
        // u1 touched X long ago and Y just now with equal weight
        let index = index_from(&[
            ("u1", "X", Purchase, 1.0, 0),
            ("u1", "Y", Purchase, 1.0, 1000),
            ("u2", "X", Purchase, 1.0, 0),
            ("u2", "P", Purchase, 1.0, 0),
            ("u3", "Y", Purchase, 1.0, 0),
            ("u3", "Q", Purchase, 1.0, 0),
        ]);
        let customer = CustomerId::from("u1");

        let flat = RecommendationEngine::new(RecencyDecay::disabled(), 3)
            .recommend_for_customer(&index, &customer, 2, at(1000))
            .unwrap();
        // equal votes, so identifier decides
        assert_eq!(flat.product_ids(), vec![&ProductId::from("P"), &ProductId::from("Q")]);

        let decayed = RecommendationEngine::new(RecencyDecay::new(24.0), 3)
            .recommend_for_customer(&index, &customer, 2, at(1000))
            .unwrap();
        assert_eq!(decayed.product_ids(), vec![&ProductId::from("Q"), &ProductId::from("P")]);
    }

    #[test]
    fn test_ordering_is_deterministic() {
        let engine = RecommendationEngine::default();
        let index = catalog();
        let customer = CustomerId::from("u2");
        let first = engine.recommend_for_customer(&index, &customer, 10, at(0)).unwrap();
        for _ in 0..5 {
            let again = engine.recommend_for_customer(&index, &customer, 10, at(0)).unwrap();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_reasons_are_capped() {
        let engine = RecommendationEngine::new(RecencyDecay::disabled(), 1);
        let result = engine
            .recommend_for_customer(&catalog(), &CustomerId::from("u3"), 10, at(0))
            .unwrap();
        for item in &result.items {
            if let Reason::CoInteraction { seeds } = &item.reason {
                assert!(seeds.len() <= 1);
            }
        }
    }
}
