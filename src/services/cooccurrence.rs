use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{
    error::{AppError, AppResult},
    models::{CustomerId, Interaction, ProductId},
    services::scoring::{rank_order, ScoringPolicy},
};

/// Interactions folded between two cancellation checks during a rebuild
const CANCEL_CHECK_INTERVAL: usize = 1024;

/// Aggregate affinity of one customer for one product
#[derive(Debug, Clone, PartialEq)]
pub struct ProductAffinity {
    pub affinity: f64,
    pub interactions: u64,
    pub last_touch: DateTime<Utc>,
}

/// Everything the index knows about one customer's history
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerProfile {
    products: BTreeMap<ProductId, ProductAffinity>,
}

impl CustomerProfile {
    pub fn products(&self) -> impl Iterator<Item = (&ProductId, &ProductAffinity)> {
        self.products.iter()
    }

    pub fn contains(&self, product: &ProductId) -> bool {
        self.products.contains_key(product)
    }

    pub fn affinity(&self, product: &ProductId) -> f64 {
        self.products.get(product).map_or(0.0, |p| p.affinity)
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    fn touch(&mut self, product: &ProductId, contribution: f64, timestamp: DateTime<Utc>) {
        match self.products.get_mut(product) {
            Some(entry) => {
                entry.affinity += contribution;
                entry.interactions += 1;
                if timestamp > entry.last_touch {
                    entry.last_touch = timestamp;
                }
            }
            None => {
                self.products.insert(
                    product.clone(),
                    ProductAffinity {
                        affinity: contribution,
                        interactions: 1,
                        last_touch: timestamp,
                    },
                );
            }
        }
    }

    /// The co-visitation window: the `limit` most recently touched products,
    /// ties broken by identifier
    fn window(&self, limit: usize) -> BTreeSet<ProductId> {
        if self.products.len() <= limit {
            return self.products.keys().cloned().collect();
        }
        let mut by_recency: Vec<(&ProductId, &ProductAffinity)> = self.products.iter().collect();
        by_recency.sort_by(|(a_id, a), (b_id, b)| {
            b.last_touch.cmp(&a.last_touch).then_with(|| a_id.cmp(b_id))
        });
        by_recency
            .into_iter()
            .take(limit)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Score and support of one unordered product pair
///
/// Each customer's contribution is kept separately and the score is their
/// sum in customer order, so an index built incrementally and one rebuilt
/// from scratch hold bit-identical scores.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairStats {
    score: f64,
    contributions: BTreeMap<CustomerId, f64>,
}

impl PairStats {
    pub fn score(&self) -> f64 {
        self.score
    }

    /// Customers whose co-visitation window holds both products
    pub fn shared_customers(&self) -> u64 {
        self.contributions.len() as u64
    }

    fn resum(&mut self) {
        self.score = self.contributions.values().fold(0.0, |total, value| total + value);
    }
}

type PairRow = HashMap<ProductId, PairStats>;

/// Product-to-product co-occurrence scores derived from the interaction log
///
/// Scores are stored in both directions so `score(a, b) == score(b, a)` holds
/// bit for bit. The index is a pure function of the interactions folded into
/// it and the scoring policy.
///
/// Profiles and pair rows sit behind `Arc`, so cloning the index to publish a
/// snapshot copies pointers; the working copy clones a row or profile again
/// only when it next writes to it.
#[derive(Debug, Clone, PartialEq)]
pub struct CoOccurrenceIndex {
    policy: ScoringPolicy,
    version: u64,
    profiles: BTreeMap<CustomerId, Arc<CustomerProfile>>,
    interaction_counts: HashMap<ProductId, u64>,
    pairs: HashMap<ProductId, Arc<PairRow>>,
}

impl CoOccurrenceIndex {
    pub fn empty(policy: ScoringPolicy) -> Self {
        Self {
            policy,
            version: 0,
            profiles: BTreeMap::new(),
            interaction_counts: HashMap::new(),
            pairs: HashMap::new(),
        }
    }

    /// Recomputes every pair score from the given log
    ///
    /// The log must be in sequence order. The `cancel` flag is polled while
    /// folding interactions and between customers.
    pub fn rebuild(
        policy: ScoringPolicy,
        log: &[Arc<Interaction>],
        cancel: &AtomicBool,
    ) -> AppResult<Self> {
        let mut index = Self::empty(policy);

        for chunk in log.chunks(CANCEL_CHECK_INTERVAL) {
            if cancel.load(Ordering::Relaxed) {
                return Err(AppError::RebuildCancelled);
            }
            chunk.iter().for_each(|interaction| index.fold(interaction));
        }

        for (customer, profile) in &index.profiles {
            if cancel.load(Ordering::Relaxed) {
                return Err(AppError::RebuildCancelled);
            }
            co_visit(&mut index.pairs, &index.policy, customer, profile);
        }
        index.resum_all();

        Ok(index)
    }

    /// Builds an index from the whole log without cancellation points
    pub fn from_interactions(policy: ScoringPolicy, log: &[Arc<Interaction>]) -> Self {
        let mut index = Self::empty(policy);
        log.iter().for_each(|interaction| index.fold(interaction));
        for (customer, profile) in &index.profiles {
            co_visit(&mut index.pairs, &index.policy, customer, profile);
        }
        index.resum_all();
        index
    }

    /// Applies one new interaction without a full rebuild
    ///
    /// Returns `false` when the interaction is already reflected in the index.
    /// A customer's first interaction only creates their profile; it has no
    /// other product to pair with.
    pub fn update(&mut self, interaction: &Interaction) -> bool {
        if interaction.sequence <= self.version {
            tracing::debug!(
                sequence = interaction.sequence,
                index_version = self.version,
                "Skipping interaction already in index"
            );
            return false;
        }

        let limit = self.policy.max_products_per_customer;
        let customer = &interaction.customer_id;
        let product = &interaction.product_id;
        let contribution = self
            .policy
            .contribution(interaction.interaction_type, interaction.weight);

        let profile = Arc::make_mut(self.profiles.entry(customer.clone()).or_default());
        let old_window: Vec<ProductId> = profile.window(limit).into_iter().collect();
        profile.touch(product, contribution, interaction.timestamp);
        let new_window: Vec<ProductId> = profile.window(limit).into_iter().collect();

        *self.interaction_counts.entry(product.clone()).or_insert(0) += 1;
        self.version = interaction.sequence;

        let profile = &self.profiles[customer];
        let in_old = |id: &ProductId| old_window.binary_search(id).is_ok();
        let in_new = |id: &ProductId| new_window.binary_search(id).is_ok();

        // Pairs that left the window lose this customer's contribution
        for (i, a) in old_window.iter().enumerate() {
            for b in &old_window[i + 1..] {
                if !(in_new(a) && in_new(b)) {
                    withdraw_contribution(&mut self.pairs, a, b, customer);
                }
            }
        }

        // Pairs that entered the window, or whose affinity moved, are re-set
        for (i, a) in new_window.iter().enumerate() {
            for b in &new_window[i + 1..] {
                let moved = a == product || b == product;
                if moved || !(in_old(a) && in_old(b)) {
                    let score = self.policy.pair_score(profile.affinity(a), profile.affinity(b));
                    set_contribution(&mut self.pairs, a, b, customer, score);
                }
            }
        }

        true
    }

    /// Co-occurring products ranked by score, then interaction count, then id
    pub fn scores_for(&self, product: &ProductId) -> impl Iterator<Item = (&ProductId, f64)> + '_ {
        let mut ranked: Vec<(&ProductId, &PairStats)> = self
            .pairs
            .get(product)
            .map(|row| row.iter().filter(|(other, _)| *other != product).collect())
            .unwrap_or_default();
        ranked.sort_by(|(a, a_stats), (b, b_stats)| {
            rank_order(
                (*a, a_stats.score, self.interaction_count(a)),
                (*b, b_stats.score, self.interaction_count(b)),
            )
        });
        ranked.into_iter().map(|(other, stats)| (other, stats.score))
    }

    pub fn pair(&self, a: &ProductId, b: &ProductId) -> Option<&PairStats> {
        if a == b {
            return None;
        }
        self.pairs.get(a).and_then(|row| row.get(b))
    }

    /// Co-occurrence score of an unordered pair; zero when never co-visited
    pub fn score(&self, a: &ProductId, b: &ProductId) -> f64 {
        self.pair(a, b).map_or(0.0, PairStats::score)
    }

    pub fn interaction_count(&self, product: &ProductId) -> u64 {
        self.interaction_counts.get(product).copied().unwrap_or(0)
    }

    pub fn customer_profile(&self, customer: &CustomerId) -> Option<&CustomerProfile> {
        self.profiles.get(customer).map(Arc::as_ref)
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    /// Store version of the last interaction folded into the index
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn customer_count(&self) -> usize {
        self.profiles.len()
    }

    pub fn product_count(&self) -> usize {
        self.interaction_counts.len()
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.values().map(|row| row.len()).sum::<usize>() / 2
    }

    fn fold(&mut self, interaction: &Interaction) {
        let contribution = self
            .policy
            .contribution(interaction.interaction_type, interaction.weight);
        Arc::make_mut(
            self.profiles
                .entry(interaction.customer_id.clone())
                .or_default(),
        )
        .touch(&interaction.product_id, contribution, interaction.timestamp);
        *self
            .interaction_counts
            .entry(interaction.product_id.clone())
            .or_insert(0) += 1;
        self.version = self.version.max(interaction.sequence);
    }

    fn resum_all(&mut self) {
        for row in self.pairs.values_mut() {
            Arc::make_mut(row).values_mut().for_each(PairStats::resum);
        }
    }
}

/// Records one customer's contributions to every pair in their window;
/// scores are left for the caller to re-sum
fn co_visit(
    pairs: &mut HashMap<ProductId, Arc<PairRow>>,
    policy: &ScoringPolicy,
    customer: &CustomerId,
    profile: &CustomerProfile,
) {
    let window: Vec<ProductId> = profile
        .window(policy.max_products_per_customer)
        .into_iter()
        .collect();
    for (i, a) in window.iter().enumerate() {
        for b in &window[i + 1..] {
            let score = policy.pair_score(profile.affinity(a), profile.affinity(b));
            for (from, to) in [(a, b), (b, a)] {
                Arc::make_mut(pairs.entry(from.clone()).or_default())
                    .entry(to.clone())
                    .or_default()
                    .contributions
                    .insert(customer.clone(), score);
            }
        }
    }
}

fn set_contribution(
    pairs: &mut HashMap<ProductId, Arc<PairRow>>,
    a: &ProductId,
    b: &ProductId,
    customer: &CustomerId,
    score: f64,
) {
    for (from, to) in [(a, b), (b, a)] {
        let stats = Arc::make_mut(pairs.entry(from.clone()).or_default())
            .entry(to.clone())
            .or_default();
        stats.contributions.insert(customer.clone(), score);
        stats.resum();
    }
}

fn withdraw_contribution(
    pairs: &mut HashMap<ProductId, Arc<PairRow>>,
    a: &ProductId,
    b: &ProductId,
    customer: &CustomerId,
) {
    for (from, to) in [(a, b), (b, a)] {
        let held = pairs
            .get(from)
            .and_then(|row| row.get(to))
            .is_some_and(|stats| stats.contributions.contains_key(customer));
        if !held {
            continue;
        }
        let Some(row) = pairs.get_mut(from) else {
            continue;
        };
        let row = Arc::make_mut(row);
        if let Some(stats) = row.get_mut(to) {
            stats.contributions.remove(customer);
            if stats.contributions.is_empty() {
                row.remove(to);
            } else {
                stats.resum();
            }
        }
        if row.is_empty() {
            pairs.remove(from);
        }
    }
}
