use serde::Serialize;

use super::{CustomerId, ProductId};

/// What a recommendation was computed for
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum RecommendationSource {
    Customer(CustomerId),
    Product(ProductId),
}

/// Ranked recommendations for one source; computed per query, never stored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub source: RecommendationSource,
    pub items: Vec<RecommendedItem>,
    /// Store version the answering index snapshot reflects
    pub index_version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendedItem {
    pub product_id: ProductId,
    pub score: f64,
    pub reason: Reason,
}

/// Explains why an item was ranked
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reason {
    /// Customer mode: the customer's own products that voted for this item
    CoInteraction { seeds: Vec<SeedContribution> },
    /// Item mode: customers shared with the seed product
    SimilarTo {
        seed: ProductId,
        shared_customers: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeedContribution {
    pub product_id: ProductId,
    pub contribution: f64,
}

impl Recommendation {
    /// No items; served when the store knows the source but the snapshot
    /// has not caught up with it
    pub fn empty(source: RecommendationSource, index_version: u64) -> Self {
        Self {
            source,
            items: Vec::new(),
            index_version,
        }
    }

    pub fn product_ids(&self) -> Vec<&ProductId> {
        self.items.iter().map(|item| &item.product_id).collect()
    }
}
