use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    error::AppResult,
    models::{
        Customer, CustomerAttributes, CustomerId, Interaction, InteractionType, NewInteraction,
        Product, ProductAttributes, ProductId,
    },
};

/// Append-only store of customer/product interaction edges
///
/// Every interaction write bumps the store version by one; the version equals
/// the number of interactions recorded and is used by the index to detect
/// staleness.
#[derive(Debug, Default)]
pub struct InteractionStore {
    customers: HashMap<CustomerId, Customer>,
    products: HashMap<ProductId, Product>,
    log: Vec<Arc<Interaction>>,
    by_customer: HashMap<CustomerId, Vec<usize>>,
    by_product: HashMap<ProductId, Vec<usize>>,
}

impl InteractionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.log.len() as u64
    }

    /// Creates the customer if missing and merges attributes
    pub fn upsert_customer(&mut self, id: CustomerId, attributes: CustomerAttributes) -> CustomerId {
        let customer = self
            .customers
            .entry(id.clone())
            .or_insert_with(|| Customer::new(id));
        customer.apply(attributes);
        customer.id.clone()
    }

    /// Creates the product if missing and merges attributes
    pub fn upsert_product(&mut self, id: ProductId, attributes: ProductAttributes) -> ProductId {
        let product = self
            .products
            .entry(id.clone())
            .or_insert_with(|| Product::new(id));
        product.apply(attributes);
        product.id.clone()
    }

    /// Validates and appends one interaction
    pub fn record(
        &mut self,
        customer_id: impl Into<CustomerId>,
        product_id: impl Into<ProductId>,
        interaction_type: InteractionType,
        weight: f64,
        timestamp: DateTime<Utc>,
    ) -> AppResult<Arc<Interaction>> {
        let interaction =
            NewInteraction::new(customer_id, product_id, interaction_type, weight, timestamp)?;
        Ok(self.append(interaction))
    }

    /// Appends an already validated interaction, upserting both endpoints first
    pub fn append(&mut self, interaction: NewInteraction) -> Arc<Interaction> {
        let customer_id = self.upsert_customer(interaction.customer_id, CustomerAttributes::default());
        let product_id = self.upsert_product(interaction.product_id, ProductAttributes::default());

        let position = self.log.len();
        let stored = Arc::new(Interaction {
            sequence: position as u64 + 1,
            customer_id: customer_id.clone(),
            product_id: product_id.clone(),
            interaction_type: interaction.interaction_type,
            weight: interaction.weight,
            timestamp: interaction.timestamp,
        });

        self.log.push(Arc::clone(&stored));
        self.by_customer.entry(customer_id).or_default().push(position);
        self.by_product.entry(product_id).or_default().push(position);

        stored
    }

    pub fn customer(&self, id: &CustomerId) -> Option<&Customer> {
        self.customers.get(id)
    }

    pub fn product(&self, id: &ProductId) -> Option<&Product> {
        self.products.get(id)
    }

    pub fn customer_count(&self) -> usize {
        self.customers.len()
    }

    pub fn product_count(&self) -> usize {
        self.products.len()
    }

    /// Customers who touched a product, one entry per interaction
    pub fn neighbors_of_product<'a>(
        &'a self,
        id: &ProductId,
    ) -> impl Iterator<Item = (&'a CustomerId, f64)> + 'a {
        self.by_product
            .get(id)
            .into_iter()
            .flatten()
            .map(move |&position| {
                let interaction = &self.log[position];
                (&interaction.customer_id, interaction.weight)
            })
    }

    /// Products a customer touched, one entry per interaction
    pub fn neighbors_of_customer<'a>(
        &'a self,
        id: &CustomerId,
    ) -> impl Iterator<Item = (&'a ProductId, f64)> + 'a {
        self.by_customer
            .get(id)
            .into_iter()
            .flatten()
            .map(move |&position| {
                let interaction = &self.log[position];
                (&interaction.product_id, interaction.weight)
            })
    }

    /// Shared handles to the full log; cheap enough to hand to a rebuild
    pub fn snapshot(&self) -> Vec<Arc<Interaction>> {
        self.log.clone()
    }

    /// Interactions recorded after the given store version
    pub fn interactions_since(&self, version: u64) -> Vec<Arc<Interaction>> {
        let start = usize::try_from(version).unwrap_or(usize::MAX).min(self.log.len());
        self.log[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    fn store_with_history() -> InteractionStore {
        let mut store = InteractionStore::new();
        let now = Utc::now();
        store.record("c1", "a", InteractionType::Purchase, 3.0, now).unwrap();
        store.record("c1", "b", InteractionType::View, 1.0, now).unwrap();
        store.record("c2", "a", InteractionType::Purchase, 2.0, now).unwrap();
        store.record("c1", "a", InteractionType::Click, 1.0, now).unwrap();
        store
    }

    #[test]
    fn test_record_bumps_version_and_sequence() {
        let mut store = InteractionStore::new();
        assert_eq!(store.version(), 0);
        let first = store
            .record("c1", "a", InteractionType::View, 1.0, Utc::now())
            .unwrap();
        let second = store
            .record("c1", "a", InteractionType::View, 1.0, Utc::now())
            .unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn test_record_rejects_invalid_weight_without_writing() {
        let mut store = InteractionStore::new();
        let err = store
            .record("c1", "a", InteractionType::View, 0.0, Utc::now())
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInteraction(_)));
        assert_eq!(store.version(), 0);
        assert!(store.customer(&CustomerId::from("c1")).is_none());
    }

    #[test]
    fn test_record_creates_entities_implicitly() {
        let store = store_with_history();
        assert_eq!(store.customer_count(), 2);
        assert_eq!(store.product_count(), 2);
    }

    #[test]
    fn test_duplicate_interactions_are_retained() {
        let store = store_with_history();
        let neighbors: Vec<_> = store.neighbors_of_customer(&CustomerId::from("c1")).collect();
        assert_eq!(neighbors.len(), 3);
    }

    #[test]
    fn test_neighbors_of_product_is_restartable() {
        let store = store_with_history();
        let product = ProductId::from("a");
        let first: Vec<_> = store.neighbors_of_product(&product).collect();
        let second: Vec<_> = store.neighbors_of_product(&product).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert_eq!(first[0], (&CustomerId::from("c1"), 3.0));
    }

    #[test]
    fn test_neighbors_of_unknown_entity_is_empty() {
        let store = store_with_history();
        assert_eq!(store.neighbors_of_product(&ProductId::from("zzz")).count(), 0);
    }

    #[test]
    fn test_interactions_since() {
        let store = store_with_history();
        let tail = store.interactions_since(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].sequence, 3);
        assert!(store.interactions_since(10).is_empty());
    }

    #[test]
    fn test_upsert_product_merges_categories() {
        let mut store = store_with_history();
        store.upsert_product(
            ProductId::from("a"),
            ProductAttributes {
                name: Some("Anvil".to_string()),
                categories: vec!["tools".to_string()],
            },
        );
        let product = store.product(&ProductId::from("a")).unwrap();
        assert_eq!(product.name.as_deref(), Some("Anvil"));
        assert!(product.categories.contains("tools"));
    }
}
