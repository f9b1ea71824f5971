use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{CustomerId, ProductId};

/// A customer node; exists once referenced by an upsert or an interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: Option<String>,
    pub joined_at: Option<DateTime<Utc>>,
}

/// A product node. Categories are display-only and never affect ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: Option<String>,
    pub categories: BTreeSet<String>,
}

/// Optional customer attributes supplied by an upsert
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CustomerAttributes {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
}

/// Optional product attributes supplied by an upsert
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProductAttributes {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl Customer {
    pub fn new(id: CustomerId) -> Self {
        Self {
            id,
            name: None,
            joined_at: None,
        }
    }

    /// Merges attributes; absent fields keep their current value
    pub fn apply(&mut self, attributes: CustomerAttributes) {
        if attributes.name.is_some() {
            self.name = attributes.name;
        }
        if attributes.joined_at.is_some() {
            self.joined_at = attributes.joined_at;
        }
    }
}

impl Product {
    pub fn new(id: ProductId) -> Self {
        Self {
            id,
            name: None,
            categories: BTreeSet::new(),
        }
    }

    /// Merges attributes; categories accumulate across upserts
    pub fn apply(&mut self, attributes: ProductAttributes) {
        if attributes.name.is_some() {
            self.name = attributes.name;
        }
        self.categories.extend(
            attributes
                .categories
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
        );
    }
}
