use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

use super::{CustomerId, ProductId};
use crate::error::AppError;

/// Kind of engagement a customer had with a product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    View,
    Click,
    Purchase,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionType::View => "view",
            InteractionType::Click => "click",
            InteractionType::Purchase => "purchase",
        }
    }
}

impl Display for InteractionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InteractionType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "view" => Ok(InteractionType::View),
            "click" => Ok(InteractionType::Click),
            "purchase" => Ok(InteractionType::Purchase),
            other => Err(AppError::InvalidInteraction(format!(
                "unrecognized interaction type '{}'",
                other
            ))),
        }
    }
}

/// A recorded interaction edge between a customer and a product
///
/// Interactions are never mutated once written; corrections arrive as new
/// records. `sequence` is the store version assigned by the write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub sequence: u64,
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub interaction_type: InteractionType,
    pub weight: f64,
    pub timestamp: DateTime<Utc>,
}

/// An interaction that has passed validation but is not yet stored
#[derive(Debug, Clone, PartialEq)]
pub struct NewInteraction {
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub interaction_type: InteractionType,
    pub weight: f64,
    pub timestamp: DateTime<Utc>,
}

impl NewInteraction {
    /// Builds a write request, rejecting blank ids and non-positive weights
    pub fn new(
        customer_id: impl Into<CustomerId>,
        product_id: impl Into<ProductId>,
        interaction_type: InteractionType,
        weight: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        let customer_id = customer_id.into();
        let product_id = product_id.into();

        if customer_id.is_blank() {
            return Err(AppError::InvalidInteraction(
                "customer_id must not be empty".to_string(),
            ));
        }
        if product_id.is_blank() {
            return Err(AppError::InvalidInteraction(
                "product_id must not be empty".to_string(),
            ));
        }
        if !weight.is_finite() || weight <= 0.0 {
            return Err(AppError::InvalidInteraction(format!(
                "weight must be a positive number, got {}",
                weight
            )));
        }

        Ok(Self {
            customer_id,
            product_id,
            interaction_type,
            weight,
            timestamp,
        })
    }
}

/// Raw interaction tuple as delivered by the ETL job, before validation
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InteractionRecord {
    pub customer_id: String,
    pub product_id: String,
    #[serde(rename = "type")]
    pub interaction_type: String,
    pub weight: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl InteractionRecord {
    /// Validates the record; a missing timestamp defaults to `now`
    pub fn validate(self, now: DateTime<Utc>) -> Result<NewInteraction, AppError> {
        let interaction_type = self.interaction_type.parse::<InteractionType>()?;
        NewInteraction::new(
            self.customer_id,
            self.product_id,
            interaction_type,
            self.weight,
            self.timestamp.unwrap_or(now),
        )
    }
}
