mod catalog;
mod ids;
mod interaction;
mod recommendation;

pub use catalog::{Customer, CustomerAttributes, Product, ProductAttributes};
pub use ids::{CustomerId, ProductId};
pub use interaction::{Interaction, InteractionRecord, InteractionType, NewInteraction};
pub use recommendation::{
    Reason, Recommendation, RecommendationSource, RecommendedItem, SeedContribution,
};
