pub mod cooccurrence;
pub mod index_manager;
pub mod interaction_store;
pub mod loader;
pub mod recommendations;
pub mod scoring;

pub use cooccurrence::CoOccurrenceIndex;
pub use index_manager::{IndexManager, IndexSettings};
pub use interaction_store::InteractionStore;
pub use recommendations::RecommendationEngine;
