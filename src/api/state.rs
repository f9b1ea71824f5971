use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::services::{
    scoring::RecencyDecay, IndexManager, IndexSettings, RecommendationEngine,
};

/// Limits applied to the `k` / `limit` query parameters
#[derive(Debug, Clone, Copy)]
pub struct QueryLimits {
    pub default_k: usize,
    pub max_k: usize,
}

impl QueryLimits {
    /// Missing values fall back to the default; oversized values are clamped
    pub fn resolve(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_k).min(self.max_k)
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<IndexManager>,
    pub engine: RecommendationEngine,
    pub limits: QueryLimits,
    ready: Arc<AtomicBool>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// Creates an empty, immediately queryable state with default settings
    pub fn new() -> Self {
        let state = Self::from_config(&Config::default());
        state.mark_ready();
        state
    }

    /// Creates state from configuration; it reports not ready until
    /// [`AppState::mark_ready`] is called
    pub fn from_config(config: &Config) -> Self {
        let settings = IndexSettings {
            policy: config.scoring_policy(),
            incremental_updates: config.incremental_updates,
            staleness_bound: config.staleness_bound,
        };
        Self {
            manager: Arc::new(IndexManager::new(settings)),
            engine: RecommendationEngine::new(
                RecencyDecay::new(config.recency_half_life_hours),
                config.reasons_per_item,
            ),
            limits: QueryLimits {
                default_k: config.default_k,
                max_k: config.max_k,
            },
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}
