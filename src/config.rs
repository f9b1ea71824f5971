use std::path::PathBuf;

use serde::Deserialize;

use crate::services::scoring::{PairCombiner, ScoringPolicy, TypeWeights};

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Multiplier applied to `view` interaction weights
    #[serde(default = "default_view_weight")]
    pub view_weight: f64,

    /// Multiplier applied to `click` interaction weights
    #[serde(default = "default_click_weight")]
    pub click_weight: f64,

    /// Multiplier applied to `purchase` interaction weights
    #[serde(default = "default_purchase_weight")]
    pub purchase_weight: f64,

    /// How two per-customer affinities combine into a pair contribution
    #[serde(default)]
    pub pair_combiner: PairCombiner,

    /// Half-life used to decay seed interactions at query time, 0 disables decay
    #[serde(default = "default_recency_half_life_hours")]
    pub recency_half_life_hours: f64,

    /// Co-visitation window per customer (most recently touched products)
    #[serde(default = "default_max_products_per_customer")]
    pub max_products_per_customer: usize,

    /// Store versions the index may lag behind before it is reported stale
    #[serde(default = "default_staleness_bound")]
    pub staleness_bound: u64,

    /// Apply every recorded interaction to the index as it arrives
    #[serde(default = "default_incremental_updates")]
    pub incremental_updates: bool,

    #[serde(default = "default_k")]
    pub default_k: usize,

    #[serde(default = "default_max_k")]
    pub max_k: usize,

    /// Number of contributing seed products reported per recommendation
    #[serde(default = "default_reasons_per_item")]
    pub reasons_per_item: usize,

    /// Optional JSON-lines file of interactions loaded at startup
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_view_weight() -> f64 {
    1.0
}

fn default_click_weight() -> f64 {
    2.0
}

fn default_purchase_weight() -> f64 {
    5.0
}

fn default_recency_half_life_hours() -> f64 {
    720.0
}

fn default_max_products_per_customer() -> usize {
    500
}

fn default_staleness_bound() -> u64 {
    1000
}

fn default_incremental_updates() -> bool {
    true
}

fn default_k() -> usize {
    10
}

fn default_max_k() -> usize {
    100
}

fn default_reasons_per_item() -> usize {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            view_weight: default_view_weight(),
            click_weight: default_click_weight(),
            purchase_weight: default_purchase_weight(),
            pair_combiner: PairCombiner::default(),
            recency_half_life_hours: default_recency_half_life_hours(),
            max_products_per_customer: default_max_products_per_customer(),
            staleness_bound: default_staleness_bound(),
            incremental_updates: default_incremental_updates(),
            default_k: default_k(),
            max_k: default_max_k(),
            reasons_per_item: default_reasons_per_item(),
            seed_file: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the scoring code cannot work with
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("VIEW_WEIGHT", self.view_weight),
            ("CLICK_WEIGHT", self.click_weight),
            ("PURCHASE_WEIGHT", self.purchase_weight),
        ] {
            if !value.is_finite() || value <= 0.0 {
                anyhow::bail!("{} must be a positive number, got {}", name, value);
            }
        }
        if !self.recency_half_life_hours.is_finite() || self.recency_half_life_hours < 0.0 {
            anyhow::bail!("RECENCY_HALF_LIFE_HOURS must be zero or positive");
        }
        if self.max_products_per_customer < 2 {
            anyhow::bail!("MAX_PRODUCTS_PER_CUSTOMER must be at least 2");
        }
        if self.max_k == 0 || self.default_k > self.max_k {
            anyhow::bail!("DEFAULT_K must not exceed MAX_K and MAX_K must be positive");
        }
        Ok(())
    }

    pub fn scoring_policy(&self) -> ScoringPolicy {
        ScoringPolicy {
            type_weights: TypeWeights {
                view: self.view_weight,
                click: self.click_weight,
                purchase: self.purchase_weight,
            },
            combiner: self.pair_combiner,
            max_products_per_customer: self.max_products_per_customer,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
