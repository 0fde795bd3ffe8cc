//! Model catalog: per-model credit costs, dimension limits, and provider ids
//!
//! The catalog is an injected configuration object so the model table can
//! change without redeploying the orchestrator. Unknown model identifiers
//! fall back to a default baseline cost to stay forward-compatible with
//! provider catalog changes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{AppError, Result};

/// Resolution at which base costs are quoted
pub const BASE_PIXELS: u64 = 1024 * 1024;

/// Baseline cost applied to model ids absent from the catalog
pub const DEFAULT_BASE_COST: u64 = 50;

/// One catalog entry: a user-facing model alias and its provider mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Fully-qualified identifier sent to the provider
    pub provider_id: String,
    /// Credits per image at the base resolution
    pub base_cost: u64,
    #[serde(default = "default_max_dim")]
    pub max_width: u32,
    #[serde(default = "default_max_dim")]
    pub max_height: u32,
}

fn default_max_dim() -> u32 {
    2048
}

/// Catalog of known models, keyed by alias
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: HashMap<String, ModelSpec>,
    default_cost: u64,
}

impl ModelCatalog {
    /// Built-in table covering the models the service currently exposes.
    /// Both short aliases and fully-qualified provider ids resolve.
    pub fn builtin() -> Self {
        let entries: &[(&str, &str, u64)] = &[
            ("flux-pro", "black-forest-labs/flux.2-pro", 100),
            ("flux-max", "black-forest-labs/flux.2-max", 120),
            ("flux-flex", "black-forest-labs/flux.2-flex", 80),
            ("flux-klein", "black-forest-labs/flux.2-klein-4b", 40),
            ("riverflow-fast", "sourceful/riverflow-v2-fast-preview", 30),
            (
                "riverflow-standard",
                "sourceful/riverflow-v2-standard-preview",
                50,
            ),
            ("riverflow-max", "sourceful/riverflow-v2-max-preview", 90),
            ("seedream", "bytedance-seed/seedream-4.5", 25),
        ];

        let mut models = HashMap::new();
        for (alias, provider_id, cost) in entries {
            let spec = ModelSpec {
                provider_id: provider_id.to_string(),
                base_cost: *cost,
                max_width: default_max_dim(),
                max_height: default_max_dim(),
            };
            models.insert(alias.to_string(), spec.clone());
            // Fully-qualified ids resolve to the same entry
            models.insert(provider_id.to_string(), spec);
        }

        Self {
            models,
            default_cost: DEFAULT_BASE_COST,
        }
    }

    /// Merge configured overrides on top of the built-in table
    pub fn with_overrides(overrides: HashMap<String, ModelSpec>) -> Self {
        let mut catalog = Self::builtin();
        catalog.models.extend(overrides);
        catalog
    }

    pub fn get(&self, model: &str) -> Option<&ModelSpec> {
        self.models.get(model)
    }

    /// Identifier to send to the provider; unknown aliases pass through as-is
    pub fn provider_id<'a>(&'a self, model: &'a str) -> &'a str {
        self.models
            .get(model)
            .map(|s| s.provider_id.as_str())
            .unwrap_or(model)
    }

    /// Per-image credit cost for one generation at the given resolution.
    /// Resolution above the 1024x1024 baseline scales the base cost linearly
    /// with the pixel ratio, rounded up.
    pub fn estimate_cost(&self, model: &str, width: u32, height: u32) -> u64 {
        let base = self
            .models
            .get(model)
            .map(|s| s.base_cost)
            .unwrap_or(self.default_cost);

        let pixels = width as u64 * height as u64;
        if pixels <= BASE_PIXELS {
            base
        } else {
            // ceil(base * pixels / BASE_PIXELS)
            (base * pixels + BASE_PIXELS - 1) / BASE_PIXELS
        }
    }

    /// Reject dimensions outside the model's supported range when known
    pub fn validate_dimensions(&self, model: &str, width: u32, height: u32) -> Result<()> {
        if let Some(spec) = self.models.get(model) {
            if width > spec.max_width || height > spec.max_height {
                return Err(AppError::InvalidRequest(format!(
                    "model {} supports at most {}x{} pixels",
                    model, spec.max_width, spec.max_height
                )));
            }
        }
        Ok(())
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
