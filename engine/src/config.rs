//! Engine configuration.
//!
//! Hosts embed the widget with a JSON blob (camelCase keys). Every field has a
//! default from `storefront_shared`, so `{}` is a valid configuration.

use serde::{Deserialize, Serialize};
use storefront_shared::{
    validation, DEFAULT_PAGE_SIZE, MAX_LINE_QUANTITY, PREFETCH_MARGIN, QUANTITY_DEBOUNCE_MS,
    REMOVAL_TRANSITION_MS,
};

use crate::error::{EngineError, EngineResult};

/// Route keywords that occupy the first fragment segment without being a
/// product slug. Entries ending in `/` match as prefixes.
pub const DEFAULT_RESERVED_ROUTES: [&str; 3] = ["payment-return", "payment-cancelled", "categories/"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorefrontConfig {
    pub page_size: u32,
    pub quantity_debounce_ms: u64,
    pub removal_transition_ms: u64,
    pub prefetch_margin: u32,
    pub max_line_quantity: u32,
    pub reserved_routes: Vec<String>,
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            quantity_debounce_ms: QUANTITY_DEBOUNCE_MS,
            removal_transition_ms: REMOVAL_TRANSITION_MS,
            prefetch_margin: PREFETCH_MARGIN,
            max_line_quantity: MAX_LINE_QUANTITY,
            reserved_routes: DEFAULT_RESERVED_ROUTES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl StorefrontConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let config: StorefrontConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        validation::page_size(self.page_size).map_err(|message| EngineError::Config { message })?;
        if self.quantity_debounce_ms == 0 {
            return Err(EngineError::Config {
                message: "quantity debounce must be greater than zero".to_string(),
            });
        }
        if self.max_line_quantity == 0 {
            return Err(EngineError::Config {
                message: "max line quantity must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = StorefrontConfig::from_json("{}").unwrap();
        assert_eq!(config, StorefrontConfig::default());
        assert_eq!(config.page_size, 12);
        assert_eq!(config.quantity_debounce_ms, 300);
    }

    #[test]
    fn test_partial_override() {
        let config =
            StorefrontConfig::from_json(r#"{"pageSize": 24, "reservedRoutes": ["checkout"]}"#).unwrap();
        assert_eq!(config.page_size, 24);
        assert_eq!(config.reserved_routes, vec!["checkout".to_string()]);
        assert_eq!(config.prefetch_margin, 2);
    }

    #[test]
    fn test_rejects_zero_page_size() {
        let err = StorefrontConfig::from_json(r#"{"pageSize": 0}"#).unwrap_err();
        assert!(matches!(err, EngineError::Config { .. }));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(
            StorefrontConfig::from_json("{pageSize"),
            Err(EngineError::Config { .. })
        ));
    }
}
