// =============================================================================
// Validation — input checks shared by the router, cart and config layers
// =============================================================================
//
// Two ways to validate:
//
//   1. CHAINABLE BUILDER (multi-rule string checks):
//
//        use storefront_shared::validation::validate;
//
//        let result = validate(slug)
//            .required()
//            .max_length(MAX_SLUG_LENGTH)
//            .printable()
//            .finish();
//
//      Once any check in the chain fails, later checks are skipped. `.finish()`
//      returns `Result<(), String>` with the first error message.
//
//   2. STANDALONE FUNCTIONS (single-purpose numeric checks):
//
//        use storefront_shared::validation::{quantity, page_size};
//
//        let q = quantity(requested, limit)?;
//        page_size(config.page_size)?;
//
// =============================================================================

/// Longest product slug accepted by the router.
pub const MAX_SLUG_LENGTH: usize = 200;

// -----------------------------------------------------------------------------
// Chainable Validator
// -----------------------------------------------------------------------------

/// A chainable validator that keeps the first error encountered.
pub struct Validator<'a> {
    value: &'a str,
    result: Result<(), String>,
}

/// Start a validation chain for the given value.
pub fn validate(value: &str) -> Validator<'_> {
    Validator {
        value,
        result: Ok(()),
    }
}

impl<'a> Validator<'a> {
    /// Fails if the value is empty or whitespace only.
    pub fn required(mut self) -> Self {
        if self.result.is_ok() && self.value.trim().is_empty() {
            self.result = Err("value is required".to_string());
        }
        self
    }

    /// Fails if the value is longer than `max` characters.
    pub fn max_length(mut self, max: usize) -> Self {
        if self.result.is_ok() && self.value.chars().count() > max {
            self.result = Err(format!("must be at most {} characters", max));
        }
        self
    }

    /// Fails on control characters or surrounding whitespace.
    pub fn printable(mut self) -> Self {
        if self.result.is_ok() {
            if self.value.chars().any(char::is_control) {
                self.result = Err("must not contain control characters".to_string());
            } else if self.value.trim() != self.value {
                self.result = Err("must not start or end with whitespace".to_string());
            }
        }
        self
    }

    pub fn finish(self) -> Result<(), String> {
        self.result
    }
}

// -----------------------------------------------------------------------------
// Standalone functions
// -----------------------------------------------------------------------------

/// Validate a product slug used in a navigation request.
pub fn slug(value: &str) -> Result<(), String> {
    validate(value)
        .required()
        .max_length(MAX_SLUG_LENGTH)
        .printable()
        .finish()
}

/// Clamp a requested line quantity into `1..=limit`.
///
/// Zero is rejected rather than clamped: callers treat a zero quantity as a
/// removal, not as "one".
pub fn quantity(requested: u32, limit: u32) -> Result<u32, String> {
    if requested == 0 {
        return Err("quantity must be at least 1".to_string());
    }
    if limit == 0 {
        return Err("item is out of stock".to_string());
    }
    Ok(requested.min(limit))
}

/// Page sizes must be positive; everything else divides by them.
pub fn page_size(value: u32) -> Result<(), String> {
    if value == 0 {
        return Err("page size must be greater than zero".to_string());
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_all_pass() {
        assert!(validate("blue-shirt")
            .required()
            .max_length(20)
            .printable()
            .finish()
            .is_ok());
    }

    #[test]
    fn test_chain_early_return_keeps_first_error() {
        let result = validate("").required().max_length(0).finish();
        assert_eq!(result.unwrap_err(), "value is required");
    }

    #[test]
    fn test_printable_rejects_control_and_padding() {
        assert!(validate("a\nb").printable().finish().is_err());
        assert!(validate(" shirt").printable().finish().is_err());
        assert!(validate("shirt").printable().finish().is_ok());
    }

    #[test]
    fn test_slug() {
        assert!(slug("mug").is_ok());
        assert!(slug("").is_err());
        assert!(slug("   ").is_err());
        assert!(slug(&"x".repeat(MAX_SLUG_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_quantity_clamps_to_limit() {
        assert_eq!(quantity(5, 99), Ok(5));
        assert_eq!(quantity(150, 99), Ok(99));
        assert_eq!(quantity(3, 2), Ok(2));
        assert!(quantity(0, 99).is_err());
        assert!(quantity(1, 0).is_err());
    }

    #[test]
    fn test_page_size() {
        assert!(page_size(12).is_ok());
        assert!(page_size(0).is_err());
    }
}
