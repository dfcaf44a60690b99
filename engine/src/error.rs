//! Error types for the storefront engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the engine and its collaborators.
///
/// `Clone` because a coalesced page fetch hands the same outcome to every
/// caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The backend rejected the request or could not be reached.
    #[error("network failure: {message}")]
    Network {
        /// Message suitable for a user-visible banner.
        message: String,
    },

    /// The request was superseded and its result discarded.
    #[error("request aborted")]
    Aborted,

    /// A cart operation referenced a line that is not in the cart.
    #[error("cart item not found: {item_id}")]
    UnknownItem {
        /// The id that was looked up.
        item_id: String,
    },

    /// Caller input failed validation.
    #[error("invalid {field}: {message}")]
    Invalid {
        /// Which input was rejected.
        field: &'static str,
        /// Why it was rejected.
        message: String,
    },

    /// Configuration could not be parsed or is inconsistent.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of what went wrong.
        message: String,
    },
}

impl EngineError {
    /// Create a network failure.
    #[inline]
    pub fn network(message: impl Into<String>) -> Self {
        EngineError::Network {
            message: message.into(),
        }
    }

    /// Create an unknown-item error.
    #[inline]
    pub fn unknown_item(item_id: impl Into<String>) -> Self {
        EngineError::UnknownItem {
            item_id: item_id.into(),
        }
    }

    /// Create a validation error.
    #[inline]
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        EngineError::Invalid {
            field,
            message: message.into(),
        }
    }

    /// Aborted requests are expected and never shown to the user.
    pub fn is_aborted(&self) -> bool {
        matches!(self, EngineError::Aborted)
    }

    /// Text for the `cart:error` banner. Network failures carry the backend's
    /// own message; everything else uses the display form.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Network { message } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Config {
            message: err.to_string(),
        }
    }
}
