// ============================================================================
// STOREFRONT ROUTER — wasm_bindgen facade over the hash router
// ============================================================================
//
// THE PATTERN:
//   - JS owns window.location. Rust owns the parsing, the state and the
//     decision of what the next fragment is.
//   - On every hashchange / popstate JS calls sync_hash(location.hash).
//     A true result means the widget state changed and views should re-read.
//   - Navigation methods return the fragment JS must write:
//       non-empty  → location.hash = fragment
//       empty      → history.replaceState(null, "", pathname + search)
//     If the returned fragment equals location.hash, nothing needs writing.
//   - JS polls data_version once per frame; a change means re-render.
//
// ============================================================================

use std::rc::Rc;

use wasm_bindgen::prelude::*;

use crate::config::StorefrontConfig;
use crate::events::EventBus;
use crate::hash_codec::{HashCodec, Params, ReservedRoutes, View};
use crate::router::{HashRouter, Location, MemoryLocation};

#[wasm_bindgen]
pub struct StorefrontRouter {
    location: Rc<MemoryLocation>,
    router: HashRouter,
}

#[wasm_bindgen]
impl StorefrontRouter {
    // ── Constructor ────────────────────────────────────────────────────

    /// `config_json` may be empty. Invalid configuration falls back to the
    /// defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(initial_hash: &str, config_json: &str) -> StorefrontRouter {
        let config = config_or_default(config_json);
        let location = Rc::new(MemoryLocation::new(initial_hash));
        let codec = HashCodec::new(ReservedRoutes::new(&config.reserved_routes));
        let router = HashRouter::new(location.clone(), codec, EventBus::new());
        StorefrontRouter { location, router }
    }

    // ── Version tracking ───────────────────────────────────────────────

    #[wasm_bindgen(getter)]
    pub fn data_version(&self) -> u32 {
        self.router.data_version()
    }

    // ── Sync ───────────────────────────────────────────────────────────

    /// Adopt the browser's current hash. Returns true on a state change.
    #[wasm_bindgen]
    pub fn sync_hash(&self, hash: &str) -> bool {
        self.location.navigate_externally(hash);
        self.router.handle_navigation()
    }

    // ── Navigation ─────────────────────────────────────────────────────

    #[wasm_bindgen]
    pub fn open_cart(&self) -> String {
        self.router.open_cart();
        self.location.hash()
    }

    #[wasm_bindgen]
    pub fn close_cart(&self) -> String {
        self.router.close_cart();
        self.location.hash()
    }

    #[wasm_bindgen]
    pub fn toggle_cart(&self) -> String {
        self.router.toggle_cart();
        self.location.hash()
    }

    /// Empty `catalog_id` keeps the current catalog.
    #[wasm_bindgen]
    pub fn navigate_to_product(&self, slug: &str, preserve_params: bool, catalog_id: &str) -> String {
        self.router
            .navigate_to_product(slug, preserve_params, None, non_empty(catalog_id));
        self.location.hash()
    }

    #[wasm_bindgen]
    pub fn navigate_to_list(&self, preserve_params: bool, catalog_id: &str) -> String {
        self.router
            .navigate_to_list(preserve_params, non_empty(catalog_id));
        self.location.hash()
    }

    #[wasm_bindgen]
    pub fn set_param(&self, key: &str, value: &str) -> String {
        self.router.update_params([(key, Some(value))], true);
        self.location.hash()
    }

    #[wasm_bindgen]
    pub fn remove_param(&self, key: &str) -> String {
        self.router.update_params([(key, None::<&str>)], true);
        self.location.hash()
    }

    /// Replace all params at once from a JSON object of strings.
    #[wasm_bindgen]
    pub fn set_params_json(&self, json: &str) -> String {
        match serde_json::from_str::<Params>(json) {
            Ok(params) => {
                let mut next = self.router.state();
                next.params = params;
                self.router.navigate_to(&next);
            }
            Err(err) => tracing::warn!(%err, "ignoring malformed params json"),
        }
        self.location.hash()
    }

    // ── State getters ──────────────────────────────────────────────────

    /// "list" or "product".
    #[wasm_bindgen(getter)]
    pub fn view(&self) -> String {
        match self.router.state().view {
            View::List => "list".to_string(),
            View::Product { .. } => "product".to_string(),
        }
    }

    /// Empty in the list view.
    #[wasm_bindgen(getter)]
    pub fn product_slug(&self) -> String {
        self.router
            .state()
            .product_slug()
            .map(str::to_string)
            .unwrap_or_default()
    }

    #[wasm_bindgen(getter)]
    pub fn cart_open(&self) -> bool {
        self.router.state().cart_open
    }

    #[wasm_bindgen(getter)]
    pub fn catalog_id(&self) -> String {
        self.router.state().catalog_id.unwrap_or_default()
    }

    #[wasm_bindgen(getter)]
    pub fn fragment(&self) -> String {
        self.location.hash()
    }

    /// Empty if the parameter is not set.
    #[wasm_bindgen]
    pub fn param(&self, key: &str) -> String {
        self.router
            .state()
            .param(key)
            .map(str::to_string)
            .unwrap_or_default()
    }

    #[wasm_bindgen]
    pub fn state_json(&self) -> String {
        serde_json::to_string(&self.router.state()).unwrap_or_default()
    }
}

/// Parse and validate a JS-supplied config; empty or invalid input yields
/// the defaults.
pub(crate) fn config_or_default(config_json: &str) -> StorefrontConfig {
    if config_json.trim().is_empty() {
        return StorefrontConfig::default();
    }
    StorefrontConfig::from_json(config_json).unwrap_or_else(|err| {
        tracing::warn!(%err, "invalid storefront config, using defaults");
        StorefrontConfig::default()
    })
}

pub(crate) fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
