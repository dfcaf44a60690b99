//! # Storefront Shared Crate
//!
//! Common types, constants, and validation shared between the storefront
//! engine (native Rust in tests, WASM in the browser) and anything that talks
//! to the shop backend. This crate is the single source of truth for the
//! catalog and cart shapes that must agree on both sides of the REST boundary.
//!
//! ## Architecture
//!
//! ```text
//! shared crate (this)
//!   |
//!   +-- storefront-engine (depends on shared)
//!         - router, page store, cart mutation engine
//!         - wasm_bindgen lives in the engine crate, NOT here
//! ```
//!
//! ## What belongs here
//!
//! - Catalog and cart types exchanged with the backend
//! - Validation functions (quantities, slugs, page sizes)
//! - Constants the engine and its hosts must agree on
//! - Pure computation helpers (no I/O, no WASM bindings)

use serde::{Deserialize, Serialize};

pub mod validation;

// ============================================
// Constants
//
// Defaults for the engine configuration. Hosts may
// override them through StorefrontConfig, but both the
// engine and the config layer start from these values.
// ============================================

/// Products per catalog page until the server reports its own page size.
pub const DEFAULT_PAGE_SIZE: u32 = 12;

/// Debounce window for quantity edits before one network commit is issued.
pub const QUANTITY_DEBOUNCE_MS: u64 = 300;

/// Delay between marking a cart line as "removing" and splicing it out.
/// Matches the render layer's fade-out transition.
pub const REMOVAL_TRANSITION_MS: u64 = 250;

/// Positions at either edge of a page that trigger a neighbor-page prefetch.
pub const PREFETCH_MARGIN: u32 = 2;

/// Upper bound for a single cart line when the backend reports no stock limit.
pub const MAX_LINE_QUANTITY: u32 = 99;

// ============================================
// Catalog Types
// ============================================

/// A purchasable variant of a product (size, color, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: String,
    pub name: String,
    /// Overrides the product price when present.
    #[serde(default)]
    pub price: Option<i64>,
    #[serde(default)]
    pub stock: Option<u32>,
}

/// A catalog product. List pages carry a thin record; the detail endpoint
/// returns the same shape with `description` and `variants` filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub slug: String,
    pub name: String,
    /// Price in minor currency units.
    pub price: i64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

impl Product {
    pub fn variant(&self, variant_id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == variant_id)
    }

    /// Unit price for the given variant, falling back to the product price.
    pub fn unit_price(&self, variant_id: Option<&str>) -> i64 {
        variant_id
            .and_then(|id| self.variant(id))
            .and_then(|v| v.price)
            .unwrap_or(self.price)
    }
}

/// One page of the catalog listing as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPage {
    pub items: Vec<Product>,
    pub page: u32,
    pub page_size: u32,
    pub total_items: u32,
    pub total_pages: u32,
}

/// Stock hint attached to an add-to-cart request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockInfo {
    /// Units still available, `None` when the backend does not track stock.
    pub available: Option<u32>,
}

// ============================================
// Cart Types
// ============================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: String,
    pub product_id: String,
    #[serde(default)]
    pub variant_id: Option<String>,
    pub name: String,
    pub quantity: u32,
    pub unit_price: i64,
    pub subtotal: i64,
    #[serde(default)]
    pub max_quantity: Option<u32>,
}

impl CartItem {
    /// Set the quantity and keep `subtotal = unit_price * quantity`.
    pub fn set_quantity(&mut self, quantity: u32) {
        self.quantity = quantity;
        self.subtotal = self.unit_price * i64::from(quantity);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartTotals {
    pub subtotal: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub totals: CartTotals,
    #[serde(default)]
    pub currency: String,
}

impl Cart {
    pub fn item(&self, item_id: &str) -> Option<&CartItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn item_mut(&mut self, item_id: &str) -> Option<&mut CartItem> {
        self.items.iter_mut().find(|i| i.id == item_id)
    }

    /// Find the line holding a product/variant combination.
    pub fn line_for(&self, product_id: &str, variant_id: Option<&str>) -> Option<&CartItem> {
        self.items
            .iter()
            .find(|i| i.product_id == product_id && i.variant_id.as_deref() == variant_id)
    }

    /// Total number of units across all lines.
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Recompute the derived totals after a local edit. The server-side
    /// adjustment (shipping, tax, discounts) is carried over unchanged until
    /// the next authoritative response replaces the whole cart.
    pub fn recompute_totals(&mut self) {
        let adjustment = self.totals.total - self.totals.subtotal;
        let subtotal = self.items.iter().map(|i| i.subtotal).sum();
        self.totals = CartTotals {
            subtotal,
            total: subtotal + adjustment,
        };
    }

    /// Set a line's quantity and recompute totals. Returns false if the line
    /// does not exist.
    pub fn set_quantity(&mut self, item_id: &str, quantity: u32) -> bool {
        match self.item_mut(item_id) {
            Some(item) => {
                item.set_quantity(quantity);
                self.recompute_totals();
                true
            }
            None => false,
        }
    }

    /// Remove a line and recompute totals.
    pub fn remove(&mut self, item_id: &str) -> Option<CartItem> {
        let pos = self.items.iter().position(|i| i.id == item_id)?;
        let removed = self.items.remove(pos);
        self.recompute_totals();
        Some(removed)
    }
}

// ============================================
// Tests
// ============================================
