//! Collaborator boundary to the shop's REST API.
//!
//! The engine treats these as opaque I/O: it only looks at success, failure
//! and (for detail loads) whether the request was aborted. Retries, auth and
//! transport live on the other side of the trait.

use async_trait::async_trait;
use storefront_shared::{Cart, Product, ProductPage};

use crate::error::EngineResult;
use crate::hash_codec::Params;

#[async_trait(?Send)]
pub trait CatalogClient {
    /// Fetch one listing page. `page` is 1-based.
    async fn list(&self, page: u32, page_size: u32, filters: &Params) -> EngineResult<ProductPage>;

    /// Fetch the full record for a product by id or slug.
    async fn get(&self, id_or_slug: &str) -> EngineResult<Product>;
}

/// Every call returns the authoritative cart after the mutation.
#[async_trait(?Send)]
pub trait CartClient {
    async fn fetch(&self) -> EngineResult<Cart>;

    async fn add_item(&self, product_id: &str, variant_id: Option<&str>, quantity: u32) -> EngineResult<Cart>;

    async fn update_item(&self, item_id: &str, quantity: u32) -> EngineResult<Cart>;

    async fn remove_item(&self, item_id: &str) -> EngineResult<Cart>;
}
