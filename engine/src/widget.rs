// ============================================================================
// STOREFRONT WIDGET — wasm_bindgen facade over the whole storefront
// ============================================================================
//
// THE PATTERN:
//   - JS owns the DOM, window.location, fetch and requestAnimationFrame.
//     Rust owns every piece of widget state.
//   - Once per frame JS calls tick(now). Debounce and removal timers fire
//     from there, and background loads make progress.
//   - Network: JS drains take_requests_json(), performs each request, and
//     answers with set_request_success(id, json) / set_request_error(id, msg).
//   - URL: JS forwards hashchange/popstate through sync_hash(location.hash)
//     and, after any call, writes `fragment` back if it differs from
//     location.hash (empty → history.replaceState without a hash).
//   - Events: take_events_json() drains the outbound bus events
//     ({channel, detail}) for JS to re-dispatch as DOM CustomEvents.
//   - JS polls data_version once per frame; a change means re-render.
//
// CATALOG HANDLES:
//   mount_catalog() returns a u32 handle. Every catalog method takes it and
//   reports an unknown handle as false / empty string.
//
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use wasm_bindgen::prelude::*;

use crate::bridge::RequestBridge;
use crate::cart::{MutationPhase, NewCartItem};
use crate::coordinator::{CatalogInstance, Routable};
use crate::error::EngineResult;
use crate::events::{ProductTarget, StoreEvent, SubscriptionId};
use crate::hash_codec::Params;
use crate::router::{Location, MemoryLocation};
use crate::scheduler::{FrameScheduler, Scheduler};
use crate::storefront::Storefront;
use crate::wasm::{config_or_default, non_empty};
use storefront_shared::StockInfo;

#[wasm_bindgen]
pub struct StorefrontWidget {
    location: Rc<MemoryLocation>,
    scheduler: Rc<FrameScheduler>,
    bridge: Rc<RequestBridge>,
    storefront: Storefront,
    catalogs: RefCell<HashMap<u32, CatalogInstance>>,
    outbox: Rc<RefCell<Vec<StoreEvent>>>,
    events_seen: Rc<Cell<u32>>,
    subscription: SubscriptionId,
}

#[wasm_bindgen]
impl StorefrontWidget {
    // ── Constructor ────────────────────────────────────────────────────

    /// `config_json` may be empty. Invalid configuration falls back to the
    /// defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(initial_hash: &str, config_json: &str) -> StorefrontWidget {
        let location = Rc::new(MemoryLocation::new(initial_hash));
        let scheduler = Rc::new(FrameScheduler::new());
        let bridge = Rc::new(RequestBridge::new());
        let storefront = Storefront::assemble(
            config_or_default(config_json),
            location.clone(),
            bridge.clone(),
            bridge.clone(),
            scheduler.clone(),
        );

        let outbox = Rc::new(RefCell::new(Vec::new()));
        let events_seen = Rc::new(Cell::new(0u32));
        let sink = outbox.clone();
        let seen = events_seen.clone();
        let subscription = storefront.bus().subscribe(move |event: &StoreEvent| {
            seen.set(seen.get().wrapping_add(1));
            if event.is_outbound() {
                sink.borrow_mut().push(event.clone());
            }
        });

        StorefrontWidget {
            location,
            scheduler,
            bridge,
            storefront,
            catalogs: RefCell::new(HashMap::new()),
            outbox,
            events_seen,
            subscription,
        }
    }

    // ── Version tracking ───────────────────────────────────────────────

    #[wasm_bindgen(getter)]
    pub fn data_version(&self) -> u32 {
        let mut version = self
            .events_seen
            .get()
            .wrapping_add(self.storefront.router().data_version())
            .wrapping_add(self.storefront.cart().data_version());
        for instance in self.catalogs.borrow().values() {
            version = version
                .wrapping_add(instance.data_version())
                .wrapping_add(instance.store().data_version());
        }
        version
    }

    // ── Frame clock ────────────────────────────────────────────────────

    /// Call from requestAnimationFrame with its timestamp.
    #[wasm_bindgen]
    pub fn tick(&self, now_ms: f64) {
        self.scheduler.tick(now_ms.max(0.0) as u64);
    }

    // ── Host requests ──────────────────────────────────────────────────

    /// JSON array of `{id, kind, ...}` requests queued since the last call.
    #[wasm_bindgen]
    pub fn take_requests_json(&self) -> String {
        serde_json::to_string(&self.bridge.take_requests()).unwrap_or_else(|_| "[]".to_string())
    }

    #[wasm_bindgen]
    pub fn set_request_success(&self, request_id: u32, response_json: &str) -> bool {
        let delivered = self.bridge.resolve(request_id, response_json);
        self.settle();
        delivered
    }

    #[wasm_bindgen]
    pub fn set_request_error(&self, request_id: u32, error: &str) -> bool {
        let delivered = self.bridge.reject(request_id, error);
        self.settle();
        delivered
    }

    #[wasm_bindgen(getter)]
    pub fn pending_request_count(&self) -> u32 {
        self.bridge.pending() as u32
    }

    // ── URL ────────────────────────────────────────────────────────────

    /// Adopt the browser's current hash. Returns true on a state change.
    #[wasm_bindgen]
    pub fn sync_hash(&self, hash: &str) -> bool {
        self.location.navigate_externally(hash);
        let changed = self.storefront.handle_navigation();
        self.settle();
        changed
    }

    /// The fragment the page should show.
    #[wasm_bindgen(getter)]
    pub fn fragment(&self) -> String {
        self.location.hash()
    }

    // ── Events ─────────────────────────────────────────────────────────

    /// JSON array of `{channel, detail}` objects, oldest first.
    #[wasm_bindgen]
    pub fn take_events_json(&self) -> String {
        let events = std::mem::take(&mut *self.outbox.borrow_mut());
        serde_json::to_string(&events).unwrap_or_else(|_| "[]".to_string())
    }

    #[wasm_bindgen]
    pub fn open_cart(&self) {
        self.emit(StoreEvent::OpenCart);
    }

    #[wasm_bindgen]
    pub fn close_cart(&self) {
        self.emit(StoreEvent::CloseCart);
    }

    #[wasm_bindgen]
    pub fn toggle_cart(&self) {
        self.emit(StoreEvent::ToggleCart);
    }

    #[wasm_bindgen]
    pub fn product_open_slug(&self, slug: &str) {
        self.emit(StoreEvent::ProductOpen(ProductTarget::Slug(slug.to_string())));
    }

    #[wasm_bindgen]
    pub fn product_open_id(&self, id: &str) {
        self.emit(StoreEvent::ProductOpen(ProductTarget::Id(id.to_string())));
    }

    #[wasm_bindgen]
    pub fn product_open_first(&self) {
        self.emit(StoreEvent::ProductOpen(ProductTarget::OpenFirst));
    }

    #[wasm_bindgen]
    pub fn product_close(&self) {
        self.emit(StoreEvent::ProductClose);
    }

    /// `cart:add-item` with a `NewCartItem` JSON and an optional (empty)
    /// `StockInfo` JSON. Returns an error message, or empty on success.
    /// Rejections by the cart surface as `cart:error` events.
    #[wasm_bindgen]
    pub fn add_item_json(&self, item_json: &str, stock_json: &str) -> String {
        let item: NewCartItem = match serde_json::from_str(item_json) {
            Ok(item) => item,
            Err(err) => return format!("malformed item: {err}"),
        };
        let stock_info = match non_empty(stock_json.trim()) {
            None => None,
            Some(json) => match serde_json::from_str::<StockInfo>(json) {
                Ok(stock) => Some(stock),
                Err(err) => return format!("malformed stock info: {err}"),
            },
        };
        self.emit(StoreEvent::CartAddItem { item, stock_info });
        String::new()
    }

    // ── Cart ───────────────────────────────────────────────────────────

    #[wasm_bindgen]
    pub fn load_cart(&self) {
        self.run("cart load", self.storefront.load_cart());
    }

    #[wasm_bindgen(getter)]
    pub fn cart_loaded(&self) -> bool {
        self.storefront.cart().is_loaded()
    }

    #[wasm_bindgen(getter)]
    pub fn cart_open(&self) -> bool {
        self.storefront.panel().is_open()
    }

    #[wasm_bindgen(getter)]
    pub fn item_count(&self) -> u32 {
        self.storefront.cart().item_count()
    }

    #[wasm_bindgen]
    pub fn cart_json(&self) -> String {
        serde_json::to_string(&self.storefront.cart().cart()).unwrap_or_default()
    }

    /// Returns an error message, or empty on success.
    #[wasm_bindgen]
    pub fn set_quantity(&self, item_id: &str, quantity: u32) -> String {
        error_text(self.storefront.cart().set_quantity(item_id, quantity))
    }

    #[wasm_bindgen]
    pub fn increment(&self, item_id: &str) -> String {
        error_text(self.storefront.cart().increment(item_id))
    }

    #[wasm_bindgen]
    pub fn decrement(&self, item_id: &str) -> String {
        error_text(self.storefront.cart().decrement(item_id))
    }

    #[wasm_bindgen]
    pub fn remove_item(&self, item_id: &str) -> String {
        error_text(self.storefront.cart().remove_item(item_id))
    }

    /// 0=idle, 1=optimistic, 2=committing, 3=removing.
    #[wasm_bindgen]
    pub fn item_phase(&self, item_id: &str) -> u8 {
        match self.storefront.cart().phase(item_id) {
            MutationPhase::Idle => 0,
            MutationPhase::Optimistic => 1,
            MutationPhase::Committing => 2,
            MutationPhase::Removing => 3,
        }
    }

    // ── Catalogs ───────────────────────────────────────────────────────

    /// `routable`: 0=auto, 1=always, 2=never. Empty `catalog_id` for none.
    #[wasm_bindgen]
    pub fn mount_catalog(&self, routable: u8, catalog_id: &str) -> u32 {
        let routable = match routable {
            1 => Routable::Always,
            2 => Routable::Never,
            _ => Routable::Auto,
        };
        let instance = self
            .storefront
            .mount_catalog(routable, non_empty(catalog_id).map(str::to_string));
        let handle = instance.id().get() as u32;
        self.catalogs.borrow_mut().insert(handle, instance);
        self.settle();
        handle
    }

    #[wasm_bindgen]
    pub fn unmount_catalog(&self, handle: u32) -> bool {
        let Some(instance) = self.catalogs.borrow_mut().remove(&handle) else {
            return false;
        };
        self.storefront.unmount_catalog(&instance);
        true
    }

    #[wasm_bindgen]
    pub fn catalog_is_primary(&self, handle: u32) -> bool {
        self.catalog(handle).is_some_and(|c| c.is_primary())
    }

    #[wasm_bindgen]
    pub fn go_to_page(&self, handle: u32, page: u32) -> bool {
        let Some(instance) = self.catalog(handle) else {
            return false;
        };
        self.run("catalog page", instance.go_to_page(page));
        true
    }

    /// Returns an error message, or empty on success.
    #[wasm_bindgen]
    pub fn open_product(&self, handle: u32, index: u32) -> String {
        let Some(instance) = self.catalog(handle) else {
            return format!("unknown catalog {handle}");
        };
        let result = instance.open_product(index as usize);
        self.settle();
        error_text(result)
    }

    /// `delta` is -1 for previous, +1 for next.
    #[wasm_bindgen]
    pub fn step_product(&self, handle: u32, delta: i32) -> bool {
        let Some(instance) = self.catalog(handle) else {
            return false;
        };
        self.run("product step", instance.step_product(delta as isize));
        true
    }

    #[wasm_bindgen]
    pub fn back_to_list(&self, handle: u32) -> bool {
        let Some(instance) = self.catalog(handle) else {
            return false;
        };
        instance.back_to_list();
        self.settle();
        true
    }

    /// Replace the filters with a JSON object of strings.
    #[wasm_bindgen]
    pub fn set_filters_json(&self, handle: u32, filters_json: &str) -> bool {
        let Some(instance) = self.catalog(handle) else {
            return false;
        };
        match serde_json::from_str::<Params>(filters_json) {
            Ok(filters) => {
                self.run("catalog filters", instance.set_filters(filters));
                true
            }
            Err(err) => {
                tracing::warn!(%err, "ignoring malformed filters json");
                false
            }
        }
    }

    /// `{"view":"list","page":n}` or `{"view":"product","slug":..,"index":..}`.
    #[wasm_bindgen]
    pub fn catalog_view_json(&self, handle: u32) -> String {
        self.catalog(handle)
            .and_then(|c| serde_json::to_string(&c.view()).ok())
            .unwrap_or_default()
    }

    /// Products of the current list page; `null` marks a slot still loading.
    #[wasm_bindgen]
    pub fn catalog_slice_json(&self, handle: u32) -> String {
        self.catalog(handle)
            .and_then(|c| serde_json::to_string(&c.current_slice()).ok())
            .unwrap_or_default()
    }

    /// Empty when no product is open.
    #[wasm_bindgen]
    pub fn selected_product_json(&self, handle: u32) -> String {
        self.catalog(handle)
            .and_then(|c| c.selected_product())
            .and_then(|p| serde_json::to_string(&p).ok())
            .unwrap_or_default()
    }

    #[wasm_bindgen]
    pub fn catalog_total_pages(&self, handle: u32) -> u32 {
        self.catalog(handle)
            .map_or(0, |c| c.store().layout().total_pages)
    }

    /// Last load failure, empty if none.
    #[wasm_bindgen]
    pub fn catalog_error(&self, handle: u32) -> String {
        self.catalog(handle)
            .and_then(|c| c.last_error())
            .map(|err| err.user_message())
            .unwrap_or_default()
    }
}

impl StorefrontWidget {
    fn catalog(&self, handle: u32) -> Option<CatalogInstance> {
        self.catalogs.borrow().get(&handle).cloned()
    }

    fn emit(&self, event: StoreEvent) {
        self.storefront.emit(event);
        self.settle();
    }

    /// Drive a background operation, logging its failure.
    fn run<T: 'static>(&self, what: &'static str, task: LocalBoxFuture<'static, EngineResult<T>>) {
        self.scheduler.spawn(
            async move {
                if let Err(err) = task.await {
                    if !err.is_aborted() {
                        tracing::warn!(%err, "{what} failed");
                    }
                }
            }
            .boxed_local(),
        );
        self.settle();
    }

    /// Let spawned work run far enough to queue its requests.
    fn settle(&self) {
        self.scheduler.run_until_stalled();
    }
}

impl Drop for StorefrontWidget {
    fn drop(&mut self) {
        self.storefront.bus().unsubscribe(self.subscription);
    }
}

fn error_text<T>(result: EngineResult<T>) -> String {
    match result {
        Ok(_) => String::new(),
        Err(err) => err.user_message(),
    }
}

#[cfg(test)]
mod tests {
    use storefront_shared::{Cart, CartItem, CartTotals, Product, ProductPage};

    use super::*;
    use crate::bridge::ApiRequest;
    use crate::bridge::OutgoingRequest;

    fn product(n: usize) -> Product {
        Product {
            id: format!("id-{n}"),
            slug: format!("product-{n}"),
            name: format!("Product {n}"),
            price: 100,
            description: None,
            variants: Vec::new(),
        }
    }

    fn cart(quantity: u32) -> Cart {
        let mut item = CartItem {
            id: "line-1".to_string(),
            product_id: "id-1".to_string(),
            variant_id: None,
            name: "Product 1".to_string(),
            quantity: 0,
            unit_price: 500,
            subtotal: 0,
            max_quantity: None,
        };
        item.set_quantity(quantity);
        let mut cart = Cart {
            items: vec![item],
            totals: CartTotals::default(),
            ..Cart::default()
        };
        cart.recompute_totals();
        cart
    }

    /// Answer every queued request the way a small shop backend would.
    fn serve(widget: &StorefrontWidget, cart_quantity: u32) -> Vec<ApiRequest> {
        let requests: Vec<OutgoingRequest> = widget.bridge.take_requests();
        let mut seen = Vec::new();
        for outgoing in requests {
            let body = match &outgoing.request {
                ApiRequest::ListProducts { page, page_size, .. } => {
                    let start = ((page - 1) * page_size) as usize;
                    let items = (start..(start + *page_size as usize).min(30)).map(product).collect();
                    serde_json::to_string(&ProductPage {
                        items,
                        page: *page,
                        page_size: *page_size,
                        total_items: 30,
                        total_pages: 30u32.div_ceil(*page_size),
                    })
                    .unwrap()
                }
                ApiRequest::UpdateCartItem { quantity, .. } => serde_json::to_string(&cart(*quantity)).unwrap(),
                ApiRequest::FetchCart => serde_json::to_string(&cart(cart_quantity)).unwrap(),
                other => panic!("unexpected request {other:?}"),
            };
            assert!(widget.set_request_success(outgoing.id, &body));
            seen.push(outgoing.request);
        }
        seen
    }

    #[test]
    fn test_catalog_pages_through_host_requests() {
        let widget = StorefrontWidget::new("", r#"{"pageSize": 10}"#);
        let handle = widget.mount_catalog(0, "");
        assert!(widget.catalog_is_primary(handle));

        let before = widget.data_version();
        let requests = serve(&widget, 1);
        assert!(matches!(requests[0], ApiRequest::ListProducts { page: 1, page_size: 10, .. }));
        assert_ne!(widget.data_version(), before);

        let slice: Vec<Option<Product>> = serde_json::from_str(&widget.catalog_slice_json(handle)).unwrap();
        assert_eq!(slice.len(), 10);
        assert_eq!(slice[0], Some(product(0)));
        assert_eq!(widget.catalog_total_pages(handle), 3);

        assert!(widget.go_to_page(handle, 2));
        assert_eq!(widget.fragment(), "#!/?page=2");
        serve(&widget, 1);
        assert_eq!(widget.catalog_view_json(handle), r#"{"view":"list","page":2}"#);

        assert_eq!(widget.open_product(handle, 12), "");
        assert_eq!(widget.fragment(), "#!/product-12&page=2");
        assert!(widget.catalog_view_json(handle).contains(r#""slug":"product-12""#));
        assert_eq!(widget.open_product(99, 0), "unknown catalog 99");
    }

    #[test]
    fn test_cart_edit_commits_on_tick_and_reports_events() {
        let widget = StorefrontWidget::new("", "");
        widget.load_cart();
        assert_eq!(serve(&widget, 2), vec![ApiRequest::FetchCart]);
        assert!(widget.cart_loaded());
        assert_eq!(widget.item_count(), 2);

        assert_eq!(widget.set_quantity("line-1", 5), "");
        assert_eq!(widget.item_phase("line-1"), 1);
        assert!(widget.bridge.take_requests().is_empty());

        widget.tick(300.0);
        assert_eq!(
            serve(&widget, 2),
            vec![ApiRequest::UpdateCartItem {
                item_id: "line-1".to_string(),
                quantity: 5
            }]
        );
        assert_eq!(widget.item_phase("line-1"), 0);
        assert_eq!(widget.item_count(), 5);

        let events: Vec<serde_json::Value> = serde_json::from_str(&widget.take_events_json()).unwrap();
        let channels: Vec<&str> = events.iter().filter_map(|e| e["channel"].as_str()).collect();
        assert_eq!(channels, vec!["cart:loaded", "cart:updated", "cart:updated"]);
        assert_eq!(widget.take_events_json(), "[]");

        assert_eq!(widget.set_quantity("missing", 1), "cart item not found: missing");
    }

    #[test]
    fn test_failed_request_surfaces_as_cart_error() {
        let widget = StorefrontWidget::new("", "");
        widget.load_cart();
        let id = widget.bridge.take_requests()[0].id;
        assert!(widget.set_request_error(id, "cart service unavailable"));
        assert!(!widget.set_request_error(id, "again"));

        let events: Vec<serde_json::Value> = serde_json::from_str(&widget.take_events_json()).unwrap();
        assert_eq!(events[0]["channel"], "cart:error");
        assert_eq!(events[0]["detail"]["message"], "cart service unavailable");
        assert!(!widget.cart_loaded());
    }

    #[test]
    fn test_inbound_events_drive_panel_and_url() {
        let widget = StorefrontWidget::new("#intro", "");
        widget.open_cart();
        assert!(widget.cart_open());
        assert_eq!(widget.fragment(), "#intro#!/~/cart");

        assert!(widget.sync_hash("#intro"));
        assert!(!widget.cart_open());

        let events: Vec<serde_json::Value> = serde_json::from_str(&widget.take_events_json()).unwrap();
        assert!(events.iter().all(|e| e["channel"] == "state-change"));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_add_item_json() {
        let widget = StorefrontWidget::new("", "");
        let item = r#"{"product":{"id":"id-3","slug":"product-3","name":"Product 3","price":400},"quantity":1}"#;
        assert_eq!(widget.add_item_json(item, ""), "");
        assert_eq!(widget.item_count(), 1);
        assert!(matches!(
            widget.bridge.take_requests()[0].request,
            ApiRequest::AddCartItem { quantity: 1, .. }
        ));

        assert!(widget.add_item_json("{", "").starts_with("malformed item"));
        assert!(widget.add_item_json(item, "[").starts_with("malformed stock info"));
    }
}
