//! Fake collaborators shared by the integration tests.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::rc::Rc;

use async_trait::async_trait;
use futures::channel::oneshot;
use futures::FutureExt;
use storefront_engine::{
    CartClient, CatalogClient, EngineError, EngineResult, EventBus, FrameScheduler, Params,
    Scheduler, StoreEvent,
};
use storefront_shared::{Cart, CartItem, CartTotals, Product, ProductPage};

// ── Fixtures ───────────────────────────────────────────────────────────────

pub fn product(n: usize) -> Product {
    Product {
        id: format!("id-{n}"),
        slug: format!("product-{n}"),
        name: format!("Product {n}"),
        price: 100 * (n as i64 + 1),
        description: None,
        variants: Vec::new(),
    }
}

pub fn line(id: &str, product_id: &str, quantity: u32, unit_price: i64) -> CartItem {
    CartItem {
        id: id.to_string(),
        product_id: product_id.to_string(),
        variant_id: None,
        name: format!("Item {id}"),
        quantity,
        unit_price,
        subtotal: unit_price * i64::from(quantity),
        max_quantity: None,
    }
}

pub fn cart_of(items: Vec<CartItem>) -> Cart {
    let subtotal = items.iter().map(|i| i.subtotal).sum();
    Cart {
        id: Some("cart-1".to_string()),
        items,
        totals: CartTotals {
            subtotal,
            total: subtotal,
        },
        currency: "EUR".to_string(),
    }
}

// ── Gate ───────────────────────────────────────────────────────────────────

/// Holds fake responses until the test releases them.
#[derive(Default)]
pub struct Gate {
    closed: Cell<bool>,
    waiting: RefCell<VecDeque<oneshot::Sender<()>>>,
}

impl Gate {
    pub fn close(&self) {
        self.closed.set(true);
    }

    /// Release everything waiting and let future calls through.
    pub fn open(&self) {
        self.closed.set(false);
        self.release_all();
    }

    pub fn release_one(&self) -> bool {
        match self.waiting.borrow_mut().pop_front() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub fn release_all(&self) {
        let waiting: Vec<_> = self.waiting.borrow_mut().drain(..).collect();
        for tx in waiting {
            let _ = tx.send(());
        }
    }

    pub fn waiting(&self) -> usize {
        self.waiting.borrow().len()
    }

    async fn pass(&self) {
        if !self.closed.get() {
            return;
        }
        let (tx, rx) = oneshot::channel();
        self.waiting.borrow_mut().push_back(tx);
        let _ = rx.await;
    }
}

// ── Catalog ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeCatalog {
    products: RefCell<Vec<Product>>,
    /// Page size the server insists on; 0 honors the request.
    pub server_page_size: Cell<u32>,
    pub list_gate: Gate,
    pub detail_gate: Gate,
    list_calls: RefCell<Vec<(u32, u32, Params)>>,
    get_calls: RefCell<Vec<String>>,
    failing_pages: RefCell<HashSet<u32>>,
}

impl FakeCatalog {
    pub fn with_products(count: usize) -> Rc<Self> {
        let catalog = Self::default();
        *catalog.products.borrow_mut() = (0..count).map(product).collect();
        Rc::new(catalog)
    }

    pub fn fail_page(&self, page: u32) {
        self.failing_pages.borrow_mut().insert(page);
    }

    pub fn list_calls(&self) -> Vec<(u32, u32, Params)> {
        self.list_calls.borrow().clone()
    }

    pub fn pages_requested(&self) -> Vec<u32> {
        self.list_calls.borrow().iter().map(|(p, _, _)| *p).collect()
    }

    pub fn get_calls(&self) -> Vec<String> {
        self.get_calls.borrow().clone()
    }

    fn matching(&self, filters: &Params) -> Vec<Product> {
        let products = self.products.borrow();
        match filters.get("q") {
            Some(q) => products.iter().filter(|p| p.name.contains(q.as_str())).cloned().collect(),
            None => products.clone(),
        }
    }
}

#[async_trait(?Send)]
impl CatalogClient for FakeCatalog {
    async fn list(&self, page: u32, page_size: u32, filters: &Params) -> EngineResult<ProductPage> {
        self.list_calls
            .borrow_mut()
            .push((page, page_size, filters.clone()));
        self.list_gate.pass().await;
        if self.failing_pages.borrow().contains(&page) {
            return Err(EngineError::network(format!("page {page} unavailable")));
        }

        let page_size = match self.server_page_size.get() {
            0 => page_size,
            forced => forced,
        };
        let all = self.matching(filters);
        let total_items = all.len() as u32;
        let total_pages = total_items.div_ceil(page_size);
        let start = ((page.max(1) - 1) * page_size) as usize;
        let items = all
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect();
        Ok(ProductPage {
            items,
            page,
            page_size,
            total_items,
            total_pages,
        })
    }

    async fn get(&self, id_or_slug: &str) -> EngineResult<Product> {
        self.get_calls.borrow_mut().push(id_or_slug.to_string());
        self.detail_gate.pass().await;
        let found = self
            .products
            .borrow()
            .iter()
            .find(|p| p.id == id_or_slug || p.slug == id_or_slug)
            .cloned();
        match found {
            Some(mut product) => {
                product.description = Some(format!("All about {}", product.name));
                Ok(product)
            }
            None => Err(EngineError::network(format!("{id_or_slug} not found"))),
        }
    }
}

// ── Cart server ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartCall {
    Fetch,
    Add {
        product_id: String,
        variant_id: Option<String>,
        quantity: u32,
    },
    Update {
        item_id: String,
        quantity: u32,
    },
    Remove {
        item_id: String,
    },
}

#[derive(Default)]
pub struct FakeCartServer {
    cart: RefCell<Cart>,
    prices: RefCell<HashMap<String, i64>>,
    failing: Cell<bool>,
    next_line: Cell<u32>,
    pub gate: Gate,
    calls: RefCell<Vec<CartCall>>,
}

impl FakeCartServer {
    pub fn new(cart: Cart) -> Rc<Self> {
        let server = Self::default();
        *server.cart.borrow_mut() = cart;
        server.next_line.set(100);
        Rc::new(server)
    }

    pub fn with_price(&self, product_id: &str, price: i64) {
        self.prices
            .borrow_mut()
            .insert(product_id.to_string(), price);
    }

    /// Every following call fails with a network error.
    pub fn fail(&self, failing: bool) {
        self.failing.set(failing);
    }

    pub fn calls(&self) -> Vec<CartCall> {
        self.calls.borrow().clone()
    }

    pub fn server_cart(&self) -> Cart {
        self.cart.borrow().clone()
    }

    async fn respond(&self, call: CartCall) -> EngineResult<Cart> {
        self.calls.borrow_mut().push(call.clone());
        self.gate.pass().await;
        if self.failing.get() {
            return Err(EngineError::network("cart service unavailable"));
        }

        let mut cart = self.cart.borrow_mut();
        match call {
            CartCall::Fetch => {}
            CartCall::Add {
                product_id,
                variant_id,
                quantity,
            } => {
                let existing = cart
                    .line_for(&product_id, variant_id.as_deref())
                    .map(|l| (l.id.clone(), l.quantity));
                match existing {
                    Some((id, current)) => {
                        cart.set_quantity(&id, current + quantity);
                    }
                    None => {
                        let n = self.next_line.get();
                        self.next_line.set(n + 1);
                        let price = self.prices.borrow().get(&product_id).copied().unwrap_or(1000);
                        let mut item = line(&format!("line-{n}"), &product_id, quantity, price);
                        item.variant_id = variant_id;
                        cart.items.push(item);
                        cart.recompute_totals();
                    }
                }
            }
            CartCall::Update { item_id, quantity } => {
                if !cart.set_quantity(&item_id, quantity) {
                    return Err(EngineError::unknown_item(item_id));
                }
            }
            CartCall::Remove { item_id } => {
                if cart.remove(&item_id).is_none() {
                    return Err(EngineError::unknown_item(item_id));
                }
            }
        }
        Ok(cart.clone())
    }
}

#[async_trait(?Send)]
impl CartClient for FakeCartServer {
    async fn fetch(&self) -> EngineResult<Cart> {
        self.respond(CartCall::Fetch).await
    }

    async fn add_item(&self, product_id: &str, variant_id: Option<&str>, quantity: u32) -> EngineResult<Cart> {
        self.respond(CartCall::Add {
            product_id: product_id.to_string(),
            variant_id: variant_id.map(str::to_string),
            quantity,
        })
        .await
    }

    async fn update_item(&self, item_id: &str, quantity: u32) -> EngineResult<Cart> {
        self.respond(CartCall::Update {
            item_id: item_id.to_string(),
            quantity,
        })
        .await
    }

    async fn remove_item(&self, item_id: &str) -> EngineResult<Cart> {
        self.respond(CartCall::Remove {
            item_id: item_id.to_string(),
        })
        .await
    }
}

// ── Harness helpers ────────────────────────────────────────────────────────

/// Run `future` on the scheduler's pool and capture its output.
pub fn spawn_result<T, F>(scheduler: &FrameScheduler, future: F) -> Rc<RefCell<Option<T>>>
where
    T: 'static,
    F: Future<Output = T> + 'static,
{
    let slot = Rc::new(RefCell::new(None));
    let sink = slot.clone();
    scheduler.spawn(
        async move {
            let value = future.await;
            *sink.borrow_mut() = Some(value);
        }
        .boxed_local(),
    );
    slot
}

/// Record every event on the bus.
pub fn record_events(bus: &EventBus) -> Rc<RefCell<Vec<StoreEvent>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    bus.subscribe(move |event| sink.borrow_mut().push(event.clone()));
    log
}

pub fn channels(log: &Rc<RefCell<Vec<StoreEvent>>>) -> Vec<&'static str> {
    log.borrow().iter().map(StoreEvent::channel).collect()
}
