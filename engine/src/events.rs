// ============================================================================
// EVENT BUS — typed publish/subscribe between the core and its collaborators
// ============================================================================
//
// One StoreEvent variant per channel. The DOM glue maps channel() names onto
// window CustomEvents; inside the core everything stays typed.
//
// Delivery is synchronous: emit() returns only after every listener that was
// subscribed at the time of the call has run, so a listener never observes a
// state older than the mutation that triggered it. Listeners may emit or
// (un)subscribe re-entrantly; the listener list is snapshotted per emit.
//
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::Serialize;
use storefront_shared::{Product, StockInfo};

use crate::cart::NewCartItem;
use crate::coordinator::InstanceId;
use crate::hash_codec::HashState;

/// What a `product:open` request points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProductTarget {
    Id(String),
    Slug(String),
    /// The first product of the current page.
    OpenFirst,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "channel", content = "detail")]
pub enum StoreEvent {
    /// Inbound request from the UI to add a line optimistically.
    #[serde(rename = "cart:add-item")]
    CartAddItem {
        item: NewCartItem,
        #[serde(rename = "stockInfo")]
        stock_info: Option<StockInfo>,
    },
    #[serde(rename = "cart:updated")]
    CartUpdated,
    #[serde(rename = "cart:loaded")]
    CartLoaded,
    #[serde(rename = "cart:error")]
    CartError { message: String },
    #[serde(rename = "product:added")]
    ProductAdded { product: Product },
    #[serde(rename = "open-cart")]
    OpenCart,
    #[serde(rename = "close-cart")]
    CloseCart,
    #[serde(rename = "toggle-cart")]
    ToggleCart,
    #[serde(rename = "product:open")]
    ProductOpen(ProductTarget),
    #[serde(rename = "product:close")]
    ProductClose,
    #[serde(rename = "state-change")]
    StateChange(HashState),
    /// A secondary catalog instance wants a product shown. Carries the
    /// neighbors so an ancestor can offer prev/next without router access.
    #[serde(rename = "catalog:product-select")]
    ProductSelected {
        instance: InstanceId,
        index: usize,
        product: Product,
        previous: Option<Product>,
        next: Option<Product>,
    },
}

impl StoreEvent {
    /// Wire name of the channel this event travels on.
    pub fn channel(&self) -> &'static str {
        match self {
            StoreEvent::CartAddItem { .. } => "cart:add-item",
            StoreEvent::CartUpdated => "cart:updated",
            StoreEvent::CartLoaded => "cart:loaded",
            StoreEvent::CartError { .. } => "cart:error",
            StoreEvent::ProductAdded { .. } => "product:added",
            StoreEvent::OpenCart => "open-cart",
            StoreEvent::CloseCart => "close-cart",
            StoreEvent::ToggleCart => "toggle-cart",
            StoreEvent::ProductOpen(_) => "product:open",
            StoreEvent::ProductClose => "product:close",
            StoreEvent::StateChange(_) => "state-change",
            StoreEvent::ProductSelected { .. } => "catalog:product-select",
        }
    }

    /// True for events the core publishes, false for the requests it
    /// receives from the UI.
    pub fn is_outbound(&self) -> bool {
        !matches!(
            self,
            StoreEvent::CartAddItem { .. }
                | StoreEvent::OpenCart
                | StoreEvent::CloseCart
                | StoreEvent::ToggleCart
                | StoreEvent::ProductOpen(_)
                | StoreEvent::ProductClose
        )
    }
}

// ── EventBus ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Rc<dyn Fn(&StoreEvent)>;

#[derive(Default)]
struct BusInner {
    listeners: RefCell<Vec<(SubscriptionId, Listener)>>,
    next_id: Cell<u64>,
}

/// Cheap to clone; all clones share the same listener list.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Rc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&StoreEvent) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);
        self.inner
            .listeners
            .borrow_mut()
            .push((id, Rc::new(listener)));
        id
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.inner.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    pub fn emit(&self, event: StoreEvent) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        tracing::trace!(channel = event.channel(), listeners = listeners.len(), "emit");
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
