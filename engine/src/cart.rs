// ============================================================================
// CART MUTATION ENGINE — optimistic edits with debounced commits and rollback
// ============================================================================
//
// THE PATTERN:
//   Every edit lands in the local cart immediately (quantity, subtotal and
//   totals recomputed, data_version bumped, cart:updated emitted) and the
//   network catches up afterwards.
//
//   Per line:  Idle → Optimistic → Committing → Idle
//                          └──────────┴──→ RolledBack → Idle
//
// QUANTITY EDITS:
//   The first edit of a chain snapshots the whole cart. Each further edit
//   restarts the debounce timer, so a burst of clicks becomes one
//   update_item() call with the final quantity. Success adopts the server
//   cart. Failure restores the snapshot verbatim and emits cart:error.
//   At most one update_item() per line is in flight. A newer edit whose
//   timer fires meanwhile is queued; when the call resolves successfully
//   the server cart becomes the chain's baseline and the queued quantity is
//   committed at once. A failed call rolls the whole chain back and drops
//   the queued quantity, which the server never saw.
//
// REMOVAL:
//   The line is first marked "removing" (the render layer fades it out),
//   then spliced after removal_transition_ms and deleted on the server.
//   The panel's open flag is captured at the start and re-asserted after the
//   splice and after the network result, unless the user asked for a
//   different panel state in the meantime.
//
// ADDITION:
//   A new product/variant gets a synthetic `optimistic-<n>` line until the
//   server assigns a real one. An existing line is bumped in place.
//
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use storefront_shared::{validation, Cart, CartItem, Product, StockInfo};

use crate::clients::CartClient;
use crate::config::StorefrontConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{EventBus, StoreEvent};
use crate::scheduler::{CancelToken, Scheduler};

const SYNTHETIC_PREFIX: &str = "optimistic-";

/// Payload of a `cart:add-item` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCartItem {
    pub product: Product,
    #[serde(default)]
    pub variant_id: Option<String>,
    pub quantity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Idle,
    /// Edited locally, debounce timer running.
    Optimistic,
    /// update_item() in flight.
    Committing,
    /// Fading out before the splice, or delete in flight.
    Removing,
}

// ── Cart panel ─────────────────────────────────────────────────────────────

/// Open/closed state of the slide-in cart panel.
///
/// `request` is a user action and advances the generation; `force` is the
/// engine re-asserting a state and does not.
#[derive(Debug, Default)]
pub struct CartPanel {
    open: Cell<bool>,
    generation: Cell<u64>,
}

impl CartPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.get()
    }

    pub fn request(&self, open: bool) {
        self.generation.set(self.generation.get() + 1);
        self.open.set(open);
    }

    /// Returns the new state.
    pub fn toggle(&self) -> bool {
        let open = !self.is_open();
        self.request(open);
        open
    }

    pub fn force(&self, open: bool) {
        self.open.set(open);
    }

    pub fn guard(&self) -> PanelGuard {
        PanelGuard {
            was_open: self.is_open(),
            generation: self.generation.get(),
        }
    }
}

/// Panel state captured at the start of a long-running cart operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelGuard {
    was_open: bool,
    generation: u64,
}

impl PanelGuard {
    pub fn was_open(&self) -> bool {
        self.was_open
    }

    /// Put the panel back into the captured state unless the user has made a
    /// newer request. Returns true if the panel was changed.
    pub fn restore(&self, panel: &CartPanel) -> bool {
        if panel.generation.get() != self.generation || panel.is_open() == self.was_open {
            return false;
        }
        panel.force(self.was_open);
        true
    }
}

// ── Internal bookkeeping ───────────────────────────────────────────────────

struct PendingMutation {
    target_quantity: u32,
    timer: Option<CancelToken>,
    /// Cart before the chain started.
    snapshot: Cart,
    phase: MutationPhase,
    generation: u64,
    in_flight: bool,
    /// A debounce timer fired while a call was in flight.
    queued: bool,
}

struct Removal {
    snapshot: Cart,
    guard: PanelGuard,
    timer: CancelToken,
}

struct PendingAdd {
    line_id: String,
    synthetic: bool,
    added: u32,
}

struct CartInner {
    client: Rc<dyn CartClient>,
    scheduler: Rc<dyn Scheduler>,
    bus: EventBus,
    panel: Rc<CartPanel>,
    debounce_ms: u64,
    removal_ms: u64,
    max_line_quantity: u32,

    cart: RefCell<Cart>,
    pending: RefCell<HashMap<String, PendingMutation>>,
    removals: RefCell<HashMap<String, Removal>>,
    /// Lines spliced locally whose delete is not confirmed yet.
    deleted: RefCell<HashSet<String>>,
    adds: RefCell<HashMap<u64, PendingAdd>>,
    next_add: Cell<u64>,
    loaded: Cell<bool>,
    data_version: Cell<u32>,
}

// ── CartMutationEngine ─────────────────────────────────────────────────────

/// Clones share state.
#[derive(Clone)]
pub struct CartMutationEngine {
    inner: Rc<CartInner>,
}

impl CartMutationEngine {
    pub fn new(
        client: Rc<dyn CartClient>,
        scheduler: Rc<dyn Scheduler>,
        bus: EventBus,
        panel: Rc<CartPanel>,
        config: &StorefrontConfig,
    ) -> Self {
        Self {
            inner: Rc::new(CartInner {
                client,
                scheduler,
                bus,
                panel,
                debounce_ms: config.quantity_debounce_ms,
                removal_ms: config.removal_transition_ms,
                max_line_quantity: config.max_line_quantity,
                cart: RefCell::new(Cart::default()),
                pending: RefCell::new(HashMap::new()),
                removals: RefCell::new(HashMap::new()),
                deleted: RefCell::new(HashSet::new()),
                adds: RefCell::new(HashMap::new()),
                next_add: Cell::new(1),
                loaded: Cell::new(false),
                data_version: Cell::new(0),
            }),
        }
    }

    // ── Version tracking ───────────────────────────────────────────────

    pub fn data_version(&self) -> u32 {
        self.inner.data_version.get()
    }

    // ── Getters ────────────────────────────────────────────────────────

    /// Copy of the cart as currently shown.
    pub fn cart(&self) -> Cart {
        self.inner.cart.borrow().clone()
    }

    pub fn item(&self, item_id: &str) -> Option<CartItem> {
        self.inner.cart.borrow().item(item_id).cloned()
    }

    pub fn item_count(&self) -> u32 {
        self.inner.cart.borrow().item_count()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.loaded.get()
    }

    pub fn panel(&self) -> &Rc<CartPanel> {
        &self.inner.panel
    }

    pub fn phase(&self, item_id: &str) -> MutationPhase {
        if self.inner.removals.borrow().contains_key(item_id)
            || self.inner.deleted.borrow().contains(item_id)
        {
            return MutationPhase::Removing;
        }
        self.inner
            .pending
            .borrow()
            .get(item_id)
            .map_or(MutationPhase::Idle, |p| p.phase)
    }

    pub fn is_removing(&self, item_id: &str) -> bool {
        self.phase(item_id) == MutationPhase::Removing
    }

    /// True while any edit, removal or addition awaits the server.
    pub fn has_pending(&self) -> bool {
        !self.inner.pending.borrow().is_empty()
            || !self.inner.removals.borrow().is_empty()
            || !self.inner.adds.borrow().is_empty()
    }

    // ── Loading ────────────────────────────────────────────────────────

    /// Fetch the cart from the server and announce it with `cart:loaded`.
    pub fn load(&self) -> LocalBoxFuture<'static, EngineResult<()>> {
        let inner = self.inner.clone();
        async move {
            match inner.client.fetch().await {
                Ok(cart) => {
                    inner.adopt(cart);
                    inner.loaded.set(true);
                    inner.bump_version();
                    tracing::debug!(items = inner.cart.borrow().items.len(), "cart loaded");
                    inner.bus.emit(StoreEvent::CartLoaded);
                    Ok(())
                }
                Err(err) => {
                    tracing::warn!(%err, "cart load failed");
                    inner.bus.emit(StoreEvent::CartError {
                        message: err.user_message(),
                    });
                    Err(err)
                }
            }
        }
        .boxed_local()
    }

    // ── Quantity edits ─────────────────────────────────────────────────

    /// Set a line's quantity optimistically. Zero removes the line.
    pub fn set_quantity(&self, item_id: &str, quantity: u32) -> EngineResult<()> {
        if quantity == 0 {
            return self.remove_item(item_id);
        }
        self.inner.edit_quantity(item_id, quantity)
    }

    pub fn increment(&self, item_id: &str) -> EngineResult<()> {
        let current = self.current_quantity(item_id)?;
        self.inner.edit_quantity(item_id, current.saturating_add(1))
    }

    /// Never goes below one; removal is an explicit action.
    pub fn decrement(&self, item_id: &str) -> EngineResult<()> {
        let current = self.current_quantity(item_id)?;
        self.inner.edit_quantity(item_id, current.saturating_sub(1).max(1))
    }

    fn current_quantity(&self, item_id: &str) -> EngineResult<u32> {
        self.inner
            .cart
            .borrow()
            .item(item_id)
            .map(|i| i.quantity)
            .ok_or_else(|| EngineError::unknown_item(item_id))
    }

    // ── Removal ────────────────────────────────────────────────────────

    /// Mark a line as removing; the splice and the delete call follow after
    /// the removal transition. Removing a line twice is a no-op.
    pub fn remove_item(&self, item_id: &str) -> EngineResult<()> {
        self.inner.start_removal(item_id)
    }

    // ── Addition ───────────────────────────────────────────────────────

    /// Add a product optimistically. Returns the id of the line that now
    /// holds it (synthetic for a new product/variant).
    pub fn add_item(&self, item: NewCartItem, stock: Option<StockInfo>) -> EngineResult<String> {
        self.inner.add(item, stock)
    }
}

impl CartInner {
    fn bump_version(&self) {
        self.data_version.set(self.data_version.get().wrapping_add(1));
    }

    fn announce(&self) {
        self.bump_version();
        self.bus.emit(StoreEvent::CartUpdated);
    }

    fn fail(&self, err: &EngineError) {
        self.bump_version();
        self.bus.emit(StoreEvent::CartError {
            message: err.user_message(),
        });
        self.bus.emit(StoreEvent::CartUpdated);
    }

    fn line_limit(&self, max_quantity: Option<u32>) -> u32 {
        max_quantity.map_or(self.max_line_quantity, |m| m.min(self.max_line_quantity))
    }

    /// Replace the local cart with a server response, keeping local intent
    /// that the server has not seen yet: quantities of open edit chains,
    /// lines spliced but not yet deleted, synthetic lines of pending adds.
    fn adopt(&self, mut server: Cart) {
        {
            let deleted = self.deleted.borrow();
            server.items.retain(|i| !deleted.contains(&i.id));
        }
        {
            let pending = self.pending.borrow();
            for (item_id, mutation) in pending.iter() {
                if let Some(item) = server.item_mut(item_id) {
                    item.set_quantity(mutation.target_quantity);
                }
            }
        }
        {
            let adds = self.adds.borrow();
            let local = self.cart.borrow();
            for add in adds.values().filter(|a| a.synthetic) {
                let Some(line) = local.item(&add.line_id) else {
                    continue;
                };
                if server
                    .line_for(&line.product_id, line.variant_id.as_deref())
                    .is_none()
                {
                    server.items.push(line.clone());
                }
            }
        }
        server.recompute_totals();
        *self.cart.borrow_mut() = server;
    }

    fn edit_quantity(self: &Rc<Self>, item_id: &str, requested: u32) -> EngineResult<()> {
        if self.removals.borrow().contains_key(item_id) {
            return Err(EngineError::invalid("itemId", "line is being removed"));
        }
        if item_id.starts_with(SYNTHETIC_PREFIX) {
            return Err(EngineError::invalid("itemId", "line is not saved yet"));
        }
        let (current, max_quantity) = {
            let cart = self.cart.borrow();
            let item = cart
                .item(item_id)
                .ok_or_else(|| EngineError::unknown_item(item_id))?;
            (item.quantity, item.max_quantity)
        };
        let quantity = validation::quantity(requested, self.line_limit(max_quantity))
            .map_err(|message| EngineError::invalid("quantity", message))?;
        if quantity == current {
            return Ok(());
        }

        let snapshot = if self.pending.borrow().contains_key(item_id) {
            None
        } else {
            Some(self.cart.borrow().clone())
        };
        self.cart.borrow_mut().set_quantity(item_id, quantity);

        let generation = {
            let mut pending = self.pending.borrow_mut();
            let entry = match snapshot {
                Some(snapshot) => pending.entry(item_id.to_string()).or_insert(PendingMutation {
                    target_quantity: quantity,
                    timer: None,
                    snapshot,
                    phase: MutationPhase::Optimistic,
                    generation: 0,
                    in_flight: false,
                    queued: false,
                }),
                None => match pending.get_mut(item_id) {
                    Some(entry) => entry,
                    None => return Err(EngineError::unknown_item(item_id)),
                },
            };
            if let Some(timer) = entry.timer.take() {
                timer.cancel();
            }
            entry.target_quantity = quantity;
            entry.phase = MutationPhase::Optimistic;
            entry.generation += 1;
            entry.generation
        };

        let weak = Rc::downgrade(self);
        let id = item_id.to_string();
        let timer = self.scheduler.after(
            self.debounce_ms,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.commit(id);
                }
            }),
        );
        if let Some(entry) = self.pending.borrow_mut().get_mut(item_id) {
            entry.timer = Some(timer);
        }

        tracing::trace!(item_id, quantity, generation, "quantity edited");
        self.announce();
        Ok(())
    }

    fn commit(self: &Rc<Self>, item_id: String) {
        let (quantity, generation) = {
            let mut pending = self.pending.borrow_mut();
            let Some(entry) = pending.get_mut(&item_id) else {
                return;
            };
            entry.timer = None;
            if entry.in_flight {
                tracing::trace!(%item_id, "commit queued behind the call in flight");
                entry.queued = true;
                return;
            }
            entry.in_flight = true;
            entry.queued = false;
            entry.phase = MutationPhase::Committing;
            (entry.target_quantity, entry.generation)
        };
        tracing::debug!(%item_id, quantity, "committing quantity");

        let client = self.client.clone();
        let weak = Rc::downgrade(self);
        self.scheduler.spawn(
            async move {
                let result = client.update_item(&item_id, quantity).await;
                if let Some(inner) = weak.upgrade() {
                    inner.finish_commit(&item_id, generation, result);
                }
            }
            .boxed_local(),
        );
    }

    fn finish_commit(self: &Rc<Self>, item_id: &str, generation: u64, result: EngineResult<Cart>) {
        let latest = self.pending.borrow().get(item_id).map(|p| p.generation);
        let Some(latest) = latest else {
            // The chain was taken over by a removal; a confirmed cart is
            // still the server's truth.
            match result {
                Ok(server) => {
                    tracing::debug!(item_id, "commit confirmed after its chain ended");
                    self.adopt(server);
                    self.announce();
                }
                Err(err) => tracing::debug!(item_id, %err, "commit failed after its chain ended"),
            }
            return;
        };

        match result {
            Ok(server) => {
                let recommit = {
                    let mut pending = self.pending.borrow_mut();
                    if latest == generation {
                        pending.remove(item_id);
                        false
                    } else {
                        match pending.get_mut(item_id) {
                            Some(entry) => {
                                tracing::debug!(item_id, "newer edit pending, rebasing on server cart");
                                entry.snapshot = server.clone();
                                entry.in_flight = false;
                                std::mem::take(&mut entry.queued)
                            }
                            None => false,
                        }
                    }
                };
                self.adopt(server);
                self.announce();
                if recommit {
                    self.commit(item_id.to_string());
                }
            }
            Err(err) => {
                let Some(entry) = self.pending.borrow_mut().remove(item_id) else {
                    return;
                };
                if let Some(timer) = entry.timer {
                    timer.cancel();
                }
                tracing::warn!(item_id, %err, "quantity update failed, rolling back");
                *self.cart.borrow_mut() = entry.snapshot;
                self.fail(&err);
            }
        }
    }

    fn start_removal(self: &Rc<Self>, item_id: &str) -> EngineResult<()> {
        if self.removals.borrow().contains_key(item_id) {
            return Ok(());
        }
        if item_id.starts_with(SYNTHETIC_PREFIX) {
            return Err(EngineError::invalid("itemId", "line is not saved yet"));
        }
        if self.cart.borrow().item(item_id).is_none() {
            return Err(EngineError::unknown_item(item_id));
        }

        let snapshot = match self.pending.borrow_mut().remove(item_id) {
            Some(chain) => {
                if let Some(timer) = chain.timer {
                    timer.cancel();
                }
                tracing::debug!(item_id, "removal supersedes quantity edit");
                chain.snapshot
            }
            None => self.cart.borrow().clone(),
        };
        let guard = self.panel.guard();

        let weak = Rc::downgrade(self);
        let id = item_id.to_string();
        let timer = self.scheduler.after(
            self.removal_ms,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.splice(id);
                }
            }),
        );
        self.removals.borrow_mut().insert(
            item_id.to_string(),
            Removal {
                snapshot,
                guard,
                timer,
            },
        );
        tracing::debug!(item_id, "removal started");
        self.announce();
        Ok(())
    }

    fn splice(self: &Rc<Self>, item_id: String) {
        let Some(guard) = self.removals.borrow().get(&item_id).map(|r| r.guard) else {
            return;
        };
        if self.cart.borrow_mut().remove(&item_id).is_none() {
            // A server cart adopted in the meantime no longer has the line.
            self.removals.borrow_mut().remove(&item_id);
            self.announce();
            return;
        }
        self.deleted.borrow_mut().insert(item_id.clone());
        guard.restore(&self.panel);
        self.announce();

        let client = self.client.clone();
        let weak: Weak<CartInner> = Rc::downgrade(self);
        self.scheduler.spawn(
            async move {
                let result = client.remove_item(&item_id).await;
                if let Some(inner) = weak.upgrade() {
                    inner.finish_removal(&item_id, result);
                }
            }
            .boxed_local(),
        );
    }

    fn finish_removal(&self, item_id: &str, result: EngineResult<Cart>) {
        let Some(removal) = self.removals.borrow_mut().remove(item_id) else {
            return;
        };
        removal.timer.cancel();
        self.deleted.borrow_mut().remove(item_id);

        match result {
            Ok(server) => {
                self.adopt(server);
                removal.guard.restore(&self.panel);
                self.announce();
            }
            Err(err) => {
                tracing::warn!(item_id, %err, "removal failed, restoring line");
                *self.cart.borrow_mut() = removal.snapshot;
                removal.guard.restore(&self.panel);
                self.fail(&err);
            }
        }
    }

    fn add(self: &Rc<Self>, item: NewCartItem, stock: Option<StockInfo>) -> EngineResult<String> {
        let NewCartItem {
            product,
            variant_id,
            quantity,
        } = item;
        validation::slug(&product.slug).map_err(|message| EngineError::invalid("slug", message))?;
        // An explicit stock hint wins over the variant's own stock count.
        let available = stock.and_then(|s| s.available).or_else(|| {
            variant_id
                .as_deref()
                .and_then(|v| product.variant(v))
                .and_then(|v| v.stock)
        });

        let existing = self
            .cart
            .borrow()
            .line_for(&product.id, variant_id.as_deref())
            .map(|line| (line.id.clone(), line.quantity, line.max_quantity));

        let (line_id, synthetic, added) = match existing {
            Some((line_id, current, max_quantity)) => {
                let limit = self.line_limit(max_quantity.or(available));
                if current >= limit {
                    return Err(EngineError::invalid("quantity", "no more units available"));
                }
                let target = validation::quantity(current.saturating_add(quantity), limit)
                    .map_err(|message| EngineError::invalid("quantity", message))?;
                self.cart.borrow_mut().set_quantity(&line_id, target);
                (line_id, false, target - current)
            }
            None => {
                let quantity = validation::quantity(quantity, self.line_limit(available))
                    .map_err(|message| EngineError::invalid("quantity", message))?;
                let add_id = self.next_add.get();
                let line_id = format!("{SYNTHETIC_PREFIX}{add_id}");
                let name = match variant_id.as_deref().and_then(|v| product.variant(v)) {
                    Some(variant) => format!("{} ({})", product.name, variant.name),
                    None => product.name.clone(),
                };
                let unit_price = product.unit_price(variant_id.as_deref());
                let mut line = CartItem {
                    id: line_id.clone(),
                    product_id: product.id.clone(),
                    variant_id: variant_id.clone(),
                    name,
                    quantity: 0,
                    unit_price,
                    subtotal: 0,
                    max_quantity: available,
                };
                line.set_quantity(quantity);
                let mut cart = self.cart.borrow_mut();
                cart.items.push(line);
                cart.recompute_totals();
                (line_id, true, quantity)
            }
        };

        let add_id = self.next_add.get();
        self.next_add.set(add_id + 1);
        self.adds.borrow_mut().insert(
            add_id,
            PendingAdd {
                line_id: line_id.clone(),
                synthetic,
                added,
            },
        );
        tracing::debug!(product = %product.id, %line_id, added, "adding to cart");
        self.announce();

        let client = self.client.clone();
        let weak = Rc::downgrade(self);
        self.scheduler.spawn(
            async move {
                let result = client
                    .add_item(&product.id, variant_id.as_deref(), added)
                    .await;
                if let Some(inner) = weak.upgrade() {
                    inner.finish_add(add_id, product, result);
                }
            }
            .boxed_local(),
        );
        Ok(line_id)
    }

    fn finish_add(&self, add_id: u64, product: Product, result: EngineResult<Cart>) {
        let Some(add) = self.adds.borrow_mut().remove(&add_id) else {
            return;
        };
        match result {
            Ok(server) => {
                self.adopt(server);
                self.bump_version();
                self.bus.emit(StoreEvent::ProductAdded { product });
                self.bus.emit(StoreEvent::CartUpdated);
            }
            Err(err) => {
                tracing::warn!(product = %product.id, %err, "add to cart failed, reverting");
                {
                    let mut cart = self.cart.borrow_mut();
                    let remaining = cart
                        .item(&add.line_id)
                        .map(|line| line.quantity.saturating_sub(add.added));
                    match remaining {
                        Some(0) => {
                            cart.remove(&add.line_id);
                        }
                        Some(quantity) => {
                            cart.set_quantity(&add.line_id, quantity);
                        }
                        None => {}
                    }
                }
                self.fail(&err);
            }
        }
    }
}

impl std::fmt::Debug for CartMutationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartMutationEngine")
            .field("items", &self.inner.cart.borrow().items.len())
            .field("pending", &self.inner.pending.borrow().len())
            .field("removals", &self.inner.removals.borrow().len())
            .field("adds", &self.inner.adds.borrow().len())
            .finish()
    }
}
