//! Composition root.
//!
//! Builds the bus, router, coordinator and cart engine for one page and wires
//! the inbound channels to them:
//!
//! | Channel | Handled by |
//! |---|---|
//! | `open-cart` / `close-cart` / `toggle-cart` | panel request + router |
//! | `state-change` (cart flag) | panel |
//! | `product:open` / `product:close` | primary catalog instance |
//! | `cart:add-item` | cart engine |
//!
//! Everything else on the bus is outbound and left to the host.

use std::rc::{Rc, Weak};

use futures::future::LocalBoxFuture;
use futures::FutureExt;

use crate::cart::{CartMutationEngine, CartPanel};
use crate::clients::{CartClient, CatalogClient};
use crate::config::StorefrontConfig;
use crate::coordinator::{CatalogInstance, InstanceCoordinator, Routable};
use crate::error::EngineResult;
use crate::events::{EventBus, StoreEvent, SubscriptionId};
use crate::hash_codec::{HashCodec, ReservedRoutes};
use crate::page_store::VirtualPageStore;
use crate::router::{HashRouter, Location};
use crate::scheduler::Scheduler;

struct Wiring {
    config: StorefrontConfig,
    bus: EventBus,
    router: Rc<HashRouter>,
    coordinator: InstanceCoordinator,
    cart: CartMutationEngine,
    panel: Rc<CartPanel>,
    catalog: Rc<dyn CatalogClient>,
    scheduler: Rc<dyn Scheduler>,
}

pub struct Storefront {
    wiring: Rc<Wiring>,
    subscription: SubscriptionId,
}

impl Storefront {
    pub fn new(
        config: StorefrontConfig,
        location: Rc<dyn Location>,
        catalog: Rc<dyn CatalogClient>,
        cart_client: Rc<dyn CartClient>,
        scheduler: Rc<dyn Scheduler>,
    ) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self::assemble(config, location, catalog, cart_client, scheduler))
    }

    /// Wire an already validated configuration.
    pub(crate) fn assemble(
        config: StorefrontConfig,
        location: Rc<dyn Location>,
        catalog: Rc<dyn CatalogClient>,
        cart_client: Rc<dyn CartClient>,
        scheduler: Rc<dyn Scheduler>,
    ) -> Self {
        let bus = EventBus::new();
        let codec = HashCodec::new(ReservedRoutes::new(&config.reserved_routes));
        let router = Rc::new(HashRouter::new(location, codec, bus.clone()));

        let panel = Rc::new(CartPanel::new());
        panel.force(router.state().cart_open);

        let cart = CartMutationEngine::new(
            cart_client,
            scheduler.clone(),
            bus.clone(),
            panel.clone(),
            &config,
        );
        let coordinator = InstanceCoordinator::new(router.clone(), bus.clone(), scheduler.clone());

        let wiring = Rc::new(Wiring {
            config,
            bus: bus.clone(),
            router,
            coordinator,
            cart,
            panel,
            catalog,
            scheduler,
        });

        let weak: Weak<Wiring> = Rc::downgrade(&wiring);
        let subscription = bus.subscribe(move |event| {
            if let Some(wiring) = weak.upgrade() {
                wiring.dispatch(event);
            }
        });
        tracing::debug!("storefront wired");

        Self {
            wiring,
            subscription,
        }
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub fn config(&self) -> &StorefrontConfig {
        &self.wiring.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.wiring.bus
    }

    pub fn router(&self) -> &Rc<HashRouter> {
        &self.wiring.router
    }

    pub fn coordinator(&self) -> &InstanceCoordinator {
        &self.wiring.coordinator
    }

    pub fn cart(&self) -> &CartMutationEngine {
        &self.wiring.cart
    }

    pub fn panel(&self) -> &CartPanel {
        &self.wiring.panel
    }

    // ── Host entry points ──────────────────────────────────────────────

    /// Call on every hashchange / popstate.
    pub fn handle_navigation(&self) -> bool {
        self.wiring.router.handle_navigation()
    }

    /// Deliver an inbound event (a DOM CustomEvent translated by the host).
    pub fn emit(&self, event: StoreEvent) {
        self.wiring.bus.emit(event);
    }

    pub fn load_cart(&self) -> LocalBoxFuture<'static, EngineResult<()>> {
        self.wiring.cart.load()
    }

    /// Mount a catalog widget with its own page store.
    pub fn mount_catalog(&self, routable: Routable, catalog_id: Option<String>) -> CatalogInstance {
        let config = &self.wiring.config;
        let store = VirtualPageStore::new(
            self.wiring.catalog.clone(),
            self.wiring.scheduler.clone(),
            config.page_size,
            config.prefetch_margin,
        );
        self.wiring.coordinator.mount(routable, catalog_id, store)
    }

    pub fn unmount_catalog(&self, instance: &CatalogInstance) {
        self.wiring.coordinator.unmount(instance);
    }
}

impl Drop for Storefront {
    fn drop(&mut self) {
        self.wiring.bus.unsubscribe(self.subscription);
    }
}

impl Wiring {
    fn dispatch(&self, event: &StoreEvent) {
        match event {
            StoreEvent::OpenCart => {
                self.panel.request(true);
                self.router.open_cart();
            }
            StoreEvent::CloseCart => {
                self.panel.request(false);
                self.router.close_cart();
            }
            StoreEvent::ToggleCart => {
                if self.panel.toggle() {
                    self.router.open_cart();
                } else {
                    self.router.close_cart();
                }
            }
            StoreEvent::StateChange(state) => {
                if self.panel.is_open() != state.cart_open {
                    self.panel.request(state.cart_open);
                }
            }
            StoreEvent::ProductOpen(target) => {
                let Some(primary) = self.coordinator.primary() else {
                    tracing::debug!(?target, "product:open without a primary catalog");
                    return;
                };
                let open = primary.open_target(target.clone());
                self.scheduler.spawn(
                    async move {
                        if let Err(err) = open.await {
                            if !err.is_aborted() {
                                tracing::warn!(%err, "product:open failed");
                            }
                        }
                    }
                    .boxed_local(),
                );
            }
            StoreEvent::ProductClose => {
                if let Some(primary) = self.coordinator.primary() {
                    primary.back_to_list();
                }
            }
            StoreEvent::CartAddItem { item, stock_info } => {
                if let Err(err) = self.cart.add_item(item.clone(), *stock_info) {
                    tracing::warn!(product = %item.product.id, %err, "add to cart rejected");
                    self.bus.emit(StoreEvent::CartError {
                        message: err.user_message(),
                    });
                }
            }
            _ => {}
        }
    }
}

impl std::fmt::Debug for Storefront {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storefront")
            .field("router", &self.wiring.router)
            .field("coordinator", &self.wiring.coordinator)
            .field("cart", &self.wiring.cart)
            .finish()
    }
}
