// ============================================================================
// INSTANCE COORDINATOR — several catalog widgets, one URL
// ============================================================================
//
// THE PATTERN:
//   A page may embed any number of catalog widgets. Exactly one of them (the
//   primary) is URL-routed: it subscribes to StateChange, holds the router
//   and turns every navigation into a URL write. All others are secondary:
//   they keep view/page/selection locally and report product selection as a
//   ProductSelected event so an ancestor component can present it.
//
// ELECTION:
//   Decided once at mount. Auto and Always take the primary role when it is
//   free, in mount order; Always additionally warns when it finds the role
//   taken. Never is always secondary. Unmounting the primary frees the role
//   for the next mount; already-mounted instances are not promoted.
//
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use serde::Serialize;
use storefront_shared::{validation, Product};

use crate::error::{EngineError, EngineResult};
use crate::events::{EventBus, ProductTarget, StoreEvent, SubscriptionId};
use crate::hash_codec::{HashState, Params, View};
use crate::page_store::VirtualPageStore;
use crate::router::HashRouter;
use crate::scheduler::Scheduler;

const PAGE_PARAM: &str = "page";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstanceId(u64);

impl InstanceId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "catalog#{}", self.0)
    }
}

/// Whether a widget wants to be driven by the URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Routable {
    #[default]
    Auto,
    Always,
    Never,
}

/// What a catalog instance is showing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "camelCase")]
pub enum InstanceView {
    List { page: u32 },
    /// `index` is None until the product shows up in a loaded page.
    Product { slug: String, index: Option<usize> },
}

// ── CatalogInstance ────────────────────────────────────────────────────────

struct InstanceInner {
    id: InstanceId,
    catalog_id: Option<String>,
    /// Present only on the primary, and only until it is unmounted.
    router: RefCell<Option<Rc<HashRouter>>>,
    store: VirtualPageStore,
    bus: EventBus,
    scheduler: Rc<dyn Scheduler>,
    view: RefCell<InstanceView>,
    /// List page to return to from the product view.
    list_page: Cell<u32>,
    subscription: Cell<Option<SubscriptionId>>,
    last_error: RefCell<Option<EngineError>>,
    data_version: Cell<u32>,
}

/// Handle to one mounted catalog widget. Clones share state.
#[derive(Clone)]
pub struct CatalogInstance {
    inner: Rc<InstanceInner>,
}

impl CatalogInstance {
    pub fn id(&self) -> InstanceId {
        self.inner.id
    }

    pub fn catalog_id(&self) -> Option<&str> {
        self.inner.catalog_id.as_deref()
    }

    pub fn is_primary(&self) -> bool {
        self.inner.router.borrow().is_some()
    }

    pub fn store(&self) -> &VirtualPageStore {
        &self.inner.store
    }

    pub fn view(&self) -> InstanceView {
        self.inner.view.borrow().clone()
    }

    /// Bumped on every view change; the store has its own counter.
    pub fn data_version(&self) -> u32 {
        self.inner.data_version.get()
    }

    /// Last failure other than an aborted request.
    pub fn last_error(&self) -> Option<EngineError> {
        self.inner.last_error.borrow().clone()
    }

    /// Products of the list page being shown (or returned to).
    pub fn current_slice(&self) -> Vec<Option<Product>> {
        let page = match &*self.inner.view.borrow() {
            InstanceView::List { page } => *page,
            InstanceView::Product { .. } => self.inner.list_page.get(),
        };
        self.inner.store.get_slice(page)
    }

    /// The product on display, preferring the full detail record.
    pub fn selected_product(&self) -> Option<Product> {
        match &*self.inner.view.borrow() {
            InstanceView::Product { slug, .. } => self.inner.store.find_by_slug(slug),
            InstanceView::List { .. } => None,
        }
    }

    // ── Navigation ─────────────────────────────────────────────────────

    /// Show a list page. Resolves to the page actually shown, which is the
    /// last page when `page` is past the end.
    pub fn go_to_page(&self, page: u32) -> LocalBoxFuture<'static, EngineResult<u32>> {
        let page = page.max(1);
        match self.inner.router() {
            Some(router) => {
                let mut next = router.state();
                next.view = View::List;
                set_page_param(&mut next.params, page);
                self.inner.route(&router, next);
            }
            None => self.inner.set_view(InstanceView::List { page }),
        }
        self.inner.show_page(page)
    }

    /// Open the product at an absolute index of the store.
    pub fn open_product(&self, index: usize) -> EngineResult<()> {
        let product = self
            .inner
            .store
            .product_at(index)
            .ok_or_else(|| EngineError::invalid("index", format!("no product loaded at {index}")))?;
        self.inner.open(index, product);
        Ok(())
    }

    /// Resolve a `product:open` request.
    pub fn open_target(&self, target: ProductTarget) -> LocalBoxFuture<'static, EngineResult<()>> {
        let instance = self.clone();
        async move {
            match target {
                ProductTarget::OpenFirst => {
                    let page = match instance.view() {
                        InstanceView::List { page } => page,
                        InstanceView::Product { .. } => instance.inner.list_page.get(),
                    };
                    let page = instance.inner.store.load_page(page).await?;
                    let index = instance.inner.store.layout().page_start(page);
                    instance.open_product(index)
                }
                ProductTarget::Slug(slug) => instance.open_slug(slug).await,
                ProductTarget::Id(id) => {
                    let product = match instance.inner.store.find_by_id(&id) {
                        Some(product) => product,
                        None => instance.inner.store.load_detail(&id).await?,
                    };
                    instance.open_slug(product.slug).await
                }
            }
        }
        .boxed_local()
    }

    fn open_slug(&self, slug: String) -> LocalBoxFuture<'static, EngineResult<()>> {
        let instance = self.clone();
        async move {
            if let Some(index) = instance.inner.store.index_of_slug(&slug) {
                return instance.open_product(index);
            }
            match instance.inner.router() {
                Some(router) => {
                    if !instance.inner.route_to_product(&router, &slug) {
                        return Err(EngineError::invalid("slug", "rejected by router"));
                    }
                    Ok(())
                }
                None => {
                    let product = instance.inner.store.load_detail(&slug).await?;
                    instance.show_product(product, None);
                    Ok(())
                }
            }
        }
        .boxed_local()
    }

    pub fn back_to_list(&self) {
        let page = self.inner.list_page.get();
        match self.inner.router() {
            Some(router) => {
                let mut next = router.state();
                next.view = View::List;
                set_page_param(&mut next.params, page);
                self.inner.route(&router, next);
            }
            None => {
                self.inner.set_view(InstanceView::List { page });
            }
        }
    }

    /// Replace the filter set and go back to page 1.
    pub fn set_filters(&self, filters: Params) -> LocalBoxFuture<'static, EngineResult<u32>> {
        match self.inner.router() {
            Some(router) => {
                let mut next = router.state();
                next.view = View::List;
                next.params = filters;
                next.params.remove(PAGE_PARAM);
                self.inner.route(&router, next);
            }
            None => {
                self.inner.store.set_filters(filters);
                self.inner.set_view(InstanceView::List { page: 1 });
            }
        }
        self.inner.show_page(1)
    }

    /// Move to the previous (`-1`) or next (`+1`) product, loading across
    /// page boundaries as needed.
    pub fn step_product(&self, delta: isize) -> LocalBoxFuture<'static, EngineResult<()>> {
        let instance = self.clone();
        async move {
            let index = match instance.view() {
                InstanceView::Product {
                    index: Some(index), ..
                } => index,
                _ => return Err(EngineError::invalid("view", "no product with a known position is open")),
            };
            let target = index
                .checked_add_signed(delta)
                .ok_or_else(|| EngineError::invalid("index", "already at the first product"))?;
            let layout = instance.inner.store.layout();
            if layout.totals_known && target >= layout.total_items as usize {
                return Err(EngineError::invalid("index", "already at the last product"));
            }
            instance.inner.store.ensure_loaded(target).await?;
            instance.open_product(target)
        }
        .boxed_local()
    }

    /// Display a product chosen by an ancestor, without touching the URL or
    /// emitting anything.
    pub fn show_product(&self, product: Product, index: Option<usize>) {
        let slug = product.slug.clone();
        self.inner.store.store_detail(product);
        let index = index.or_else(|| self.inner.store.index_of_slug(&slug));
        self.inner.enter_product(slug, index);
    }
}

impl InstanceInner {
    fn router(&self) -> Option<Rc<HashRouter>> {
        self.router.borrow().clone()
    }

    fn bump_version(&self) {
        self.data_version.set(self.data_version.get().wrapping_add(1));
    }

    fn set_view(&self, view: InstanceView) {
        if let InstanceView::List { page } = &view {
            self.list_page.set(*page);
        }
        *self.view.borrow_mut() = view;
        self.bump_version();
    }

    fn enter_product(&self, slug: String, index: Option<usize>) {
        if let InstanceView::List { page } = &*self.view.borrow() {
            self.list_page.set(*page);
        }
        *self.view.borrow_mut() = InstanceView::Product { slug, index };
        self.bump_version();
    }

    fn record(&self, err: EngineError) {
        if err.is_aborted() {
            return;
        }
        tracing::warn!(instance = %self.id, %err, "catalog load failed");
        *self.last_error.borrow_mut() = Some(err);
        self.bump_version();
    }

    fn open(self: &Rc<Self>, index: usize, product: Product) {
        match self.router() {
            Some(router) => {
                self.route_to_product(&router, &product.slug);
            }
            None => {
                let (previous, next) = self.store.neighbors(index);
                self.enter_product(product.slug.clone(), Some(index));
                self.bus.emit(StoreEvent::ProductSelected {
                    instance: self.id,
                    index,
                    product,
                    previous,
                    next,
                });
            }
        }
    }

    /// Load `page` and adopt the clamped page if the list view still wants
    /// the page that was requested.
    fn show_page(self: &Rc<Self>, page: u32) -> LocalBoxFuture<'static, EngineResult<u32>> {
        let load = self.store.load_page(page);
        let weak = Rc::downgrade(self);
        async move {
            let result = load.await;
            let Some(inner) = weak.upgrade() else {
                return result;
            };
            match &result {
                Ok(actual) if *actual != page => {
                    let still_wanted = *inner.view.borrow() == InstanceView::List { page };
                    if still_wanted {
                        tracing::debug!(instance = %inner.id, page, actual = *actual, "page clamped");
                        inner.set_view(InstanceView::List { page: *actual });
                    }
                }
                Ok(_) => inner.bump_version(),
                Err(err) => inner.record(err.clone()),
            }
            result
        }
        .boxed_local()
    }

    /// Primary only: write `next` to the URL under this instance's catalog id.
    ///
    /// The router emits no StateChange when only the catalog id differs from
    /// the current state, so that write is reconciled here directly.
    fn route(self: &Rc<Self>, router: &HashRouter, mut next: HashState) {
        if self.catalog_id.is_some() {
            next.catalog_id = self.catalog_id.clone();
        }
        let silent = !next.differs_from(&router.state());
        router.navigate_to(&next);
        if silent {
            self.reconcile(&next);
        }
    }

    fn route_to_product(self: &Rc<Self>, router: &HashRouter, slug: &str) -> bool {
        if let Err(message) = validation::slug(slug) {
            tracing::warn!(instance = %self.id, slug, %message, "refusing to open invalid product slug");
            return false;
        }
        let mut next = router.state();
        next.view = View::product(slug);
        self.route(router, next);
        true
    }

    /// Primary only: make the widget match the URL. Returns false if the
    /// state belongs to another catalog.
    fn reconcile(self: &Rc<Self>, state: &HashState) -> bool {
        if let (Some(ours), Some(theirs)) = (&self.catalog_id, &state.catalog_id) {
            if ours != theirs {
                tracing::debug!(instance = %self.id, %theirs, "state for another catalog ignored");
                return false;
            }
        }

        match &state.view {
            View::List => {
                let mut filters = state.params.clone();
                let page = filters
                    .remove(PAGE_PARAM)
                    .and_then(|p| p.parse::<u32>().ok())
                    .unwrap_or(1)
                    .max(1);
                if self.store.set_filters(filters) {
                    tracing::debug!(instance = %self.id, "filters changed");
                }
                self.set_view(InstanceView::List { page });
                self.run(self.show_page(page).map(|_| ()).boxed_local());
            }
            View::Product { slug } => {
                let index = self.store.index_of_slug(slug);
                self.enter_product(slug.clone(), index);
                let detail = self.store.load_detail(slug);
                let prefetch = index.map(|i| self.store.ensure_loaded(i));
                let weak = Rc::downgrade(self);
                self.run(
                    async move {
                        if let Some(prefetch) = prefetch {
                            let _ = prefetch.await;
                        }
                        let result = detail.await;
                        if let Some(inner) = weak.upgrade() {
                            match result {
                                Ok(_) => inner.bump_version(),
                                Err(err) => inner.record(err),
                            }
                        }
                    }
                    .boxed_local(),
                );
            }
        }
        true
    }

    fn run(&self, task: LocalBoxFuture<'static, ()>) {
        self.scheduler.spawn(task);
    }
}

impl std::fmt::Debug for CatalogInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogInstance")
            .field("id", &self.inner.id)
            .field("primary", &self.is_primary())
            .field("view", &*self.inner.view.borrow())
            .finish()
    }
}

fn set_page_param(params: &mut Params, page: u32) {
    if page <= 1 {
        params.remove(PAGE_PARAM);
    } else {
        params.insert(PAGE_PARAM.to_string(), page.to_string());
    }
}

// ── InstanceCoordinator ────────────────────────────────────────────────────

pub struct InstanceCoordinator {
    router: Rc<HashRouter>,
    bus: EventBus,
    scheduler: Rc<dyn Scheduler>,
    primary: RefCell<Option<InstanceId>>,
    instances: RefCell<HashMap<InstanceId, CatalogInstance>>,
    next_id: Cell<u64>,
}

impl InstanceCoordinator {
    pub fn new(router: Rc<HashRouter>, bus: EventBus, scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            router,
            bus,
            scheduler,
            primary: RefCell::new(None),
            instances: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
        }
    }

    pub fn primary_id(&self) -> Option<InstanceId> {
        *self.primary.borrow()
    }

    pub fn primary(&self) -> Option<CatalogInstance> {
        let id = self.primary_id()?;
        self.instance(id)
    }

    pub fn instance(&self, id: InstanceId) -> Option<CatalogInstance> {
        self.instances.borrow().get(&id).cloned()
    }

    pub fn mounted(&self) -> usize {
        self.instances.borrow().len()
    }

    pub fn mount(
        &self,
        routable: Routable,
        catalog_id: Option<String>,
        store: VirtualPageStore,
    ) -> CatalogInstance {
        let id = InstanceId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        let holder = self.primary_id();
        let primary = match (routable, holder) {
            (Routable::Never, _) => false,
            (Routable::Auto, holder) => holder.is_none(),
            (Routable::Always, None) => true,
            (Routable::Always, Some(holder)) => {
                tracing::warn!(instance = %id, %holder, "routable instance mounted while another is primary");
                false
            }
        };

        let initial = self.router.state();
        let instance = CatalogInstance {
            inner: Rc::new(InstanceInner {
                id,
                catalog_id,
                router: RefCell::new(primary.then(|| self.router.clone())),
                store,
                bus: self.bus.clone(),
                scheduler: self.scheduler.clone(),
                view: RefCell::new(InstanceView::List { page: 1 }),
                list_page: Cell::new(1),
                subscription: Cell::new(None),
                last_error: RefCell::new(None),
                data_version: Cell::new(0),
            }),
        };
        self.instances.borrow_mut().insert(id, instance.clone());

        if primary {
            *self.primary.borrow_mut() = Some(id);
            tracing::info!(instance = %id, "catalog instance is primary");
            let weak: Weak<InstanceInner> = Rc::downgrade(&instance.inner);
            let subscription = self.bus.subscribe(move |event| {
                if let StoreEvent::StateChange(state) = event {
                    if let Some(inner) = weak.upgrade() {
                        inner.reconcile(state);
                    }
                }
            });
            instance.inner.subscription.set(Some(subscription));
            if !instance.inner.reconcile(&initial) {
                let inner = &instance.inner;
                inner.run(inner.show_page(1).map(|_| ()).boxed_local());
            }
        } else {
            tracing::debug!(instance = %id, "catalog instance is secondary");
            let inner = &instance.inner;
            inner.run(inner.show_page(1).map(|_| ()).boxed_local());
        }
        instance
    }

    pub fn unmount(&self, instance: &CatalogInstance) {
        let id = instance.id();
        if let Some(subscription) = instance.inner.subscription.take() {
            self.bus.unsubscribe(subscription);
        }
        instance.inner.router.borrow_mut().take();
        self.instances.borrow_mut().remove(&id);
        let was_primary = self.primary_id() == Some(id);
        if was_primary {
            *self.primary.borrow_mut() = None;
            tracing::info!(instance = %id, "primary catalog instance unmounted");
        }
    }
}

impl std::fmt::Debug for InstanceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceCoordinator")
            .field("primary", &self.primary_id())
            .field("mounted", &self.mounted())
            .finish()
    }
}
