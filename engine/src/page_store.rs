// ============================================================================
// VIRTUAL PAGE STORE — one continuous product index over a paged backend
// ============================================================================
//
// THE PATTERN:
//   - Products live at absolute indices: (page - 1) * page_size + offset.
//   - load_page(n) fetches each page at most once. Concurrent callers for the
//     same page await one shared future and all see the same outcome.
//   - get_slice(page) never blocks; positions that are not loaded yet come
//     back as None and the render layer shows a placeholder.
//   - ensure_loaded(index) loads the page holding `index` and, near a page
//     edge, prefetches the neighbor in the background so prev/next browsing
//     across the boundary does not stall.
//
// STORAGE:
//   A dense arena (Vec<Option<Product>>) indexed by absolute position. Some
//   is the loaded bit. Full detail records sit in a side map keyed by slug
//   and id and win over list records on every read.
//
// RESETS:
//   The index space depends on filter-dependent ordering, so a filter change
//   calls clear(). clear() bumps a generation counter; fetches started under
//   an older generation finish as Aborted without writing anything.
//
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::rc::{Rc, Weak};

use futures::future::{AbortHandle, Abortable, Aborted, LocalBoxFuture, Shared};
use futures::FutureExt;
use storefront_shared::{Product, ProductPage};

use crate::clients::CatalogClient;
use crate::error::{EngineError, EngineResult};
use crate::hash_codec::Params;
use crate::scheduler::Scheduler;

// ── Page arithmetic ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    pub page_size: u32,
    pub total_items: u32,
    pub total_pages: u32,
    /// False until the first page response arrives.
    pub totals_known: bool,
}

impl PageLayout {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size: page_size.max(1),
            total_items: 0,
            total_pages: 0,
            totals_known: false,
        }
    }

    /// 1-based page holding an absolute index.
    pub fn page_of(&self, index: usize) -> u32 {
        (index / self.page_size as usize) as u32 + 1
    }

    pub fn offset_in_page(&self, index: usize) -> u32 {
        (index % self.page_size as usize) as u32
    }

    /// Absolute index of the first product on `page`.
    pub fn page_start(&self, page: u32) -> usize {
        (page.max(1) - 1) as usize * self.page_size as usize
    }

    /// Pages are 1-based; anything past a known end maps to the last page.
    pub fn clamp_page(&self, page: u32) -> u32 {
        let page = page.max(1);
        if self.totals_known && self.total_pages > 0 {
            page.min(self.total_pages)
        } else {
            page
        }
    }

    pub fn is_last_page(&self, page: u32) -> bool {
        self.totals_known && page >= self.total_pages
    }
}

// ── Arena ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ProductSlots {
    slots: Vec<Option<Product>>,
    loaded: usize,
}

impl ProductSlots {
    fn put(&mut self, index: usize, product: Product) {
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        if self.slots[index].is_none() {
            self.loaded += 1;
        }
        self.slots[index] = Some(product);
    }

    fn get(&self, index: usize) -> Option<&Product> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    fn position(&self, pred: impl Fn(&Product) -> bool) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(&pred))
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.loaded = 0;
    }
}

// ── VirtualPageStore ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum PageOutcome {
    Loaded(u32),
    /// The backend has fewer pages than requested.
    PastEnd { last_page: u32 },
}

type PageFetch = Shared<LocalBoxFuture<'static, EngineResult<PageOutcome>>>;

struct StoreInner {
    client: Rc<dyn CatalogClient>,
    scheduler: Rc<dyn Scheduler>,
    prefetch_margin: u32,
    layout: Cell<PageLayout>,
    filters: RefCell<Params>,
    slots: RefCell<ProductSlots>,
    loaded_pages: RefCell<BTreeSet<u32>>,
    in_flight: RefCell<HashMap<u32, PageFetch>>,
    details: RefCell<HashMap<String, Product>>,
    detail_abort: RefCell<Option<AbortHandle>>,
    generation: Cell<u64>,
    data_version: Cell<u32>,
}

/// Per-instance product store. Clones share state.
#[derive(Clone)]
pub struct VirtualPageStore {
    inner: Rc<StoreInner>,
}

impl VirtualPageStore {
    pub fn new(
        client: Rc<dyn CatalogClient>,
        scheduler: Rc<dyn Scheduler>,
        page_size: u32,
        prefetch_margin: u32,
    ) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                client,
                scheduler,
                prefetch_margin,
                layout: Cell::new(PageLayout::new(page_size)),
                filters: RefCell::new(Params::new()),
                slots: RefCell::new(ProductSlots::default()),
                loaded_pages: RefCell::new(BTreeSet::new()),
                in_flight: RefCell::new(HashMap::new()),
                details: RefCell::new(HashMap::new()),
                detail_abort: RefCell::new(None),
                generation: Cell::new(0),
                data_version: Cell::new(0),
            }),
        }
    }

    // ── Version tracking ───────────────────────────────────────────────

    pub fn data_version(&self) -> u32 {
        self.inner.data_version.get()
    }

    // ── Getters ────────────────────────────────────────────────────────

    pub fn layout(&self) -> PageLayout {
        self.inner.layout.get()
    }

    pub fn filters(&self) -> Params {
        self.inner.filters.borrow().clone()
    }

    pub fn is_loaded(&self, page: u32) -> bool {
        self.inner.loaded_pages.borrow().contains(&page)
    }

    pub fn loaded_pages(&self) -> Vec<u32> {
        self.inner.loaded_pages.borrow().iter().copied().collect()
    }

    pub fn in_flight_pages(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self.inner.in_flight.borrow().keys().copied().collect();
        pages.sort_unstable();
        pages
    }

    /// Number of absolute positions holding a product.
    pub fn loaded_count(&self) -> usize {
        self.inner.slots.borrow().loaded
    }

    /// Product at an absolute index, preferring the full detail record.
    pub fn product_at(&self, index: usize) -> Option<Product> {
        let slots = self.inner.slots.borrow();
        let product = slots.get(index)?;
        let details = self.inner.details.borrow();
        Some(details.get(&product.slug).unwrap_or(product).clone())
    }

    /// Ordered products of a page. Positions not loaded yet are None.
    pub fn get_slice(&self, page: u32) -> Vec<Option<Product>> {
        let layout = self.layout();
        let start = layout.page_start(page);
        let mut end = start + layout.page_size as usize;
        if layout.totals_known {
            end = end.min(layout.total_items as usize);
        }
        (start..end).map(|i| self.product_at(i)).collect()
    }

    /// The products at `index - 1` and `index + 1`, where loaded.
    pub fn neighbors(&self, index: usize) -> (Option<Product>, Option<Product>) {
        let previous = index.checked_sub(1).and_then(|i| self.product_at(i));
        (previous, self.product_at(index + 1))
    }

    pub fn index_of_slug(&self, slug: &str) -> Option<usize> {
        self.inner.slots.borrow().position(|p| p.slug == slug)
    }

    pub fn find_by_slug(&self, slug: &str) -> Option<Product> {
        if let Some(detail) = self.inner.details.borrow().get(slug) {
            return Some(detail.clone());
        }
        let index = self.index_of_slug(slug)?;
        self.product_at(index)
    }

    pub fn find_by_id(&self, id: &str) -> Option<Product> {
        if let Some(detail) = self.inner.details.borrow().get(id) {
            return Some(detail.clone());
        }
        let index = self.inner.slots.borrow().position(|p| p.id == id)?;
        self.product_at(index)
    }

    // ── Loading ────────────────────────────────────────────────────────

    /// Load a page (1-based). Resolves to the page actually loaded, which
    /// differs from `page` only when `page` was past the end of the catalog.
    pub fn load_page(&self, page: u32) -> LocalBoxFuture<'static, EngineResult<u32>> {
        let store = self.clone();
        async move {
            let page = store.layout().clamp_page(page);
            if store.is_loaded(page) {
                return Ok(page);
            }
            match store.fetch_handle(page).await? {
                PageOutcome::Loaded(loaded) => Ok(loaded),
                PageOutcome::PastEnd { last_page } => {
                    tracing::debug!(page, last_page, "page past the end, loading last page");
                    store.load_page(last_page).await
                }
            }
        }
        .boxed_local()
    }

    /// Load the page holding `index` and prefetch the neighbor page when
    /// `index` sits within `prefetch_margin` of a page edge.
    pub fn ensure_loaded(&self, index: usize) -> LocalBoxFuture<'static, EngineResult<u32>> {
        let store = self.clone();
        async move {
            let page = store.layout().page_of(index);
            let mut loaded = store.load_page(page).await?;

            // The first response may report a different page size than the
            // configured one; recompute against the server's layout.
            let layout = store.layout();
            let actual = layout.page_of(index);
            if actual != page {
                loaded = store.load_page(actual).await?;
            }
            if loaded != layout.page_of(index) {
                return Ok(loaded);
            }

            let offset = layout.offset_in_page(index);
            let margin = store.inner.prefetch_margin;
            if offset < margin && loaded > 1 {
                store.prefetch(loaded - 1);
            }
            if offset + margin >= layout.page_size && !layout.is_last_page(loaded) {
                store.prefetch(loaded + 1);
            }
            Ok(loaded)
        }
        .boxed_local()
    }

    /// Fetch a full product record. Starting a new detail load aborts the
    /// previous one, so a burst of navigations can never let a stale
    /// response land last.
    pub fn load_detail(&self, id_or_slug: &str) -> LocalBoxFuture<'static, EngineResult<Product>> {
        let (handle, registration) = AbortHandle::new_pair();
        if let Some(previous) = self.inner.detail_abort.borrow_mut().replace(handle) {
            previous.abort();
        }

        let key = id_or_slug.to_string();
        if let Some(cached) = self.inner.details.borrow().get(&key).cloned() {
            return futures::future::ready(Ok(cached)).boxed_local();
        }

        let client = self.inner.client.clone();
        let weak = Rc::downgrade(&self.inner);
        async move {
            let request = {
                let key = key.clone();
                async move { client.get(&key).await }
            };
            match Abortable::new(request, registration).await {
                Err(Aborted) => {
                    tracing::debug!(%key, "detail load superseded");
                    Err(EngineError::Aborted)
                }
                Ok(Err(err)) => {
                    if !err.is_aborted() {
                        tracing::warn!(%key, %err, "detail load failed");
                    }
                    Err(err)
                }
                Ok(Ok(product)) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.store_detail(product.clone());
                    }
                    Ok(product)
                }
            }
        }
        .boxed_local()
    }

    /// Insert a full record obtained elsewhere (e.g. embedded in the page).
    pub fn store_detail(&self, product: Product) {
        self.inner.store_detail(product);
    }

    // ── Resets ─────────────────────────────────────────────────────────

    /// Drop every indexed product and restart from page 1.
    pub fn clear(&self) {
        let inner = &self.inner;
        inner.slots.borrow_mut().clear();
        inner.loaded_pages.borrow_mut().clear();
        inner.in_flight.borrow_mut().clear();
        inner.generation.set(inner.generation.get() + 1);
        inner.layout.set(PageLayout::new(inner.layout.get().page_size));
        inner.bump_version();
        tracing::debug!(generation = inner.generation.get(), "page store cleared");
    }

    /// Replace the filter set. Returns true (and clears) if it changed.
    pub fn set_filters(&self, filters: Params) -> bool {
        if *self.inner.filters.borrow() == filters {
            return false;
        }
        *self.inner.filters.borrow_mut() = filters;
        self.clear();
        true
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn fetch_handle(&self, page: u32) -> PageFetch {
        if let Some(existing) = self.inner.in_flight.borrow().get(&page) {
            tracing::debug!(page, "joining in-flight page fetch");
            return existing.clone();
        }

        let layout = self.layout();
        let filters = self.filters();
        let generation = self.inner.generation.get();
        let client = self.inner.client.clone();
        let weak: Weak<StoreInner> = Rc::downgrade(&self.inner);
        tracing::debug!(page, page_size = layout.page_size, "fetching page");

        let fetch = async move {
            let result = client.list(page, layout.page_size, &filters).await;
            match weak.upgrade() {
                Some(inner) => inner.finish_page(page, generation, result),
                None => Err(EngineError::Aborted),
            }
        }
        .boxed_local()
        .shared();

        self.inner.in_flight.borrow_mut().insert(page, fetch.clone());
        fetch
    }

    fn prefetch(&self, page: u32) {
        if self.is_loaded(page) || self.inner.in_flight.borrow().contains_key(&page) {
            return;
        }
        tracing::trace!(page, "prefetching neighbor page");
        let load = self.load_page(page);
        self.inner.scheduler.spawn(
            async move {
                if let Err(err) = load.await {
                    if !err.is_aborted() {
                        tracing::debug!(page, %err, "prefetch failed");
                    }
                }
            }
            .boxed_local(),
        );
    }
}

impl StoreInner {
    fn bump_version(&self) {
        self.data_version.set(self.data_version.get().wrapping_add(1));
    }

    fn store_detail(&self, product: Product) {
        let mut details = self.details.borrow_mut();
        if product.id != product.slug {
            details.insert(product.id.clone(), product.clone());
        }
        details.insert(product.slug.clone(), product);
        drop(details);
        self.bump_version();
    }

    fn finish_page(
        &self,
        page: u32,
        generation: u64,
        result: EngineResult<ProductPage>,
    ) -> EngineResult<PageOutcome> {
        if generation != self.generation.get() {
            tracing::debug!(page, "discarding page fetched before reset");
            return Err(EngineError::Aborted);
        }
        self.in_flight.borrow_mut().remove(&page);

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(page, %err, "page fetch failed");
                return Err(err);
            }
        };

        let previous = self.layout.get();
        let page_size = if response.page_size > 0 {
            response.page_size
        } else {
            previous.page_size
        };
        if page_size != previous.page_size && !self.loaded_pages.borrow().is_empty() {
            tracing::debug!(old = previous.page_size, new = page_size, "page size changed, dropping index");
            self.slots.borrow_mut().clear();
            self.loaded_pages.borrow_mut().clear();
        }
        let layout = PageLayout {
            page_size,
            total_items: response.total_items,
            total_pages: response.total_pages,
            totals_known: true,
        };
        self.layout.set(layout);

        if page > 1 && response.items.is_empty() && page > response.total_pages {
            return Ok(PageOutcome::PastEnd {
                last_page: response.total_pages.max(1),
            });
        }

        let start = layout.page_start(page);
        {
            let mut slots = self.slots.borrow_mut();
            for (offset, product) in response.items.into_iter().enumerate() {
                slots.put(start + offset, product);
            }
        }
        self.loaded_pages.borrow_mut().insert(page);
        self.bump_version();
        Ok(PageOutcome::Loaded(page))
    }
}

impl std::fmt::Debug for VirtualPageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualPageStore")
            .field("layout", &self.layout())
            .field("loaded_pages", &self.loaded_pages())
            .field("in_flight", &self.in_flight_pages())
            .finish()
    }
}
