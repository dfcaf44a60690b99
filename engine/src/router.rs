// ============================================================================
// HASH ROUTER — URL fragment as the source of truth for widget navigation
// ============================================================================
//
// THE PATTERN:
//   - Host glue calls handle_navigation() on every hashchange / popstate.
//   - The router re-parses the fragment and emits StateChange on the bus only
//     when view, slug, cart flag or params actually changed.
//   - Imperative methods (open_cart, navigate_to_product, ...) never emit
//     directly. They compute the next HashState, write the URL, and let the
//     change come back through handle_navigation(). One path, one truth.
//
// WRITES:
//   Location::set_hash / replace_without_hash return whether the host will
//   deliver a navigation notification for the write. When it will not
//   (history.replaceState, the in-memory location), the router runs
//   handle_navigation() itself right after writing.
//
// One router per page, constructed by the composition root and shared by
// reference. Only the primary catalog instance holds it.
//
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use storefront_shared::validation;

use crate::events::{EventBus, StoreEvent};
use crate::hash_codec::{HashCodec, HashState, Params, View};

// ── Location ───────────────────────────────────────────────────────────────

/// The browser location, as far as the router cares.
pub trait Location {
    /// Current `location.hash`, including the leading `#` (or empty).
    fn hash(&self) -> String;

    /// Write `location.hash`. Returns true if a navigation notification will
    /// follow.
    fn set_hash(&self, hash: &str) -> bool;

    /// Drop the fragment from the URL without leaving a bare `#` behind.
    /// Returns true if a navigation notification will follow.
    fn replace_without_hash(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationWrite {
    SetHash(String),
    ReplaceWithoutHash,
}

/// In-process location. Never delivers notifications on its own; tests and
/// the wasm facade feed external changes through `navigate_externally`.
#[derive(Debug, Default)]
pub struct MemoryLocation {
    hash: RefCell<String>,
    writes: RefCell<Vec<LocationWrite>>,
}

impl MemoryLocation {
    pub fn new(initial_hash: &str) -> Self {
        Self {
            hash: RefCell::new(initial_hash.to_string()),
            writes: RefCell::new(Vec::new()),
        }
    }

    /// Simulate the user (or the host page) changing the hash.
    pub fn navigate_externally(&self, hash: &str) {
        *self.hash.borrow_mut() = hash.to_string();
    }

    /// Every write the router made, oldest first.
    pub fn writes(&self) -> Vec<LocationWrite> {
        self.writes.borrow().clone()
    }

    pub fn last_write(&self) -> Option<LocationWrite> {
        self.writes.borrow().last().cloned()
    }
}

impl Location for MemoryLocation {
    fn hash(&self) -> String {
        self.hash.borrow().clone()
    }

    fn set_hash(&self, hash: &str) -> bool {
        *self.hash.borrow_mut() = hash.to_string();
        self.writes
            .borrow_mut()
            .push(LocationWrite::SetHash(hash.to_string()));
        false
    }

    fn replace_without_hash(&self) -> bool {
        self.hash.borrow_mut().clear();
        self.writes.borrow_mut().push(LocationWrite::ReplaceWithoutHash);
        false
    }
}

// ── HashRouter ─────────────────────────────────────────────────────────────

pub struct HashRouter {
    location: Rc<dyn Location>,
    codec: HashCodec,
    bus: EventBus,
    current: RefCell<HashState>,
    data_version: Cell<u32>,
}

impl HashRouter {
    /// Adopt whatever the URL says right now, without emitting.
    pub fn new(location: Rc<dyn Location>, codec: HashCodec, bus: EventBus) -> Self {
        let current = codec.parse(&location.hash());
        Self {
            location,
            codec,
            bus,
            current: RefCell::new(current),
            data_version: Cell::new(0),
        }
    }

    // ── Version tracking ───────────────────────────────────────────────

    pub fn data_version(&self) -> u32 {
        self.data_version.get()
    }

    fn bump_version(&self) {
        self.data_version.set(self.data_version.get().wrapping_add(1));
    }

    // ── State ──────────────────────────────────────────────────────────

    pub fn state(&self) -> HashState {
        self.current.borrow().clone()
    }

    pub fn codec(&self) -> &HashCodec {
        &self.codec
    }

    /// Re-read the URL. Returns true if a StateChange was emitted.
    pub fn handle_navigation(&self) -> bool {
        let next = self.codec.parse(&self.location.hash());
        let changed = {
            let mut current = self.current.borrow_mut();
            let changed = next.differs_from(&current);
            *current = next.clone();
            changed
        };
        if !changed {
            tracing::trace!("navigation without semantic change");
            return false;
        }
        tracing::debug!(view = ?next.view, cart_open = next.cart_open, "router state change");
        self.bump_version();
        self.bus.emit(StoreEvent::StateChange(next));
        true
    }

    // ── Navigation ─────────────────────────────────────────────────────

    pub fn open_cart(&self) {
        self.set_cart_open(true);
    }

    pub fn close_cart(&self) {
        self.set_cart_open(false);
    }

    pub fn toggle_cart(&self) {
        let open = self.current.borrow().cart_open;
        self.set_cart_open(!open);
    }

    fn set_cart_open(&self, open: bool) {
        let mut next = self.state();
        if next.cart_open == open {
            return;
        }
        next.cart_open = open;
        self.write(&next);
    }

    /// Switch to the product view. `catalog_id: None` keeps the current
    /// catalog identity. Returns false if the slug was rejected.
    pub fn navigate_to_product(
        &self,
        slug: &str,
        preserve_params: bool,
        extra_params: Option<&Params>,
        catalog_id: Option<&str>,
    ) -> bool {
        if let Err(message) = validation::slug(slug) {
            tracing::warn!(slug, %message, "refusing to navigate to invalid product slug");
            return false;
        }
        let current = self.state();
        let mut params = if preserve_params {
            current.params.clone()
        } else {
            Params::new()
        };
        if let Some(extra) = extra_params {
            params.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let next = HashState {
            view: View::product(slug),
            cart_open: current.cart_open,
            params,
            catalog_id: catalog_id.map(str::to_string).or(current.catalog_id),
        };
        self.write(&next);
        true
    }

    pub fn navigate_to_list(&self, preserve_params: bool, catalog_id: Option<&str>) {
        let current = self.state();
        let next = HashState {
            view: View::List,
            cart_open: current.cart_open,
            params: if preserve_params {
                current.params
            } else {
                Params::new()
            },
            catalog_id: catalog_id.map(str::to_string).or(current.catalog_id),
        };
        self.write(&next);
    }

    /// Merge a parameter patch; `None` removes the key.
    pub fn update_params<I, K, V>(&self, patch: I, preserve_cart: bool)
    where
        I: IntoIterator<Item = (K, Option<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut next = self.state();
        for (key, value) in patch {
            let key = key.into();
            match value {
                Some(value) => {
                    next.params.insert(key, value.into());
                }
                None => {
                    next.params.remove(&key);
                }
            }
        }
        if !preserve_cart {
            next.cart_open = false;
        }
        self.write(&next);
    }

    /// Write a complete state, e.g. a list page under a new filter set.
    pub fn navigate_to(&self, next: &HashState) {
        self.write(next);
    }

    fn write(&self, next: &HashState) {
        let existing = self.location.hash();
        let fragment = self.codec.serialize(next, &existing);
        if fragment == existing {
            return;
        }
        let notified = if fragment.is_empty() {
            self.location.replace_without_hash()
        } else {
            self.location.set_hash(&fragment)
        };
        if !notified {
            self.handle_navigation();
        }
    }
}

impl std::fmt::Debug for HashRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashRouter")
            .field("current", &*self.current.borrow())
            .field("data_version", &self.data_version.get())
            .finish()
    }
}
