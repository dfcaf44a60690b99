//! # Storefront Engine
//!
//! Navigation and cart core of an embeddable storefront widget. The engine
//! owns all widget state; the host page (JS glue, or a test) owns the DOM,
//! the network and the clock, and talks to the engine through a handful of
//! narrow seams.
//!
//! ## Architecture
//!
//! ```text
//!   location.hash ──► HashRouter ──StateChange──► InstanceCoordinator
//!                        ▲                             │ primary
//!                        │ URL writes                  ▼
//!                        └──────────────────── CatalogInstance ──► VirtualPageStore ──► CatalogClient
//!
//!   cart:add-item / quantity edits ──► CartMutationEngine ──► CartClient
//!                                           │
//!                                           └──► cart:updated / cart:error
//! ```
//!
//! - [`hash_codec`] converts between the URL fragment and [`HashState`].
//! - [`router`] makes the URL the single source of truth for navigation.
//! - [`page_store`] presents a paged backend as one continuous index.
//! - [`coordinator`] elects the one URL-routed catalog instance per page.
//! - [`cart`] applies cart edits optimistically and rolls back on failure.
//! - [`events`] is the typed bus everything above talks over.
//! - [`storefront`] wires it all together for one page.
//! - [`bridge`] implements both clients on top of the host's `fetch`.
//! - [`widget`] and [`wasm`] are the `wasm_bindgen` surfaces JS talks to.
//!
//! ## Execution model
//!
//! Single-threaded and cooperative: shared state lives in `Rc`/`RefCell`,
//! timers and background futures go through the [`Scheduler`] seam, and no
//! borrow is held across an emit or an await. In the browser the host calls
//! [`StorefrontWidget::tick`] from `requestAnimationFrame`, which drives the
//! [`FrameScheduler`]; requests queued by the [`RequestBridge`] are fetched
//! by JS and answered through `set_request_success` / `set_request_error`.
//!
//! ## Logging
//!
//! The engine logs through `tracing` and never installs a subscriber.

pub mod bridge;
pub mod cart;
pub mod clients;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod hash_codec;
pub mod page_store;
pub mod router;
pub mod scheduler;
pub mod storefront;
pub mod wasm;
pub mod widget;

pub use bridge::{ApiRequest, OutgoingRequest, RequestBridge};
pub use cart::{CartMutationEngine, CartPanel, MutationPhase, NewCartItem, PanelGuard};
pub use clients::{CartClient, CatalogClient};
pub use config::StorefrontConfig;
pub use coordinator::{CatalogInstance, InstanceCoordinator, InstanceId, InstanceView, Routable};
pub use error::{EngineError, EngineResult};
pub use events::{EventBus, ProductTarget, StoreEvent, SubscriptionId};
pub use hash_codec::{HashCodec, HashState, Params, ReservedRoutes, View};
pub use page_store::{PageLayout, VirtualPageStore};
pub use router::{HashRouter, Location, LocationWrite, MemoryLocation};
pub use scheduler::{CancelToken, FrameScheduler, Scheduler};
pub use storefront::Storefront;
pub use wasm::StorefrontRouter;
pub use widget::StorefrontWidget;
