// ============================================================================
// REQUEST BRIDGE — catalog and cart clients whose network lives in JS
// ============================================================================
//
// THE PATTERN:
//   - A client call queues an ApiRequest under a fresh request id and waits.
//   - JS drains the queue with take_requests(), does the actual fetch, then
//     reports back with resolve(id, body_json) or reject(id, message).
//   - The waiting future wakes on the next poll of the scheduler and parses
//     the body into the type the caller expects.
//   - A caller that gave up (an aborted detail load) simply stops waiting;
//     reporting on its id afterwards is a no-op that returns false.
//
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use async_trait::async_trait;
use futures::channel::oneshot;
use serde::de::DeserializeOwned;
use serde::Serialize;
use storefront_shared::{Cart, Product, ProductPage};

use crate::clients::{CartClient, CatalogClient};
use crate::error::{EngineError, EngineResult};
use crate::hash_codec::Params;

/// One call the host has to perform against the shop API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ApiRequest {
    ListProducts {
        page: u32,
        page_size: u32,
        filters: Params,
    },
    GetProduct {
        id_or_slug: String,
    },
    FetchCart,
    AddCartItem {
        product_id: String,
        variant_id: Option<String>,
        quantity: u32,
    },
    UpdateCartItem {
        item_id: String,
        quantity: u32,
    },
    RemoveCartItem {
        item_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingRequest {
    pub id: u32,
    #[serde(flatten)]
    pub request: ApiRequest,
}

type Reply = Result<String, String>;

/// `CatalogClient` and `CartClient` backed by the host's fetch.
#[derive(Default)]
pub struct RequestBridge {
    next_id: Cell<u32>,
    outbox: RefCell<Vec<OutgoingRequest>>,
    waiting: RefCell<HashMap<u32, oneshot::Sender<Reply>>>,
}

impl RequestBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests queued since the last call, oldest first.
    pub fn take_requests(&self) -> Vec<OutgoingRequest> {
        std::mem::take(&mut *self.outbox.borrow_mut())
    }

    /// Requests sent to the host and not yet answered.
    pub fn pending(&self) -> usize {
        self.waiting.borrow().len()
    }

    /// Returns false if the id is unknown or the caller stopped waiting.
    pub fn resolve(&self, id: u32, body_json: &str) -> bool {
        self.reply(id, Ok(body_json.to_string()))
    }

    pub fn reject(&self, id: u32, message: &str) -> bool {
        self.reply(id, Err(message.to_string()))
    }

    fn reply(&self, id: u32, reply: Reply) -> bool {
        let Some(sender) = self.waiting.borrow_mut().remove(&id) else {
            tracing::warn!(id, "reply for an unknown request");
            return false;
        };
        let delivered = sender.send(reply).is_ok();
        if !delivered {
            tracing::debug!(id, "reply for a cancelled request");
        }
        delivered
    }

    async fn call<T: DeserializeOwned>(&self, request: ApiRequest) -> EngineResult<T> {
        let id = self.next_id.get().wrapping_add(1);
        self.next_id.set(id);
        let (tx, rx) = oneshot::channel();
        tracing::debug!(id, ?request, "request queued for host");
        self.waiting.borrow_mut().insert(id, tx);
        self.outbox.borrow_mut().push(OutgoingRequest { id, request });

        match rx.await {
            Ok(Ok(body)) => serde_json::from_str(&body)
                .map_err(|err| EngineError::network(format!("malformed response: {err}"))),
            Ok(Err(message)) => Err(EngineError::network(message)),
            // The bridge was dropped with the request unanswered.
            Err(oneshot::Canceled) => Err(EngineError::Aborted),
        }
    }
}

impl std::fmt::Debug for RequestBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBridge")
            .field("queued", &self.outbox.borrow().len())
            .field("pending", &self.pending())
            .finish()
    }
}

#[async_trait(?Send)]
impl CatalogClient for RequestBridge {
    async fn list(&self, page: u32, page_size: u32, filters: &Params) -> EngineResult<ProductPage> {
        self.call(ApiRequest::ListProducts {
            page,
            page_size,
            filters: filters.clone(),
        })
        .await
    }

    async fn get(&self, id_or_slug: &str) -> EngineResult<Product> {
        self.call(ApiRequest::GetProduct {
            id_or_slug: id_or_slug.to_string(),
        })
        .await
    }
}

#[async_trait(?Send)]
impl CartClient for RequestBridge {
    async fn fetch(&self) -> EngineResult<Cart> {
        self.call(ApiRequest::FetchCart).await
    }

    async fn add_item(&self, product_id: &str, variant_id: Option<&str>, quantity: u32) -> EngineResult<Cart> {
        self.call(ApiRequest::AddCartItem {
            product_id: product_id.to_string(),
            variant_id: variant_id.map(str::to_string),
            quantity,
        })
        .await
    }

    async fn update_item(&self, item_id: &str, quantity: u32) -> EngineResult<Cart> {
        self.call(ApiRequest::UpdateCartItem {
            item_id: item_id.to_string(),
            quantity,
        })
        .await
    }

    async fn remove_item(&self, item_id: &str) -> EngineResult<Cart> {
        self.call(ApiRequest::RemoveCartItem {
            item_id: item_id.to_string(),
        })
        .await
    }
}
