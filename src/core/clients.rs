//! # Client handles.
//!
//! A serving unit registers one handle per active inbound connection. The
//! handle's token is a child of the unit's own token, so cancelling the unit
//! also reaches its clients; the orchestrator additionally cancels every
//! handle explicitly and marks it obsolete.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Stable id of a client handle.
pub type ClientId = u64;

struct ClientHandle {
    label: Arc<str>,
    cancel: CancellationToken,
    obsolete: bool,
}

/// Id-keyed table of client handles.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone, Default)]
pub struct ClientTable {
    entries: Arc<RwLock<BTreeMap<ClientId, ClientHandle>>>,
    next_id: Arc<AtomicU64>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client and returns its id and the token its task must observe.
    pub async fn register(
        &self,
        label: impl Into<Arc<str>>,
        parent: &CancellationToken,
    ) -> (ClientId, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = parent.child_token();
        self.entries.write().await.insert(
            id,
            ClientHandle {
                label: label.into(),
                cancel: cancel.clone(),
                obsolete: false,
            },
        );
        (id, cancel)
    }

    /// Removes a handle whose connection ended on its own.
    pub async fn release(&self, id: ClientId) -> bool {
        self.entries.write().await.remove(&id).is_some()
    }

    /// Number of registered handles, obsolete ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Marks every live handle obsolete and cancels it; returns what was cancelled.
    pub(crate) async fn cancel_all(&self) -> Vec<(ClientId, Arc<str>)> {
        let mut entries = self.entries.write().await;
        let mut cancelled = Vec::new();
        for (id, h) in entries.iter_mut() {
            if h.obsolete {
                continue;
            }
            h.obsolete = true;
            h.cancel.cancel();
            cancelled.push((*id, Arc::clone(&h.label)));
        }
        cancelled
    }
}
