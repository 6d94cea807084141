// SPDX-License-Identifier: MIT OR Apache-2.0
//! Correlates in-flight requests with their responses by `id`, so a
//! persistent STDIO server can interleave concurrent calls and reply
//! out of order (§4.5).

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::{ProtocolError, RpcResponse};

/// A table of outstanding requests keyed by correlation id.
///
/// Writes are serialized with a plain [`Mutex`]; the table is expected to
/// hold at most a handful of entries at once (one per in-flight tool call).
#[derive(Default)]
pub struct PendingTable {
    inflight: Mutex<HashMap<Uuid, oneshot::Sender<RpcResponse>>>,
}

impl PendingTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` as in-flight, returning a receiver that resolves when
    /// [`Self::resolve`] is called with a matching response.
    pub fn register(&self, id: Uuid) -> oneshot::Receiver<RpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.inflight.lock().expect("pending table mutex poisoned").insert(id, tx);
        rx
    }

    /// Deliver `response` to its waiting caller, if still registered.
    /// Returns [`ProtocolError::UnknownResponseId`] if no caller is waiting
    /// (e.g. it already timed out and was dropped).
    pub fn resolve(&self, response: RpcResponse) -> Result<(), ProtocolError> {
        let id = response.id;
        let sender = self.inflight.lock().expect("pending table mutex poisoned").remove(&id);
        match sender {
            Some(tx) => {
                // A dropped receiver (caller gave up) is not an error here.
                let _ = tx.send(response);
                Ok(())
            }
            None => Err(ProtocolError::UnknownResponseId(id)),
        }
    }

    /// Drop a registration without resolving it, e.g. on timeout.
    pub fn cancel(&self, id: Uuid) {
        self.inflight.lock().expect("pending table mutex poisoned").remove(&id);
    }

    /// Number of currently in-flight requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inflight.lock().expect("pending table mutex poisoned").len()
    }

    /// Whether no requests are currently in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_delivers_to_registered_receiver() {
        let table = PendingTable::new();
        let id = Uuid::new_v4();
        let rx = table.register(id);
        table.resolve(RpcResponse::ok(id, serde_json::json!({"done": true}))).unwrap();
        let resp = rx.await.unwrap();
        assert!(resp.is_ok());
    }

    #[test]
    fn resolve_unknown_id_errors() {
        let table = PendingTable::new();
        let err = table.resolve(RpcResponse::ok(Uuid::new_v4(), serde_json::json!({}))).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownResponseId(_)));
    }

    #[test]
    fn cancel_removes_registration() {
        let table = PendingTable::new();
        let id = Uuid::new_v4();
        let _rx = table.register(id);
        assert_eq!(table.len(), 1);
        table.cancel(id);
        assert!(table.is_empty());
    }
}
