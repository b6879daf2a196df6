//! Offline request queue
//!
//! FIFO of mutating requests attempted while offline. Each entry carries the
//! responder that settles the original caller once it is replayed or dropped,
//! and the optimistic record shown while it waits.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::api::request::{ApiRequest, RequestOptions};
use crate::api::response::ApiResponse;
use crate::error::Result;

/// Receiving half handed back to the caller of a queued request.
pub type Settlement = oneshot::Receiver<Result<ApiResponse>>;

/// Optimistic record inserted into a data slice ahead of the server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub slice: String,
    pub temp_id: String,
}

// == Queued Request ==
#[derive(Debug)]
pub struct QueuedRequest {
    pub request: ApiRequest,
    pub options: RequestOptions,
    pub enqueued_at: u64,
    pub placeholder: Option<Placeholder>,
    responder: oneshot::Sender<Result<ApiResponse>>,
}

impl QueuedRequest {
    /// Settles the original caller. A caller that gave up is ignored.
    pub fn settle(self, result: Result<ApiResponse>) {
        let _ = self.responder.send(result);
    }
}

// == Offline Queue ==
#[derive(Debug, Default)]
pub struct OfflineQueue {
    entries: VecDeque<QueuedRequest>,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a request and returns the receiver its caller awaits.
    pub fn push(
        &mut self,
        request: ApiRequest,
        options: RequestOptions,
        enqueued_at: u64,
        placeholder: Option<Placeholder>,
    ) -> Settlement {
        let (responder, settlement) = oneshot::channel();
        self.entries.push_back(QueuedRequest {
            request,
            options,
            enqueued_at,
            placeholder,
            responder,
        });
        settlement
    }

    pub fn pop_front(&mut self) -> Option<QueuedRequest> {
        self.entries.pop_front()
    }

    /// Removes every entry, oldest first. The caller settles them.
    pub fn drain(&mut self) -> Vec<QueuedRequest> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::api::request::Method;

    fn post(path: &str) -> ApiRequest {
        ApiRequest::new(Method::Post, path).with_body(json!({ "title": path }))
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = OfflineQueue::new();
        let _a = queue.push(post("/api/a"), RequestOptions::default(), 1, None);
        let _b = queue.push(post("/api/b"), RequestOptions::default(), 2, None);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_front().unwrap().request.path, "/api/a");
        assert_eq!(queue.pop_front().unwrap().request.path, "/api/b");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_settlement_pending_until_settled() {
        let mut queue = OfflineQueue::new();
        let mut settlement = tokio_test::task::spawn(queue.push(
            post("/api/a"),
            RequestOptions::default(),
            1,
            None,
        ));

        tokio_test::assert_pending!(settlement.poll());

        queue
            .pop_front()
            .unwrap()
            .settle(Ok(ApiResponse::fresh(json!({ "id": 7 }))));

        assert!(settlement.is_woken());
        let response = tokio_test::assert_ready_ok!(settlement.poll()).unwrap();
        assert_eq!(response.data["id"], 7);
    }

    #[tokio::test]
    async fn test_settle_reaches_caller() {
        let mut queue = OfflineQueue::new();
        let settlement = queue.push(post("/api/a"), RequestOptions::default(), 1, None);

        queue
            .pop_front()
            .unwrap()
            .settle(Ok(ApiResponse::fresh(json!({ "id": 1 }))));

        let response = settlement.await.unwrap().unwrap();
        assert_eq!(response.data["id"], 1);
    }

    #[tokio::test]
    async fn test_drain_keeps_placeholders() {
        let mut queue = OfflineQueue::new();
        let placeholder = Placeholder {
            slice: "a".to_string(),
            temp_id: "temp-1".to_string(),
        };
        let settlement = queue.push(
            post("/api/a"),
            RequestOptions::default(),
            1,
            Some(placeholder.clone()),
        );
        let _b = queue.push(post("/api/b"), RequestOptions::default(), 2, None);

        let drained = queue.drain();
        assert!(queue.is_empty());
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].placeholder, Some(placeholder));
        assert!(drained[1].placeholder.is_none());

        drop(drained);
        // Dropped responders close the caller's channel
        assert!(settlement.await.is_err());
    }
}
