//! Transport layer abstraction for reconciliation.

use crate::error::{ClientError, ClientResult};
use ripple_protocol::{Event, FetchData, Mutation};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

/// Network seam for the reconciliation engine.
///
/// Shaped after the fallback request/response surface: one idempotent
/// mutation-submission call and one list-retrieval call with
/// incremental catch-up. Implementations exist for HTTP, for loopback
/// testing, and for anything else that can satisfy the two calls.
pub trait SyncTransport: Send + Sync {
    /// Submits a mutation; returns the event it produced.
    ///
    /// Safe to retry: the mutation's idempotency token makes repeated
    /// submissions return the original event.
    fn submit(&self, mutation: &Mutation) -> ClientResult<Event>;

    /// Fetches a list's events after `since`, or a full snapshot when
    /// `since` is `None` or the gap cannot be served incrementally.
    fn fetch(&self, list_id: Uuid, since: Option<u64>) -> ClientResult<FetchData>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;
}

/// A mock transport for testing.
///
/// Responses are scripted per call in FIFO order.
#[derive(Default)]
pub struct MockTransport {
    connected: std::sync::atomic::AtomicBool,
    submit_responses: Mutex<VecDeque<ClientResult<Event>>>,
    fetch_responses: Mutex<HashMap<Uuid, VecDeque<ClientResult<FetchData>>>>,
}

impl MockTransport {
    /// Creates a connected mock transport.
    pub fn new() -> Self {
        Self {
            connected: std::sync::atomic::AtomicBool::new(true),
            submit_responses: Mutex::new(VecDeque::new()),
            fetch_responses: Mutex::new(HashMap::new()),
        }
    }

    /// Queues a submit response.
    pub fn push_submit_response(&self, response: ClientResult<Event>) {
        self.submit_responses.lock().unwrap().push_back(response);
    }

    /// Queues a fetch response for a list.
    pub fn push_fetch_response(&self, list_id: Uuid, response: ClientResult<FetchData>) {
        self.fetch_responses
            .lock()
            .unwrap()
            .entry(list_id)
            .or_default()
            .push_back(response);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected
            .store(connected, std::sync::atomic::Ordering::SeqCst);
    }
}

impl SyncTransport for MockTransport {
    fn submit(&self, _mutation: &Mutation) -> ClientResult<Event> {
        if !self.is_connected() {
            return Err(ClientError::transport_retryable("not connected"));
        }
        self.submit_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ClientError::Protocol("no mock submit response set".into())))
    }

    fn fetch(&self, list_id: Uuid, _since: Option<u64>) -> ClientResult<FetchData> {
        if !self.is_connected() {
            return Err(ClientError::transport_retryable("not connected"));
        }
        self.fetch_responses
            .lock()
            .unwrap()
            .get_mut(&list_id)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Err(ClientError::Protocol("no mock fetch response set".into())))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }
}
