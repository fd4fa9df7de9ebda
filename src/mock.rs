use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Instant,
};

use bytes::Bytes;
use reqwest::Method;
use serde::Serialize;
use sonic_rs::to_vec;

use super::adapter::{
    RestBytes, RestError, RestErrorKind, RestFuture, RestRequest, RestResponse, RestResult,
    RestTransport,
};

/// Observable state of the mock transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockTransportState {
    Idle,
    Busy,
    Error,
}

#[derive(Clone, Debug, Default)]
pub enum MockBehavior {
    #[default]
    Pass,
    Reject {
        status: u16,
        reason: String,
    },
    ConnectError {
        reason: String,
    },
    SendError {
        reason: String,
    },
    ReceiveError {
        reason: String,
    },
    TimeoutError {
        reason: String,
    },
    InternalError {
        reason: String,
    },
    Drop,
    Replay(Vec<MockResponse>),
}

impl MockBehavior {
    pub fn pass() -> Self {
        Self::Pass
    }

    /// Answer with `status` and `reason` as a text body.
    pub fn reject(status: u16, reason: impl Into<String>) -> Self {
        Self::Reject {
            status,
            reason: reason.into(),
        }
    }

    pub fn connect_error(reason: impl Into<String>) -> Self {
        Self::ConnectError {
            reason: reason.into(),
        }
    }

    pub fn send_error(reason: impl Into<String>) -> Self {
        Self::SendError {
            reason: reason.into(),
        }
    }

    pub fn receive_error(reason: impl Into<String>) -> Self {
        Self::ReceiveError {
            reason: reason.into(),
        }
    }

    pub fn timeout_error(reason: impl Into<String>) -> Self {
        Self::TimeoutError {
            reason: reason.into(),
        }
    }

    pub fn internal_error(reason: impl Into<String>) -> Self {
        Self::InternalError {
            reason: reason.into(),
        }
    }

    pub fn drop_response() -> Self {
        Self::Drop
    }

    pub fn replay(frames: impl IntoIterator<Item = MockResponse>) -> Self {
        Self::Replay(frames.into_iter().collect())
    }
}

#[derive(Clone, Debug, Default)]
pub struct MockBehaviorPlan {
    request: VecDeque<MockBehavior>,
}

impl MockBehaviorPlan {
    pub fn push(&mut self, behavior: MockBehavior) -> &mut Self {
        self.request.push_back(behavior);
        self
    }

    pub fn pop(&mut self) -> MockBehavior {
        self.request.pop_front().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.request.len()
    }

    pub fn is_empty(&self) -> bool {
        self.request.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, RestBytes)>,
    pub body: RestBytes,
}

impl MockResponse {
    pub fn new(status: u16, body: impl Into<RestBytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<RestBytes>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status, body.into())
    }

    pub fn json<T: Serialize>(status: u16, payload: &T) -> RestResult<Self> {
        let body = to_vec(payload)?;
        Ok(Self::new(status, body).with_header("content-type", "application/json"))
    }

    pub fn no_content() -> Self {
        Self::new(204, Bytes::new())
    }

    pub fn not_modified() -> Self {
        Self::new(304, Bytes::new())
    }
}

#[derive(Clone, Debug)]
pub struct MockRestStateSnapshot {
    pub state: MockTransportState,
    pub request_count: usize,
    pub last_url: Option<String>,
    pub last_status: Option<u16>,
    pub behavior_remaining: usize,
    pub response_queue_len: usize,
    pub route_queue_len: usize,
    pub inbound_count: usize,
    pub outbound_count: usize,
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct MockRestAdapterState {
    state: MockTransportState,
    request_count: usize,
    last_url: Option<String>,
    last_status: Option<u16>,
    behavior_plan: MockBehaviorPlan,
    default_response_queue: VecDeque<MockResponse>,
    route_response_queues: HashMap<(Method, String), VecDeque<MockResponse>>,
    outbound_log: Vec<RestRequest>,
    inbound_log: Vec<RestResponse>,
    last_error: Option<String>,
}

impl MockRestAdapterState {
    fn snapshot(&self) -> MockRestStateSnapshot {
        MockRestStateSnapshot {
            state: self.state,
            request_count: self.request_count,
            last_url: self.last_url.clone(),
            last_status: self.last_status,
            behavior_remaining: self.behavior_plan.len(),
            response_queue_len: self.default_response_queue.len(),
            route_queue_len: self.route_response_queues.values().map(VecDeque::len).sum(),
            inbound_count: self.inbound_log.len(),
            outbound_count: self.outbound_log.len(),
            last_error: self.last_error.clone(),
        }
    }

    fn next_response(&mut self, request: &RestRequest) -> Option<MockResponse> {
        let route_key = (request.method.clone(), request.url.clone());
        if let Some(response) = self
            .route_response_queues
            .get_mut(&route_key)
            .and_then(VecDeque::pop_front)
        {
            return Some(response);
        }
        self.default_response_queue.pop_front()
    }
}

impl Default for MockRestAdapterState {
    fn default() -> Self {
        Self {
            state: MockTransportState::Idle,
            request_count: 0,
            last_url: None,
            last_status: None,
            behavior_plan: MockBehaviorPlan::default(),
            default_response_queue: VecDeque::new(),
            route_response_queues: HashMap::new(),
            outbound_log: Vec::new(),
            inbound_log: Vec::new(),
            last_error: None,
        }
    }
}

/// In-memory transport for deterministic tests.
///
/// Responses queued for a `(method, url)` route are served before the shared
/// queue. With nothing queued the mock answers `200` with an empty body.
#[derive(Clone, Debug)]
pub struct MockRestAdapter {
    state: Arc<Mutex<MockRestAdapterState>>,
}

impl MockRestAdapter {
    pub fn new() -> Self {
        Self::with_behavior_plan(MockBehaviorPlan::default())
    }

    pub fn with_behavior_plan(behavior_plan: MockBehaviorPlan) -> Self {
        let state = MockRestAdapterState {
            behavior_plan,
            ..MockRestAdapterState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn snapshot(&self) -> MockRestStateSnapshot {
        self.state
            .lock()
            .expect("mock transport mutex poisoned while taking snapshot")
            .snapshot()
    }

    pub fn queue_response(&self, response: MockResponse) {
        self.state
            .lock()
            .expect("mock transport mutex poisoned while queueing response")
            .default_response_queue
            .push_back(response);
    }

    pub fn queue_response_for(
        &self,
        method: Method,
        url: impl Into<String>,
        response: MockResponse,
    ) {
        let key = (method, url.into());
        self.state
            .lock()
            .expect("mock transport mutex poisoned while queueing response by route")
            .route_response_queues
            .entry(key)
            .or_default()
            .push_back(response);
    }

    pub fn queue_post_response(&self, url: impl Into<String>, response: MockResponse) {
        self.queue_response_for(Method::POST, url, response);
    }

    pub fn queue_post_json<T: Serialize>(
        &self,
        url: impl Into<String>,
        status: u16,
        payload: &T,
    ) -> RestResult<()> {
        let response = MockResponse::json(status, payload)?;
        self.queue_post_response(url, response);
        Ok(())
    }

    /// Requests seen so far, oldest first.
    pub fn outbound_requests(&self) -> Vec<RestRequest> {
        self.state
            .lock()
            .expect("mock transport mutex poisoned while reading outbound log")
            .outbound_log
            .clone()
    }

    pub fn last_request(&self) -> Option<RestRequest> {
        self.state
            .lock()
            .expect("mock transport mutex poisoned while reading outbound log")
            .outbound_log
            .last()
            .cloned()
    }

    pub fn clear_logs(&self) {
        let mut state = self
            .state
            .lock()
            .expect("mock transport mutex poisoned while clearing logs");
        state.outbound_log.clear();
        state.inbound_log.clear();
    }

    fn fail(&self, kind: RestErrorKind, message: String) -> RestError {
        let mut state = self
            .state
            .lock()
            .expect("mock transport mutex poisoned while recording error");
        state.state = MockTransportState::Error;
        state.last_error = Some(message.clone());
        state.last_status = None;
        RestError::new(kind, None, message)
    }

    fn next_or_fallback(&self, request: &RestRequest, start: Instant) -> RestResponse {
        let queued = self
            .state
            .lock()
            .expect("mock transport mutex poisoned while selecting response")
            .next_response(request);
        let response = queued.unwrap_or_else(|| MockResponse::new(200, Bytes::new()));
        self.respond(response, start)
    }

    fn respond(&self, response: MockResponse, start: Instant) -> RestResponse {
        let response = RestResponse {
            status: response.status,
            headers: response.headers,
            body: response.body,
            elapsed: start.elapsed(),
        };
        let mut state = self
            .state
            .lock()
            .expect("mock transport mutex poisoned while recording inbound response");
        state.inbound_log.push(response.clone());
        state.last_status = Some(response.status);
        state.state = MockTransportState::Idle;
        response
    }
}

impl Default for MockRestAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl RestTransport for MockRestAdapter {
    fn execute(&self, request: RestRequest) -> RestFuture<RestResult<RestResponse>> {
        let adapter = self.clone();
        Box::pin(async move {
            let start = Instant::now();
            let behavior = {
                let mut state = adapter
                    .state
                    .lock()
                    .expect("mock transport mutex poisoned while updating state before execute");
                state.outbound_log.push(request.clone());
                state.request_count += 1;
                state.last_url = Some(request.url.clone());
                state.state = MockTransportState::Busy;
                state.last_error = None;
                state.behavior_plan.pop()
            };

            let (kind, reason) = match behavior {
                MockBehavior::Drop => (
                    RestErrorKind::Timeout,
                    "mock transport dropped response".to_string(),
                ),
                MockBehavior::ConnectError { reason } => (RestErrorKind::Connect, reason),
                MockBehavior::SendError { reason } => (RestErrorKind::Send, reason),
                MockBehavior::ReceiveError { reason } => (RestErrorKind::Receive, reason),
                MockBehavior::TimeoutError { reason } => (RestErrorKind::Timeout, reason),
                MockBehavior::InternalError { reason } => (RestErrorKind::Internal, reason),
                MockBehavior::Reject { status, reason } => {
                    return Ok(adapter.respond(MockResponse::text(status, reason), start));
                }
                MockBehavior::Replay(frames) => {
                    adapter
                        .state
                        .lock()
                        .expect("mock transport mutex poisoned while enqueueing replay responses")
                        .default_response_queue
                        .extend(frames);
                    return Ok(adapter.next_or_fallback(&request, start));
                }
                MockBehavior::Pass => return Ok(adapter.next_or_fallback(&request, start)),
            };

            Err(adapter.fail(kind, reason))
        })
    }
}

