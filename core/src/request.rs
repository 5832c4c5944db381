//! `FakeRequest`: an XMLHttpRequest look-alike that travels the simulated network.
//!
//! # Design
//! The request walks `UNSENT → OPENED → HEADERS_RECEIVED → DONE`. `send`
//! hands the descriptor to `Network::dispatch` and spawns a small driver task
//! that waits for the outcome, racing it against the optional timeout. The
//! driver reports back through `resolve`, which is the only place that enters
//! `DONE`.
//!
//! Exactly-once completion rests on two checks made under the same lock:
//! the state must still be `HEADERS_RECEIVED`, and the attempt number the
//! driver was started with must still be current. `abort` bumps the attempt
//! number, so a driver that loses the race against it finds itself stale and
//! does nothing. `DONE` is never left.
//!
//! Completion is observable two ways: the `on_load` / `on_error` /
//! `on_timeout` callbacks, and `wait()`, which resolves with the same outcome.
//! Callbacks always run before `wait()` returns.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cookie::CookieJar;
use crate::error::{Leg, StateError, TransportError};
use crate::http::{Headers, HttpMethod, RequestDescriptor, ResponseDescriptor, COOKIE, SET_COOKIE};
use crate::network::{Delivery, Network};
use crate::types::failure_body;

/// How a sent request ended.
pub type Outcome = Result<ResponseDescriptor, TransportError>;

type Callback = Arc<dyn Fn(&FakeRequest) + Send + Sync>;

/// Ready states. State 3 (loading) is not modeled: bodies arrive whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyState {
    Unsent = 0,
    Opened = 1,
    HeadersReceived = 2,
    Done = 4,
}

impl ReadyState {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReadyState::Unsent => "UNSENT",
            ReadyState::Opened => "OPENED",
            ReadyState::HeadersReceived => "HEADERS_RECEIVED",
            ReadyState::Done => "DONE",
        })
    }
}

#[derive(Default)]
struct Callbacks {
    on_load: Option<Callback>,
    on_error: Option<Callback>,
    on_timeout: Option<Callback>,
}

struct Inner {
    state: ReadyState,
    method: Option<HttpMethod>,
    url: String,
    headers: Headers,
    timeout: Duration,
    attempt: u64,
    driver: Option<JoinHandle<()>>,
    status: u16,
    status_text: String,
    response_text: String,
    response_headers: Vec<(String, String)>,
    callbacks: Callbacks,
}

struct Shared {
    network: Arc<Network>,
    cookies: CookieJar,
    inner: Mutex<Inner>,
    outcome: watch::Sender<Option<Outcome>>,
}

/// One logical HTTP call over the simulated network.
///
/// Not reusable: once `DONE`, build a new request for the next call.
pub struct FakeRequest {
    shared: Arc<Shared>,
}

impl fmt::Debug for FakeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("FakeRequest")
            .field("state", &inner.state)
            .field("method", &inner.method)
            .field("url", &inner.url)
            .field("status", &inner.status)
            .finish()
    }
}

fn invalid(operation: &'static str, state: ReadyState) -> StateError {
    StateError::InvalidState { operation, state }
}

impl FakeRequest {
    /// A fresh `UNSENT` request that will travel `network` and carry the
    /// cookies of `cookies`.
    pub fn new(network: Arc<Network>, cookies: CookieJar) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                network,
                cookies,
                inner: Mutex::new(Inner {
                    state: ReadyState::Unsent,
                    method: None,
                    url: String::new(),
                    headers: Headers::new(),
                    timeout: Duration::ZERO,
                    attempt: 0,
                    driver: None,
                    status: 0,
                    status_text: String::new(),
                    response_text: String::new(),
                    response_headers: Vec::new(),
                    callbacks: Callbacks::default(),
                }),
                outcome,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ready_state(&self) -> ReadyState {
        self.lock().state
    }

    /// Status code once `DONE`; 0 before that and for transport failures
    /// other than no-route.
    pub fn status(&self) -> u16 {
        self.lock().status
    }

    pub fn status_text(&self) -> String {
        self.lock().status_text.clone()
    }

    /// Response body, or a failure envelope when the transport failed.
    pub fn response_text(&self) -> String {
        self.lock().response_text.clone()
    }

    pub fn response_headers(&self) -> Vec<(String, String)> {
        self.lock().response_headers.clone()
    }

    pub fn method(&self) -> Option<HttpMethod> {
        self.lock().method
    }

    pub fn url(&self) -> String {
        self.lock().url.clone()
    }

    pub fn timeout(&self) -> Duration {
        self.lock().timeout
    }

    /// Client-side time limit, `Duration::ZERO` for none. Applies to the
    /// next `send`.
    pub fn set_timeout(&self, timeout: Duration) {
        self.lock().timeout = timeout;
    }

    pub fn on_load(&self, callback: impl Fn(&FakeRequest) + Send + Sync + 'static) {
        self.lock().callbacks.on_load = Some(Arc::new(callback));
    }

    pub fn on_error(&self, callback: impl Fn(&FakeRequest) + Send + Sync + 'static) {
        self.lock().callbacks.on_error = Some(Arc::new(callback));
    }

    /// Runs on timeout, before `on_error`.
    pub fn on_timeout(&self, callback: impl Fn(&FakeRequest) + Send + Sync + 'static) {
        self.lock().callbacks.on_timeout = Some(Arc::new(callback));
    }

    pub fn open(&self, method: HttpMethod, url: impl Into<String>) -> Result<(), StateError> {
        let url = url.into();
        let mut inner = self.lock();
        if inner.state != ReadyState::Unsent {
            return Err(invalid("open", inner.state));
        }
        debug!(method = %method, url = %url, "request opened");
        inner.method = Some(method);
        inner.url = url;
        inner.state = ReadyState::Opened;
        inner.status = 0;
        inner.status_text.clear();
        inner.response_text.clear();
        inner.response_headers.clear();
        self.shared.outcome.send_replace(None);
        Ok(())
    }

    pub fn set_request_header(&self, name: impl Into<String>, value: impl Into<String>) -> Result<(), StateError> {
        let mut inner = self.lock();
        if inner.state != ReadyState::Opened {
            return Err(invalid("set a header", inner.state));
        }
        let (name, value) = (name.into(), value.into());
        debug!(header = %name, "request header set");
        inner.headers.insert(name, value);
        Ok(())
    }

    /// Put the request on the network.
    ///
    /// Every live cookie in the jar is attached as one `Cookie` header,
    /// replacing any value the caller set. Must be called from within a
    /// Tokio runtime.
    pub fn send(&self, body: Option<String>) -> Result<(), StateError> {
        let runtime = Handle::try_current().map_err(|_| StateError::NoRuntime)?;
        let mut inner = self.lock();
        let method = match (inner.state, inner.method) {
            (ReadyState::Opened, Some(method)) => method,
            (state, _) => return Err(invalid("send", state)),
        };

        if let Some(cookie) = self.shared.cookies.cookie_header() {
            debug!(url = %inner.url, "cookies attached to request");
            inner.headers.insert(COOKIE.to_string(), cookie);
        }

        let request = RequestDescriptor {
            method,
            url: inner.url.clone(),
            headers: inner.headers.clone(),
            body,
            issued_at: Instant::now(),
        };
        let timeout = inner.timeout;
        debug!(method = %method, url = %request.url, timeout_ms = timeout.as_millis() as u64, "sending request through network");
        let delivery = self.shared.network.dispatch(request)?;

        inner.state = ReadyState::HeadersReceived;
        inner.attempt += 1;
        let attempt = inner.attempt;
        self.shared.outcome.send_replace(None);
        let shared = Arc::clone(&self.shared);
        inner.driver = Some(runtime.spawn(async move {
            let outcome = await_delivery(delivery, timeout).await;
            FakeRequest { shared }.resolve(attempt, outcome);
        }));
        Ok(())
    }

    /// Stop caring about the in-flight exchange and return to `UNSENT`.
    ///
    /// No callback runs. The server may still receive and process the
    /// request; only this object ignores the result. After `DONE` this is a
    /// no-op.
    pub fn abort(&self) {
        let mut inner = self.lock();
        if inner.state == ReadyState::Done {
            debug!(url = %inner.url, "abort after completion ignored");
            return;
        }
        let was_in_flight = inner.state == ReadyState::HeadersReceived;
        if let Some(driver) = inner.driver.take() {
            driver.abort();
        }
        inner.attempt += 1;
        inner.state = ReadyState::Unsent;
        inner.headers.clear();
        if was_in_flight {
            self.shared
                .outcome
                .send_replace(Some(Err(TransportError::Aborted)));
        }
        info!(url = %inner.url, "request aborted");
    }

    /// Resolve with the outcome of the current attempt.
    ///
    /// Returns `NotSent` for a request that was never sent and `Aborted` if
    /// the attempt was aborted.
    pub async fn wait(&self) -> Outcome {
        let mut receiver = self.shared.outcome.subscribe();
        let state = self.ready_state();
        let outcome = if matches!(state, ReadyState::Unsent | ReadyState::Opened) {
            receiver.borrow().clone()
        } else {
            match receiver.wait_for(|outcome| outcome.is_some()).await {
                Ok(outcome) => outcome.clone(),
                Err(_) => None,
            }
        };
        outcome.unwrap_or(Err(TransportError::NotSent))
    }

    fn resolve(&self, attempt: u64, outcome: Outcome) {
        let callbacks = {
            let mut inner = self.lock();
            if inner.state != ReadyState::HeadersReceived || inner.attempt != attempt {
                debug!(url = %inner.url, "late completion ignored");
                return;
            }
            inner.driver = None;
            inner.state = ReadyState::Done;

            match &outcome {
                Ok(response) => {
                    for header in response.header_values(SET_COOKIE) {
                        if let Some(name) = self.shared.cookies.store_set_cookie(header) {
                            debug!(cookie = %name, "cookie set from server");
                        }
                    }
                    inner.status = response.status;
                    inner.status_text = response.status_text.clone();
                    inner.response_text = response.body.clone();
                    inner.response_headers = response.headers.clone();
                    debug!(url = %inner.url, status = response.status, "response received");
                    vec![inner.callbacks.on_load.clone()]
                }
                Err(error) => {
                    inner.status = error.status();
                    inner.status_text = if error.is_timeout() {
                        "Timeout".to_string()
                    } else {
                        error.message()
                    };
                    inner.response_text = failure_body(&error.message());
                    info!(url = %inner.url, %error, "request failed");
                    if error.is_timeout() {
                        vec![inner.callbacks.on_timeout.clone(), inner.callbacks.on_error.clone()]
                    } else {
                        vec![inner.callbacks.on_error.clone()]
                    }
                }
            }
        };

        for callback in callbacks.into_iter().flatten() {
            callback(self);
        }
        self.shared.outcome.send_replace(Some(outcome));
    }
}

async fn await_delivery(delivery: Delivery, timeout: Duration) -> Outcome {
    let received = if timeout.is_zero() {
        delivery.await
    } else {
        match tokio::time::timeout(timeout, delivery).await {
            Ok(received) => received,
            Err(_) => return Err(TransportError::Timeout { after: timeout }),
        }
    };
    // The exchange task only vanishes without answering when the runtime
    // shuts down under it.
    received.unwrap_or(Err(TransportError::Dropped { leg: Leg::Response }))
}
