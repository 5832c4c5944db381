//! Simulated network: routing, latency and loss between clients and servers.
//!
//! # Design
//! A request travels two legs. Each leg independently rolls the drop policy
//! and waits a delay drawn from the configured range, so a request can be
//! fully processed by its server while the client never hears back. Callers
//! must treat a response-leg drop as "outcome unknown".
//!
//! `Network` is shared as `Arc<Network>`; configuration, routes and counters
//! live behind interior mutability so the same instance can be reconfigured
//! while requests are in flight. `dispatch` runs the exchange on its own task,
//! which keeps going even if the caller stops listening.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, Leg, StateError, TransportError};
use crate::http::{RequestDescriptor, ResponseDescriptor};
use crate::policy::{DelayPolicy, DropPolicy, RandomPolicy};
use crate::server::ServerHandler;

/// Delay before a no-route failure is reported.
pub const NO_ROUTE_DELAY: Duration = Duration::from_millis(100);

/// Latency range and loss probability applied to both legs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Probability in `[0, 1]` that a single leg is lost.
    pub drop_rate: f64,
}

impl NetworkConfig {
    /// No latency and no loss.
    pub fn instant() -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            drop_rate: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_delay > self.max_delay {
            return Err(ConfigError::InvalidDelayRange {
                min: self.min_delay,
                max: self.max_delay,
            });
        }
        if !(0.0..=1.0).contains(&self.drop_rate) {
            return Err(ConfigError::InvalidDropRate(self.drop_rate));
        }
        Ok(())
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(3000),
            drop_rate: 0.2,
        }
    }
}

/// Partial configuration change; absent fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetworkConfigUpdate {
    pub min_delay: Option<Duration>,
    pub max_delay: Option<Duration>,
    pub drop_rate: Option<f64>,
}

impl NetworkConfigUpdate {
    pub fn apply_to(&self, config: NetworkConfig) -> NetworkConfig {
        NetworkConfig {
            min_delay: self.min_delay.unwrap_or(config.min_delay),
            max_delay: self.max_delay.unwrap_or(config.max_delay),
            drop_rate: self.drop_rate.unwrap_or(config.drop_rate),
        }
    }
}

/// Counters for one direction of travel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LegStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
}

/// Snapshot of the network counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    pub requests: LegStats,
    pub responses: LegStats,
}

impl fmt::Display for NetworkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requests: {} sent, {} delivered, {} dropped; responses: {} sent, {} delivered, {} dropped",
            self.requests.sent,
            self.requests.delivered,
            self.requests.dropped,
            self.responses.sent,
            self.responses.delivered,
            self.responses.dropped,
        )
    }
}

#[derive(Debug, Default)]
struct LegCounters {
    sent: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl LegCounters {
    fn snapshot(&self) -> LegStats {
        LegStats {
            sent: self.sent.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.sent.store(0, Ordering::Relaxed);
        self.delivered.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct Route {
    prefix: String,
    handler: Arc<dyn ServerHandler>,
}

/// Receives the outcome of one `Network::dispatch`.
pub type Delivery = oneshot::Receiver<Result<ResponseDescriptor, TransportError>>;

pub struct Network {
    config: RwLock<NetworkConfig>,
    routes: RwLock<Vec<Route>>,
    requests: LegCounters,
    responses: LegCounters,
    delay_policy: Arc<dyn DelayPolicy>,
    drop_policy: Arc<dyn DropPolicy>,
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("config", &self.config())
            .field("prefixes", &self.prefixes())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Network {
    /// A network with random delay and loss.
    pub fn new(config: NetworkConfig) -> Result<Self, ConfigError> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> NetworkBuilder {
        NetworkBuilder::default()
    }

    pub fn config(&self) -> NetworkConfig {
        *self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge `update` into the current configuration. Rejected updates leave
    /// the configuration unchanged.
    pub fn update_config(&self, update: NetworkConfigUpdate) -> Result<NetworkConfig, ConfigError> {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        let next = update.apply_to(*config);
        next.validate()?;
        *config = next;
        info!(
            min_delay_ms = next.min_delay.as_millis() as u64,
            max_delay_ms = next.max_delay.as_millis() as u64,
            drop_rate = next.drop_rate,
            "network configuration updated"
        );
        Ok(next)
    }

    /// Register `handler` for every URL starting with `prefix`.
    ///
    /// Registrations are never deduplicated; see `route` for how overlaps
    /// are resolved.
    pub fn register_server(&self, prefix: impl Into<String>, handler: Arc<dyn ServerHandler>) {
        let prefix = prefix.into();
        info!(prefix = %prefix, "server registered");
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Route { prefix, handler });
    }

    /// Registered prefixes in registration order.
    pub fn prefixes(&self) -> Vec<String> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|route| route.prefix.clone())
            .collect()
    }

    /// Handler for `url`: the longest matching prefix wins, and among equal
    /// prefixes the earliest registration.
    pub fn route(&self, url: &str) -> Option<Arc<dyn ServerHandler>> {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let mut best: Option<&Route> = None;
        for route in routes.iter().filter(|r| url.starts_with(&r.prefix)) {
            if best.map_or(true, |b| route.prefix.len() > b.prefix.len()) {
                best = Some(route);
            }
        }
        best.map(|route| Arc::clone(&route.handler))
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            requests: self.requests.snapshot(),
            responses: self.responses.snapshot(),
        }
    }

    pub fn reset_stats(&self) {
        self.requests.reset();
        self.responses.reset();
        info!("network statistics reset");
    }

    fn next_delay(&self) -> Duration {
        let config = self.config();
        self.delay_policy.next_delay(config.min_delay, config.max_delay)
    }

    fn roll_drop(&self) -> bool {
        self.drop_policy.should_drop(self.config().drop_rate)
    }

    /// Run the exchange on a new task and return where its outcome lands.
    ///
    /// The task runs to completion even if the receiver is dropped, so a
    /// server that already received the request still finishes its work.
    /// Fails with `NoRuntime` outside a Tokio runtime.
    pub fn dispatch(self: &Arc<Self>, request: RequestDescriptor) -> Result<Delivery, StateError> {
        let runtime = Handle::try_current().map_err(|_| StateError::NoRuntime)?;
        let (tx, rx) = oneshot::channel();
        let network = Arc::clone(self);
        runtime.spawn(async move {
            let url = request.url.clone();
            let outcome = network.exchange(request).await;
            if tx.send(outcome).is_err() {
                debug!(url = %url, "caller no longer waiting, outcome discarded");
            }
        });
        Ok(rx)
    }

    /// Carry `request` to its server and the response back, in place.
    pub async fn exchange(&self, request: RequestDescriptor) -> Result<ResponseDescriptor, TransportError> {
        bump(&self.requests.sent);
        debug!(method = %request.method, url = %request.url, "request received from client");

        if self.roll_drop() {
            bump(&self.requests.dropped);
            warn!(url = %request.url, "request dropped");
            tokio::time::sleep(self.next_delay()).await;
            return Err(TransportError::Dropped { leg: Leg::Request });
        }

        let Some(handler) = self.route(&request.url) else {
            bump(&self.requests.dropped);
            warn!(url = %request.url, "no server registered for url");
            tokio::time::sleep(NO_ROUTE_DELAY).await;
            return Err(TransportError::NoRoute { url: request.url });
        };

        let delay = self.next_delay();
        debug!(url = %request.url, delay_ms = delay.as_millis() as u64, "request in transit");
        tokio::time::sleep(delay).await;
        bump(&self.requests.delivered);
        debug!(url = %request.url, "request delivered to server");

        let url = request.url.clone();
        match tokio::spawn(async move { handler.handle_request(request).await }).await {
            Ok(response) => self.carry_response(response).await,
            Err(e) => {
                // A handler that panics never answers; the client sees a lost response.
                warn!(url = %url, error = %e, "server failed while handling request");
                bump(&self.responses.sent);
                self.lose_response().await
            }
        }
    }

    async fn lose_response(&self) -> Result<ResponseDescriptor, TransportError> {
        bump(&self.responses.dropped);
        tokio::time::sleep(self.next_delay()).await;
        Err(TransportError::Dropped { leg: Leg::Response })
    }

    async fn carry_response(&self, response: ResponseDescriptor) -> Result<ResponseDescriptor, TransportError> {
        bump(&self.responses.sent);
        debug!(status = response.status, "response received from server");

        if self.roll_drop() {
            warn!(status = response.status, "response dropped");
            return self.lose_response().await;
        }

        let delay = self.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "response in transit");
        tokio::time::sleep(delay).await;
        bump(&self.responses.delivered);
        debug!(status = response.status, "response delivered to client");
        Ok(response)
    }
}

/// Builder for `Network`, mainly to swap in deterministic policies.
pub struct NetworkBuilder {
    config: NetworkConfig,
    delay_policy: Arc<dyn DelayPolicy>,
    drop_policy: Arc<dyn DropPolicy>,
}

impl Default for NetworkBuilder {
    fn default() -> Self {
        Self {
            config: NetworkConfig::default(),
            delay_policy: Arc::new(RandomPolicy),
            drop_policy: Arc::new(RandomPolicy),
        }
    }
}

impl NetworkBuilder {
    pub fn config(mut self, config: NetworkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn delay_policy(mut self, policy: impl DelayPolicy + 'static) -> Self {
        self.delay_policy = Arc::new(policy);
        self
    }

    pub fn drop_policy(mut self, policy: impl DropPolicy + 'static) -> Self {
        self.drop_policy = Arc::new(policy);
        self
    }

    /// Use one shared policy object for both decisions, e.g. a `SeededPolicy`
    /// so that a single seed reproduces the whole run.
    pub fn policy<P>(mut self, policy: P) -> Self
    where
        P: DelayPolicy + DropPolicy + 'static,
    {
        let policy = Arc::new(policy);
        self.delay_policy = policy.clone();
        self.drop_policy = policy;
        self
    }

    pub fn build(self) -> Result<Network, ConfigError> {
        self.config.validate()?;
        info!(
            min_delay_ms = self.config.min_delay.as_millis() as u64,
            max_delay_ms = self.config.max_delay.as_millis() as u64,
            drop_rate = self.config.drop_rate,
            "network initialized"
        );
        Ok(Network {
            config: RwLock::new(self.config),
            routes: RwLock::new(Vec::new()),
            requests: LegCounters::default(),
            responses: LegCounters::default(),
            delay_policy: self.delay_policy,
            drop_policy: self.drop_policy,
        })
    }
}
