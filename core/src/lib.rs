//! Simulated HTTP transport for the study planner.
//!
//! # Overview
//! Clients talk to in-process servers through a [`Network`] that delays,
//! drops and routes every message. A [`FakeRequest`] plays the role of an
//! XMLHttpRequest: it is opened, given headers, sent, and completes exactly
//! once through `on_load`, `on_error` or `on_timeout`. A [`CookieJar`] carries
//! session cookies between responses and later requests.
//!
//! # Design
//! - Time is `tokio::time`, so tests run on a paused clock.
//! - Randomness sits behind [`DelayPolicy`] / [`DropPolicy`] and can be
//!   seeded or forced.
//! - Servers implement [`ServerHandler`]; they never see the client's jar,
//!   only the `Cookie` header of the request.
//! - [`PlannerClient`] layers typed operations over `FakeRequest`, split into
//!   `build_*` / `execute` / `parse_*`.

pub mod client;
pub mod config;
pub mod cookie;
pub mod error;
pub mod http;
pub mod network;
pub mod policy;
pub mod request;
pub mod server;
pub mod types;

pub use client::{ApiRequest, PlannerClient, Session};
pub use config::{ClientConfig, Settings};
pub use cookie::CookieJar;
pub use error::{ApiError, ConfigError, Leg, StateError, TransportError};
pub use http::{HttpMethod, RequestDescriptor, ResponseDescriptor};
pub use network::{Network, NetworkConfig, NetworkConfigUpdate, NetworkStats};
pub use policy::{DelayPolicy, DropPolicy, RandomPolicy, SeededPolicy};
pub use request::{FakeRequest, ReadyState};
pub use server::{handler_fn, ServerHandler};
pub use types::{CreateTask, Envelope, Priority, Task, TaskFilter, UpdateTask, User};
