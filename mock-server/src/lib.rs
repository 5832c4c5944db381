//! In-process auth and tasks servers for the simulated planner network.
//!
//! Both servers are axum routers over a shared [`store::Db`]. They never open
//! a socket: [`adapter::RouterHandler`] feeds them `RequestDescriptor`s from the
//! network and turns their responses back into `ResponseDescriptor`s.

use std::sync::Arc;

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use planner_core::client::{AUTH_BASE, TASKS_BASE};
use planner_core::cookie::{parse_cookie_header, USER_ID_COOKIE};
use planner_core::types::Envelope;
use planner_core::Network;
use serde::Serialize;
use tracing::{debug, info};

pub mod adapter;
pub mod auth;
pub mod store;
pub mod tasks;

pub use adapter::RouterHandler;
pub use store::{new_db, Db, Store};

pub const INVALID_REQUEST_DATA: &str = "Invalid request data";
pub const MISSING_FIELDS: &str = "Missing required fields";
pub const UNAUTHORIZED_ACCESS: &str = "Unauthorized access";
pub const ENDPOINT_NOT_FOUND: &str = "Endpoint not found";

/// Register both servers on `network` under their URL prefixes.
pub fn install(network: &Network, db: Db) {
    network.register_server(AUTH_BASE, Arc::new(RouterHandler::new("auth", auth::router(db.clone()))));
    network.register_server(TASKS_BASE, Arc::new(RouterHandler::new("tasks", tasks::router(db))));
    info!(auth = AUTH_BASE, tasks = TASKS_BASE, "servers registered");
}

/// Successful envelope response.
pub(crate) fn ok<T: Serialize>(status: StatusCode, message: &str, data: T) -> Response {
    debug!(status = status.as_u16(), message, "sending response");
    (status, Json(Envelope::ok(message, data))).into_response()
}

/// Failure envelope response with `data: null`.
pub(crate) fn fail(status: StatusCode, message: &str) -> Response {
    debug!(status = status.as_u16(), message, "sending failure");
    (status, Json(Envelope::<()>::failure(message))).into_response()
}

pub(crate) async fn endpoint_not_found() -> Response {
    fail(StatusCode::NOT_FOUND, ENDPOINT_NOT_FOUND)
}

/// User id a request claims, from the `UserId` header or else the session
/// cookie. Whether that user exists is for the caller to check.
pub(crate) fn claimed_user_id(headers: &HeaderMap) -> Option<String> {
    let from_header = headers
        .get("userid")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty());
    if let Some(id) = from_header {
        return Some(id.to_string());
    }
    let cookie = headers.get(header::COOKIE)?.to_str().ok()?;
    parse_cookie_header(cookie).remove(USER_ID_COOKIE)
}
