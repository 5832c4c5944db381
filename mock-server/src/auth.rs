//! Auth server: registration, login and profile lookup.
//!
//! Successful registration and login set the session cookie pair
//! (`study_planner_user_id`, `study_planner_email`). The email is
//! percent-encoded on the wire.

use std::sync::LazyLock;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use planner_core::cookie::{format_set_cookie, CookieOptions, EMAIL_COOKIE, USER_ID_COOKIE};
use planner_core::types::{AuthPayload, Envelope, RegisterUser, User};
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use crate::store::Db;
use crate::{claimed_user_id, endpoint_not_found, fail, ok, INVALID_REQUEST_DATA, MISSING_FIELDS, UNAUTHORIZED_ACCESS};

/// Session cookie lifetime announced in `Max-Age`.
pub const SESSION_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

static EMAIL_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok());

pub fn router(db: Db) -> Router {
    Router::new()
        .route("/api/auth/register", post(register).fallback(endpoint_not_found))
        .route("/api/auth/login", post(login).fallback(endpoint_not_found))
        .route("/api/auth/profile", get(profile).fallback(endpoint_not_found))
        .fallback(endpoint_not_found)
        .with_state(db)
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.as_ref().is_some_and(|pattern| pattern.is_match(email))
}

/// Non-empty string field of a JSON object.
fn text<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key)?.as_str().filter(|value| !value.is_empty())
}

fn parse_object(body: &str) -> Option<Value> {
    serde_json::from_str::<Value>(body).ok().filter(Value::is_object)
}

fn with_session(status: StatusCode, message: &str, user: User) -> Response {
    let options = CookieOptions {
        path: Some("/".to_string()),
        ..CookieOptions::default()
    };
    let cookies = [
        (
            header::SET_COOKIE,
            format_set_cookie(USER_ID_COOKIE, &user.id.to_string(), SESSION_MAX_AGE, &options),
        ),
        (
            header::SET_COOKIE,
            format_set_cookie(EMAIL_COOKIE, &urlencoding::encode(&user.email), SESSION_MAX_AGE, &options),
        ),
    ];
    (status, AppendHeaders(cookies), Json(Envelope::ok(message, AuthPayload { user }))).into_response()
}

async fn register(State(db): State<Db>, body: String) -> Response {
    let Some(data) = parse_object(&body) else {
        return fail(StatusCode::BAD_REQUEST, INVALID_REQUEST_DATA);
    };
    let (Some(email), Some(password), Some(name)) = (text(&data, "email"), text(&data, "password"), text(&data, "name"))
    else {
        return fail(StatusCode::BAD_REQUEST, MISSING_FIELDS);
    };
    if !is_valid_email(email) {
        return fail(StatusCode::BAD_REQUEST, "Invalid email format");
    }

    let mut store = db.write().await;
    if store.user_by_email(email).is_some() {
        warn!(email, "registration for existing user");
        return fail(StatusCode::CONFLICT, "User already exists");
    }
    let user = store.add_user(RegisterUser {
        email: email.to_string(),
        password: password.to_string(),
        name: name.to_string(),
    });
    drop(store);

    info!(user_id = %user.id, "user registered");
    with_session(StatusCode::CREATED, "Registration successful", user)
}

async fn login(State(db): State<Db>, body: String) -> Response {
    let Some(data) = parse_object(&body) else {
        return fail(StatusCode::BAD_REQUEST, INVALID_REQUEST_DATA);
    };
    let (Some(email), Some(password)) = (text(&data, "email"), text(&data, "password")) else {
        return fail(StatusCode::BAD_REQUEST, MISSING_FIELDS);
    };

    let user = db.read().await.verify(email, password).cloned();
    match user {
        Some(user) => {
            info!(user_id = %user.id, "user logged in");
            with_session(StatusCode::OK, "Login successful", user)
        }
        None => {
            warn!(email, "login rejected");
            fail(StatusCode::UNAUTHORIZED, "Invalid email or password")
        }
    }
}

async fn profile(State(db): State<Db>, headers: HeaderMap) -> Response {
    let Some(user_id) = claimed_user_id(&headers) else {
        return fail(StatusCode::UNAUTHORIZED, UNAUTHORIZED_ACCESS);
    };
    match db.read().await.user_by_id_str(&user_id) {
        Some(user) => ok(StatusCode::OK, "Profile retrieved", AuthPayload { user: user.clone() }),
        None => fail(StatusCode::NOT_FOUND, "User not found"),
    }
}
