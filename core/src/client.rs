//! Request builder, executor and response parser for the planner API.
//!
//! # Design
//! Each operation is split into a `build_*` method that produces an
//! [`ApiRequest`], [`PlannerClient::execute`] which carries it across the
//! simulated network in a [`FakeRequest`], and a `parse_*` method that turns
//! the `ResponseDescriptor` into a typed value. The async convenience methods
//! (`login`, `create_task`, ...) chain the three.
//!
//! A response is accepted only when the status is 200 or 201 and the
//! envelope reports `success`. Everything else is an [`ApiError`].
//!
//! Authentication rides on the session cookies the auth server sets; the
//! client's jar attaches them to every request.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::cookie::{CookieJar, CookieOptions, EMAIL_COOKIE, USER_ID_COOKIE};
use crate::error::ApiError;
use crate::http::{status, HttpMethod, ResponseDescriptor, CONTENT_TYPE, CONTENT_TYPE_JSON};
use crate::network::Network;
use crate::request::FakeRequest;
use crate::types::{
    AuthPayload, CreateTask, Credentials, DeletedPayload, Envelope, RegisterUser, Task, TaskFilter,
    TaskListPayload, TaskPayload, UpdateTask, User,
};

pub const AUTH_BASE: &str = "/api/auth";
pub const TASKS_BASE: &str = "/api/tasks";

/// A request ready to be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl ApiRequest {
    fn new(method: HttpMethod, url: String) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    fn json(method: HttpMethod, url: String, payload: &impl Serialize) -> Result<Self, ApiError> {
        let body = serde_json::to_string(payload).map_err(|e| ApiError::Serialization(e.to_string()))?;
        Ok(Self {
            method,
            url,
            headers: vec![(CONTENT_TYPE.to_string(), CONTENT_TYPE_JSON.to_string())],
            body: Some(body),
        })
    }
}

/// Identity stored in the session cookies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub email: String,
}

/// Client for the auth and tasks servers.
#[derive(Debug, Clone)]
pub struct PlannerClient {
    network: Arc<Network>,
    cookies: CookieJar,
    config: ClientConfig,
}

impl PlannerClient {
    pub fn new(network: Arc<Network>, cookies: CookieJar, config: ClientConfig) -> Self {
        Self {
            network,
            cookies,
            config,
        }
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn build_register(&self, input: &RegisterUser) -> Result<ApiRequest, ApiError> {
        ApiRequest::json(HttpMethod::Post, format!("{AUTH_BASE}/register"), input)
    }

    pub fn build_login(&self, input: &Credentials) -> Result<ApiRequest, ApiError> {
        ApiRequest::json(HttpMethod::Post, format!("{AUTH_BASE}/login"), input)
    }

    pub fn build_profile(&self) -> ApiRequest {
        ApiRequest::new(HttpMethod::Get, format!("{AUTH_BASE}/profile"))
    }

    pub fn build_list_tasks(&self, filter: &TaskFilter) -> ApiRequest {
        let query = filter.to_query();
        let url = if query.is_empty() {
            TASKS_BASE.to_string()
        } else {
            format!("{TASKS_BASE}?{query}")
        };
        ApiRequest::new(HttpMethod::Get, url)
    }

    pub fn build_get_task(&self, id: Uuid) -> ApiRequest {
        ApiRequest::new(HttpMethod::Get, format!("{TASKS_BASE}/{id}"))
    }

    pub fn build_create_task(&self, input: &CreateTask) -> Result<ApiRequest, ApiError> {
        ApiRequest::json(HttpMethod::Post, TASKS_BASE.to_string(), input)
    }

    pub fn build_update_task(&self, id: Uuid, input: &UpdateTask) -> Result<ApiRequest, ApiError> {
        ApiRequest::json(HttpMethod::Put, format!("{TASKS_BASE}/{id}"), input)
    }

    pub fn build_delete_task(&self, id: Uuid) -> ApiRequest {
        ApiRequest::new(HttpMethod::Delete, format!("{TASKS_BASE}/{id}"))
    }

    /// Run one request through the network and wait for its outcome.
    pub async fn execute(&self, request: ApiRequest) -> Result<ResponseDescriptor, ApiError> {
        let fake = FakeRequest::new(Arc::clone(&self.network), self.cookies.clone());
        fake.set_timeout(self.config.request_timeout);
        fake.open(request.method, request.url)?;
        for (name, value) in request.headers {
            fake.set_request_header(name, value)?;
        }
        fake.send(request.body)?;
        Ok(fake.wait().await?)
    }

    pub fn parse_register(&self, response: &ResponseDescriptor) -> Result<User, ApiError> {
        read_data::<AuthPayload>(response).map(|payload| payload.user)
    }

    pub fn parse_login(&self, response: &ResponseDescriptor) -> Result<User, ApiError> {
        read_data::<AuthPayload>(response).map(|payload| payload.user)
    }

    pub fn parse_profile(&self, response: &ResponseDescriptor) -> Result<User, ApiError> {
        read_data::<AuthPayload>(response).map(|payload| payload.user)
    }

    pub fn parse_list_tasks(&self, response: &ResponseDescriptor) -> Result<Vec<Task>, ApiError> {
        read_data::<TaskListPayload>(response).map(|payload| payload.tasks)
    }

    pub fn parse_task(&self, response: &ResponseDescriptor) -> Result<Task, ApiError> {
        read_data::<TaskPayload>(response).map(|payload| payload.task)
    }

    pub fn parse_delete_task(&self, response: &ResponseDescriptor) -> Result<Uuid, ApiError> {
        read_data::<DeletedPayload>(response).map(|payload| payload.task_id)
    }

    pub async fn register(&self, input: &RegisterUser) -> Result<User, ApiError> {
        let response = self.execute(self.build_register(input)?).await?;
        let user = self.parse_register(&response)?;
        info!(user_id = %user.id, "registered");
        Ok(user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let credentials = Credentials {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self.execute(self.build_login(&credentials)?).await?;
        let user = self.parse_login(&response)?;
        info!(user_id = %user.id, "logged in");
        Ok(user)
    }

    pub async fn profile(&self) -> Result<User, ApiError> {
        let response = self.execute(self.build_profile()).await?;
        self.parse_profile(&response)
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, ApiError> {
        let response = self.execute(self.build_list_tasks(filter)).await?;
        self.parse_list_tasks(&response)
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Task, ApiError> {
        let response = self.execute(self.build_get_task(id)).await?;
        self.parse_task(&response)
    }

    pub async fn create_task(&self, input: &CreateTask) -> Result<Task, ApiError> {
        let response = self.execute(self.build_create_task(input)?).await?;
        self.parse_task(&response)
    }

    pub async fn update_task(&self, id: Uuid, input: &UpdateTask) -> Result<Task, ApiError> {
        let response = self.execute(self.build_update_task(id, input)?).await?;
        self.parse_task(&response)
    }

    pub async fn delete_task(&self, id: Uuid) -> Result<Uuid, ApiError> {
        let response = self.execute(self.build_delete_task(id)).await?;
        self.parse_delete_task(&response)
    }

    /// Forget the session by deleting both session cookies. Local only; no
    /// request is sent.
    pub fn logout(&self) {
        let options = CookieOptions {
            path: Some("/".into()),
            ..CookieOptions::default()
        };
        self.cookies.delete(USER_ID_COOKIE, options.clone());
        self.cookies.delete(EMAIL_COOKIE, options);
        info!("logged out");
    }

    /// Session from the cookie pair, if both cookies are live.
    pub fn restore_session(&self) -> Option<Session> {
        let user_id = self.cookies.get(USER_ID_COOKIE)?;
        let raw_email = self.cookies.get(EMAIL_COOKIE)?;
        let email = urlencoding::decode(&raw_email)
            .map(|decoded| decoded.into_owned())
            .unwrap_or(raw_email);
        debug!(%user_id, "session restored from cookies");
        Some(Session { user_id, email })
    }
}

fn rejection(status: u16, message: String) -> ApiError {
    if status == status::NOT_FOUND {
        ApiError::NotFound { message }
    } else {
        ApiError::Rejected { status, message }
    }
}

/// Accept 200/201 with `success: true` and return the envelope's data.
fn read_data<T: DeserializeOwned>(response: &ResponseDescriptor) -> Result<T, ApiError> {
    let accepted = matches!(response.status, status::OK | status::CREATED);
    match serde_json::from_str::<Envelope<T>>(&response.body) {
        Ok(envelope) if accepted && envelope.success => envelope
            .data
            .ok_or_else(|| ApiError::Deserialization("envelope has no data".into())),
        Ok(envelope) => Err(rejection(response.status, envelope.message)),
        Err(e) if accepted => Err(ApiError::Deserialization(e.to_string())),
        Err(_) => Err(rejection(response.status, response.status_text.clone())),
    }
}
