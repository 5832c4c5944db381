//! Tasks server: per-user CRUD over study tasks.
//!
//! Every request is authenticated first, by the `UserId` header or else the
//! session cookie. Unknown users get 401 before routing happens. Tasks that
//! exist but belong to someone else are also 401, not 404.

use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Extension, Router};
use planner_core::types::{CreateTask, DeletedPayload, Task, TaskListPayload, TaskPayload, UpdateTask};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::Db;
use crate::{claimed_user_id, endpoint_not_found, fail, ok, INVALID_REQUEST_DATA, MISSING_FIELDS, UNAUTHORIZED_ACCESS};

pub const TASK_NOT_FOUND: &str = "Task not found";

/// The authenticated caller, inserted by `require_user`.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Uuid);

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub search: Option<String>,
    pub completed: Option<String>,
    pub priority: Option<String>,
}

pub fn router(db: Db) -> Router {
    Router::new()
        .route("/api/tasks", get(list_tasks).post(create_task).fallback(endpoint_not_found))
        .route(
            "/api/tasks/{id}",
            get(get_task).put(update_task).delete(delete_task).fallback(endpoint_not_found),
        )
        .fallback(endpoint_not_found)
        .layer(middleware::from_fn_with_state(db.clone(), require_user))
        .with_state(db)
}

async fn require_user(State(db): State<Db>, headers: HeaderMap, mut request: Request, next: Next) -> Response {
    let user = match claimed_user_id(&headers) {
        Some(id) => db.read().await.user_by_id_str(&id).map(|user| user.id),
        None => None,
    };
    let Some(user_id) = user else {
        debug!(uri = %request.uri(), "unauthenticated task request");
        return fail(StatusCode::UNAUTHORIZED, UNAUTHORIZED_ACCESS);
    };
    request.extensions_mut().insert(CurrentUser(user_id));
    next.run(request).await
}

/// The caller's own task, or the response to send instead.
async fn owned_task(db: &Db, user_id: Uuid, id: &str) -> Result<Task, Response> {
    let found = match Uuid::parse_str(id) {
        Ok(id) => db.read().await.task(id).cloned(),
        Err(_) => None,
    };
    let Some(task) = found else {
        return Err(fail(StatusCode::NOT_FOUND, TASK_NOT_FOUND));
    };
    if task.user_id != user_id {
        return Err(fail(StatusCode::UNAUTHORIZED, UNAUTHORIZED_ACCESS));
    }
    Ok(task)
}

async fn list_tasks(
    State(db): State<Db>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Query(params): Query<ListParams>,
) -> Response {
    let store = db.read().await;
    let tasks = if let Some(search) = params.search.as_deref().filter(|s| !s.is_empty()) {
        store.search(user_id, search)
    } else if let Some(completed) = params.completed.as_deref() {
        store.tasks_by_status(user_id, completed == "true")
    } else if let Some(priority) = params.priority.as_deref().filter(|p| !p.is_empty()) {
        store.tasks_by_priority(user_id, priority)
    } else {
        store.tasks_for(user_id)
    };
    drop(store);

    debug!(%user_id, count = tasks.len(), "tasks listed");
    ok(StatusCode::OK, "Tasks retrieved successfully", TaskListPayload { tasks })
}

async fn create_task(
    State(db): State<Db>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    body: String,
) -> Response {
    let Some(data) = serde_json::from_str::<Value>(&body).ok().filter(Value::is_object) else {
        return fail(StatusCode::BAD_REQUEST, INVALID_REQUEST_DATA);
    };
    if !matches!(data.get("title").and_then(Value::as_str), Some(title) if !title.is_empty()) {
        return fail(StatusCode::BAD_REQUEST, MISSING_FIELDS);
    }
    let Ok(input) = serde_json::from_value::<CreateTask>(data) else {
        return fail(StatusCode::BAD_REQUEST, INVALID_REQUEST_DATA);
    };

    let task = db.write().await.add_task(user_id, input);
    info!(%user_id, task_id = %task.id, "task created");
    ok(StatusCode::CREATED, "Task created successfully", TaskPayload { task })
}

async fn get_task(
    State(db): State<Db>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Response {
    match owned_task(&db, user_id, &id).await {
        Ok(task) => ok(StatusCode::OK, "Task retrieved successfully", TaskPayload { task }),
        Err(response) => response,
    }
}

async fn update_task(
    State(db): State<Db>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(id): Path<String>,
    body: String,
) -> Response {
    let task = match owned_task(&db, user_id, &id).await {
        Ok(task) => task,
        Err(response) => return response,
    };
    let Ok(update) = serde_json::from_str::<UpdateTask>(&body) else {
        return fail(StatusCode::BAD_REQUEST, INVALID_REQUEST_DATA);
    };

    match db.write().await.update_task(task.id, &update) {
        Some(task) => {
            info!(%user_id, task_id = %task.id, "task updated");
            ok(StatusCode::OK, "Task updated successfully", TaskPayload { task })
        }
        None => fail(StatusCode::NOT_FOUND, TASK_NOT_FOUND),
    }
}

async fn delete_task(
    State(db): State<Db>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Response {
    let task = match owned_task(&db, user_id, &id).await {
        Ok(task) => task,
        Err(response) => return response,
    };
    if !db.write().await.delete_task(task.id) {
        return fail(StatusCode::NOT_FOUND, TASK_NOT_FOUND);
    }
    info!(%user_id, task_id = %task.id, "task deleted");
    ok(StatusCode::OK, "Task deleted successfully", DeletedPayload { task_id: task.id })
}
