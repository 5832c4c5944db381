use std::future::Future;
use std::sync::Arc;

use mock_server::{install, new_db};
use planner_core::types::{CreateTask, Priority, RegisterUser, TaskFilter, UpdateTask};
use planner_core::{ApiError, CookieJar, Network, PlannerClient, RandomPolicy, SeededPolicy, Settings};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const ATTEMPTS: u32 = 5;

/// Run `op` again while it fails with a transient transport error.
async fn retry<T, F, Fut>(label: &str, mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < ATTEMPTS => {
                warn!(label, attempt, error = %e, "retrying");
                attempt += 1;
            }
            outcome => return outcome,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let settings = Settings::from_env()?;
    let builder = Network::builder().config(settings.network);
    let network = match settings.seed {
        Some(seed) => builder.policy(SeededPolicy::new(seed)),
        None => builder.policy(RandomPolicy),
    }
    .build()?;
    let network = Arc::new(network);
    install(&network, new_db());
    info!(seed = ?settings.seed, timeout_ms = settings.client.request_timeout.as_millis() as u64, "servers ready");

    let client = PlannerClient::new(Arc::clone(&network), CookieJar::new(), settings.client);
    let account = RegisterUser {
        email: "student@example.edu".into(),
        password: "study-hard".into(),
        name: "Demo Student".into(),
    };

    let user = match retry("register", || client.register(&account)).await {
        Ok(user) => user,
        // The first attempt may have landed even though its response was lost.
        Err(ApiError::Rejected { status: 409, .. }) => {
            retry("login", || client.login(&account.email, &account.password)).await?
        }
        Err(e) => return Err(e.into()),
    };
    info!(user_id = %user.id, email = %user.email, "signed in");

    let drafts = [
        ("Read chapter 4", "Biology", Priority::Medium),
        ("Problem set 7", "Calculus", Priority::High),
        ("Outline essay", "History", Priority::Low),
    ];
    let mut created = Vec::new();
    for (title, subject, priority) in drafts {
        let input = CreateTask {
            title: title.into(),
            subject: subject.into(),
            priority,
            ..Default::default()
        };
        match retry("create task", || client.create_task(&input)).await {
            Ok(task) => {
                info!(task_id = %task.id, title = %task.title, "task created");
                created.push(task);
            }
            Err(e) => warn!(title, error = %e, "task not created"),
        }
    }

    let everything = TaskFilter::default();
    let tasks = retry("list tasks", || client.list_tasks(&everything)).await?;
    info!(count = tasks.len(), "tasks on server");

    if let Some(first) = created.first() {
        let update = UpdateTask {
            completed: Some(true),
            ..Default::default()
        };
        let task = retry("update task", || client.update_task(first.id, &update)).await?;
        info!(task_id = %task.id, completed = task.completed, "task updated");
    }

    let open_only = TaskFilter {
        completed: Some(false),
        ..Default::default()
    };
    let open = retry("list open tasks", || client.list_tasks(&open_only)).await?;
    info!(count = open.len(), "open tasks");

    if let Some(last) = created.last() {
        match retry("delete task", || client.delete_task(last.id)).await {
            Ok(id) => info!(task_id = %id, "task deleted"),
            // A retried delete whose first response was lost finds nothing.
            Err(ApiError::NotFound { .. }) => info!(task_id = %last.id, "task already gone"),
            Err(e) => return Err(e.into()),
        }
    }

    let profile = retry("profile", || client.profile()).await?;
    info!(name = %profile.name, "profile loaded");

    client.logout();
    info!(session = ?client.restore_session(), "logged out");
    info!(stats = %network.stats(), "network stats");
    Ok(())
}
