//! In-memory users and tasks shared by the auth and tasks servers.

use std::sync::Arc;

use chrono::Utc;
use planner_core::types::{CreateTask, RegisterUser, Task, UpdateTask, User};
use tokio::sync::RwLock;
use uuid::Uuid;

pub type Db = Arc<RwLock<Store>>;

pub fn new_db() -> Db {
    Arc::new(RwLock::new(Store::default()))
}

#[derive(Debug, Clone)]
struct Account {
    user: User,
    password: String,
}

/// Users and tasks, kept in insertion order.
#[derive(Debug, Default)]
pub struct Store {
    accounts: Vec<Account>,
    tasks: Vec<Task>,
}

impl Store {
    /// Emails are stored and compared lowercased.
    pub fn user_by_email(&self, email: &str) -> Option<&User> {
        let email = email.to_lowercase();
        self.accounts
            .iter()
            .find(|account| account.user.email == email)
            .map(|account| &account.user)
    }

    pub fn user(&self, id: Uuid) -> Option<&User> {
        self.accounts
            .iter()
            .find(|account| account.user.id == id)
            .map(|account| &account.user)
    }

    /// Look a user up by the id string a client presented.
    pub fn user_by_id_str(&self, id: &str) -> Option<&User> {
        Uuid::parse_str(id).ok().and_then(|id| self.user(id))
    }

    pub fn add_user(&mut self, input: RegisterUser) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: input.email.to_lowercase(),
            name: input.name,
            created_at: Utc::now(),
        };
        self.accounts.push(Account {
            user: user.clone(),
            password: input.password,
        });
        user
    }

    /// The user when `email` and `password` match an account.
    pub fn verify(&self, email: &str, password: &str) -> Option<&User> {
        let email = email.to_lowercase();
        self.accounts
            .iter()
            .find(|account| account.user.email == email && account.password == password)
            .map(|account| &account.user)
    }

    pub fn tasks_for(&self, user_id: Uuid) -> Vec<Task> {
        self.tasks.iter().filter(|task| task.user_id == user_id).cloned().collect()
    }

    /// Case-insensitive keyword match on title, description and subject.
    pub fn search(&self, user_id: Uuid, keyword: &str) -> Vec<Task> {
        let keyword = keyword.to_lowercase();
        self.tasks
            .iter()
            .filter(|task| task.user_id == user_id)
            .filter(|task| {
                task.title.to_lowercase().contains(&keyword)
                    || task.description.to_lowercase().contains(&keyword)
                    || task.subject.to_lowercase().contains(&keyword)
            })
            .cloned()
            .collect()
    }

    pub fn tasks_by_status(&self, user_id: Uuid, completed: bool) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|task| task.user_id == user_id && task.completed == completed)
            .cloned()
            .collect()
    }

    pub fn tasks_by_priority(&self, user_id: Uuid, priority: &str) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|task| task.user_id == user_id && task.priority.as_str() == priority)
            .cloned()
            .collect()
    }

    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn add_task(&mut self, user_id: Uuid, input: CreateTask) -> Task {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            user_id,
            title: input.title,
            description: input.description,
            subject: input.subject,
            due_date: input.due_date,
            priority: input.priority,
            completed: false,
            created_at: now,
            updated_at: now,
        };
        self.tasks.push(task.clone());
        task
    }

    /// Apply `update`; id, owner and creation time never change.
    pub fn update_task(&mut self, id: Uuid, update: &UpdateTask) -> Option<Task> {
        let task = self.tasks.iter_mut().find(|task| task.id == id)?;
        update.apply(task);
        task.updated_at = Utc::now();
        Some(task.clone())
    }

    pub fn delete_task(&mut self, id: Uuid) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|task| task.id != id);
        self.tasks.len() != before
    }
}
