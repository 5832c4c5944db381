//! Client sessions against both servers over the simulated network.
//!
//! The clock is paused, so multi-second network delays cost nothing and
//! timing assertions are exact.

use std::sync::Arc;
use std::time::Duration;

use mock_server::{install, new_db, Db};
use planner_core::cookie::{EMAIL_COOKIE, USER_ID_COOKIE};
use planner_core::policy::{AlwaysDrop, FixedDelay, NeverDrop};
use planner_core::types::{CreateTask, Priority, RegisterUser, TaskFilter, UpdateTask};
use planner_core::{
    ApiError, ClientConfig, CookieJar, FakeRequest, HttpMethod, Leg, Network, NetworkConfig, PlannerClient,
    ReadyState, SeededPolicy, TransportError,
};
use tokio::time::Instant;

fn network_with(builder: planner_core::network::NetworkBuilder, db: &Db) -> Arc<Network> {
    let network = Arc::new(builder.build().unwrap());
    install(&network, db.clone());
    network
}

fn instant_network(db: &Db) -> Arc<Network> {
    network_with(Network::builder().config(NetworkConfig::instant()), db)
}

fn fixed_network(db: &Db, delay_ms: u64) -> Arc<Network> {
    let delay = Duration::from_millis(delay_ms);
    network_with(
        Network::builder()
            .config(NetworkConfig {
                min_delay: delay,
                max_delay: delay,
                drop_rate: 0.0,
            })
            .delay_policy(FixedDelay(delay))
            .drop_policy(NeverDrop),
        db,
    )
}

fn client(network: &Arc<Network>, timeout: Duration) -> PlannerClient {
    PlannerClient::new(
        Arc::clone(network),
        CookieJar::new(),
        ClientConfig {
            request_timeout: timeout,
        },
    )
}

fn ana() -> RegisterUser {
    RegisterUser {
        email: "Ana@Uni.edu".into(),
        password: "correct horse".into(),
        name: "Ana".into(),
    }
}

#[tokio::test(start_paused = true)]
async fn full_session_over_cookies() {
    let db = new_db();
    let network = instant_network(&db);
    let client = client(&network, Duration::ZERO);

    let user = client.register(&ana()).await.unwrap();
    assert_eq!(user.email, "ana@uni.edu");
    assert_eq!(client.cookies().get(USER_ID_COOKIE), Some(user.id.to_string()));
    assert_eq!(client.cookies().get(EMAIL_COOKIE).as_deref(), Some("ana%40uni.edu"));

    let essay = client
        .create_task(&CreateTask {
            title: "Essay".into(),
            subject: "History".into(),
            priority: Priority::High,
            ..Default::default()
        })
        .await
        .unwrap();
    client
        .create_task(&CreateTask {
            title: "Problem set".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(essay.user_id, user.id);

    let all = client.list_tasks(&TaskFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
    let high = client
        .list_tasks(&TaskFilter {
            priority: Some(Priority::High),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(high, vec![essay.clone()]);

    let done = client
        .update_task(
            essay.id,
            &UpdateTask {
                completed: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(done.completed);
    assert_eq!(client.get_task(essay.id).await.unwrap(), done);

    assert_eq!(client.delete_task(essay.id).await.unwrap(), essay.id);
    let err = client.get_task(essay.id).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound { message } if message == "Task not found"));

    assert_eq!(client.profile().await.unwrap().id, user.id);

    client.logout();
    let err = client.list_tasks(&TaskFilter::default()).await.unwrap_err();
    assert!(matches!(err, ApiError::Rejected { status: 401, .. }));
}

#[tokio::test(start_paused = true)]
async fn login_from_a_fresh_client_restores_identity() {
    let db = new_db();
    let network = instant_network(&db);
    let first = client(&network, Duration::ZERO);
    let registered = first.register(&ana()).await.unwrap();

    let second = client(&network, Duration::ZERO);
    assert_eq!(second.restore_session(), None);
    let err = second.login("ana@uni.edu", "wrong").await.unwrap_err();
    assert!(matches!(err, ApiError::Rejected { status: 401, message } if message == "Invalid email or password"));

    let user = second.login("ANA@uni.edu", "correct horse").await.unwrap();
    assert_eq!(user.id, registered.id);
    let session = second.restore_session().unwrap();
    assert_eq!(session.user_id, registered.id.to_string());
    assert_eq!(session.email, "ana@uni.edu");
}

#[tokio::test(start_paused = true)]
async fn users_cannot_see_each_others_tasks() {
    let db = new_db();
    let network = instant_network(&db);
    let ana_client = client(&network, Duration::ZERO);
    let ben_client = client(&network, Duration::ZERO);
    ana_client.register(&ana()).await.unwrap();
    ben_client
        .register(&RegisterUser {
            email: "ben@uni.edu".into(),
            password: "pw".into(),
            name: "Ben".into(),
        })
        .await
        .unwrap();

    let task = ana_client
        .create_task(&CreateTask {
            title: "Private".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let err = ben_client.get_task(task.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Rejected { status: 401, .. }));
    assert!(ben_client.list_tasks(&TaskFilter::default()).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn latency_is_paid_on_both_legs() {
    let db = new_db();
    let network = fixed_network(&db, 1500);
    let client = client(&network, Duration::ZERO);

    let start = Instant::now();
    client.register(&ana()).await.unwrap();
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_millis(3000) && elapsed < Duration::from_millis(3010),
        "{elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn timed_out_write_may_still_have_happened() {
    let db = new_db();
    let fast = instant_network(&db);
    let setup = client(&fast, Duration::ZERO);
    setup.register(&ana()).await.unwrap();

    let slow = fixed_network(&db, 1000);
    let impatient = PlannerClient::new(
        slow,
        setup.cookies().clone(),
        ClientConfig {
            request_timeout: Duration::from_millis(1500),
        },
    );
    let err = impatient
        .create_task(&CreateTask {
            title: "Maybe".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Transport(TransportError::Timeout { .. })));
    assert!(err.is_transient());

    // The request leg had already arrived, so the server created the task.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let tasks = setup.list_tasks(&TaskFilter::default()).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Maybe");
}

#[tokio::test(start_paused = true)]
async fn lost_requests_never_reach_the_server() {
    let db = new_db();
    let network = network_with(
        Network::builder()
            .config(NetworkConfig {
                drop_rate: 1.0,
                ..NetworkConfig::instant()
            })
            .drop_policy(AlwaysDrop),
        &db,
    );
    let client = client(&network, Duration::ZERO);

    let err = client.register(&ana()).await.unwrap_err();
    assert!(matches!(
        err,
        ApiError::Transport(TransportError::Dropped { leg: Leg::Request })
    ));
    assert!(db.read().await.user_by_email("ana@uni.edu").is_none());
    assert!(client.restore_session().is_none());
    assert_eq!(network.stats().requests.delivered, 0);
}

#[tokio::test(start_paused = true)]
async fn unregistered_prefix_is_server_not_found() {
    let db = new_db();
    let network = instant_network(&db);

    let req = FakeRequest::new(Arc::clone(&network), CookieJar::new());
    req.open(HttpMethod::Get, "/api/grades").unwrap();
    req.send(None).unwrap();
    let err = req.wait().await.unwrap_err();

    assert!(matches!(err, TransportError::NoRoute { .. }));
    assert_eq!(req.ready_state(), ReadyState::Done);
    assert_eq!(req.status(), 404);
    let body: serde_json::Value = serde_json::from_str(&req.response_text()).unwrap();
    assert_eq!(body["message"], "server not found");
}

#[tokio::test(start_paused = true)]
async fn aborted_request_is_still_processed_by_the_server() {
    let db = new_db();
    let network = fixed_network(&db, 500);

    let req = FakeRequest::new(Arc::clone(&network), CookieJar::new());
    req.on_load(|_| panic!("aborted request must not complete"));
    req.on_error(|_| panic!("aborted request must not complete"));
    req.open(HttpMethod::Post, "/api/auth/register").unwrap();
    req.set_request_header("Content-Type", "application/json").unwrap();
    req.send(Some(
        r#"{"email":"ana@uni.edu","password":"pw","name":"Ana"}"#.to_string(),
    ))
    .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    req.abort();
    assert_eq!(req.ready_state(), ReadyState::Unsent);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(db.read().await.user_by_email("ana@uni.edu").is_some());
    assert_eq!(req.ready_state(), ReadyState::Unsent);
    assert_eq!(req.status(), 0);
}

#[tokio::test(start_paused = true)]
async fn retries_get_through_a_lossy_network() {
    let db = new_db();
    let network = network_with(
        Network::builder()
            .config(NetworkConfig::default())
            .policy(SeededPolicy::new(7)),
        &db,
    );
    let client = client(&network, Duration::from_secs(10));

    let mut registered = None;
    for _ in 0..20 {
        match client.register(&ana()).await {
            Ok(user) => {
                registered = Some(user);
                break;
            }
            // A lost response means the account may exist already.
            Err(ApiError::Rejected { status: 409, .. }) => break,
            Err(e) if e.is_transient() => continue,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    let user = match registered {
        Some(user) => user,
        None => {
            let mut user = None;
            for _ in 0..20 {
                if let Ok(u) = client.login("ana@uni.edu", "correct horse").await {
                    user = Some(u);
                    break;
                }
            }
            user.expect("login eventually succeeds")
        }
    };

    let stats = network.stats();
    assert!(stats.requests.sent >= 1);
    assert_eq!(client.restore_session().unwrap().user_id, user.id.to_string());
}
