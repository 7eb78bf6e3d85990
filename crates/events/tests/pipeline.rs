//! Bus consumers against a real database: persistence and downstream
//! notification.

use std::time::Duration;

use renderwatch_db::models::production_job::CreateProductionJob;
use renderwatch_core::job_status::JobStatus;
use renderwatch_db::repositories::{EventRepo, ProductionJobRepo, TransitionGuard};
use renderwatch_events::{DownstreamNotifier, EventBus, EventPersistence, MonitorEvent, WebhookDelivery};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn new_job(pool: &PgPool) -> i64 {
    let input = CreateProductionJob {
        project_id: None,
        character_id: None,
        job_type: "image".into(),
        workflow: serde_json::json!({}),
        max_retries: None,
    };
    ProductionJobRepo::create(pool, &input, 3).await.unwrap().id
}

/// A job that ran on `prompt_id` and is now `processing`.
async fn processing_job(pool: &PgPool, prompt_id: &str) -> i64 {
    let job_id = new_job(pool).await;
    assert!(ProductionJobRepo::mark_submitted(pool, job_id, prompt_id).await.unwrap());
    job_id
}

async fn notified(pool: &PgPool, job_id: i64) -> bool {
    ProductionJobRepo::find_by_id(pool, job_id)
        .await
        .unwrap()
        .unwrap()
        .notified_at
        .is_some()
}

/// Poll until `check` holds or two seconds pass.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..40 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn persistence_writes_every_event(pool: PgPool) {
    let bus = EventBus::default();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(EventPersistence::run(
        pool.clone(),
        bus.subscribe(),
        cancel.clone(),
    ));

    bus.publish(MonitorEvent::for_job("job.completed", 5));
    bus.publish(MonitorEvent::for_job("job.resubmitted", 5));

    let db = &pool;
    let found = eventually(|| async move {
        EventRepo::list_for_entity(db, "production_job", 5)
            .await
            .unwrap()
            .len()
            == 2
    })
    .await;
    assert!(found, "both events should be persisted");

    cancel.cancel();
    assert_eq!(handle.await.unwrap(), 2);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn notifier_delivers_and_stamps_job(pool: PgPool) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orchestrator"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let job_id = processing_job(&pool, "p-1").await;
    assert!(ProductionJobRepo::mark_completed(&pool, job_id, "p-1", &["a.png".into()])
        .await
        .unwrap());
    let bus = EventBus::default();
    let cancel = CancellationToken::new();
    let notifier = DownstreamNotifier::new(pool.clone(), Some(format!("{}/orchestrator", server.uri())))
        .with_delivery(WebhookDelivery::new().with_retry_delays(vec![]));
    let handle = tokio::spawn(notifier.run(bus.subscribe(), cancel.clone()));

    // Not forwarded.
    bus.publish(MonitorEvent::for_job("job.resubmitted", job_id));
    bus.publish(MonitorEvent::for_job("job.completed", job_id));

    let db = &pool;
    let stamped = eventually(|| async move { notified(db, job_id).await }).await;
    assert!(stamped, "notified_at should be set after delivery");

    cancel.cancel();
    handle.await.unwrap();
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn failed_delivery_leaves_job_unstamped(pool: PgPool) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let job_id = new_job(&pool).await;
    let bus = EventBus::default();
    let cancel = CancellationToken::new();
    let notifier = DownstreamNotifier::new(pool.clone(), Some(server.uri()))
        .with_delivery(WebhookDelivery::new().with_retry_delays(vec![]));
    let handle = tokio::spawn(notifier.run(bus.subscribe(), cancel.clone()));

    bus.publish(MonitorEvent::for_job("job.failed", job_id));
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Cancelling waits for the in-flight delivery.
    cancel.cancel();
    handle.await.unwrap();

    let job = ProductionJobRepo::find_by_id(&pool, job_id).await.unwrap().unwrap();
    assert!(job.notified_at.is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn acknowledged_retry_does_not_cover_later_failure(pool: PgPool) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let job_id = processing_job(&pool, "p-1").await;
    let bus = EventBus::default();
    let cancel = CancellationToken::new();
    let notifier = DownstreamNotifier::new(pool.clone(), Some(server.uri()))
        .with_delivery(WebhookDelivery::new().with_retry_delays(vec![]));
    let handle = tokio::spawn(notifier.run(bus.subscribe(), cancel.clone()));

    // First outcome: a retry, acknowledged downstream.
    assert!(ProductionJobRepo::schedule_retry(
        &pool,
        job_id,
        TransitionGuard::Processing { prompt_id: "p-1" },
        "node failed",
        Duration::ZERO,
    )
    .await
    .unwrap());
    bus.publish(MonitorEvent::for_job("job.retry_scheduled", job_id));
    let db = &pool;
    assert!(eventually(|| async move { notified(db, job_id).await }).await);

    // The retry runs and fails for good; this delivery is rejected.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let claimed = ProductionJobRepo::claim_for_submission(&pool, 10, Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert!(!notified(&pool, job_id).await, "claim clears the acknowledgement");
    assert!(ProductionJobRepo::mark_submitted(&pool, job_id, "p-2").await.unwrap());
    assert!(ProductionJobRepo::mark_failed(
        &pool,
        job_id,
        TransitionGuard::Processing { prompt_id: "p-2" },
        JobStatus::Failed,
        "node failed again",
    )
    .await
    .unwrap());
    bus.publish(MonitorEvent::for_job("job.failed", job_id));
    tokio::time::sleep(Duration::from_millis(300)).await;

    cancel.cancel();
    handle.await.unwrap();

    let job = ProductionJobRepo::find_by_id(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed.as_str());
    assert!(job.notified_at.is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn late_acknowledgement_is_not_stamped(pool: PgPool) {
    let job_id = processing_job(&pool, "p-1").await;
    assert!(ProductionJobRepo::mark_completed(&pool, job_id, "p-1", &["a.png".into()])
        .await
        .unwrap());

    let stamped = ProductionJobRepo::mark_notified(&pool, job_id, JobStatus::RetryScheduled)
        .await
        .unwrap();
    assert!(!stamped);
    assert!(!notified(&pool, job_id).await);

    assert!(ProductionJobRepo::mark_notified(&pool, job_id, JobStatus::Completed)
        .await
        .unwrap());
    assert!(notified(&pool, job_id).await);
}
