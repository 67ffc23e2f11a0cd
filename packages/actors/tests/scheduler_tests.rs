#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use actors::{
    DueItem, DueSource, InMemoryDueSource, SchedulerMessage, TickReport, run_tick, start_scheduler,
};
use db::repositories::{JobFilter, JobRepository};
use db::{DbError, EnqueueError, EnqueueFuture, JobSink, QueueClient};
use jobs_core::{JobKind, SendReminder, SettleMission};
use serde_json::Value;

/// Sink whose broker is always down.
struct DownSink;

impl JobSink for DownSink {
    fn push(&self, _name: String, _payload: Value, _key: Option<String>) -> EnqueueFuture {
        Box::pin(async { Err(EnqueueError::Broker(DbError::Query("broker down".into()))) })
    }
}

fn mission(id: &str) -> DueItem {
    DueItem::Mission(SettleMission {
        mission_id: id.into(),
    })
}

fn reminder(user: &str, message: &str) -> DueItem {
    DueItem::Reminder(SendReminder {
        user_id: user.into(),
        message: message.into(),
    })
}

#[tokio::test]
async fn test_tick_enqueues_one_job_per_due_item() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let client = QueueClient::new(db.clone());
    let source = InMemoryDueSource::new();
    source.push(mission("m_1")).await;
    source.push(reminder("user_abc", "Your deposit is due in 24 hours!")).await;

    let report = run_tick(&source, &client).await;
    assert_eq!(report, TickReport { enqueued: 2, failed: 0 });
    assert!(source.pending().await.is_empty());

    let jobs = JobRepository::new(db).list(JobFilter::default()).await?;
    assert_eq!(jobs.len(), 2);

    let settle = jobs
        .iter()
        .find(|j| j.name == "settle-mission")
        .ok_or("no settle job")?;
    assert_eq!(settle.idempotency_key.as_deref(), Some("settle-mission:m_1"));
    assert_eq!(
        settle.kind()?,
        JobKind::SettleMission(SettleMission {
            mission_id: "m_1".into()
        })
    );

    Ok(())
}

#[tokio::test]
async fn test_item_offered_twice_is_enqueued_once() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let client = QueueClient::new(db.clone());
    let source = InMemoryDueSource::new();

    source.push(mission("m_7")).await;
    run_tick(&source, &client).await;

    // The mission service reports it again before the job ran.
    source.push(mission("m_7")).await;
    run_tick(&source, &client).await;

    let jobs = JobRepository::new(db).list(JobFilter::default()).await?;
    assert_eq!(jobs.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_enqueue_failure_leaves_items_due() -> Result<(), Box<dyn Error>> {
    let source = InMemoryDueSource::new();
    source.push(mission("m_1")).await;
    source.push(reminder("U1", "hi")).await;

    let report = run_tick(&source, &DownSink).await;
    assert_eq!(report, TickReport { enqueued: 0, failed: 2 });
    assert_eq!(source.pending().await.len(), 2);

    // Broker is back: the next tick picks them up.
    let db = common::setup_db().await?;
    let report = run_tick(&source, &QueueClient::new(db)).await;
    assert_eq!(report.enqueued, 2);
    assert!(source.due_items().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_scheduler_actor_ticks() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let source = InMemoryDueSource::new();
    source.push(mission("m_3")).await;

    let (scheduler, handle) = start_scheduler(
        Arc::new(source.clone()),
        Arc::new(QueueClient::new(db.clone())),
        Duration::from_secs(3600),
    )
    .await?;

    let result = ractor::rpc::call(
        &scheduler,
        |reply| SchedulerMessage::TickNow { reply },
        Some(Duration::from_secs(5)),
    )
    .await;
    let Ok(ractor::rpc::CallResult::Success(report)) = result else {
        panic!("scheduler did not answer");
    };
    assert_eq!(report.enqueued, 1);
    assert!(source.pending().await.is_empty());

    scheduler.send_message(SchedulerMessage::Shutdown)?;
    handle.await?;

    let jobs = JobRepository::new(db).list(JobFilter::default()).await?;
    assert_eq!(jobs.len(), 1);
    Ok(())
}
