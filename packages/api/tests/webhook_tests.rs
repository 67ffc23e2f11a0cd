#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use actors::{start_worker_pool, wait_for_final_event};
use common::{EmptyLedger, FlakySink, RecordingChat, TestServer};
use db::QueueClient;
use db::repositories::{JobFilter, JobRepository};
use handlers::{AppHandlers, OutboundMessage};
use jobs_core::{ChatEvent, JobEvent, JobKind, QueueConfig};
use reqwest::StatusCode;
use serde_json::{Value, json};

#[tokio::test]
async fn test_health() -> Result<(), Box<dyn Error>> {
    let server = TestServer::spawn(Arc::new(FlakySink::new(0))).await;

    let res = reqwest::get(server.url("/health")).await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await?, "ok");

    Ok(())
}

#[tokio::test]
async fn test_each_event_becomes_one_job() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let server = TestServer::spawn(Arc::new(QueueClient::new(db.clone()))).await;

    let events = vec![
        json!({"type": "follow", "source": {"type": "user", "userId": "U1"}, "webhookEventId": "E1"}),
        json!({"type": "join", "source": {"type": "group", "groupId": "G1"}}),
        json!({"type": "message", "replyToken": "T9", "source": {"userId": "U2"},
               "message": {"type": "text", "text": "yo", "quoteToken": "q"}}),
    ];
    let res = reqwest::Client::new()
        .post(server.url("/webhook/line"))
        .json(&json!({"destination": "Ubot", "events": events}))
        .send()
        .await?;

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    assert_eq!(body, json!([null, null, null]));

    let jobs = JobRepository::new(db).list(JobFilter::default()).await?;
    assert_eq!(jobs.len(), 3);
    for job in &jobs {
        assert_eq!(job.name, "handle-chat-event");
        let event = &job.payload["event"];
        assert!(events.contains(event), "event not stored verbatim: {}", event);
    }

    Ok(())
}

#[tokio::test]
async fn test_empty_events_is_ok() -> Result<(), Box<dyn Error>> {
    let sink = Arc::new(FlakySink::new(0));
    let server = TestServer::spawn(sink.clone()).await;

    let res = reqwest::Client::new()
        .post(server.url("/webhook/line"))
        .json(&json!({"destination": "Ubot", "events": []}))
        .send()
        .await?;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.json::<Value>().await?, json!([]));
    assert_eq!(sink.pushes(), 0);

    Ok(())
}

#[tokio::test]
async fn test_any_enqueue_failure_is_500() -> Result<(), Box<dyn Error>> {
    let sink = Arc::new(FlakySink::new(1));
    let server = TestServer::spawn(sink.clone()).await;

    let res = reqwest::Client::new()
        .post(server.url("/webhook/line"))
        .json(&json!({"events": [
            {"type": "follow", "source": {"userId": "U1"}},
            {"type": "follow", "source": {"userId": "U2"}},
            {"type": "follow", "source": {"userId": "U3"}},
        ]}))
        .send()
        .await?;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(res.text().await?.is_empty());
    assert_eq!(sink.pushes(), 3);

    Ok(())
}

#[tokio::test]
async fn test_message_event_is_replied_through_worker() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let chat = RecordingChat::default();
    let handlers = AppHandlers::new(Arc::new(chat.clone()), Arc::new(EmptyLedger));
    let pool = start_worker_pool(
        db.clone(),
        Arc::new(handlers),
        QueueConfig::default()
            .with_concurrency(1)
            .with_poll_interval(Duration::from_millis(10)),
    )
    .await?;
    let mut events = pool.subscribe();
    let server = TestServer::spawn(Arc::new(QueueClient::new(db.clone()))).await;

    let event = json!({
        "type": "message",
        "source": {"userId": "U1"},
        "message": {"type": "text", "text": "hi"},
        "replyToken": "T1"
    });
    let res = reqwest::Client::new()
        .post(server.url("/webhook/line"))
        .json(&json!({"events": [event.clone()]}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let jobs = JobRepository::new(db).list(JobFilter::default()).await?;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].payload, json!({ "event": event }));
    assert!(matches!(
        jobs[0].kind()?,
        JobKind::HandleChatEvent(ref e) if matches!(e.event, ChatEvent::Message { .. })
    ));

    let done = tokio::time::timeout(
        Duration::from_secs(10),
        wait_for_final_event(&mut events, jobs[0].id),
    )
    .await?;
    assert!(matches!(done, Some(JobEvent::JobCompleted { .. })));

    let replies = chat.replies.lock().unwrap().clone();
    assert_eq!(
        replies,
        vec![("T1".to_string(), vec![OutboundMessage::text("You said: hi")])]
    );

    pool.shutdown().await;
    Ok(())
}
