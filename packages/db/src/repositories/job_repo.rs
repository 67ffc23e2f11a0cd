//! Job repository: durable storage and delivery bookkeeping.
//!
//! Every state transition is a single conditional `UPDATE`, so several
//! worker processes can share one broker without double-claiming a job.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jobs_core::{HandlerError, Job, JobId, JobResult, JobState, QueueStats, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

/// Candidates fetched per claim attempt; losing a race moves to the next one.
const CLAIM_BATCH: i64 = 8;

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    job_id: String,
    queue: String,
    name: String,
    payload: String,
    state: String,
    attempts: u32,
    max_attempts: u32,
    idempotency_key: Option<String>,
    last_error: Option<String>,
    result: Option<String>,
    run_at_ms: i64,
    lease_until_ms: Option<i64>,
    worker_id: Option<String>,
    enqueued_at_ms: i64,
    updated_at_ms: i64,
    completed_at_ms: Option<i64>,
    #[serde(default)]
    active_key: String,
}

impl JobRecord {
    fn from_job(job: &Job) -> Result<Self, DbError> {
        Ok(Self {
            job_id: job.id.to_string(),
            queue: job.queue.clone(),
            name: job.name.clone(),
            payload: serde_json::to_string(&job.payload)?,
            state: job.state.as_str().to_string(),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            idempotency_key: job.idempotency_key.clone(),
            last_error: job.last_error.clone(),
            result: job.result.clone(),
            run_at_ms: job.run_at.timestamp_millis(),
            lease_until_ms: job.lease_until.map(|t| t.timestamp_millis()),
            worker_id: job.worker_id.clone(),
            enqueued_at_ms: job.enqueued_at.timestamp_millis(),
            updated_at_ms: job.updated_at.timestamp_millis(),
            completed_at_ms: job.completed_at.map(|t| t.timestamp_millis()),
            active_key: slot_for(job, job.state),
        })
    }

    fn into_job(self) -> Result<Job, DbError> {
        let id = JobId::parse(&self.job_id)
            .map_err(|e| DbError::Serialization(format!("bad job id {}: {}", self.job_id, e)))?;
        let state = JobState::parse(&self.state)
            .ok_or_else(|| DbError::Serialization(format!("bad job state: {}", self.state)))?;

        Ok(Job {
            id,
            queue: self.queue,
            name: self.name,
            payload: serde_json::from_str(&self.payload)?,
            state,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            idempotency_key: self.idempotency_key,
            last_error: self.last_error,
            result: self.result,
            run_at: from_millis(self.run_at_ms)?,
            lease_until: self.lease_until_ms.map(from_millis).transpose()?,
            worker_id: self.worker_id,
            enqueued_at: from_millis(self.enqueued_at_ms)?,
            updated_at: from_millis(self.updated_at_ms)?,
            completed_at: self.completed_at_ms.map(from_millis).transpose()?,
        })
    }
}

/// Value of the unique `active_key` column for a job in `state`.
///
/// Only keyed jobs that can still run hold the shared `key/` slot; every
/// other row gets a slot of its own.
fn slot_for(job: &Job, state: JobState) -> String {
    match &job.idempotency_key {
        Some(key) if !state.is_terminal() => active_slot(&job.queue, key),
        _ => released_slot(job.id),
    }
}

fn active_slot(queue: &str, key: &str) -> String {
    format!("key/{}/{}", queue, key)
}

fn released_slot(id: JobId) -> String {
    format!("done/{}", id)
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, DbError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| DbError::Serialization(format!("timestamp out of range: {}", ms)))
}

fn into_jobs(records: Vec<JobRecord>) -> Result<Vec<Job>, DbError> {
    records.into_iter().map(JobRecord::into_job).collect()
}

fn add_millis(now: DateTime<Utc>, delay: Duration) -> i64 {
    let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    now.timestamp_millis().saturating_add(delay_ms)
}

fn state_list(states: &[JobState]) -> Vec<&'static str> {
    states.iter().map(JobState::as_str).collect()
}

/// Filter options for listing jobs.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub queue: Option<String>,
    pub state: Option<JobState>,
    pub name: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Repository for job persistence operations.
#[derive(Debug, Clone)]
pub struct JobRepository {
    db: Database,
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new job in the database.
    ///
    /// Fails when the job carries an idempotency key that another active
    /// job in the same queue already holds.
    pub async fn create(&self, job: &Job) -> Result<Job, DbError> {
        let record: Option<JobRecord> = self
            .db
            .conn()
            .create(("job", job.id.to_string()))
            .content(JobRecord::from_job(job)?)
            .await?;

        record
            .map(JobRecord::into_job)
            .transpose()?
            .ok_or_else(|| DbError::Query("Failed to create job".into()))
    }

    /// Get a job by ID.
    pub async fn get(&self, id: JobId) -> Result<Job, DbError> {
        let record: Option<JobRecord> = self.db.conn().select(("job", id.to_string())).await?;

        record
            .map(JobRecord::into_job)
            .transpose()?
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))
    }

    /// Find a job with the given idempotency key that is still active.
    pub async fn find_active_by_key(&self, queue: &str, key: &str) -> Result<Option<Job>, DbError> {
        let mut response = self
            .db
            .conn()
            .query(
                r#"
                SELECT * FROM job WHERE active_key = $slot LIMIT 1
                "#,
            )
            .bind(("slot", active_slot(queue, key)))
            .await?;

        let records: Vec<JobRecord> = response.take(0)?;
        records.into_iter().next().map(JobRecord::into_job).transpose()
    }

    /// Claim the oldest due job in a queue for `worker_id`.
    ///
    /// The claim increments `attempts`, marks the job `in_flight` and hides it
    /// from other workers until `lease` elapses.
    pub async fn claim_next(
        &self,
        queue: &str,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<Job>, DbError> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();

        #[derive(Deserialize)]
        struct Candidate {
            job_id: String,
        }

        let mut response = self
            .db
            .conn()
            .query(
                r#"
                SELECT job_id, run_at_ms FROM job
                WHERE queue = $queue AND state INSIDE $states AND run_at_ms <= $now
                ORDER BY run_at_ms ASC
                LIMIT $limit
                "#,
            )
            .bind(("queue", queue.to_string()))
            .bind(("states", state_list(&JobState::CLAIMABLE)))
            .bind(("now", now_ms))
            .bind(("limit", CLAIM_BATCH))
            .await?;

        let candidates: Vec<Candidate> = response.take(0)?;

        for candidate in candidates {
            let mut response = self
                .db
                .conn()
                .query(
                    r#"
                    UPDATE type::thing("job", $id) SET
                        state = "in_flight",
                        attempts += 1,
                        worker_id = $worker,
                        lease_until_ms = $lease_until,
                        updated_at_ms = $now
                    WHERE state INSIDE $states AND run_at_ms <= $now
                    RETURN AFTER
                    "#,
                )
                .bind(("id", candidate.job_id))
                .bind(("worker", worker_id.to_string()))
                .bind(("lease_until", add_millis(now, lease)))
                .bind(("now", now_ms))
                .bind(("states", state_list(&JobState::CLAIMABLE)))
                .await?;

            let claimed: Vec<JobRecord> = response.take(0)?;
            if let Some(record) = claimed.into_iter().next() {
                return record.into_job().map(Some);
            }
        }

        Ok(None)
    }

    /// Mark a claimed job completed.
    ///
    /// Returns `None` when `worker_id` no longer holds the claim (lease expired
    /// and the job was released or redelivered).
    pub async fn complete(
        &self,
        id: JobId,
        worker_id: &str,
        result: &JobResult,
    ) -> Result<Option<Job>, DbError> {
        let now_ms = Utc::now().timestamp_millis();

        let mut response = self
            .db
            .conn()
            .query(
                r#"
                UPDATE type::thing("job", $id) SET
                    state = "completed",
                    active_key = $released,
                    result = $summary,
                    last_error = NONE,
                    lease_until_ms = NONE,
                    completed_at_ms = $now,
                    updated_at_ms = $now
                WHERE state = "in_flight" AND worker_id = $worker
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("summary", result.summary.clone()))
            .bind(("released", released_slot(id)))
            .bind(("worker", worker_id.to_string()))
            .bind(("now", now_ms))
            .await?;

        let records: Vec<JobRecord> = response.take(0)?;
        records.into_iter().next().map(JobRecord::into_job).transpose()
    }

    /// Record a failed delivery of a claimed job.
    ///
    /// Retryable errors reschedule the job with backoff while attempts remain;
    /// everything else makes it a dead job. Returns `None` when `worker_id`
    /// no longer holds the claim.
    pub async fn fail(
        &self,
        job: &Job,
        worker_id: &str,
        error: &HandlerError,
        policy: &RetryPolicy,
    ) -> Result<Option<Job>, DbError> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let will_retry = error.is_retryable() && !job.attempts_exhausted();

        let (state, run_at_ms, completed_at_ms) = if will_retry {
            (
                JobState::FailedRetryable,
                add_millis(now, policy.delay_after(job.attempts)),
                None,
            )
        } else {
            (JobState::FailedTerminal, now_ms, Some(now_ms))
        };

        let mut response = self
            .db
            .conn()
            .query(
                r#"
                UPDATE type::thing("job", $id) SET
                    state = $state,
                    active_key = $slot,
                    last_error = $error,
                    run_at_ms = $run_at,
                    lease_until_ms = NONE,
                    completed_at_ms = $completed_at,
                    updated_at_ms = $now
                WHERE state = "in_flight" AND worker_id = $worker
                RETURN AFTER
                "#,
            )
            .bind(("id", job.id.to_string()))
            .bind(("state", state.as_str()))
            .bind(("slot", slot_for(job, state)))
            .bind(("error", error.message().to_string()))
            .bind(("run_at", run_at_ms))
            .bind(("completed_at", completed_at_ms))
            .bind(("worker", worker_id.to_string()))
            .bind(("now", now_ms))
            .await?;

        let records: Vec<JobRecord> = response.take(0)?;
        records.into_iter().next().map(JobRecord::into_job).transpose()
    }

    /// Release in-flight jobs whose lease has expired.
    ///
    /// The expired delivery already counted as an attempt, so jobs out of
    /// budget become dead jobs and the rest are redelivered right away.
    pub async fn recover_expired(&self, queue: &str) -> Result<Vec<Job>, DbError> {
        let now_ms = Utc::now().timestamp_millis();

        let mut response = self
            .db
            .conn()
            .query(
                r#"
                UPDATE job SET
                    state = "failed_terminal",
                    active_key = string::concat("done/", job_id),
                    last_error = "lease expired",
                    lease_until_ms = NONE,
                    completed_at_ms = $now,
                    updated_at_ms = $now
                WHERE queue = $queue AND state = "in_flight" AND lease_until_ms < $now
                    AND attempts >= max_attempts
                RETURN AFTER;

                UPDATE job SET
                    state = "failed_retryable",
                    last_error = "lease expired",
                    lease_until_ms = NONE,
                    run_at_ms = $now,
                    updated_at_ms = $now
                WHERE queue = $queue AND state = "in_flight" AND lease_until_ms < $now
                    AND attempts < max_attempts
                RETURN AFTER;
                "#,
            )
            .bind(("queue", queue.to_string()))
            .bind(("now", now_ms))
            .await?;

        let mut recovered = into_jobs(response.take(0)?)?;
        recovered.extend(into_jobs(response.take(1)?)?);
        Ok(recovered)
    }

    /// Delete terminal jobs last updated before `cutoff`. Returns the count.
    pub async fn purge_terminal(&self, queue: &str, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let mut response = self
            .db
            .conn()
            .query(
                r#"
                DELETE job
                WHERE queue = $queue AND state INSIDE $states AND updated_at_ms < $cutoff
                RETURN BEFORE
                "#,
            )
            .bind(("queue", queue.to_string()))
            .bind(("states", state_list(&[JobState::Completed, JobState::FailedTerminal])))
            .bind(("cutoff", cutoff.timestamp_millis()))
            .await?;

        let deleted: Vec<JobRecord> = response.take(0)?;
        Ok(deleted.len())
    }

    /// List jobs with optional filtering, oldest first.
    pub async fn list(&self, filter: JobFilter) -> Result<Vec<Job>, DbError> {
        let mut conditions = Vec::new();
        let mut bindings: Vec<(&str, String)> = Vec::new();

        if let Some(queue) = filter.queue {
            conditions.push("queue = $queue");
            bindings.push(("queue", queue));
        }

        if let Some(state) = filter.state {
            conditions.push("state = $state");
            bindings.push(("state", state.as_str().to_string()));
        }

        if let Some(name) = filter.name {
            conditions.push("name = $name");
            bindings.push(("name", name));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let limit_clause = filter
            .limit
            .map(|l| format!("LIMIT {}", l))
            .unwrap_or_default();

        let offset_clause = filter
            .offset
            .map(|o| format!("START {}", o))
            .unwrap_or_default();

        let query = format!(
            "SELECT * FROM job {} ORDER BY enqueued_at_ms ASC {} {}",
            where_clause, limit_clause, offset_clause
        );

        let mut result = self.db.conn().query(&query);

        for (name, value) in bindings {
            result = result.bind((name, value));
        }

        let mut response = result.await?;
        into_jobs(response.take(0)?)
    }

    /// Count jobs per state for a queue.
    pub async fn stats(&self, queue: &str) -> Result<QueueStats, DbError> {
        #[derive(Deserialize)]
        struct StateCount {
            state: String,
            count: i64,
        }

        let mut response = self
            .db
            .conn()
            .query(
                r#"
                SELECT state, count() AS count
                FROM job
                WHERE queue = $queue
                GROUP BY state
                "#,
            )
            .bind(("queue", queue.to_string()))
            .await?;

        let counts: Vec<StateCount> = response.take(0)?;

        let mut stats = QueueStats::default();
        for count in counts {
            let n = u64::try_from(count.count).unwrap_or(0);
            match JobState::parse(&count.state) {
                Some(JobState::Queued) => stats.queued = n,
                Some(JobState::InFlight) => stats.in_flight = n,
                Some(JobState::Completed) => stats.completed = n,
                Some(JobState::FailedRetryable) => stats.failed_retryable = n,
                Some(JobState::FailedTerminal) => stats.failed_terminal = n,
                None => tracing::warn!("Ignoring unknown job state in stats: {}", count.state),
            }
        }

        Ok(stats)
    }
}
