//! SurrealDB-backed durable job broker.
//!
//! This crate provides the broker connection, the job repository used by
//! workers, and the producer-side [`QueueClient`].

mod client;
mod connection;
mod schema;
pub mod repositories;

pub use client::{EnqueueError, EnqueueFuture, JobSink, QueueClient};
pub use connection::{DEFAULT_HOST, DEFAULT_PORT, Database, DbConfig, DbError};
pub use schema::init_schema;
