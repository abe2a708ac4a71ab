//! Append-only event storage with optimistic concurrency.
//!
//! Every write names the version it expects the stream to be at, which makes
//! `append` the compare-and-set primitive the order ledger is built on. Each
//! stored event also receives a store-wide [`Position`] so read models can
//! resume from where they stopped.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Position, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{AppendOptions, EventStore, EventStoreExt, EventStream};
