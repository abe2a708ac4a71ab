use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    error::conflict,
    AggregateId, EventEnvelope, Position, Result, Version,
    store::{AppendOptions, EventStore, EventStream, validate_events_for_append},
};

#[derive(Default)]
struct Log {
    events: Vec<EventEnvelope>,
    versions: HashMap<AggregateId, Version>,
}

/// Event store kept entirely in process memory.
///
/// Behaves like the PostgreSQL store, including version conflicts and
/// position assignment, and is what tests and single-node deployments use.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Log>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.events.len()
    }

    /// Number of stored events of the given type.
    pub async fn count_of_type(&self, event_type: &str) -> usize {
        self.log
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let first_new_version = events[0].version;

        let mut log = self.log.write().await;
        let current = log
            .versions
            .get(&aggregate_id)
            .copied()
            .unwrap_or(Version::initial());

        if let Some(expected) = options.expected_version
            && current != expected
        {
            return Err(conflict(aggregate_id, expected, current));
        }

        // Same rule as the unique (aggregate_id, version) constraint in Postgres.
        if first_new_version != current.next() {
            return Err(conflict(
                aggregate_id,
                options.expected_version.unwrap_or(current),
                current,
            ));
        }

        let mut position = log.events.last().map(|e| e.position).unwrap_or_default();
        let mut last_version = current;
        for mut event in events {
            position = position.next();
            event.position = position;
            last_version = event.version;
            log.events.push(event);
        }
        log.versions.insert(aggregate_id, last_version);

        Ok(last_version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        Ok(log
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect())
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        Ok(self.log.read().await.versions.get(&aggregate_id).copied())
    }

    async fn stream_events_after(&self, after: Position) -> Result<EventStream> {
        use futures_util::stream;

        let log = self.log.read().await;
        // Positions are dense here, so the first unseen event sits at index `after`.
        let start = usize::try_from(after.as_i64()).unwrap_or(0);
        let events: Vec<Result<EventEnvelope>> = log
            .events
            .iter()
            .skip(start)
            .cloned()
            .map(Ok)
            .collect();

        Ok(Box::pin(stream::iter(events)))
    }

    async fn latest_position(&self) -> Result<Position> {
        let log = self.log.read().await;
        Ok(log.events.last().map(|e| e.position).unwrap_or_default())
    }
}
