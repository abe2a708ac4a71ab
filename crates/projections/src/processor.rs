//! Projection processor for feeding events to projections.

use event_store::{EventEnvelope, EventStore, Position};
use futures_util::StreamExt;
use tokio::sync::Mutex;

use crate::Result;
use crate::projection::Projection;

/// Feeds stored events to registered projections.
///
/// Catch-up reads from the lowest checkpoint among the projections, so a
/// freshly registered or reset projection is replayed from the start while
/// the others skip what they have already seen. Concurrent catch-ups are
/// serialized so no event is delivered twice.
pub struct ProjectionProcessor<S: EventStore> {
    store: S,
    projections: Vec<Box<dyn Projection>>,
    catch_up: Mutex<()>,
}

impl<S: EventStore> ProjectionProcessor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            projections: Vec::new(),
            catch_up: Mutex::new(()),
        }
    }

    pub fn register(&mut self, projection: Box<dyn Projection>) {
        self.projections.push(projection);
    }

    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    async fn lowest_checkpoint(&self) -> Position {
        let mut lowest: Option<Position> = None;
        for projection in &self.projections {
            let position = projection.checkpoint().await.position;
            lowest = Some(lowest.map_or(position, |p| p.min(position)));
        }
        lowest.unwrap_or_default()
    }

    /// Delivers every event newer than each projection's checkpoint.
    ///
    /// Returns the number of events read from the store.
    #[tracing::instrument(skip(self))]
    pub async fn run_catch_up(&self) -> Result<u64> {
        let _guard = self.catch_up.lock().await;

        let from = self.lowest_checkpoint().await;
        let mut stream = self.store.stream_events_after(from).await?;
        let mut read: u64 = 0;

        while let Some(result) = stream.next().await {
            let event = result?;
            read += 1;
            self.deliver(&event).await?;
        }

        if read > 0 {
            tracing::debug!(from = %from, events = read, "catch-up complete");
        }

        Ok(read)
    }

    async fn deliver(&self, event: &EventEnvelope) -> Result<()> {
        for projection in &self.projections {
            if projection.checkpoint().await.is_behind(event.position) {
                projection.handle(event).await?;
                metrics::counter!(
                    "projections_events_processed_total",
                    "projection" => projection.name()
                )
                .increment(1);
            }
        }
        Ok(())
    }

    /// Resets all projections and replays the store from the start.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<u64> {
        {
            let _guard = self.catch_up.lock().await;
            for projection in &self.projections {
                projection.reset().await?;
            }
        }
        self.run_catch_up().await
    }
}
