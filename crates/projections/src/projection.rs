//! Core projection trait and checkpoint tracking.

use async_trait::async_trait;
use event_store::{EventEnvelope, Position};

use crate::Result;

/// How far a projection has read into the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checkpoint {
    /// Position of the last event handled.
    pub position: Position,
    pub events_processed: u64,
}

impl Checkpoint {
    pub fn start() -> Self {
        Self::default()
    }

    /// Records that the event at `position` was handled.
    pub fn advance_to(&self, position: Position) -> Self {
        Self {
            position,
            events_processed: self.events_processed + 1,
        }
    }

    /// Whether the event at `position` is still unseen.
    pub fn is_behind(&self, position: Position) -> bool {
        self.position < position
    }
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "checkpoint(position={}, events={})",
            self.position, self.events_processed
        )
    }
}

/// Folds stored events into a read model.
///
/// `handle` is called once per event in position order and must advance the
/// checkpoint even for events the projection ignores.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &EventEnvelope) -> Result<()>;

    async fn checkpoint(&self) -> Checkpoint;

    /// Drops all rows and rewinds to [`Checkpoint::start`].
    async fn reset(&self) -> Result<()>;
}
