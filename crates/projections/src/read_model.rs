//! Read model trait for query-side views.

/// Query access to a denormalized view.
pub trait ReadModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Number of rows currently held. Returns 0 while a writer holds the view.
    fn count(&self) -> usize;
}
