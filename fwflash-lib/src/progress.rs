//! Progress reporting abstraction.
//!
//! The engine reports per-sector erase progress and per-chunk programming
//! progress through this trait so that different front ends (CLI, GUI,
//! tests) can render it their own way.

use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum ProgressKind {
    /// Indeterminate activity.
    Spinner,
    /// An operation with a known total.
    Bar { total: u64 },
}

/// Identifies one progress element across start/update/finish calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgressId(pub u64);

pub trait ProgressCallback: Send + Sync {
    /// Starts a new progress element and returns its id.
    fn start(&self, kind: ProgressKind, message: String) -> ProgressId;

    fn update_message(&self, id: ProgressId, message: String);

    /// Advances a bar element; ignored for spinners.
    fn increment(&self, id: ProgressId, delta: u64);

    fn finish(&self, id: ProgressId, message: String);
}

/// Silent implementation for embedding and tests.
#[derive(Debug, Default)]
pub struct NoOpProgressCallback;

impl ProgressCallback for NoOpProgressCallback {
    fn start(&self, _kind: ProgressKind, _message: String) -> ProgressId {
        ProgressId(0)
    }

    fn update_message(&self, _id: ProgressId, _message: String) {}

    fn increment(&self, _id: ProgressId, _delta: u64) {}

    fn finish(&self, _id: ProgressId, _message: String) {}
}

pub type ProgressCallbackArc = Arc<dyn ProgressCallback>;

pub fn no_op_progress_callback() -> ProgressCallbackArc {
    Arc::new(NoOpProgressCallback)
}
