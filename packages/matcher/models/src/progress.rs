//! Record-count progress for a geocoding run.
//!
//! The matcher's `Pipeline::run` sets the total to the number of CRM
//! records and advances by one unit per record once its fate is settled.
//! It names the current stage in the message and finishes with the
//! matched/unmatched split. The CLI renders this as a terminal bar;
//! library callers get [`NullProgress`].

use std::sync::Arc;

/// Receives progress events from a geocoding run.
pub trait ProgressCallback: Send + Sync {
    /// Number of records in the batch.
    fn set_total(&self, total: u64);

    /// `delta` more records were matched or left unmatched.
    fn inc(&self, delta: u64);

    /// Stage currently being attempted.
    fn set_message(&self, msg: String);

    /// Run finished; `msg` carries the matched/unmatched counts.
    fn finish(&self, msg: String);
}

/// Discards every event.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Default progress sink for a new pipeline.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
