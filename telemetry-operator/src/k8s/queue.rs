//! Deduplication of reconcile triggers.

use std::collections::HashSet;
use std::sync::Arc;

/// Tracks which pipelines are being reconciled, so that at most one pass runs per pipeline.
///
/// Triggers which arrive while a pass is running are folded into a single follow-up pass, which
/// is dispatched once the running pass completes.
#[derive(Debug, Default)]
pub struct WorkQueue {
    /// Pipelines with a reconcile pass currently running.
    in_flight: HashSet<Arc<String>>,
    /// Pipelines which were triggered again while their pass was running.
    dirty: HashSet<Arc<String>>,
}

impl WorkQueue {
    /// Record a trigger for the given pipeline.
    ///
    /// Returns `true` if a pass should be dispatched now. The pipeline is then in flight until
    /// `complete` is called for it.
    pub fn enqueue(&mut self, name: Arc<String>) -> bool {
        if self.in_flight.contains(&name) {
            self.dirty.insert(name);
            return false;
        }
        self.in_flight.insert(name);
        true
    }

    /// Record the completion of the given pipeline's pass.
    ///
    /// Returns `true` if the pipeline was triggered while its pass was running. It then stays in
    /// flight and another pass should be dispatched now.
    pub fn complete(&mut self, name: &Arc<String>) -> bool {
        if self.dirty.remove(name) {
            return true;
        }
        self.in_flight.remove(name);
        false
    }
}
