use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative abort signal for a reconciliation run.
///
/// Clones share one flag. Workers check it between clusters, never inside a
/// single field reconciliation.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
