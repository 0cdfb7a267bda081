use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared "an operation is in flight" flag
///
/// Every running flow holds a guard; the flag reads set while any guard is alive.
#[derive(Debug, Clone, Default)]
pub struct TransactingFlag {
    holders: Arc<AtomicUsize>,
}

impl TransactingFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> TransactingGuard {
        let previous = self.holders.fetch_add(1, Ordering::SeqCst);
        log::debug!("Transacting flag acquired ({} holders)", previous + 1);
        TransactingGuard {
            holders: self.holders.clone(),
        }
    }

    pub fn is_set(&self) -> bool {
        self.holders.load(Ordering::SeqCst) > 0
    }

    pub fn holders(&self) -> usize {
        self.holders.load(Ordering::SeqCst)
    }
}

/// Released on drop, whichever way the flow ends
#[derive(Debug)]
pub struct TransactingGuard {
    holders: Arc<AtomicUsize>,
}

impl Drop for TransactingGuard {
    fn drop(&mut self) {
        let previous = self.holders.fetch_sub(1, Ordering::SeqCst);
        log::debug!("Transacting flag released ({} holders)", previous.saturating_sub(1));
    }
}
