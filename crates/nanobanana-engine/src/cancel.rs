use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Failure, Result};

/// Cooperative cancellation flag shared between the caller and a running
/// pipeline. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Failure::cancelled());
        }
        Ok(())
    }
}
