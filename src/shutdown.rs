use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;

use crate::error::{Error, Result};

/// Cooperative cancellation flag shared between the analysis and its driver.
#[derive(Debug, Clone, Default)]
pub struct ShutdownNotifier {
    requested: Arc<AtomicBool>,
}

impl ShutdownNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_shutdown(&self) {
        info!("Shutdown requested");
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn should_shutdown(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Fail with [`Error::Interrupted`] once shutdown was requested.
    pub fn check(&self) -> Result<()> {
        if self.should_shutdown() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }
}
