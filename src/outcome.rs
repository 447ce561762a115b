use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Shared result of a batch of independent tasks.
///
/// The failure flag only ever moves from `false` to `true`. Every failing task
/// still records its own message.
#[derive(Debug, Default)]
pub struct RunOutcome {
    had_errors: AtomicBool,
    messages: Mutex<Vec<String>>,
}

impl RunOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a task failure. Returns `true` for the call that flipped the flag.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message.into());
        self.had_errors
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn had_errors(&self) -> bool {
        self.had_errors.load(Ordering::Acquire)
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
