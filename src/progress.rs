use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::error::{ModError, Result};

/// Receives `(current, total)` after each finished unit of work.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Shared flag checked between units of work by long operations.
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

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Progress sink handed to the extractor and deployer.
#[derive(Clone, Default)]
pub struct Progress {
    callback: Option<ProgressCallback>,
    cancel: CancelToken,
}

impl Progress {
    pub fn new(callback: Option<ProgressCallback>, cancel: CancelToken) -> Self {
        Self { callback, cancel }
    }

    pub fn silent() -> Self {
        Self::default()
    }

    pub fn report(&self, current: usize, total: usize) {
        let Some(callback) = &self.callback else {
            return;
        };
        let total = total.max(1);
        callback(current.min(total), total);
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fails with `Cancelled` once the token has been tripped.
    pub fn checkpoint(&self, phase: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ModError::Cancelled {
                phase: phase.to_string(),
                deployed: Vec::new(),
            });
        }
        Ok(())
    }
}

/// Counts units of a single stage against a known total.
pub(crate) struct UnitCounter<'a> {
    progress: &'a Progress,
    done: usize,
    total: usize,
}

impl<'a> UnitCounter<'a> {
    pub(crate) fn new(progress: &'a Progress, total: usize) -> Self {
        Self {
            progress,
            done: 0,
            total: total.max(1),
        }
    }

    pub(crate) fn bump(&mut self) {
        self.done = self.done.saturating_add(1);
        self.progress.report(self.done, self.total);
    }
}
