use crate::error::{MatchError, RunStage};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: RunStage,
    pub completed: usize,
    pub total: usize,
}

/// Shared flag a caller flips to stop a run at its next checkpoint.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Caller-supplied progress sink and cancellation flag for one run.
///
/// The sink is always invoked on the thread that called into the engine,
/// including while scoring runs on worker threads.
#[derive(Default)]
pub struct RunHooks<'a> {
    progress: Option<Box<dyn FnMut(ProgressEvent) + 'a>>,
    cancel: Option<CancelToken>,
}

impl<'a> RunHooks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress<F>(mut self, sink: F) -> Self
    where
        F: FnMut(ProgressEvent) + 'a,
    {
        self.progress = Some(Box::new(sink));
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub(crate) fn report(&mut self, stage: RunStage, completed: usize, total: usize) {
        if let Some(sink) = self.progress.as_mut() {
            sink(ProgressEvent {
                stage,
                completed,
                total,
            });
        }
    }

    pub(crate) fn cancel_token(&self) -> Option<CancelToken> {
        self.cancel.clone()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    pub(crate) fn checkpoint(&self, stage: RunStage) -> Result<(), MatchError> {
        if self.is_cancelled() {
            return Err(MatchError::Cancelled { stage });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_fails_after_cancel() {
        let token = CancelToken::new();
        let hooks = RunHooks::new().with_cancel(token.clone());
        assert!(hooks.checkpoint(RunStage::Aggregate).is_ok());
        token.cancel();
        assert_eq!(
            hooks.checkpoint(RunStage::Partition),
            Err(MatchError::Cancelled {
                stage: RunStage::Partition
            })
        );
    }

    #[test]
    fn progress_sink_receives_events() {
        let mut seen = Vec::new();
        {
            let mut hooks = RunHooks::new().with_progress(|event| seen.push(event));
            hooks.report(RunStage::Score, 1, 4);
            hooks.report(RunStage::Score, 2, 4);
        }
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].completed, 2);
        assert_eq!(seen[1].total, 4);
    }
}
