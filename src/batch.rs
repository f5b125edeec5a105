//! Running checks over many handles with a bounded pool of workers.
//!
//! Workers pull handles from a shared index, check them one at a time and
//! pause between tasks. Outcomes go back over a channel to the calling
//! thread, which is the only writer of the [`ResultSet`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;

use log::{debug, error, info};

use crate::check::Check;
use crate::config::{DEFAULT_WORKERS, DelayRange};
use crate::error::ProbeError;
use crate::outcome::CheckOutcome;
use crate::results::ResultSet;
use crate::validate::{CandidateName, canon_name};

/// Shared flag that stops a run from taking new work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that has not fired.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop dispatching. In-flight checks still finish.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened during one [`Dispatcher::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Handles handed to the run.
    pub submitted: usize,
    /// Outcomes recorded, invalid handles included.
    pub recorded: usize,
    /// Valid handles never started because the run was cancelled.
    pub skipped: usize,
    /// Whether the cancel token fired.
    pub interrupted: bool,
}

/// Applies a [`Check`] to a batch of handles.
pub struct Dispatcher<'a> {
    checker: &'a dyn Check,
    workers: usize,
    pacing: DelayRange,
    cancel: CancelToken,
}

impl std::fmt::Debug for Dispatcher<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.workers)
            .field("pacing", &self.pacing)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl<'a> Dispatcher<'a> {
    /// A dispatcher with the default pool size and no pacing.
    pub fn new(checker: &'a dyn Check) -> Self {
        Self {
            checker,
            workers: DEFAULT_WORKERS,
            pacing: DelayRange::ZERO,
            cancel: CancelToken::new(),
        }
    }

    /// Pool size; at least one worker always runs.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Pause each worker takes after a task.
    #[must_use]
    pub fn with_pacing(mut self, pacing: DelayRange) -> Self {
        self.pacing = pacing;
        self
    }

    /// Token that interrupts the run.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Check every handle in `names`, filing outcomes into `results`.
    pub fn run<S: AsRef<str>>(&self, names: &[S], results: &mut ResultSet) -> RunReport {
        self.run_with(names, results, |_| {})
    }

    /// Like [`run`](Self::run), calling `observe` on each outcome as it is
    /// recorded.
    ///
    /// Invalid handles are recorded up front without any request. Arrival
    /// order of the rest depends on the workers.
    pub fn run_with<S, F>(&self, names: &[S], results: &mut ResultSet, mut observe: F) -> RunReport
    where
        S: AsRef<str>,
        F: FnMut(&CheckOutcome),
    {
        let mut recorded = 0;
        let mut valid = Vec::with_capacity(names.len());
        for raw in names {
            match CandidateName::parse(raw.as_ref()) {
                Ok(name) => valid.push(name),
                Err(e) => {
                    let reason = ProbeError::from(e);
                    let outcome = CheckOutcome::invalid(canon_name(raw.as_ref()), reason.to_string());
                    observe(&outcome);
                    results.record(outcome);
                    recorded += 1;
                }
            }
        }

        let workers = self.workers.min(valid.len());
        info!(
            "dispatching {} handles to {workers} workers ({} rejected by validation)",
            valid.len(),
            recorded
        );

        let mut checked = 0;
        if workers > 0 {
            let next = AtomicUsize::new(0);
            let (tx, rx) = mpsc::channel();
            thread::scope(|s| {
                for id in 0..workers {
                    let tx = tx.clone();
                    let (valid, next) = (&valid, &next);
                    s.spawn(move || self.work(id, valid, next, tx));
                }
                drop(tx);
                for outcome in rx {
                    observe(&outcome);
                    results.record(outcome);
                    checked += 1;
                }
            });
        }

        let interrupted = self.cancel.is_cancelled();
        RunReport {
            submitted: names.len(),
            recorded: recorded + checked,
            skipped: valid.len() - checked,
            interrupted,
        }
    }

    fn work(
        &self,
        worker: usize,
        names: &[CandidateName],
        next: &AtomicUsize,
        tx: mpsc::Sender<CheckOutcome>,
    ) {
        loop {
            if self.cancel.is_cancelled() {
                debug!("worker {worker}: cancelled, taking no more work");
                return;
            }
            let index = next.fetch_add(1, Ordering::SeqCst);
            let Some(name) = names.get(index) else {
                return;
            };
            if tx.send(self.run_one(name)).is_err() {
                return;
            }
            if next.load(Ordering::SeqCst) < names.len() {
                self.pacing.pause();
            }
        }
    }

    fn run_one(&self, name: &CandidateName) -> CheckOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.checker.check(name))) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!("check failed for {name}: {e}");
                CheckOutcome::failed(name.as_str(), format!("check failed: {e}"))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("worker fault for {name}: {message}");
                CheckOutcome::failed(name.as_str(), format!("worker fault: {message}"))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
