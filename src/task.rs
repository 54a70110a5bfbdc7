//! Dependency-chained compute tasks.
//!
//! Every scheduling call takes the handle of the task it must run after and
//! returns the handle of the task it created. A task is handed to the worker
//! pool only once its predecessor has finished, so workers never block on
//! each other; the only blocking call is [`TaskHandle::wait`].
//!
//! Failure propagates down the chain: if a task fails (numeric instability,
//! panic), every task scheduled after it is skipped and finishes with the same
//! error.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use log::trace;

use crate::{Error, Result};

type Continuation = Box<dyn FnOnce(Result<()>) + Send + 'static>;

enum Status {
    Pending(Vec<Continuation>),
    Finished(Result<()>),
}

struct TaskState {
    label: &'static str,
    status: Mutex<Status>,
    finished: Condvar,
}

impl TaskState {
    fn lock(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a scheduled, possibly still running, task.
///
/// Cloning the handle does not clone the task.
#[derive(Clone)]
pub struct TaskHandle {
    state: Arc<TaskState>,
}

impl TaskHandle {
    /// A handle that is already complete. Use it as the predecessor of the
    /// first task in a chain.
    pub fn completed() -> Self {
        Self {
            state: Arc::new(TaskState {
                label: "completed",
                status: Mutex::new(Status::Finished(Ok(()))),
                finished: Condvar::new(),
            }),
        }
    }

    fn pending(label: &'static str) -> Self {
        Self {
            state: Arc::new(TaskState {
                label,
                status: Mutex::new(Status::Pending(Vec::new())),
                finished: Condvar::new(),
            }),
        }
    }

    #[inline]
    pub fn label(&self) -> &'static str {
        self.state.label
    }

    pub fn is_complete(&self) -> bool {
        matches!(*self.state.lock(), Status::Finished(_))
    }

    /// Block until the task (and therefore every task it depends on) has
    /// finished, returning its outcome.
    pub fn wait(&self) -> Result<()> {
        let mut status = self.state.lock();
        loop {
            match &*status {
                Status::Finished(outcome) => return outcome.clone(),
                Status::Pending(_) => {
                    status = self
                        .state
                        .finished
                        .wait(status)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Run `f` with this task's outcome once it is known: immediately if the
    /// task already finished, otherwise on the thread that finishes it.
    fn on_finish(&self, f: Continuation) {
        let mut status = self.state.lock();
        match &mut *status {
            Status::Pending(continuations) => continuations.push(f),
            Status::Finished(outcome) => {
                let outcome = outcome.clone();
                drop(status);
                f(outcome);
            }
        }
    }

    fn finish(&self, outcome: Result<()>) {
        let continuations = {
            let mut status = self.state.lock();
            let previous = std::mem::replace(&mut *status, Status::Finished(outcome.clone()));
            self.state.finished.notify_all();
            match previous {
                Status::Pending(continuations) => continuations,
                Status::Finished(_) => unreachable!("task `{}` finished twice", self.state.label),
            }
        };

        for continuation in continuations {
            continuation(outcome.clone());
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("label", &self.state.label)
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Worker pool that runs scheduled tasks.
///
/// Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct TaskGraph {
    pool: Arc<rayon::ThreadPool>,
}

impl TaskGraph {
    /// Build a pool with `num_threads` workers (`0` picks rayon's default).
    pub fn new(num_threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("neural-burst-{i}"))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build worker pool: {e}")))?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Schedule `job` to run on the pool after `after` completes successfully.
    ///
    /// Rayon parallel iterators used inside `job` run on the same pool.
    pub fn schedule<F>(&self, label: &'static str, after: &TaskHandle, job: F) -> TaskHandle
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        trace!("scheduling `{label}` after `{}`", after.label());

        let handle = TaskHandle::pending(label);
        let task = handle.clone();
        let pool = Arc::clone(&self.pool);

        after.on_finish(Box::new(move |outcome| match outcome {
            Ok(()) => pool.spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(job))
                    .unwrap_or_else(|_| Err(Error::TaskFailed(label.to_owned())));
                task.finish(result);
            }),
            Err(err) => {
                trace!("skipping `{label}`: predecessor failed");
                task.finish(Err(err));
            }
        }));

        handle
    }
}

impl fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGraph")
            .field("num_threads", &self.num_threads())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn completed_handle_is_complete() {
        let handle = TaskHandle::completed();
        assert!(handle.is_complete());
        assert_eq!(handle.wait(), Ok(()));
    }

    #[test]
    fn chained_tasks_run_in_order() {
        let graph = TaskGraph::new(4).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut handle = TaskHandle::completed();
        for i in 0..32 {
            let log = Arc::clone(&log);
            handle = graph.schedule("push", &handle, move || {
                log.lock().unwrap().push(i);
                Ok(())
            });
        }

        handle.wait().unwrap();
        assert_eq!(*log.lock().unwrap(), (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn successor_observes_predecessor_writes() {
        let graph = TaskGraph::new(2).unwrap();
        let value = Arc::new(AtomicUsize::new(0));

        let v = Arc::clone(&value);
        let first = graph.schedule("store", &TaskHandle::completed(), move || {
            v.store(7, Ordering::Relaxed);
            Ok(())
        });
        let v = Arc::clone(&value);
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        let second = graph.schedule("load", &first, move || {
            s.store(v.load(Ordering::Relaxed), Ordering::Relaxed);
            Ok(())
        });

        second.wait().unwrap();
        assert!(first.is_complete());
        assert_eq!(seen.load(Ordering::Relaxed), 7);
    }

    #[test]
    fn failure_skips_dependents_and_propagates() {
        let graph = TaskGraph::new(2).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        let failing = graph.schedule("fail", &TaskHandle::completed(), || {
            Err(Error::NumericInstability {
                stage: "test",
                layer: 3,
            })
        });
        let r = Arc::clone(&ran);
        let dependent = graph.schedule("dependent", &failing, move || {
            r.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });

        let err = dependent.wait().unwrap_err();
        assert_eq!(
            err,
            Error::NumericInstability {
                stage: "test",
                layer: 3
            }
        );
        assert_eq!(ran.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn panicking_task_fails_its_handle() {
        let graph = TaskGraph::new(1).unwrap();
        let handle = graph.schedule("boom", &TaskHandle::completed(), || -> Result<()> {
            panic!("kernel bug");
        });
        assert_eq!(handle.wait(), Err(Error::TaskFailed("boom".to_owned())));
    }

    #[test]
    fn scheduling_after_a_finished_task_still_runs() {
        let graph = TaskGraph::new(1).unwrap();
        let first = graph.schedule("first", &TaskHandle::completed(), || Ok(()));
        first.wait().unwrap();

        let second = graph.schedule("second", &first, || Ok(()));
        assert_eq!(second.wait(), Ok(()));
    }
}
