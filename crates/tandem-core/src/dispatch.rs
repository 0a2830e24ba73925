//! Execution context for applying remote batches.
//!
//! A [`Dispatcher`] decides which thread performs the graph mutations of an
//! executed batch. The replicator waits for the job to finish before it
//! releases the walk lock, so whichever thread runs it, the mutation is
//! complete before a snapshot can observe the graph.

/// A unit of work handed to a dispatcher.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait Dispatcher: Send + Sync {
    /// Run `job` exactly once, on whatever thread this dispatcher owns.
    /// Dropping the job without running it aborts the batch.
    fn dispatch(&self, job: Job);
}

/// Runs jobs on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, job: Job) {
        job()
    }
}

impl<F> Dispatcher for F
where
    F: Fn(Job) + Send + Sync,
{
    fn dispatch(&self, job: Job) {
        self(job)
    }
}
