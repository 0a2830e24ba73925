//! A dispatcher that funnels every batch onto one dedicated thread.
//!
//! Hosts whose graph must only be touched from a single thread (a UI thread,
//! say) hand a [`ThreadDispatcher`] to their endpoint so remote changes are
//! applied there.

use tandem_core::{Dispatcher, Job};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug)]
pub struct ThreadDispatcher {
    name: String,
    jobs: mpsc::UnboundedSender<Job>,
}

impl ThreadDispatcher {
    /// Start the worker thread. It exits once the dispatcher is dropped and
    /// the queued jobs have run.
    pub fn spawn(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();
        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while let Some(job) = queue.blocking_recv() {
                    job();
                }
            })?;
        Ok(Self { name, jobs })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Dispatcher for ThreadDispatcher {
    fn dispatch(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            warn!(dispatcher = %self.name, "worker thread is gone, job dropped");
        }
    }
}
