//! Per-stream serial job execution.
//!
//! Every suspension point in the filter resumes by posting a job to the
//! stream's dispatcher: backend callbacks never touch filter state directly,
//! they post. Jobs run one at a time, in post order, on whatever thread
//! drives the dispatcher, which gives the filter its single-threaded view of
//! the world even when the backend completes work elsewhere.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
use tokio::sync::mpsc;

/// A unit of deferred work bound to a stream.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Serial executor owned by a proxy stream.
pub trait Dispatcher: Send + Sync {
    /// Enqueues `job` behind everything already posted. Callable from any
    /// thread.
    fn post(&self, job: Job);
}

/// FIFO dispatcher drained explicitly by the embedder.
///
/// This is the implementation used by the test suites and by embeddings that
/// already own an event loop: post from anywhere, call [`drain`](Self::drain)
/// from the stream's thread.
#[derive(Clone, Default)]
pub struct QueueDispatcher {
    queue: Arc<Mutex<VecDeque<Job>>>,
}

impl QueueDispatcher {
    pub fn new() -> Self {
        Default::default()
    }

    /// Runs the oldest posted job. Returns false when the queue was empty.
    pub fn run_one(&self) -> bool {
        let job = self.queue.lock().unwrap().pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Runs posted jobs until the queue is empty, including jobs posted by
    /// the jobs themselves. Returns how many ran.
    pub fn drain(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}

impl Dispatcher for QueueDispatcher {
    fn post(&self, job: Job) {
        self.queue.lock().unwrap().push_back(job);
    }
}

/// Dispatcher backed by a tokio channel, for embeddings whose streams live on
/// a tokio runtime. Jobs execute in post order inside [`DispatcherTask::run`].
#[derive(Clone)]
pub struct TokioDispatcher {
    sender: mpsc::UnboundedSender<Job>,
}

impl TokioDispatcher {
    pub fn pair() -> (TokioDispatcher, DispatcherTask) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (TokioDispatcher { sender }, DispatcherTask { receiver })
    }
}

impl Dispatcher for TokioDispatcher {
    fn post(&self, job: Job) {
        if self.sender.send(job).is_err() {
            debug!("dispatcher task is gone, dropping posted job");
        }
    }
}

/// Consumer half of a [`TokioDispatcher`].
pub struct DispatcherTask {
    receiver: mpsc::UnboundedReceiver<Job>,
}

impl DispatcherTask {
    /// Executes posted jobs until every sender is dropped.
    pub async fn run(mut self) {
        while let Some(job) = self.receiver.recv().await {
            job();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_runs_in_post_order() {
        let dispatcher = QueueDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let seen = seen.clone();
            dispatcher.post(Box::new(move || seen.lock().unwrap().push(i)));
        }
        assert_eq!(dispatcher.drain(), 4);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn jobs_may_post_jobs() {
        let dispatcher = QueueDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let dispatcher2 = dispatcher.clone();
            let seen = seen.clone();
            dispatcher.post(Box::new(move || {
                let seen2 = seen.clone();
                seen.lock().unwrap().push("outer");
                dispatcher2.post(Box::new(move || seen2.lock().unwrap().push("inner")));
            }));
        }
        assert_eq!(dispatcher.drain(), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn tokio_dispatcher_preserves_order() {
        let (dispatcher, task) = TokioDispatcher::pair();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..16 {
            let seen = seen.clone();
            dispatcher.post(Box::new(move || seen.lock().unwrap().push(i)));
        }
        drop(dispatcher);
        task.run().await;
        assert_eq!(*seen.lock().unwrap(), (0..16).collect::<Vec<_>>());
    }
}
