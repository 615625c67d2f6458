//! Background worker pool for tile and preview jobs

use std::thread::JoinHandle;

use flume::{Receiver, Sender};
use log::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum PoolMessage {
    Run(Job),
    Shutdown,
}

/// Fixed set of worker threads pulling short-lived jobs from one shared queue.
///
/// Jobs are not ordered relative to each other. Dropping the pool lets
/// already-queued jobs drain and then stops the workers without joining them.
pub struct RenderPool {
    job_tx: Sender<PoolMessage>,
    workers: Vec<JoinHandle<()>>,
}

impl RenderPool {
    pub fn new(num_workers: usize) -> Self {
        // flume receivers can be cloned, so all workers fan out from one queue.
        let (job_tx, job_rx) = flume::unbounded();

        let workers = (0..num_workers.max(1))
            .filter_map(|index| {
                let rx = job_rx.clone();
                std::thread::Builder::new()
                    .name(format!("inkpane-render-{index}"))
                    .spawn(move || worker_loop(rx))
                    .map_err(|e| warn!("Failed to spawn render worker {index}: {e}"))
                    .ok()
            })
            .collect();

        Self { job_tx, workers }
    }

    /// Queue a job; returns `false` if the pool has already shut down
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.job_tx.send(PoolMessage::Run(Box::new(job))).is_ok()
    }

    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Jobs waiting for a free worker
    #[must_use]
    pub fn queued(&self) -> usize {
        self.job_tx.len()
    }

    pub fn shutdown(&self) {
        for _ in 0..self.workers.len() {
            let _ = self.job_tx.send(PoolMessage::Shutdown);
        }
    }
}

impl Drop for RenderPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(jobs: Receiver<PoolMessage>) {
    for message in jobs {
        match message {
            PoolMessage::Run(job) => job(),
            PoolMessage::Shutdown => break,
        }
    }
    debug!("Render worker exiting");
}
