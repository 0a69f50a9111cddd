//! Background population workers
//!
//! A tiny fixed pool: at most two worker threads fed by a channel with room
//! for one pending job. Submitting never blocks. When every worker is busy
//! and a job is already waiting, the new job is dropped; population only
//! speeds reads up, so losing a job is harmless.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, trace};

use crate::observability::EngineMetrics;

/// A unit of population work
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pending jobs beyond the ones being run
const QUEUE_DEPTH: usize = 1;

const MAX_WORKERS: usize = 2;

/// Bounded, drop-on-overflow job runner
///
/// Dropping the populator closes the channel; workers exit after their
/// current job. They are not joined, since a job may hold the last reference
/// to the pool that owns this populator.
pub struct Populator {
    sender: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    metrics: Arc<EngineMetrics>,
}

impl Populator {
    /// Starts `threads` workers, clamped to 1..=2.
    pub fn new(threads: usize, metrics: Arc<EngineMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>(QUEUE_DEPTH);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..threads.clamp(1, MAX_WORKERS))
            .filter_map(|n| {
                let receiver = Arc::clone(&receiver);
                std::thread::Builder::new()
                    .name(format!("cursor-pool-populator-{}", n))
                    .spawn(move || loop {
                        // Only one idle worker waits on the channel at a time
                        let job = receiver.lock().blocking_recv();
                        match job {
                            Some(job) => job(),
                            None => break,
                        }
                    })
                    .map_err(|e| error!("failed to spawn cursor pool populator: {}", e))
                    .ok()
            })
            .collect();

        Self {
            sender,
            workers,
            metrics,
        }
    }

    /// Queues a job. Returns false when it was dropped.
    pub fn submit(&self, job: Job) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("population job rejected, queue full");
                self.metrics.increment_population_rejected();
                false
            }
            Err(TrySendError::Closed(_)) => {
                trace!("population job rejected, workers stopped");
                self.metrics.increment_population_rejected();
                false
            }
        }
    }

    /// Number of running worker threads
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    #[test]
    fn test_worker_count_is_clamped() {
        let metrics = Arc::new(EngineMetrics::new());
        assert_eq!(Populator::new(0, Arc::clone(&metrics)).worker_count(), 1);
        assert_eq!(Populator::new(8, metrics).worker_count(), 2);
    }

    #[test]
    fn test_jobs_run() {
        let populator = Populator::new(1, Arc::new(EngineMetrics::new()));
        let (tx, rx) = std_mpsc::channel();

        assert!(populator.submit(Box::new(move || {
            tx.send(42).unwrap();
        })));

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn test_overflow_is_dropped_without_blocking() {
        let metrics = Arc::new(EngineMetrics::new());
        let populator = Populator::new(1, Arc::clone(&metrics));

        let (started_tx, started_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel::<()>();

        // Occupy the only worker
        assert!(populator.submit(Box::new(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        })));
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // One job fits in the queue, the next is dropped
        assert!(populator.submit(Box::new(|| {})));
        assert!(!populator.submit(Box::new(|| {})));
        assert_eq!(metrics.snapshot().population_rejected, 1);

        release_tx.send(()).unwrap();
    }
}
