//! Background thread pool for thumbnail decodes.
//!
//! A small fixed set of named threads pulling boxed jobs off one unbounded
//! crossbeam channel. Dropping the pool closes the channel; workers drain
//! what is left and exit, and the drop joins them.

use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::trace;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct Workers {
    sender: Option<Sender<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl Workers {
    /// `num_threads` is clamped to at least one.
    pub fn new(num_threads: usize) -> Self {
        let (sender, receiver): (Sender<Job>, Receiver<Job>) = unbounded();
        let num_threads = num_threads.max(1);
        let mut handles = Vec::with_capacity(num_threads);

        for worker_id in 0..num_threads {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("splice-thumb-{worker_id}"))
                .spawn(move || {
                    trace!("worker {worker_id} started");
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                    trace!("worker {worker_id} stopped");
                })
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }

        Self {
            sender: Some(sender),
            handles,
        }
    }

    /// Sized for decode work next to a UI thread: three quarters of the
    /// available cores.
    pub fn with_default_size() -> Self {
        Self::new((num_cpus::get() * 3 / 4).max(1))
    }

    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(ref sender) = self.sender {
            let _ = sender.send(Box::new(f));
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        // Closing the channel ends every worker's recv loop.
        self.sender.take();
        for handle in std::mem::take(&mut self.handles) {
            let _ = handle.join();
        }
        trace!("worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn jobs_run_on_the_pool() {
        let pool = Workers::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = crossbeam_channel::unbounded();
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(());
            });
        }
        for _ in 0..8 {
            rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn drop_joins_after_draining() {
        let pool = Workers::new(1);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn thread_count_is_clamped() {
        let pool = Workers::new(0);
        assert_eq!(pool.len(), 1);
    }
}
