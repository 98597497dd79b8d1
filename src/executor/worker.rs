// device pool worker
use super::task::Task;
use crate::telemetry::Metrics;
use crossbeam_deque::{Injector, Steal, Stealer, Worker as WorkerQueue};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub type WorkerId = usize;

pub(crate) struct Worker {
    pub id: WorkerId,
    pub local_queue: WorkerQueue<Task>,
    pub metrics: Arc<Metrics>,
}

impl Worker {
    pub fn new(id: WorkerId, metrics: Arc<Metrics>) -> Self {
        Self {
            id,
            local_queue: WorkerQueue::new_fifo(),
            metrics,
        }
    }

    // main loop
    pub fn run(
        &self,
        stealers: Vec<Stealer<Task>>,
        injector: Arc<Injector<Task>>,
        shutdown: Arc<AtomicBool>,
        pending_tasks: Arc<AtomicUsize>,
    ) {
        let mut backoff_cnt = 0;

        loop {
            if shutdown.load(Ordering::Acquire) {
                break;
            }

            // local -> global -> steal
            if let Some(task) = self.find_task(&stealers, &injector) {
                backoff_cnt = 0;
                self.execute_task(task);
                pending_tasks.fetch_sub(1, Ordering::Relaxed);
            } else {
                self.backoff(&mut backoff_cnt);
            }
        }
    }

    fn find_task(&self, stealers: &[Stealer<Task>], injector: &Injector<Task>) -> Option<Task> {
        if let Some(task) = self.local_queue.pop() {
            return Some(task);
        }

        loop {
            match injector.steal_batch_and_pop(&self.local_queue) {
                Steal::Success(task) => return Some(task),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }

        self.try_steal_from_workers(stealers)
    }

    fn try_steal_from_workers(&self, stealers: &[Stealer<Task>]) -> Option<Task> {
        use rand::seq::SliceRandom;
        use rand::thread_rng;

        if stealers.len() < 2 {
            return None;
        }

        let mut indices: Vec<usize> = (0..stealers.len()).collect();
        indices.shuffle(&mut thread_rng());

        for &idx in &indices {
            if idx == self.id {
                continue;
            }

            loop {
                match stealers[idx].steal_batch_and_pop(&self.local_queue) {
                    Steal::Success(task) => {
                        self.metrics.record_steal();
                        return Some(task);
                    }
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }

        None
    }

    fn execute_task(&self, task: Task) {
        let tid = task.id;

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            task.execute();
        }));

        if result.is_err() {
            tracing::error!(task = ?tid, worker = self.id, "pool task panicked");
            self.metrics.record_worker_panic();
        }
    }

    fn backoff(&self, count: &mut u32) {
        const MAX_SPINS: u32 = 10;
        const MAX_YIELDS: u32 = 20;

        *count += 1;

        if *count <= MAX_SPINS {
            let spins = (*count).min(6);
            for _ in 0..(1 << spins) {
                std::hint::spin_loop();
            }
        } else if *count <= MAX_YIELDS {
            thread::yield_now();
        } else {
            thread::park_timeout(Duration::from_micros(100));
        }
    }
}
