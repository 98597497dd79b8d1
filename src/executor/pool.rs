use super::task::Task;
use super::worker::{Worker, WorkerId};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::telemetry::Metrics;
use crossbeam_channel::bounded;
use crossbeam_deque::{Injector, Stealer};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[cfg(target_os = "linux")]
fn pin_thread_to_core(core_id: usize) {
    unsafe {
        let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(core_id, &mut cpuset);
        let result = libc::sched_setaffinity(
            0, // current thread
            std::mem::size_of::<libc::cpu_set_t>(),
            &cpuset,
        );
        if result != 0 {
            tracing::warn!(
                thread = thread::current().name().unwrap_or("unknown"),
                core_id,
                "failed to pin worker thread"
            );
        }
    }
}

/// Thread settings shared by every device pool of a runtime.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub thread_name_prefix: String,
    pub stack_size: Option<usize>,
    pub pin_workers: bool,
}

impl PoolSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            thread_name_prefix: config.thread_name_prefix.clone(),
            stack_size: config.stack_size,
            pin_workers: config.pin_workers,
        }
    }
}

/// Work-stealing pool that plays the part of a device's compute units.
pub struct ComputePool {
    workers: Vec<WorkerHandle>,
    injector: Arc<Injector<Task>>,
    stealers: Vec<Stealer<Task>>,
    shutdown: Arc<AtomicBool>,
    num_threads: usize,
    pending_tasks: Arc<AtomicUsize>,
    metrics: Arc<Metrics>,
}

struct WorkerHandle {
    id: WorkerId,
    thread: Option<JoinHandle<()>>,
    unparker: thread::Thread,
}

impl ComputePool {
    pub fn new(
        settings: &PoolSettings,
        label: &str,
        num_threads: usize,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        if num_threads == 0 {
            return Err(Error::config("need at least 1 thread"));
        }

        let injector = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let pending_tasks = Arc::new(AtomicUsize::new(0));
        let cores = num_cpus::get().max(1);

        let mut workers = Vec::with_capacity(num_threads);
        let mut stealers = Vec::with_capacity(num_threads);

        for id in 0..num_threads {
            let worker = Worker::new(id, metrics.clone());
            stealers.push(worker.local_queue.stealer());
            workers.push(worker);
        }

        let mut handles = Vec::with_capacity(num_threads);

        for worker in workers {
            let id = worker.id;
            let stealers_clone = stealers.clone();
            let injector_clone = injector.clone();
            let shutdown_clone = shutdown.clone();
            let pending_clone = pending_tasks.clone();
            let name = format!("{}-{}-{}", settings.thread_name_prefix, label, id);

            let mut builder = thread::Builder::new().name(name);

            if let Some(stack_size) = settings.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let pin_workers = settings.pin_workers;
            let thread = builder
                .spawn(move || {
                    #[cfg(target_os = "linux")]
                    if pin_workers {
                        pin_thread_to_core(id % cores);
                    }
                    #[cfg(not(target_os = "linux"))]
                    let _ = (pin_workers, cores);

                    worker.run(stealers_clone, injector_clone, shutdown_clone, pending_clone);
                })
                .map_err(|e| Error::dispatch(format!("spawn failed: {}", e)))?;

            let unparker = thread.thread().clone();

            handles.push(WorkerHandle {
                id,
                thread: Some(thread),
                unparker,
            });
        }

        Ok(Self {
            workers: handles,
            injector,
            stealers,
            shutdown,
            num_threads,
            pending_tasks,
            metrics,
        })
    }

    pub(crate) fn submit(&self, task: Task) {
        self.pending_tasks.fetch_add(1, Ordering::Relaxed);
        self.injector.push(task);

        for worker in &self.workers {
            worker.unparker.unpark();
        }
    }

    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Task::new(f));
    }

    /// Run every job on the pool and block until all have reported. Results
    /// come back in job order; a panicking job reports an error instead.
    pub fn run_all<F>(&self, jobs: Vec<F>) -> Vec<Result<()>>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let count = jobs.len();
        let (tx, rx) = bounded(count.max(1));

        for (index, job) in jobs.into_iter().enumerate() {
            let tx = tx.clone();
            self.execute(move || {
                let outcome = catch_unwind(AssertUnwindSafe(job))
                    .unwrap_or_else(|payload| Err(Error::dispatch(panic_message(payload))));
                let _ = tx.send((index, outcome));
            });
        }
        drop(tx);

        let mut results: Vec<Result<()>> = (0..count).map(|_| Ok(())).collect();
        let mut received = 0;
        while received < count {
            match rx.recv() {
                Ok((index, outcome)) => {
                    results[index] = outcome;
                    received += 1;
                }
                Err(_) => {
                    for slot in results.iter_mut().skip(received) {
                        *slot = Err(Error::dispatch("device pool shut down mid-launch"));
                    }
                    break;
                }
            }
        }
        results
    }

    pub fn pending_tasks(&self) -> usize {
        self.pending_tasks.load(Ordering::Relaxed)
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);

        // wake everyone up to check shutdown flag
        for worker in &self.workers {
            worker.unparker.unpark();
        }

        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

impl Drop for ComputePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ComputePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePool")
            .field("num_threads", &self.num_threads)
            .field("pending_tasks", &self.pending_tasks())
            .field("stealers", &self.stealers.len())
            .field("metrics", &self.metrics)
            .finish()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("kernel panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("kernel panicked: {}", s)
    } else {
        "kernel panicked".to_string()
    }
}
