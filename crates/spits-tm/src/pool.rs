//! Bounded task pool (spec §4.3): a fixed set of worker threads pulling
//! from a bounded SPMC queue and calling into the computation module,
//! posting results to a lock-free MPSC result queue.
//!
//! Workers are plain OS threads, not async tasks — the work they perform is
//! the module's (potentially CPU-bound, blocking) computation, matching
//! §5's "multi-threaded with preemptive scheduling... no cooperative-
//! suspension primitive required".

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError, TrySendError};
use spits_core::module::Module;
use tracing::{error, warn};

struct QueuedTask {
    task_id: i64,
    run_id: i64,
    bytes: Vec<u8>,
}

/// One item drained by the TM server under the `pull-results` verb.
pub struct ResultItem {
    pub task_id: i64,
    pub run_id: i64,
    pub worker_status: i64,
    pub result_bytes: Vec<u8>,
}

/// The TM-side bounded task pool.
pub struct TaskPool {
    task_tx: Sender<QueuedTask>,
    task_rx: Receiver<QueuedTask>,
    result_tx: Sender<ResultItem>,
    result_rx: Receiver<ResultItem>,
    max_threads: usize,
    started: AtomicBool,
    in_flight: AtomicUsize,
}

impl TaskPool {
    /// `max_threads` workers, admission capped at `max_threads + overfill`.
    pub fn new(max_threads: usize, overfill: usize) -> Self {
        let (task_tx, task_rx) = bounded(max_threads + overfill);
        let (result_tx, result_rx) = unbounded();
        Self {
            task_tx,
            task_rx,
            result_tx,
            result_rx,
            max_threads,
            started: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Number of workers currently executing a task — used by the idle
    /// timer (§4.4: fires only when the pool is empty AND no workers are
    /// in flight).
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// Non-blocking enqueue. Returns `false` when the queue is at capacity —
    /// the push-handler MUST NOT block waiting for space (§5).
    pub fn put(&self, task_id: i64, run_id: i64, bytes: Vec<u8>) -> bool {
        match self.task_tx.try_send(QueuedTask {
            task_id,
            run_id,
            bytes,
        }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn full(&self) -> bool {
        self.task_tx.is_full()
    }

    pub fn empty(&self) -> bool {
        self.task_rx.is_empty()
    }

    /// Non-blocking drain of one result, consumed by the `pull-results`
    /// handler.
    pub fn drain_result(&self) -> Option<ResultItem> {
        match self.result_rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Push an item back onto the result queue — used when a `pull-results`
    /// ack comes back wrong and the item must not be lost (§4.4).
    pub fn push_back_result(&self, item: ResultItem) {
        // Unbounded: this can never fail for capacity reasons.
        let _ = self.result_tx.send(item);
    }

    /// Spawns `max_threads` workers, each calling `worker_new` once (a
    /// failure is logged but does not abort the worker — it then skips
    /// execution of pulled tasks, per §4.3) and then looping:
    /// dequeue -> `run` -> verify ctx -> enqueue result.
    pub fn start(self: &Arc<Self>, module: Arc<dyn Module>, module_argv: Vec<String>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        for worker_idx in 0..self.max_threads {
            let pool = Arc::clone(self);
            let module = Arc::clone(&module);
            let argv = module_argv.clone();
            std::thread::Builder::new()
                .name(format!("spits-tm-worker-{worker_idx}"))
                .spawn(move || pool.run_worker(worker_idx, module.as_ref(), &argv))
                .expect("failed to spawn task pool worker thread");
        }
    }

    fn run_worker(&self, worker_idx: usize, module: &dyn Module, argv: &[String]) {
        let mut state = match module.worker_new(argv) {
            Ok(state) => Some(state),
            Err(e) => {
                error!(worker_idx, error = %e, "worker_new failed; worker will skip all tasks");
                None
            }
        };

        loop {
            let task = match self.task_rx.recv() {
                Ok(task) => task,
                Err(_) => break, // sender side dropped: pool is shutting down
            };

            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let result = self.execute(&mut state, &task);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let Some(outcome) = result else { continue };

            if outcome.ctx != task.task_id {
                error!(
                    task_id = task.task_id,
                    echoed = outcome.ctx,
                    "worker echoed mismatched context; dropping result"
                );
                continue;
            }

            let Some(bytes) = outcome.bytes else {
                warn!(task_id = task.task_id, "worker returned no answer; dropping result");
                continue;
            };

            let _ = self.result_tx.send(ResultItem {
                task_id: task.task_id,
                run_id: task.run_id,
                worker_status: outcome.status,
                result_bytes: bytes,
            });
        }
    }

    /// Runs one task against the worker state. A worker crash (an `Err`
    /// from `run`) is logged and the task dropped; it MUST NOT terminate
    /// the worker thread.
    fn execute(
        &self,
        state: &mut Option<Box<dyn spits_core::module::WorkerState>>,
        task: &QueuedTask,
    ) -> Option<spits_core::module::TaskOutcome> {
        let Some(state) = state.as_mut() else {
            warn!(task_id = task.task_id, "skipping task: no worker state");
            return None;
        };

        match state.run(&task.bytes, task.task_id) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(task_id = task.task_id, error = %e, "worker crashed while processing task");
                None
            }
        }
    }
}
