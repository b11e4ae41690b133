//! Background and deferred jobs.
//!
//! `AsyncJobQueue` runs jobs on a fixed-size rayon pool. Workers only
//! see what the job closure captured (immutable inputs) and hand back an
//! owned result through a channel; results are collected on the main thread
//! by `finish_jobs`, which is the only place engine state may be touched.
//!
//! `SyncJobQueue` holds short jobs that run on the main thread, a bounded
//! number per frame.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};

pub type JobId = u64;

/// Work to run; returns `None` when it bailed out (e.g. cancelled mid-way)
pub type JobFn<T> = Box<dyn FnOnce(&CancelToken) -> Option<T> + Send + 'static>;

/// Shared cancellation flag checked by running jobs
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Lifetime a job is tied to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobScope {
    /// Survives game sessions
    Process,
    /// Cancelled when the current game ends
    Session,
}

#[derive(Clone, Debug)]
pub struct JobHandle {
    pub id: JobId,
    token: CancelToken,
}

impl JobHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

struct QueuedJob<T> {
    id: JobId,
    token: CancelToken,
    work: JobFn<T>,
}

struct Completed<T> {
    id: JobId,
    output: Option<T>,
}

pub struct AsyncJobQueue<T: Send + 'static> {
    /// `None` if the pool could not be built; jobs then run inline
    pool: Option<ThreadPool>,
    done_sender: Sender<Completed<T>>,
    completed: Receiver<Completed<T>>,
    in_flight: HashMap<JobId, (CancelToken, JobScope)>,
    next_id: JobId,
}

impl<T: Send + 'static> AsyncJobQueue<T> {
    pub fn new(worker_count: usize) -> Self {
        let (done_sender, completed) = mpsc::channel::<Completed<T>>();
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_count.max(1))
            .thread_name(|n| format!("job-worker-{}", n))
            .build();
        let pool = match pool {
            Ok(pool) => {
                tracing::info!("started {} worker threads", pool.current_num_threads());
                Some(pool)
            }
            Err(err) => {
                tracing::error!(%err, "failed to build job pool, running jobs inline");
                None
            }
        };

        Self {
            pool,
            done_sender,
            completed,
            in_flight: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.pool.as_ref().map_or(0, |p| p.current_num_threads())
    }

    /// Jobs queued or running whose results have not been collected yet
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    pub fn queue(&mut self, scope: JobScope, work: JobFn<T>) -> JobHandle {
        let id = self.next_id;
        self.next_id += 1;
        let token = CancelToken::new();
        self.in_flight.insert(id, (token.clone(), scope));

        let job = QueuedJob { id, token: token.clone(), work };
        let done = self.done_sender.clone();
        match &self.pool {
            Some(pool) => pool.spawn(move || run_job(job, &done)),
            None => run_job(job, &done),
        }
        JobHandle { id, token }
    }

    /// Collect finished jobs. Results of cancelled jobs are dropped here.
    pub fn finish_jobs(&mut self) -> Vec<T> {
        let mut results = Vec::new();
        while let Ok(done) = self.completed.try_recv() {
            let cancelled = match self.in_flight.remove(&done.id) {
                Some((token, _)) => token.is_cancelled(),
                None => true,
            };
            match done.output {
                Some(output) if !cancelled => results.push(output),
                _ => tracing::trace!(id = done.id, "job cancelled or produced nothing"),
            }
        }
        results
    }

    /// Cancel every job tied to `scope`. Returns how many were cancelled.
    pub fn cancel_scope(&mut self, scope: JobScope) -> usize {
        let mut count = 0;
        for (token, job_scope) in self.in_flight.values() {
            if *job_scope == scope && !token.is_cancelled() {
                token.cancel();
                count += 1;
            }
        }
        if count > 0 {
            tracing::debug!(count, ?scope, "cancelled background jobs");
        }
        count
    }
}

impl<T: Send + 'static> Drop for AsyncJobQueue<T> {
    fn drop(&mut self) {
        // queued jobs bail at their first cancellation check
        for (token, _) in self.in_flight.values() {
            token.cancel();
        }
    }
}

fn run_job<T>(job: QueuedJob<T>, done: &Sender<Completed<T>>) {
    let output = if job.token.is_cancelled() {
        None
    } else {
        (job.work)(&job.token)
    };
    // the queue may already be gone
    let _ = done.send(Completed { id: job.id, output });
}

/// Main-thread queue for short jobs, drained a few per frame
pub struct SyncJobQueue<T> {
    jobs: VecDeque<(QueuedJob<T>, JobScope)>,
    next_id: JobId,
}

impl<T> Default for SyncJobQueue<T> {
    fn default() -> Self {
        Self { jobs: VecDeque::new(), next_id: 1 }
    }
}

impl<T> SyncJobQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.jobs.len()
    }

    pub fn queue(&mut self, scope: JobScope, work: JobFn<T>) -> JobHandle {
        let id = self.next_id;
        self.next_id += 1;
        let token = CancelToken::new();
        self.jobs.push_back((QueuedJob { id, token: token.clone(), work }, scope));
        JobHandle { id, token }
    }

    /// Run at most `max` queued jobs in FIFO order
    pub fn run_jobs(&mut self, max: usize) -> Vec<T> {
        let mut results = Vec::new();
        let mut ran = 0;
        while ran < max {
            let Some((job, _)) = self.jobs.pop_front() else { break };
            if job.token.is_cancelled() {
                continue;
            }
            ran += 1;
            if let Some(output) = (job.work)(&job.token) {
                results.push(output);
            }
        }
        results
    }

    pub fn cancel_scope(&mut self, scope: JobScope) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|(job, job_scope)| {
            if *job_scope == scope {
                job.token.cancel();
                false
            } else {
                true
            }
        });
        before - self.jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    fn drain_all<T: Send + 'static>(queue: &mut AsyncJobQueue<T>) -> Vec<T> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut out = Vec::new();
        while queue.pending() > 0 && Instant::now() < deadline {
            out.extend(queue.finish_jobs());
            thread::sleep(Duration::from_millis(1));
        }
        out
    }

    #[test]
    fn test_async_jobs_complete() {
        let mut queue = AsyncJobQueue::new(2);
        for i in 0..16u32 {
            queue.queue(JobScope::Process, Box::new(move |_| Some(i * 2)));
        }
        let mut results = drain_all(&mut queue);
        results.sort_unstable();
        assert_eq!(results, (0..16).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_pool_size_follows_worker_count() {
        let queue = AsyncJobQueue::<u32>::new(3);
        assert_eq!(queue.worker_count(), 3);
        let queue = AsyncJobQueue::<u32>::new(0);
        assert_eq!(queue.worker_count(), 1);
    }

    #[test]
    fn test_cancelled_session_jobs_are_dropped() {
        let mut queue = AsyncJobQueue::new(1);
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = Arc::new(Mutex::new(gate_rx));

        // first job blocks the only worker until released
        let gate = Arc::clone(&gate_rx);
        queue.queue(JobScope::Process, Box::new(move |_| {
            let _ = gate.lock().unwrap().recv();
            Some(1)
        }));
        for _ in 0..4 {
            queue.queue(JobScope::Session, Box::new(|_| Some(100)));
        }

        assert_eq!(queue.cancel_scope(JobScope::Session), 4);
        gate_tx.send(()).unwrap();

        assert_eq!(drain_all(&mut queue), vec![1]);
    }

    #[test]
    fn test_running_job_sees_cancel() {
        let mut queue = AsyncJobQueue::new(1);
        let started = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&started);
        let handle = queue.queue(JobScope::Session, Box::new(move |token| {
            flag.store(true, Ordering::Release);
            while !token.is_cancelled() {
                thread::sleep(Duration::from_millis(1));
            }
            None::<u32>
        }));
        while !started.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(1));
        }
        handle.cancel();
        assert!(drain_all(&mut queue).is_empty());
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_sync_queue_runs_bounded_batches() {
        let mut queue = SyncJobQueue::new();
        for i in 0..5 {
            queue.queue(JobScope::Process, Box::new(move |_| Some(i)));
        }
        assert_eq!(queue.run_jobs(2), vec![0, 1]);
        assert_eq!(queue.run_jobs(2), vec![2, 3]);
        assert_eq!(queue.run_jobs(2), vec![4]);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_sync_queue_cancel_scope() {
        let mut queue = SyncJobQueue::new();
        queue.queue(JobScope::Session, Box::new(|_| Some("session")));
        queue.queue(JobScope::Process, Box::new(|_| Some("process")));
        let handle = queue.queue(JobScope::Process, Box::new(|_| Some("cancelled")));
        handle.cancel();

        assert_eq!(queue.cancel_scope(JobScope::Session), 1);
        assert_eq!(queue.run_jobs(10), vec!["process"]);
    }
}
