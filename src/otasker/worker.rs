//! Per-session workers and the process-wide worker registry.
//!
//! A worker is one OS thread owning one tasker (and through it one database
//! connection). The HTTP side talks to it through a two-phase protocol:
//!
//! * *submit* — wait up to `wait_timeout` for the worker's idle permit; claim
//!   it, register a result channel under the task id, hand over the work.
//!   No permit in time means somebody else's request is running on this
//!   session: the caller gets a break page.
//! * *await* — wait up to `wait_timeout` on the task's result channel. On
//!   timeout the receiver is checked back in and the caller gets a wait page;
//!   a resubmission with the same task id finds the channel and awaits it
//!   again instead of enqueueing new work.

use std::collections::HashMap;
use std::sync::mpsc::{RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use crate::error::Result;
use crate::metrics::Metrics;
use crate::otasker::describe::DescriptorCache;
use crate::otasker::flavor::{Flavor, FlavorKind};
use crate::otasker::stat::{sort_stats, TaskerStat};
use crate::otasker::{
    OracleTasker, TaskResult, Tasker, TaskerControl, Work, STATUS_ERROR_PAGE, STATUS_INTERRUPTED,
};

struct PendingTask {
    tx: tokio::sync::mpsc::Sender<TaskResult>,
    rx: Option<tokio::sync::mpsc::Receiver<TaskResult>>,
}

/// Handle to one live worker.
pub struct Worker {
    control: Arc<dyn TaskerControl>,
    /// Holds one permit while the worker is idle.
    idle: Arc<Semaphore>,
    in_tx: SyncSender<Work>,
    pending: Arc<Mutex<HashMap<String, PendingTask>>>,
    started_at: Arc<Mutex<Option<Instant>>>,
}

impl Worker {
    /// Seconds the in-flight request has been running, zero when idle.
    fn worked_secs(&self) -> i64 {
        self.started_at
            .lock()
            .expect("worker state poisoned")
            .map(|t| t.elapsed().as_secs() as i64)
            .unwrap_or(0)
    }
}

/// `(virtual path, session key) → worker`, keys upper-cased.
pub struct WorkerRegistry {
    inner: Mutex<HashMap<String, HashMap<String, Arc<Worker>>>>,
    descriptors: Arc<DescriptorCache>,
    metrics: Arc<Metrics>,
}

impl WorkerRegistry {
    pub fn new(descriptors: Arc<DescriptorCache>, metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            descriptors,
            metrics,
        }
    }

    /// Execute one work item on the session's worker with the production
    /// Oracle tasker.
    pub async fn run(
        self: &Arc<Self>,
        path: &str,
        flavor: FlavorKind,
        work: Work,
        wait_timeout: Duration,
        idle_timeout: Duration,
    ) -> TaskResult {
        let descriptors = self.descriptors.clone();
        self.run_with(
            path,
            move || Box::new(OracleTasker::new(Flavor::for_kind(flavor), descriptors)) as Box<dyn Tasker>,
            work,
            wait_timeout,
            idle_timeout,
        )
        .await
    }

    /// Same protocol with a caller-supplied tasker factory; the seam the
    /// tests drive a mock tasker through.
    pub async fn run_with<F>(
        self: &Arc<Self>,
        path: &str,
        factory: F,
        work: Work,
        wait_timeout: Duration,
        idle_timeout: Duration,
    ) -> TaskResult
    where
        F: FnOnce() -> Box<dyn Tasker>,
    {
        let path_uc = path.to_uppercase();
        let key_uc = work.session_key.to_uppercase();
        let task_id = work.task_id.clone();

        let worker = self.get_or_spawn(&path_uc, &key_uc, factory, idle_timeout);

        let already_pending = {
            let pending = worker.pending.lock().expect("pending map poisoned");
            pending.contains_key(&task_id)
        };

        if !already_pending {
            match tokio::time::timeout(wait_timeout, worker.idle.clone().acquire_owned()).await {
                Ok(Ok(permit)) => {
                    permit.forget();
                    let (tx, rx) = tokio::sync::mpsc::channel(1);
                    worker
                        .pending
                        .lock()
                        .expect("pending map poisoned")
                        .insert(task_id.clone(), PendingTask { tx, rx: Some(rx) });
                    if worker.in_tx.try_send(work).is_err() {
                        // lost the race against idle eviction
                        worker
                            .pending
                            .lock()
                            .expect("pending map poisoned")
                            .remove(&task_id);
                        return TaskResult {
                            status: STATUS_ERROR_PAGE,
                            content: b"session worker is gone, please retry".to_vec(),
                            ..TaskResult::default()
                        };
                    }
                }
                // somebody else's request occupies this session
                _ => return TaskResult::break_page(worker.worked_secs()),
            }
        }

        let rx = {
            let mut pending = worker.pending.lock().expect("pending map poisoned");
            pending.get_mut(&task_id).and_then(|p| p.rx.take())
        };
        let Some(mut rx) = rx else {
            return TaskResult::break_page(worker.worked_secs());
        };

        match tokio::time::timeout(wait_timeout, rx.recv()).await {
            Ok(Some(res)) => {
                worker
                    .pending
                    .lock()
                    .expect("pending map poisoned")
                    .remove(&task_id);
                res
            }
            Ok(None) => {
                worker
                    .pending
                    .lock()
                    .expect("pending map poisoned")
                    .remove(&task_id);
                TaskResult {
                    status: STATUS_ERROR_PAGE,
                    content: b"session worker exited before producing a result".to_vec(),
                    ..TaskResult::default()
                }
            }
            Err(_) => {
                let mut pending = worker.pending.lock().expect("pending map poisoned");
                if let Some(p) = pending.get_mut(&task_id) {
                    p.rx = Some(rx);
                }
                TaskResult::wait_page(worker.worked_secs())
            }
        }
    }

    /// Cancel the in-flight call of a session. Idle workers (and unknown
    /// sessions) are a no-op.
    pub async fn break_session(&self, path: &str, session_key: &str) -> Result<()> {
        let worker = {
            let inner = self.inner.lock().expect("worker registry poisoned");
            inner
                .get(&path.to_uppercase())
                .and_then(|m| m.get(&session_key.to_uppercase()))
                .cloned()
        };
        let Some(worker) = worker else {
            return Ok(());
        };
        let needs_interrupt = worker.idle.try_acquire().is_err();
        if needs_interrupt {
            let control = worker.control.clone();
            tokio::task::spawn_blocking(move || control.interrupt())
                .await
                .map_err(|e| crate::error::Error::Internal(e.to_string()))?
        } else {
            // idle, nothing to interrupt; the permit goes back on drop
            Ok(())
        }
    }

    /// Snapshot of every worker under a virtual path, sorted by the given
    /// stat field.
    pub fn collect(&self, path: &str, sort_key: &str, reversed: bool) -> Vec<TaskerStat> {
        let workers: Vec<Arc<Worker>> = {
            let inner = self.inner.lock().expect("worker registry poisoned");
            inner
                .get(&path.to_uppercase())
                .map(|m| m.values().cloned().collect())
                .unwrap_or_default()
        };
        let mut stats: Vec<TaskerStat> = workers
            .iter()
            .map(|w| w.control.stat(sort_key))
            .collect();
        sort_stats(&mut stats, reversed);
        stats
    }

    /// Number of live workers under a path (test and metrics aid).
    pub fn session_count(&self, path: &str) -> usize {
        let inner = self.inner.lock().expect("worker registry poisoned");
        inner.get(&path.to_uppercase()).map_or(0, |m| m.len())
    }

    fn get_or_spawn<F>(
        self: &Arc<Self>,
        path_uc: &str,
        key_uc: &str,
        factory: F,
        idle_timeout: Duration,
    ) -> Arc<Worker>
    where
        F: FnOnce() -> Box<dyn Tasker>,
    {
        let mut inner = self.inner.lock().expect("worker registry poisoned");
        if let Some(w) = inner.get(path_uc).and_then(|m| m.get(key_uc)) {
            return w.clone();
        }
        let worker = spawn_worker(self, path_uc, key_uc, factory(), idle_timeout);
        inner
            .entry(path_uc.to_string())
            .or_default()
            .insert(key_uc.to_string(), worker.clone());
        worker
    }

    fn remove(&self, path_uc: &str, key_uc: &str) {
        let mut inner = self.inner.lock().expect("worker registry poisoned");
        if let Some(m) = inner.get_mut(path_uc) {
            m.remove(key_uc);
            if m.is_empty() {
                inner.remove(path_uc);
            }
        }
    }
}

fn spawn_worker(
    registry: &Arc<WorkerRegistry>,
    path_uc: &str,
    key_uc: &str,
    mut tasker: Box<dyn Tasker>,
    idle_timeout: Duration,
) -> Arc<Worker> {
    let (in_tx, in_rx) = std::sync::mpsc::sync_channel::<Work>(1);
    let idle = Arc::new(Semaphore::new(0));
    let pending: Arc<Mutex<HashMap<String, PendingTask>>> = Arc::new(Mutex::new(HashMap::new()));
    let started_at = Arc::new(Mutex::new(None));

    let worker = Arc::new(Worker {
        control: tasker.control(),
        idle: idle.clone(),
        in_tx,
        pending: pending.clone(),
        started_at: started_at.clone(),
    });

    registry.metrics.session_opened();

    let registry = Arc::clone(registry);
    let path = path_uc.to_string();
    let key = key_uc.to_string();
    let thread_name = format!("owagate-worker-{}", key.to_lowercase());
    let listen = move || {
        idle.add_permits(1);
        loop {
            match in_rx.recv_timeout(idle_timeout) {
                Ok(work) => {
                    *started_at.lock().expect("worker state poisoned") = Some(Instant::now());
                    let res = tasker.run(&work);
                    let status = res.status;
                    if let Some(p) = pending
                        .lock()
                        .expect("pending map poisoned")
                        .get(&work.task_id)
                    {
                        let _ = p.tx.try_send(res);
                    }
                    *started_at.lock().expect("worker state poisoned") = None;
                    idle.add_permits(1);
                    if status == STATUS_INTERRUPTED {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        // removal first: an interrupted session must never be observable
        // through the registry with a half-closed connection
        registry.remove(&path, &key);
        tasker.close_and_free();
        pending.lock().expect("pending map poisoned").clear();
        registry.metrics.session_closed();
    };
    if let Err(err) = std::thread::Builder::new().name(thread_name).spawn(listen) {
        // the caller still holds the registry lock; the dead entry ages out
        // through the normal submit-failure path
        tracing::error!("unable to spawn session worker thread: {}", err);
    }
    worker
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockControl {
        interrupts: AtomicU32,
    }

    impl TaskerControl for MockControl {
        fn interrupt(&self) -> Result<()> {
            self.interrupts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stat(&self, sort_key: &str) -> TaskerStat {
            let mut s = TaskerStat::default();
            s.compute_sort_key(sort_key);
            s
        }
    }

    struct MockTasker {
        delay: Duration,
        status: u16,
        control: Arc<MockControl>,
    }

    impl MockTasker {
        fn boxed(delay: Duration, status: u16) -> Box<dyn Tasker> {
            Box::new(MockTasker {
                delay,
                status,
                control: Arc::new(MockControl {
                    interrupts: AtomicU32::new(0),
                }),
            })
        }
    }

    impl Tasker for MockTasker {
        fn run(&mut self, work: &Work) -> TaskResult {
            std::thread::sleep(self.delay);
            TaskResult {
                status: self.status,
                content: work.proc_name.clone().into_bytes(),
                content_type: "text/plain".into(),
                ..TaskResult::default()
            }
        }

        fn close_and_free(&mut self) {}

        fn control(&self) -> Arc<dyn TaskerControl> {
            self.control.clone()
        }
    }

    fn registry() -> Arc<WorkerRegistry> {
        let metrics = Arc::new(Metrics::new());
        Arc::new(WorkerRegistry::new(
            Arc::new(DescriptorCache::new(metrics.clone())),
            metrics,
        ))
    }

    fn work(session: &str, task: &str, proc: &str) -> Work {
        Work {
            session_key: session.to_string(),
            task_id: task.to_string(),
            user_name: "u".into(),
            user_pass: "p".into(),
            conn_str: "db".into(),
            param_store_proc: String::new(),
            before_script: String::new(),
            after_script: String::new(),
            document_table: String::new(),
            cgi_env: Default::default(),
            proc_name: proc.to_string(),
            params: Vec::new(),
            form: Default::default(),
            dump_file_name: std::path::PathBuf::from("unused.log"),
        }
    }

    const WAIT: Duration = Duration::from_millis(400);
    const IDLE: Duration = Duration::from_millis(400);

    #[tokio::test]
    async fn every_work_item_produces_exactly_one_result() {
        let reg = registry();
        let res = reg
            .run_with(
                "/p",
                || MockTasker::boxed(Duration::from_millis(5), 200),
                work("s1", "t1", "echo"),
                WAIT,
                IDLE,
            )
            .await;
        assert_eq!(res.status, 200);
        assert_eq!(res.content, b"echo");
    }

    #[tokio::test]
    async fn slow_task_yields_wait_page_then_result_on_resubmission() {
        let reg = registry();
        let first = reg
            .run_with(
                "/p",
                || MockTasker::boxed(Duration::from_millis(150), 200),
                work("s1", "t1", "slow"),
                Duration::from_millis(30),
                IDLE,
            )
            .await;
        assert_eq!(first.status, crate::otasker::STATUS_WAIT_PAGE);

        // resubmission with the same task id must not enqueue a second item
        let second = reg
            .run_with(
                "/p",
                || panic!("resubmission must reuse the existing worker"),
                work("s1", "t1", "slow"),
                WAIT,
                IDLE,
            )
            .await;
        assert_eq!(second.status, 200);
        assert_eq!(second.content, b"slow");
    }

    #[tokio::test]
    async fn foreign_request_on_busy_session_gets_break_page() {
        let reg = registry();
        let reg2 = reg.clone();
        let first = tokio::spawn(async move {
            reg2.run_with(
                "/p",
                || MockTasker::boxed(Duration::from_millis(200), 200),
                work("s1", "t1", "a"),
                WAIT,
                IDLE,
            )
            .await
        });
        tokio::time::sleep(Duration::from_millis(40)).await;
        let other = reg
            .run_with(
                "/p",
                || panic!("same session key must reuse the worker"),
                work("s1", "t2", "b"),
                Duration::from_millis(30),
                IDLE,
            )
            .await;
        assert_eq!(other.status, crate::otasker::STATUS_BREAK_PAGE);
        assert_eq!(first.await.unwrap().status, 200);
    }

    #[tokio::test]
    async fn interrupted_result_evicts_the_worker() {
        let reg = registry();
        let res = reg
            .run_with(
                "/p",
                || MockTasker::boxed(Duration::from_millis(5), STATUS_INTERRUPTED),
                work("s1", "t1", "x"),
                WAIT,
                IDLE,
            )
            .await;
        assert_eq!(res.status, STATUS_INTERRUPTED);
        for _ in 0..50 {
            if reg.session_count("/p") == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("worker survived an interrupted result");
    }

    #[tokio::test]
    async fn idle_timeout_evicts_the_worker() {
        let reg = registry();
        let res = reg
            .run_with(
                "/p",
                || MockTasker::boxed(Duration::from_millis(5), 200),
                work("s1", "t1", "x"),
                WAIT,
                Duration::from_millis(40),
            )
            .await;
        assert_eq!(res.status, 200);
        assert_eq!(reg.session_count("/p"), 1);
        for _ in 0..50 {
            if reg.session_count("/p") == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("worker survived its idle timeout");
    }

    #[tokio::test]
    async fn break_on_idle_worker_is_a_noop() {
        let reg = registry();
        let control = Arc::new(MockControl {
            interrupts: AtomicU32::new(0),
        });
        let control2 = control.clone();
        let res = reg
            .run_with(
                "/p",
                move || {
                    Box::new(MockTasker {
                        delay: Duration::from_millis(5),
                        status: 200,
                        control: control2,
                    }) as Box<dyn Tasker>
                },
                work("s1", "t1", "x"),
                WAIT,
                IDLE,
            )
            .await;
        assert_eq!(res.status, 200);
        reg.break_session("/p", "s1").await.unwrap();
        assert_eq!(control.interrupts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn break_on_busy_worker_calls_interrupt() {
        let reg = registry();
        let control = Arc::new(MockControl {
            interrupts: AtomicU32::new(0),
        });
        let control2 = control.clone();
        let reg2 = reg.clone();
        let running = tokio::spawn(async move {
            reg2.run_with(
                "/p",
                move || {
                    Box::new(MockTasker {
                        delay: Duration::from_millis(200),
                        status: 200,
                        control: control2,
                    }) as Box<dyn Tasker>
                },
                work("s1", "t1", "x"),
                WAIT,
                IDLE,
            )
            .await
        });
        tokio::time::sleep(Duration::from_millis(40)).await;
        reg.break_session("/p", "s1").await.unwrap();
        assert_eq!(control.interrupts.load(Ordering::SeqCst), 1);
        running.await.unwrap();
    }

    #[tokio::test]
    async fn break_on_unknown_session_is_ok() {
        let reg = registry();
        assert!(reg.break_session("/p", "missing").await.is_ok());
    }

    #[tokio::test]
    async fn sessions_are_keyed_case_insensitively() {
        let reg = registry();
        let res = reg
            .run_with(
                "/Path",
                || MockTasker::boxed(Duration::from_millis(5), 200),
                work("Sess", "t1", "x"),
                WAIT,
                IDLE,
            )
            .await;
        assert_eq!(res.status, 200);
        assert_eq!(reg.session_count("/path"), 1);
        assert_eq!(reg.session_count("/PATH"), 1);
    }
}
