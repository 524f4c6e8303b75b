//! # Queue Server
//!
//! Polls the in-process queue for due tasks and runs them on a bounded pool
//! of tokio tasks. Handlers are registered per task type in a [`ServeMux`].
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.1.0: Cooperative cancellation and graceful drain on shutdown
//! - 1.0.0: Initial polling server with per-type handlers

use super::memory::{InMemoryTaskQueue, LeasedTask};
use super::{Task, TaskState};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, warn};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

/// Longest delay between two attempts of a retried task
const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// Processes tasks of one type
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Handle a delivered task. An error counts as a failed attempt.
    async fn process(&self, task: &Task) -> anyhow::Result<()>;
}

/// Registry mapping task types to handlers
#[derive(Clone, Default)]
pub struct ServeMux {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl ServeMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same type
    pub fn handle(&mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_type.into(), handler);
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Server tuning
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum handlers running at once
    pub concurrency: usize,
    pub poll_interval: Duration,
    /// How often expired completed tasks are purged
    pub purge_interval: Duration,
    /// First retry delay; doubles per attempt
    pub retry_base_delay: Duration,
    /// How long shutdown waits for in-flight handlers
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            poll_interval: Duration::from_millis(500),
            purge_interval: Duration::from_secs(60),
            retry_base_delay: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(8),
        }
    }
}

/// Delivers due tasks from an [`InMemoryTaskQueue`] to registered handlers
pub struct QueueServer {
    queue: Arc<InMemoryTaskQueue>,
    mux: Arc<ServeMux>,
    config: ServerConfig,
    semaphore: Arc<Semaphore>,
}

impl QueueServer {
    pub fn new(queue: Arc<InMemoryTaskQueue>, mux: ServeMux, config: ServerConfig) -> Self {
        let permits = config.concurrency.max(1);
        Self {
            queue,
            mux: Arc::new(mux),
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Run the poll loop until `shutdown` flips to `true` or its sender is dropped
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Queue server started ({} workers, polling every {:?}, {} handler(s))",
            self.config.concurrency,
            self.config.poll_interval,
            self.mux.len()
        );

        let mut poll = tokio::time::interval(self.config.poll_interval);
        let mut purge = tokio::time::interval(self.config.purge_interval);

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    self.dispatch_due().await;
                }
                _ = purge.tick() => {
                    match self.queue.purge_expired(Utc::now()) {
                        Ok(0) => {}
                        Ok(n) => debug!("Purged {n} expired completed task(s)"),
                        Err(e) => error!("Failed to purge expired tasks: {e}"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.drain().await;
        info!("Queue server stopped");
    }

    /// Lease as many due tasks as there are free workers and start them
    pub async fn dispatch_due(&self) -> usize {
        let available = self.semaphore.available_permits();
        let leased = match self.queue.lease_due(Utc::now(), available) {
            Ok(leased) => leased,
            Err(e) => {
                error!("Failed to lease due tasks: {e}");
                return 0;
            }
        };

        let count = leased.len();
        for task in leased {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!("Worker pool closed, leaving task {} active", task.task.id);
                    continue;
                }
            };
            let queue = self.queue.clone();
            let mux = self.mux.clone();
            let retry_base = self.config.retry_base_delay;
            tokio::spawn(async move {
                let _permit = permit;
                execute(queue, mux, task, retry_base).await;
            });
        }
        count
    }

    /// Wait for in-flight handlers, bounded by the shutdown timeout
    async fn drain(&self) {
        let all = self.config.concurrency.max(1) as u32;
        match tokio::time::timeout(self.config.shutdown_timeout, self.semaphore.acquire_many(all))
            .await
        {
            Ok(_) => debug!("All handlers finished"),
            Err(_) => warn!(
                "Shutdown timeout ({:?}) reached with handlers still running",
                self.config.shutdown_timeout
            ),
        }
    }
}

/// Exponential backoff with up to one base delay of random jitter
pub fn retry_delay(retried: u32, base: Duration) -> Duration {
    let factor = 2u32.saturating_pow(retried.min(16));
    let backoff = base.saturating_mul(factor).min(MAX_RETRY_DELAY);
    let jitter_ms = base.as_millis().min(u128::from(u64::MAX)) as u64;
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..=jitter_ms)
    };
    backoff + Duration::from_millis(jitter)
}

async fn execute(
    queue: Arc<InMemoryTaskQueue>,
    mux: Arc<ServeMux>,
    leased: LeasedTask,
    retry_base: Duration,
) {
    let LeasedTask {
        task,
        timeout,
        cancel,
    } = leased;

    let outcome = match mux.get(&task.task_type) {
        Some(handler) => {
            let run = async {
                match timeout {
                    Some(limit) => match tokio::time::timeout(limit, handler.process(&task)).await {
                        Ok(result) => result,
                        Err(_) => Err(anyhow::anyhow!("task timed out after {limit:?}")),
                    },
                    None => handler.process(&task).await,
                }
            };
            tokio::select! {
                result = run => Some(result),
                _ = cancel.notified() => None,
            }
        }
        None => Some(Err(anyhow::anyhow!(
            "no handler registered for task type {}",
            task.task_type
        ))),
    };

    let now = Utc::now();
    match outcome {
        None => info!("Task {} ({}) cancelled while processing", task.id, task.task_type),
        Some(Ok(())) => {
            if let Err(e) = queue.mark_completed(&task.id, now) {
                error!("Failed to mark task {} completed: {e}", task.id);
            }
        }
        Some(Err(err)) => {
            let delay = retry_delay(task.retried, retry_base);
            match queue.mark_failed(&task.id, &format!("{err:#}"), delay, now) {
                Ok(TaskState::Retry) => warn!(
                    "Task {} ({}) failed on attempt {}, retrying in {:?}: {err:#}",
                    task.id,
                    task.task_type,
                    task.retried + 1,
                    delay
                ),
                Ok(_) => error!(
                    "Task {} ({}) on {} failed with no retries left: {err:#}",
                    task.id, task.task_type, task.queue
                ),
                Err(e) => error!("Failed to record failure of task {}: {e}", task.id),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::queue::{NewTask, TaskOptions, TaskQueue};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: AtomicUsize,
        fail: bool,
        delay: Duration,
    }

    impl CountingHandler {
        fn new(fail: bool, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
                delay,
            })
        }
    }

    #[async_trait]
    impl TaskHandler for CountingHandler {
        async fn process(&self, _task: &Task) -> anyhow::Result<()> {
            tokio::time::sleep(self.delay).await;
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("handler failed");
            }
            Ok(())
        }
    }

    fn server_with(handler: Arc<CountingHandler>) -> (Arc<InMemoryTaskQueue>, QueueServer) {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let mut mux = ServeMux::new();
        mux.handle("test:job", handler);
        let config = ServerConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(10),
            ..ServerConfig::default()
        };
        (queue.clone(), QueueServer::new(queue, mux, config))
    }

    async fn wait_for_state(queue: &InMemoryTaskQueue, id: &str, state: TaskState) -> bool {
        for _ in 0..100 {
            if let Ok(info) = queue.get_task_info("jobs", id).await {
                if info.state == state {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn opts() -> TaskOptions {
        TaskOptions::default()
            .queue("jobs")
            .retention(Duration::from_secs(60))
    }

    #[test]
    fn test_mux_registration() {
        let mut mux = ServeMux::new();
        assert!(mux.is_empty());
        mux.handle("a", CountingHandler::new(false, Duration::ZERO));
        assert_eq!(mux.len(), 1);
        assert!(mux.get("a").is_some());
        assert!(mux.get("b").is_none());
    }

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let base = Duration::from_secs(10);
        let first = retry_delay(0, base);
        assert!(first >= base && first <= base * 2);
        let third = retry_delay(2, base);
        assert!(third >= Duration::from_secs(40));
        assert!(retry_delay(30, base) <= MAX_RETRY_DELAY + base);
        assert_eq!(retry_delay(3, Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_due_task_is_processed_and_completed() {
        let handler = CountingHandler::new(false, Duration::ZERO);
        let (queue, server) = server_with(handler.clone());
        let info = queue
            .enqueue(NewTask::new("test:job", vec![]), opts())
            .await
            .unwrap();

        assert_eq!(server.dispatch_due().await, 1);
        assert!(wait_for_state(&queue, &info.id, TaskState::Completed).await);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_task_without_retry_is_archived() {
        let handler = CountingHandler::new(true, Duration::ZERO);
        let (queue, server) = server_with(handler.clone());
        let info = queue
            .enqueue(NewTask::new("test:job", vec![]), opts())
            .await
            .unwrap();

        server.dispatch_due().await;
        assert!(wait_for_state(&queue, &info.id, TaskState::Archived).await);
        let archived = queue.get_task_info("jobs", &info.id).await.unwrap();
        assert!(archived.last_error.unwrap().contains("handler failed"));
    }

    #[tokio::test]
    async fn test_unregistered_type_is_archived() {
        let handler = CountingHandler::new(false, Duration::ZERO);
        let (queue, server) = server_with(handler.clone());
        let info = queue
            .enqueue(NewTask::new("other:job", vec![]), opts())
            .await
            .unwrap();

        server.dispatch_due().await;
        assert!(wait_for_state(&queue, &info.id, TaskState::Archived).await);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_running_handler() {
        let handler = CountingHandler::new(false, Duration::from_secs(30));
        let (queue, server) = server_with(handler.clone());
        let info = queue
            .enqueue(NewTask::new("test:job", vec![]), opts())
            .await
            .unwrap();

        server.dispatch_due().await;
        assert!(wait_for_state(&queue, &info.id, TaskState::Active).await);
        queue.cancel_processing(&info.id).await.unwrap();

        assert!(wait_for_state(&queue, &info.id, TaskState::Archived).await);
        queue.delete_task("jobs", &info.id).await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let handler = CountingHandler::new(false, Duration::from_secs(30));
        let (queue, server) = server_with(handler);
        let info = queue
            .enqueue(
                NewTask::new("test:job", vec![]),
                opts().timeout(Duration::from_millis(20)),
            )
            .await
            .unwrap();

        server.dispatch_due().await;
        assert!(wait_for_state(&queue, &info.id, TaskState::Archived).await);
        let archived = queue.get_task_info("jobs", &info.id).await.unwrap();
        assert!(archived.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown() {
        let handler = CountingHandler::new(false, Duration::ZERO);
        let (queue, server) = server_with(handler.clone());
        queue
            .enqueue(NewTask::new("test:job", vec![]), opts())
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let server = Arc::new(server);
        let running = server.clone();
        let join = tokio::spawn(async move { running.run(rx).await });

        for _ in 0..100 {
            if handler.calls.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), join)
            .await
            .unwrap()
            .unwrap();
    }
}
