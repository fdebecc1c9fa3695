//! 进程内后台 Worker
//!
//! 启动时按名称注册处理器，之后通过 `enqueue` 投递任务。固定数量的任务协程
//! 从无界队列中取任务执行；可重试失败按 `RetryPolicy` 指数退避，
//! 永久失败、重试耗尽和未注册任务都会上报错误服务。
//! 没有持久化：停机时进行中和排队中的任务会丢失，投递方按尽力而为处理。

pub mod handlers;
pub mod jobs;

pub use handlers::{
    DeliveryService, NewMessageHandler, RequestStatusHandler, SenderIdentity, UserWelcomeHandler,
};
pub use jobs::{Delivery, Job};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wecarry_shared::observability::metrics;
use wecarry_shared::reporting::{ErrorReport, ErrorReporter};
use wecarry_shared::retry::{RetryPolicy, retry_with_policy};

use crate::error::{AppError, ErrorCategory, ErrorKey, Result};

/// 任务失败详情
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub key: ErrorKey,
    pub category: ErrorCategory,
    pub message: String,
}

/// 处理器错误，决定是否重试
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("永久失败: {}", .0.message)]
    Permanent(JobFailure),

    #[error("可重试失败: {}", .0.message)]
    Retryable(JobFailure),
}

impl JobError {
    pub fn permanent(key: ErrorKey, message: impl Into<String>) -> Self {
        Self::Permanent(JobFailure {
            key,
            category: ErrorCategory::User,
            message: message.into(),
        })
    }

    /// 任务引用的实体已不存在
    pub fn missing(entity: &'static str, id: impl std::fmt::Display) -> Self {
        AppError::not_found(entity, id).into()
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn failure(&self) -> &JobFailure {
        match self {
            Self::Permanent(f) | Self::Retryable(f) => f,
        }
    }
}

impl From<AppError> for JobError {
    fn from(err: AppError) -> Self {
        let failure = JobFailure {
            key: err.key(),
            category: err.category(),
            message: err.to_string(),
        };
        if err.is_retryable() {
            Self::Retryable(failure)
        } else {
            Self::Permanent(failure)
        }
    }
}

/// 任务处理器
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> std::result::Result<(), JobError>;
}

/// 任务投递能力，调度器只依赖这一接口
pub trait JobQueue: Send + Sync {
    /// 尽力而为的投递，只在 Worker 停止后失败
    fn enqueue(&self, job: Job) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(JobError),
    Unregistered,
}

/// 单个任务的执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job: &'static str,
    pub attempts: u32,
    pub outcome: JobOutcome,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.outcome == JobOutcome::Succeeded
    }
}

struct Executor {
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    policy: RetryPolicy,
    reporter: Arc<dyn ErrorReporter>,
}

impl Executor {
    async fn execute(&self, job: Job) -> JobReport {
        let name = job.name();

        let Some(handler) = self.handlers.get(name).cloned() else {
            error!(job = name, "任务未注册处理器");
            self.reporter
                .report(ErrorReport {
                    key: ErrorKey::ConfigError,
                    category: ErrorCategory::Internal,
                    message: format!("任务 {name} 未注册处理器"),
                    context: format!("worker:{name}"),
                })
                .await;
            metrics::record_worker_job(name, "unregistered", 1);
            return JobReport {
                job: name,
                attempts: 1,
                outcome: JobOutcome::Unregistered,
            };
        };

        let attempts = AtomicU32::new(0);
        let result = {
            let counter = &attempts;
            let handler: &dyn JobHandler = handler.as_ref();
            let job = &job;
            retry_with_policy(&self.policy, name, JobError::is_retryable, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                handler.handle(job)
            })
            .await
        };
        let attempts = attempts.load(Ordering::SeqCst);

        match result {
            Ok(()) => {
                debug!(job = name, attempts, "任务执行成功");
                metrics::record_worker_job(name, "succeeded", attempts);
                JobReport {
                    job: name,
                    attempts,
                    outcome: JobOutcome::Succeeded,
                }
            }
            Err(err) => {
                let outcome = if err.is_retryable() { "exhausted" } else { "permanent" };
                let failure = err.failure();
                error!(
                    job = name,
                    attempts,
                    outcome,
                    key = %failure.key,
                    error = %err,
                    "任务最终失败"
                );
                self.reporter
                    .report(ErrorReport {
                        key: failure.key,
                        category: failure.category,
                        message: failure.message.clone(),
                        context: format!("worker:{name}"),
                    })
                    .await;
                metrics::record_worker_job(name, outcome, attempts);
                JobReport {
                    job: name,
                    attempts,
                    outcome: JobOutcome::Failed(err),
                }
            }
        }
    }
}

/// Worker 构建器，注册只能发生在启动前
pub struct WorkerBuilder {
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    policy: RetryPolicy,
    reporter: Arc<dyn ErrorReporter>,
}

impl WorkerBuilder {
    pub fn register(mut self, name: &'static str, handler: Arc<dyn JobHandler>) -> Self {
        if self.handlers.insert(name, handler).is_some() {
            warn!(job = name, "处理器重复注册，后者覆盖前者");
        }
        self
    }

    /// 启动 pool_size 个消费协程
    pub fn start(self, pool_size: usize) -> Worker {
        let executor = Arc::new(Executor {
            handlers: self.handlers,
            policy: self.policy,
            reporter: self.reporter,
        });
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shutdown = CancellationToken::new();
        let pool_size = pool_size.max(1);

        let tasks = (0..pool_size)
            .map(|index| {
                let executor = executor.clone();
                let rx = rx.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    loop {
                        let next = tokio::select! {
                            _ = shutdown.cancelled() => None,
                            job = async { rx.lock().await.recv().await } => job,
                        };
                        let Some(job) = next else { break };
                        let job_name = job.name();

                        tokio::select! {
                            _ = shutdown.cancelled() => {
                                warn!(worker = index, job = job_name, "停机，放弃进行中的任务");
                                break;
                            }
                            _ = executor.execute(job) => {}
                        }
                    }
                    debug!(worker = index, "Worker 协程退出");
                })
            })
            .collect();

        info!(pool_size, max_attempts = executor.policy.max_attempts(), "Worker 已启动");

        Worker {
            executor,
            sender: Mutex::new(Some(tx)),
            tasks: Mutex::new(tasks),
            shutdown,
        }
    }
}

pub struct Worker {
    executor: Arc<Executor>,
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn builder(policy: RetryPolicy, reporter: Arc<dyn ErrorReporter>) -> WorkerBuilder {
        WorkerBuilder {
            handlers: HashMap::new(),
            policy,
            reporter,
        }
    }

    /// 在当前协程中直接执行一个任务（含重试），不经过队列
    pub async fn execute(&self, job: Job) -> JobReport {
        self.executor.execute(job).await
    }

    pub fn registered(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.executor.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// 停止接收新任务并等待消费协程退出
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Worker 协程异常退出");
            }
        }
        info!("Worker 已停止");
    }
}

impl JobQueue for Worker {
    fn enqueue(&self, job: Job) -> Result<()> {
        let guard = self.sender.lock();
        let sender = guard
            .as_ref()
            .ok_or_else(|| AppError::Internal("Worker 已停止，拒绝新任务".to_string()))?;

        sender
            .send(job)
            .map_err(|e| AppError::Internal(format!("任务投递失败: {}", e.0.name())))
    }
}

/// 只记录任务的队列，测试用
#[derive(Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<Job>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().clone()
    }

    /// 取出并清空已记录的任务
    pub fn take(&self) -> Vec<Job> {
        std::mem::take(&mut *self.jobs.lock())
    }
}

impl JobQueue for RecordingQueue {
    fn enqueue(&self, job: Job) -> Result<()> {
        self.jobs.lock().push(job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wecarry_shared::reporting::RecordingReporter;

    use super::*;
    use crate::models::{Channel, MessageId, UserId};
    use crate::notification::template::TemplateKey;

    struct FlakyHandler {
        failures: AtomicU32,
        permanent: bool,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, _job: &Job) -> std::result::Result<(), JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.permanent {
                return Err(JobError::missing("message", 404));
            }
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(AppError::ExternalService {
                    service: "smtp".into(),
                    message: "timeout".into(),
                }
                .into());
            }
            Ok(())
        }
    }

    fn job() -> Job {
        Job::NewMessage {
            message_id: MessageId(404),
            delivery: Delivery {
                recipient_id: UserId(1),
                template: TemplateKey::NewMessage,
                channel: Channel::Email,
                subject: "s".into(),
                body: "b".into(),
            },
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::with_max_attempts(max_attempts, Duration::from_millis(1), Duration::from_millis(5))
    }

    fn handler(failures: u32, permanent: bool) -> (Arc<FlakyHandler>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Arc::new(FlakyHandler {
                failures: AtomicU32::new(failures),
                permanent,
                calls: calls.clone(),
            }),
            calls,
        )
    }

    #[tokio::test]
    async fn test_retryable_failures_are_retried() {
        let reporter = Arc::new(RecordingReporter::new());
        let (h, calls) = handler(2, false);
        let worker = Worker::builder(policy(5), reporter.clone())
            .register(jobs::NEW_MESSAGE, h)
            .start(1);

        let report = worker.execute(job()).await;
        assert!(report.is_success());
        assert_eq!(report.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(reporter.reports().is_empty());
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_permanent_failure_runs_once_and_is_reported() {
        let reporter = Arc::new(RecordingReporter::new());
        let (h, calls) = handler(0, true);
        let worker = Worker::builder(policy(5), reporter.clone())
            .register(jobs::NEW_MESSAGE, h)
            .start(1);

        let report = worker.execute(job()).await;
        assert_eq!(report.attempts, 1);
        assert!(matches!(report.outcome, JobOutcome::Failed(JobError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].key, ErrorKey::NoRows);
        assert_eq!(reports[0].context, "worker:new_message");
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_reported() {
        let reporter = Arc::new(RecordingReporter::new());
        let (h, calls) = handler(10, false);
        let worker = Worker::builder(policy(3), reporter.clone())
            .register(jobs::NEW_MESSAGE, h)
            .start(1);

        let report = worker.execute(job()).await;
        assert_eq!(report.attempts, 3);
        assert!(matches!(report.outcome, JobOutcome::Failed(JobError::Retryable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(reporter.reports().len(), 1);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_unregistered_job_fails_immediately() {
        let reporter = Arc::new(RecordingReporter::new());
        let worker = Worker::builder(policy(5), reporter.clone()).start(1);

        let report = worker.execute(job()).await;
        assert_eq!(report.outcome, JobOutcome::Unregistered);
        assert_eq!(reporter.reports()[0].key, ErrorKey::ConfigError);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_enqueued_jobs_are_consumed_by_pool() {
        let reporter = Arc::new(RecordingReporter::new());
        let (h, calls) = handler(0, false);
        let worker = Worker::builder(policy(5), reporter)
            .register(jobs::NEW_MESSAGE, h)
            .start(2);

        for _ in 0..3 {
            worker.enqueue(job()).unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while calls.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        worker.shutdown().await;
        assert!(worker.enqueue(job()).is_err());
    }

    struct StuckHandler {
        started: Arc<AtomicU32>,
    }

    #[async_trait]
    impl JobHandler for StuckHandler {
        async fn handle(&self, _job: &Job) -> std::result::Result<(), JobError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_shutdown_abandons_job_in_flight() {
        let reporter = Arc::new(RecordingReporter::new());
        let started = Arc::new(AtomicU32::new(0));
        let worker = Worker::builder(policy(5), reporter.clone())
            .register(
                jobs::NEW_MESSAGE,
                Arc::new(StuckHandler {
                    started: started.clone(),
                }),
            )
            .start(1);

        worker.enqueue(job()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while started.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // 进行中的任务不阻塞停机，也不算失败
        tokio::time::timeout(Duration::from_secs(5), worker.shutdown())
            .await
            .unwrap();
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(reporter.reports().is_empty());
    }

    #[test]
    fn test_job_error_classification() {
        let not_found: JobError = AppError::not_found("user", 1).into();
        assert!(!not_found.is_retryable());

        let db: JobError = AppError::Database(sqlx::Error::PoolTimedOut).into();
        assert!(db.is_retryable());
        assert_eq!(db.failure().key, ErrorKey::GenericInternalServerError);
    }
}
