// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::config::settings::WorkerSettings;
use crate::domain::models::job::{DomainError, FailureDisposition, Job, JobType};
use crate::queue::job_queue::JobQueue;
use crate::utils::errors::WorkerError;
use crate::utils::retry_policy::{is_retryable_error, is_transient_message};
use crate::workers::handler::{HandlerRegistry, JobOutcome};
use dashmap::DashMap;
use metrics::{counter, histogram};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 关闭等待期间检查活动任务的间隔
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 工作运行时配置
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// 轮询间隔
    pub poll_interval: Duration,
    /// 最大并发任务数
    pub max_concurrent_jobs: usize,
    /// 允许认领的任务类型，为空时不限制
    pub job_types: Option<Vec<JobType>>,
    /// 关闭时等待活动任务的最长时间
    pub shutdown_timeout: Duration,
    /// 任务和处理器都未声明超时时使用
    pub default_timeout: Duration,
    /// 认领时写入的工作者标识
    pub worker_id: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_concurrent_jobs: 5,
            job_types: None,
            shutdown_timeout: Duration::from_secs(30),
            default_timeout: Duration::from_secs(300),
            worker_id: default_worker_id(),
        }
    }
}

impl WorkerConfig {
    /// 从配置文件构建
    ///
    /// # 返回值
    ///
    /// * `Ok(WorkerConfig)` - 运行时配置
    /// * `Err(DomainError)` - 配置了未知的任务类型
    pub fn from_settings(settings: &WorkerSettings) -> Result<Self, DomainError> {
        let job_types = if settings.job_types.is_empty() {
            None
        } else {
            Some(
                settings
                    .job_types
                    .iter()
                    .map(|tag| tag.trim().parse())
                    .collect::<Result<Vec<JobType>, _>>()?,
            )
        };

        Ok(Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            max_concurrent_jobs: settings.max_concurrent_jobs.max(1),
            job_types,
            shutdown_timeout: Duration::from_millis(settings.shutdown_timeout_ms),
            default_timeout: Duration::from_millis(settings.default_timeout_ms),
            worker_id: settings.worker_id.clone().unwrap_or_else(default_worker_id),
        })
    }
}

/// 生成进程内唯一的工作者标识
pub fn default_worker_id() -> String {
    format!("worker-{}-{}", std::process::id(), Uuid::new_v4().simple())
}

struct RuntimeInner<Q: JobQueue> {
    queue: Q,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
    /// 活动任务及其开始时间
    active: DashMap<String, Instant>,
}

/// 工作运行时
///
/// 每个实例独立持有队列、处理器注册表和活动任务集合，
/// 同一进程内可以同时运行多个实例
pub struct WorkerRuntime<Q: JobQueue + 'static> {
    inner: Arc<RuntimeInner<Q>>,
    shutdown: watch::Sender<bool>,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<Q: JobQueue + 'static> WorkerRuntime<Q> {
    /// 创建新的工作运行时
    ///
    /// # 参数
    ///
    /// * `queue` - 任务队列
    /// * `registry` - 处理器注册表
    /// * `config` - 运行时配置
    ///
    /// # 返回值
    ///
    /// 返回尚未启动的运行时
    pub fn new(queue: Q, registry: Arc<HandlerRegistry>, config: WorkerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(RuntimeInner {
                queue,
                registry,
                config,
                active: DashMap::new(),
            }),
            shutdown,
            poll_handle: Mutex::new(None),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.inner.config.worker_id
    }

    /// 当前活动任务数
    pub fn active_jobs(&self) -> usize {
        self.inner.active.len()
    }

    pub async fn is_running(&self) -> bool {
        self.poll_handle.lock().await.is_some()
    }

    /// 启动运行时
    ///
    /// 先确保存储已初始化，再启动轮询循环
    ///
    /// # 返回值
    ///
    /// * `Ok(())` - 启动成功
    /// * `Err(WorkerError)` - 已在运行或初始化失败
    pub async fn start(&self) -> Result<(), WorkerError> {
        let mut handle = self.poll_handle.lock().await;
        if handle.is_some() {
            return Err(WorkerError::AlreadyRunning);
        }

        self.inner.queue.initialize().await?;
        self.shutdown.send_replace(false);

        let inner = self.inner.clone();
        let shutdown_rx = self.shutdown.subscribe();
        *handle = Some(tokio::spawn(async move {
            inner.poll_loop(shutdown_rx).await;
        }));

        info!(
            worker_id = %self.inner.config.worker_id,
            max_concurrent_jobs = self.inner.config.max_concurrent_jobs,
            poll_interval_ms = self.inner.config.poll_interval.as_millis() as u64,
            handlers = self.inner.registry.len(),
            "Worker runtime started"
        );
        Ok(())
    }

    /// 停止运行时
    ///
    /// 立即停止轮询，然后最多等待 `shutdown_timeout` 让活动任务完成。
    /// 超时后仍在运行的任务保持认领状态，稍后由过期认领回收处理。
    ///
    /// # 返回值
    ///
    /// 返回超时后仍处于活动状态的任务ID
    pub async fn stop(&self) -> Vec<String> {
        self.shutdown.send_replace(true);

        if let Some(handle) = self.poll_handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!(worker_id = %self.inner.config.worker_id, "Poll loop terminated abnormally: {}", e);
            }
        }

        let deadline = Instant::now() + self.inner.config.shutdown_timeout;
        while !self.inner.active.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(DRAIN_POLL_INTERVAL.min(deadline - now)).await;
        }

        let mut remaining: Vec<String> = self
            .inner
            .active
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        remaining.sort();

        if remaining.is_empty() {
            info!(worker_id = %self.inner.config.worker_id, "Worker runtime stopped");
        } else {
            warn!(
                worker_id = %self.inner.config.worker_id,
                job_ids = ?remaining,
                "Shutdown timeout elapsed with {} active jobs, their claims will expire",
                remaining.len()
            );
        }

        remaining
    }
}

impl<Q: JobQueue + 'static> RuntimeInner<Q> {
    async fn poll_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.poll_once(&shutdown_rx).await;
                }
            }
        }

        debug!(worker_id = %self.config.worker_id, "Poll loop exited");
    }

    /// 在并发上限内持续认领，直到没有就绪任务
    async fn poll_once(self: &Arc<Self>, shutdown_rx: &watch::Receiver<bool>) {
        while self.active.len() < self.config.max_concurrent_jobs {
            if *shutdown_rx.borrow() {
                return;
            }

            match self
                .queue
                .claim(&self.config.worker_id, self.config.job_types.as_deref())
                .await
            {
                Ok(Some(job)) => {
                    counter!("jobs_claimed_total", "job_type" => job.job_type.clone()).increment(1);
                    self.dispatch(job);
                }
                Ok(None) => return,
                Err(e) => {
                    error!(worker_id = %self.config.worker_id, "Failed to claim job: {}", e);
                    return;
                }
            }
        }
    }

    fn dispatch(self: &Arc<Self>, job: Job) {
        debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempts = job.attempts,
            "Dispatching job"
        );
        self.active.insert(job.id.clone(), Instant::now());

        let inner = self.clone();
        tokio::spawn(async move {
            let job_id = job.id.clone();
            inner.execute(job).await;
            inner.active.remove(&job_id);
        });
    }

    async fn execute(&self, job: Job) {
        let started = Instant::now();

        let Some(handler) = job.kind().and_then(|kind| self.registry.get(kind)) else {
            let error = format!("No handler registered for job type '{}'", job.job_type);
            self.record_failure(&job, error, false).await;
            return;
        };

        let timeout = job
            .timeout()
            .or_else(|| handler.timeout())
            .unwrap_or(self.config.default_timeout);

        let payload = job.payload.clone();
        // 超时只停止等待，处理器任务不会被取消
        let task = tokio::spawn(async move { handler.handle(payload).await });

        let outcome = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(outcome))) => outcome,
            Ok(Ok(Err(err))) => JobOutcome::Failure {
                error: format!("{:#}", err),
                retryable: Some(is_retryable_error(&err)),
            },
            Ok(Err(join_err)) => {
                let error = describe_join_error(join_err);
                JobOutcome::Failure {
                    retryable: Some(is_transient_message(&error)),
                    error,
                }
            }
            Err(_) => {
                counter!("jobs_timed_out_total", "job_type" => job.job_type.clone()).increment(1);
                JobOutcome::Failure {
                    error: format!("Job timed out after {}ms", timeout.as_millis()),
                    retryable: Some(true),
                }
            }
        };

        match outcome {
            JobOutcome::Success(result) => match self.queue.complete(&job.claim_token(), result).await {
                Ok(true) => {
                    counter!("jobs_completed_total", "job_type" => job.job_type.clone())
                        .increment(1);
                    info!(job_id = %job.id, job_type = %job.job_type, "Job completed");
                }
                Ok(false) => {
                    counter!("jobs_claim_lost_total", "job_type" => job.job_type.clone())
                        .increment(1);
                    warn!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        attempts = job.attempts,
                        "Job no longer held by this worker, result discarded"
                    );
                }
                Err(e) => {
                    error!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        "Failed to acknowledge completion, job will be reclaimed: {}",
                        e
                    );
                }
            },
            JobOutcome::Failure { error, retryable } => {
                self.record_failure(&job, error, retryable.unwrap_or(true))
                    .await;
            }
        }

        histogram!("job_duration_seconds", "job_type" => job.job_type.clone())
            .record(started.elapsed().as_secs_f64());
    }

    async fn record_failure(&self, job: &Job, error: String, retryable: bool) {
        counter!(
            "jobs_failed_total",
            "job_type" => job.job_type.clone(),
            "retryable" => retryable.to_string()
        )
        .increment(1);

        match self.queue.fail(&job.claim_token(), &error, retryable).await {
            Ok(FailureDisposition::Retrying { next_retry_at }) => {
                warn!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempts = job.attempts,
                    next_retry_at = %next_retry_at,
                    "Job failed, retry scheduled: {}",
                    error
                );
            }
            Ok(FailureDisposition::DeadLettered) => {
                error!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempts = job.attempts,
                    "Job failed permanently: {}",
                    error
                );
            }
            Ok(FailureDisposition::Ignored) => {
                counter!("jobs_claim_lost_total", "job_type" => job.job_type.clone())
                    .increment(1);
                warn!(
                    job_id = %job.id,
                    attempts = job.attempts,
                    "Job no longer held by this worker, failure ignored: {}",
                    error
                );
            }
            Err(e) => {
                error!(job_id = %job.id, "Failed to record job failure: {}", e);
            }
        }
    }
}

fn describe_join_error(err: JoinError) -> String {
    if err.is_panic() {
        format!("Handler panicked: {}", panic_message(err.into_panic()))
    } else {
        "Handler task was cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
