// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::job::{EnqueueOptions, JobType};
use crate::domain::repositories::job_repository::RepositoryError;
use crate::queue::job_queue::{JobQueue, QueueError};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// 周期性任务定义
#[derive(Debug, Clone)]
pub struct PeriodicJob {
    pub job_type: JobType,
    pub every: Duration,
    pub payload: Value,
    pub priority: i32,
}

impl PeriodicJob {
    pub fn new(job_type: JobType, every: Duration) -> Self {
        Self {
            job_type,
            every,
            payload: Value::Null,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// 当前时间所在时间桶的任务ID
    ///
    /// 同一时间桶内多个进程入队的是同一个ID，只有一个会成功
    pub fn bucket_id(&self, now: DateTime<Utc>) -> String {
        let every = self.every.as_secs().max(1) as i64;
        format!("{}-{}", self.job_type, now.timestamp().div_euclid(every))
    }
}

/// 维护任务调度器
///
/// 按固定间隔把清理、内容消费等维护任务放入队列，由工作运行时执行
pub struct MaintenanceScheduler<Q: JobQueue> {
    /// 任务队列
    queue: Q,
    jobs: Vec<PeriodicJob>,
}

impl<Q: JobQueue + 'static> MaintenanceScheduler<Q> {
    /// 创建新的调度器实例
    ///
    /// # 参数
    ///
    /// * `queue` - 任务队列
    /// * `jobs` - 周期性任务
    ///
    /// # 返回值
    ///
    /// 返回新的调度器实例
    pub fn new(queue: Q, jobs: Vec<PeriodicJob>) -> Self {
        Self { queue, jobs }
    }

    /// 为当前时间桶入队所有周期性任务
    ///
    /// # 返回值
    ///
    /// * `Ok(Vec<String>)` - 本次新入队的任务ID
    /// * `Err(QueueError)` - 入队失败
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<String>, QueueError> {
        let mut enqueued = Vec::new();

        for job in &self.jobs {
            let id = job.bucket_id(now);
            let options = EnqueueOptions::default()
                .with_id(id.clone())
                .with_priority(job.priority);

            match self
                .queue
                .enqueue(job.job_type, job.payload.clone(), options)
                .await
            {
                Ok(id) => {
                    debug!(job_id = %id, job_type = %job.job_type, "Periodic job enqueued");
                    enqueued.push(id);
                }
                Err(QueueError::Repository(RepositoryError::AlreadyExists(_))) => {
                    debug!(job_id = %id, "Periodic job already enqueued for this interval");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(enqueued)
    }

    /// 启动调度器后台任务
    ///
    /// # 返回值
    ///
    /// 返回后台任务的句柄，收到关闭信号后退出
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let Some(period) = self.jobs.iter().map(|job| job.every).min() else {
                return;
            };
            let mut ticker = interval(period.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(jobs = self.jobs.len(), "Maintenance scheduler started");

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick(Utc::now()).await {
                            error!("Failed to enqueue periodic jobs: {}", e);
                        }
                    }
                }
            }

            info!("Maintenance scheduler stopped");
        })
    }
}
