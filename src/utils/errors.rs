// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::repositories::job_repository::RepositoryError;
use crate::queue::job_queue::QueueError;
use thiserror::Error;

/// Worker错误类型
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("运行时已启动")]
    AlreadyRunning,

    #[error("队列错误: {0}")]
    Queue(#[from] QueueError),

    #[error("仓库错误: {0}")]
    Repository(#[from] RepositoryError),

    #[error("无效负载: {0}")]
    InvalidPayload(String),

    #[error("内部错误: {0}")]
    InternalError(String),
}
