// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::RetentionSettings;
use crate::domain::repositories::content_queue_repository::ContentQueueRepository;
use crate::presentation::handlers::queue_handler;
use crate::queue::job_queue::JobQueue;
use axum::{
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// 创建应用路由
///
/// # 参数
///
/// * `queue` - 任务队列
/// * `content` - 内容队列仓库
/// * `retention` - 清理接口使用的默认保留天数
///
/// # 返回值
///
/// 返回配置好的路由
pub fn routes<Q, C>(queue: Arc<Q>, content: Arc<C>, retention: RetentionSettings) -> Router
where
    Q: JobQueue + 'static,
    C: ContentQueueRepository + 'static,
{
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/v1/version", get(version));

    let queue_routes = Router::new()
        .route("/v1/queue/jobs", post(queue_handler::enqueue_job::<Q>))
        .route("/v1/queue/jobs/{id}", get(queue_handler::get_job::<Q>))
        .route("/v1/queue/metrics", get(queue_handler::queue_metrics::<Q>))
        .route("/v1/queue/dead-letters", get(queue_handler::dead_letters::<Q>))
        .route("/v1/queue/cleanup", post(queue_handler::cleanup::<Q, C>))
        .route(
            "/v1/content-queue/metrics",
            get(queue_handler::content_queue_metrics::<C>),
        )
        .layer(Extension(queue))
        .layer(Extension(content))
        .layer(Extension(Arc::new(retention)));

    Router::new()
        .merge(public_routes)
        .merge(queue_routes)
        .layer(TraceLayer::new_for_http())
}

/// 健康检查端点
///
/// # 返回值
///
/// 返回"OK"字符串
pub async fn health_check() -> &'static str {
    "OK"
}

/// 版本信息端点
///
/// # 返回值
///
/// 返回应用版本号
pub async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
