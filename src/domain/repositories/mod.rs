// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 仓库接口模块
///
/// 定义队列持久化的抽象契约，具体实现由基础设施层提供：
/// - 任务仓库（job_repository）：通用任务队列与死信表
/// - 内容队列仓库（content_queue_repository）：按源事件去重的文章生成队列
pub mod content_queue_repository;
pub mod job_repository;
