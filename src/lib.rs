// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 包含任务与内容队列的模型、仓库接口和外部协作方接口
pub mod domain;

/// 基础设施模块
///
/// 提供数据库、指标导出和外部服务的实现
pub mod infrastructure;

/// 表示层模块
///
/// 队列运维 HTTP 接口
pub mod presentation;

/// 队列模块
///
/// 实现认领算法、任务队列和维护调度
pub mod queue;

/// 工具模块
///
/// 提供错误类型、重试策略和日志初始化
pub mod utils;

/// 工作器模块
///
/// 实现工作运行时和各任务类型的处理器
pub mod workers;
