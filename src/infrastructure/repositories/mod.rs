// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 仓库实现模块
///
/// 基于 SeaORM 的任务队列与内容队列仓库
pub mod content_queue_repo_impl;
pub mod job_repo_impl;
