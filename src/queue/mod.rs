// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 队列模块
///
/// 提供两种队列共享的认领算法、通用任务队列和维护任务调度
pub mod claim;
pub mod job_queue;
pub mod scheduler;
