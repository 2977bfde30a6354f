// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工作器模块
///
/// 提供处理器注册、工作运行时以及各任务类型的处理器
pub mod cleanup_worker;
pub mod content_worker;
pub mod handler;
pub mod notification_worker;
pub mod runtime;

pub use handler::{HandlerRegistry, JobHandler, JobOutcome};
pub use runtime::{WorkerConfig, WorkerRuntime};
