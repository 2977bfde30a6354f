// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// 该模块定义了系统的核心业务实体，包括：
/// - 任务（job）：通用持久化队列中的任务及死信记录
/// - 内容队列项（content_item）：按源事件去重的文章生成任务
pub mod claim;
pub mod content_item;
pub mod job;
