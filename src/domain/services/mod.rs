// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域服务模块
///
/// 包含的服务：
/// - 内容生成（content_generator）：外部 AI 生成服务的接口
/// - 内容批处理（content_processor）：消费内容队列
/// - 通知（notifier）：外部通知渠道的接口
/// - 显著性过滤（significance）：决定事件是否进入内容队列
pub mod content_generator;
pub mod content_processor;
pub mod notifier;
pub mod significance;
