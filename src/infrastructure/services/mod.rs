// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 基础设施服务模块
///
/// 外部协作方的 HTTP 实现
pub mod http_content_generator;
pub mod webhook_notifier;
