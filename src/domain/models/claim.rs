// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 认领凭证
///
/// 由认领时写入的工作者标识和认领后的 `attempts` 组成。
/// 认领会递增 `attempts`，所以同一行的每次认领得到不同的凭证，
/// 过期认领的持有者无法再改动后续认领者的行。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimToken<Id> {
    pub id: Id,
    pub worker_id: String,
    pub attempts: i32,
}

/// 通用任务的认领凭证
pub type JobClaim = ClaimToken<String>;

/// 内容队列项的认领凭证
pub type ContentClaim = ClaimToken<i32>;

impl<Id> ClaimToken<Id> {
    pub fn new(id: Id, worker_id: impl Into<String>, attempts: i32) -> Self {
        Self {
            id,
            worker_id: worker_id.into(),
            attempts,
        }
    }

    /// 行上的持有者与次数是否与凭证一致
    pub fn matches(&self, worker_id: Option<&str>, attempts: i32) -> bool {
        worker_id == Some(self.worker_id.as_str()) && attempts == self.attempts
    }
}
