// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 通用认领组件
//!
//! 两个队列共用同一套“回收过期认领 → 原子选取并锁定”的算法，
//! 各自只需通过 [`Claimable`] 提供列映射。

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    sea_query::{Expr, LockBehavior, LockType, SimpleExpr},
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbBackend, DbErr, EntityTrait,
    ModelTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait, Value,
};

/// 待处理状态值
pub const PENDING: &str = "pending";
/// 处理中状态值
pub const PROCESSING: &str = "processing";

/// 可被认领的队列表
///
/// 两个队列的状态列都使用 `pending` / `processing` 字符串
pub trait Claimable: EntityTrait {
    fn id_column() -> Self::Column;
    fn status_column() -> Self::Column;
    fn worker_column() -> Self::Column;
    /// 认领时间列，过期回收以此为准
    fn claimed_at_column() -> Self::Column;
    fn attempts_column() -> Self::Column;
    fn priority_column() -> Self::Column;
    fn created_at_column() -> Self::Column;
    fn updated_at_column() -> Self::Column;

    /// 允许的总执行次数，`attempts` 达到该值后不再退回待处理
    fn attempt_budget() -> SimpleExpr;

    /// 额外的就绪条件
    fn ready_condition(_now: DateTime<Utc>) -> Condition {
        Condition::all()
    }
}

/// 批量认领
///
/// 在同一事务内选出最多 `limit` 个就绪行（`priority desc, created_at asc`），
/// PostgreSQL 上附加 `FOR UPDATE SKIP LOCKED`。随后对每一行执行带
/// `status = 'pending'` 条件的更新，只有恰好影响一行时才算认领成功，
/// 因此在不支持行锁的后端上也不会有两个调用方同时持有同一行。
///
/// # 参数
///
/// * `db` - 数据库连接
/// * `worker_id` - 认领方标识
/// * `limit` - 最多认领的行数
/// * `filter` - 调用方附加的过滤条件
///
/// # 返回值
///
/// 返回认领成功的行（已更新为处理中状态）
pub async fn claim_batch<E>(
    db: &DatabaseConnection,
    worker_id: &str,
    limit: u64,
    filter: Condition,
) -> Result<Vec<E::Model>, DbErr>
where
    E: Claimable,
{
    if limit == 0 {
        return Ok(Vec::new());
    }

    let now = Utc::now();
    let now_fixed: DateTime<FixedOffset> = now.into();
    let txn = db.begin().await?;

    let mut query = E::find()
        .filter(E::status_column().eq(PENDING))
        .filter(E::ready_condition(now))
        .filter(filter)
        .order_by_desc(E::priority_column())
        .order_by_asc(E::created_at_column())
        .limit(limit);

    if txn.get_database_backend() != DbBackend::Sqlite {
        query = query.lock_with_behavior(LockType::Update, LockBehavior::SkipLocked);
    }

    let candidates = query.all(&txn).await?;

    let mut claimed_ids: Vec<Value> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let id = candidate.get(E::id_column());

        let result = E::update_many()
            .col_expr(E::status_column(), Expr::value(PROCESSING))
            .col_expr(E::worker_column(), Expr::value(worker_id))
            .col_expr(E::claimed_at_column(), Expr::value(now_fixed))
            .col_expr(E::updated_at_column(), Expr::value(now_fixed))
            .col_expr(
                E::attempts_column(),
                Expr::col(E::attempts_column()).add(1),
            )
            .filter(E::id_column().eq(id.clone()))
            .filter(E::status_column().eq(PENDING))
            .exec(&txn)
            .await?;

        // Lost the row to a concurrent claimant
        if result.rows_affected == 1 {
            claimed_ids.push(id);
        }
    }

    let claimed = if claimed_ids.is_empty() {
        Vec::new()
    } else {
        E::find()
            .filter(E::id_column().is_in(claimed_ids))
            .order_by_desc(E::priority_column())
            .order_by_asc(E::created_at_column())
            .all(&txn)
            .await?
    };

    txn.commit().await?;

    Ok(claimed)
}

/// 将认领早于 `threshold` 且仍有执行次数的处理中行退回待处理
///
/// 不递增 `attempts`，下一次认领会计数
pub async fn release_stale<E, C>(db: &C, threshold: DateTime<Utc>) -> Result<u64, DbErr>
where
    E: Claimable,
    C: ConnectionTrait,
{
    let now: DateTime<FixedOffset> = Utc::now().into();

    let result = E::update_many()
        .col_expr(E::status_column(), Expr::value(PENDING))
        .col_expr(E::worker_column(), Expr::value(Option::<String>::None))
        .col_expr(
            E::claimed_at_column(),
            Expr::value(Option::<DateTime<FixedOffset>>::None),
        )
        .col_expr(E::updated_at_column(), Expr::value(now))
        .filter(stale_condition::<E>(threshold))
        .filter(Expr::col(E::attempts_column()).lt(E::attempt_budget()))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

/// 查找认领已过期且执行次数已耗尽的行
///
/// 这些行由具体队列决定如何终止
pub async fn find_stale_exhausted<E, C>(
    db: &C,
    threshold: DateTime<Utc>,
) -> Result<Vec<E::Model>, DbErr>
where
    E: Claimable,
    C: ConnectionTrait,
{
    E::find()
        .filter(stale_condition::<E>(threshold))
        .filter(Expr::col(E::attempts_column()).gte(E::attempt_budget()))
        .all(db)
        .await
}

fn stale_condition<E: Claimable>(threshold: DateTime<Utc>) -> Condition {
    let threshold: DateTime<FixedOffset> = threshold.into();
    Condition::all()
        .add(E::status_column().eq(PROCESSING))
        .add(E::claimed_at_column().lt(threshold))
}
