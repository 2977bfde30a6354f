// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm_migration::prelude::*;

/// 创建内容生成队列表
///
/// 每个源事件最多对应一行，由 `raw_event_id` 唯一约束保证
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ContentQueue::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ContentQueue::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ContentQueue::RawEventId)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(ContentQueue::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(ContentQueue::Priority)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ContentQueue::WorkerId).string().null())
                    .col(
                        ColumnDef::new(ContentQueue::AssignedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ContentQueue::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ContentQueue::MaxAttempts)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(ColumnDef::new(ContentQueue::ArticleId).string().null())
                    .col(ColumnDef::new(ContentQueue::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(ContentQueue::NextRetryAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ContentQueue::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ContentQueue::ProcessedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ContentQueue::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_content_queue_status_priority_created_at")
                    .table(ContentQueue::Table)
                    .if_not_exists()
                    .col(ContentQueue::Status)
                    .col((ContentQueue::Priority, IndexOrder::Desc))
                    .col(ContentQueue::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                "CREATE INDEX IF NOT EXISTS idx_content_queue_worker_id ON content_queue (worker_id) WHERE worker_id IS NOT NULL",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ContentQueue::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ContentQueue {
    Table,
    Id,
    RawEventId,
    Status,
    Priority,
    WorkerId,
    AssignedAt,
    Attempts,
    MaxAttempts,
    ArticleId,
    ErrorMessage,
    NextRetryAt,
    CreatedAt,
    ProcessedAt,
    UpdatedAt,
}
