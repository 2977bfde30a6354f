// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm_migration::prelude::*;

/// 创建死信任务表
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // original_job_id is a back-reference only, no foreign key
        manager
            .create_table(
                Table::create()
                    .table(DeadLetterJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DeadLetterJobs::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DeadLetterJobs::OriginalJobId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DeadLetterJobs::JobType).string().not_null())
                    .col(ColumnDef::new(DeadLetterJobs::Payload).json().not_null())
                    .col(ColumnDef::new(DeadLetterJobs::Error).text().not_null())
                    .col(
                        ColumnDef::new(DeadLetterJobs::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(DeadLetterJobs::FailedAt)
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
                    .name("idx_dead_letter_jobs_original_job_id")
                    .table(DeadLetterJobs::Table)
                    .if_not_exists()
                    .col(DeadLetterJobs::OriginalJobId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_dead_letter_jobs_failed_at")
                    .table(DeadLetterJobs::Table)
                    .if_not_exists()
                    .col(DeadLetterJobs::FailedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DeadLetterJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DeadLetterJobs {
    Table,
    Id,
    OriginalJobId,
    JobType,
    Payload,
    Error,
    Attempts,
    FailedAt,
}
