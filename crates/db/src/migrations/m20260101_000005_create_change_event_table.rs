//! Create change ledger table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChangeEvent::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChangeEvent::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ChangeEvent::Collection).string_len(16).not_null())
                    .col(ColumnDef::new(ChangeEvent::DocumentId).string_len(66).not_null())
                    .col(ColumnDef::new(ChangeEvent::Kind).string_len(16).not_null())
                    .col(ColumnDef::new(ChangeEvent::Before).json_binary())
                    .col(ColumnDef::new(ChangeEvent::After).json_binary())
                    .col(
                        ColumnDef::new(ChangeEvent::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ChangeEvent::LastError).text())
                    .col(ColumnDef::new(ChangeEvent::ProcessedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(ChangeEvent::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: processed_at (for draining unprocessed rows and pruning)
        manager
            .create_index(
                Index::create()
                    .name("idx_change_event_processed_at")
                    .table(ChangeEvent::Table)
                    .col(ChangeEvent::ProcessedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ChangeEvent::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ChangeEvent {
    Table,
    Id,
    Collection,
    DocumentId,
    Kind,
    Before,
    After,
    Attempts,
    LastError,
    ProcessedAt,
    CreatedAt,
}
