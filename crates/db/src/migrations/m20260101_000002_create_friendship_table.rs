//! Create friendship table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Friendship::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Friendship::Id)
                            .string_len(66)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Friendship::UserId).string_len(32).not_null())
                    .col(ColumnDef::new(Friendship::FriendId).string_len(32).not_null())
                    .col(ColumnDef::new(Friendship::Status).string_len(16).not_null())
                    .col(
                        ColumnDef::new(Friendship::RequestedBy)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Friendship::FriendshipDate).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Friendship::FriendUsername)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Friendship::FriendName).string_len(256))
                    .col(ColumnDef::new(Friendship::FriendAvatarUrl).string_len(1024))
                    .col(ColumnDef::new(Friendship::FriendBio).text())
                    .col(ColumnDef::new(Friendship::MutualFriendsCount).integer())
                    .col(
                        ColumnDef::new(Friendship::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Friendship::UpdatedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_friendship_user")
                            .from(Friendship::Table, Friendship::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_friendship_friend")
                            .from(Friendship::Table, Friendship::FriendId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: (user_id, status) for the three list partitions
        manager
            .create_index(
                Index::create()
                    .name("idx_friendship_user_status")
                    .table(Friendship::Table)
                    .col(Friendship::UserId)
                    .col(Friendship::Status)
                    .to_owned(),
            )
            .await?;

        // Index: friend_id (profile re-sync and cascade lookups)
        manager
            .create_index(
                Index::create()
                    .name("idx_friendship_friend_id")
                    .table(Friendship::Table)
                    .col(Friendship::FriendId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Friendship::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Friendship {
    Table,
    Id,
    UserId,
    FriendId,
    Status,
    RequestedBy,
    FriendshipDate,
    FriendUsername,
    FriendName,
    FriendAvatarUrl,
    FriendBio,
    MutualFriendsCount,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum User {
    Table,
    Id,
}
