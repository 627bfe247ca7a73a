//! Notification entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Notification types.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum NotificationType {
    #[sea_orm(string_value = "friendRequest")]
    #[serde(rename = "friendRequest")]
    FriendRequest,
    #[sea_orm(string_value = "friendAccepted")]
    #[serde(rename = "friendAccepted")]
    FriendAccepted,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// The user receiving the notification
    pub user_id: String,

    pub notification_type: NotificationType,

    /// The user the notification is about
    pub actor_id: String,

    /// Actor display name (denormalized)
    pub actor_name: String,

    /// Actor avatar (denormalized)
    #[sea_orm(nullable)]
    pub actor_avatar_url: Option<String>,

    /// Relationship document that produced the notification
    pub friendship_id: String,

    #[sea_orm(default_value = false)]
    pub is_read: bool,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    Recipient,
}

impl ActiveModelBehavior for ActiveModel {}
