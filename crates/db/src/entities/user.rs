//! User entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(unique)]
    pub username: String,

    pub username_lower: String,

    /// Access token
    #[sea_orm(unique, nullable)]
    pub token: Option<String>,

    /// Display name
    #[sea_orm(nullable)]
    pub name: Option<String>,

    /// Avatar URL
    #[sea_orm(nullable)]
    pub avatar_url: Option<String>,

    /// Short profile text shown on friend cards
    #[sea_orm(column_type = "Text", nullable)]
    pub bio: Option<String>,

    /// Accepted friendships owned by this user (trigger-maintained)
    #[sea_orm(default_value = 0)]
    pub friends_count: i32,

    /// Pending requests this user received (trigger-maintained)
    #[sea_orm(default_value = 0)]
    pub pending_requests_count: i32,

    /// Pending requests this user sent (trigger-maintained)
    #[sea_orm(default_value = 0)]
    pub sent_requests_count: i32,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
