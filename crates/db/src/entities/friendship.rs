//! Friendship entity.
//!
//! Every relationship between two users is stored as two directed documents,
//! `{a}_{b}` owned by `a` and `{b}_{a}` owned by `b`. Both carry the same
//! `status`, `requested_by` and `friendship_date`; the `friend_*` columns are
//! a snapshot of the counterpart's profile so a list renders without joins.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Relationship status. Rejected and cancelled relationships are deleted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "camelCase")]
pub enum FriendshipStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "accepted")]
    Accepted,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "friendship")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Composite key `{user_id}_{friend_id}`
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Owner of this document
    pub user_id: String,

    /// The counterpart
    pub friend_id: String,

    pub status: FriendshipStatus,

    /// Initiator of the request; identical on both documents
    pub requested_by: String,

    /// Set when accepted; identical on both documents
    #[sea_orm(nullable)]
    pub friendship_date: Option<DateTimeWithTimeZone>,

    pub friend_username: String,

    #[sea_orm(nullable)]
    pub friend_name: Option<String>,

    #[sea_orm(nullable)]
    pub friend_avatar_url: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub friend_bio: Option<String>,

    /// Advisory cache; readers compute on demand when absent
    #[sea_orm(nullable)]
    pub mutual_friends_count: Option<i32>,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Id of the sibling document owned by the counterpart.
    #[must_use]
    pub fn sibling_id(&self) -> String {
        shelfmate_common::relationship_id(&self.friend_id, &self.user_id)
    }

    /// Whether the owner of this document initiated the request.
    #[must_use]
    pub fn is_outgoing(&self) -> bool {
        self.requested_by == self.user_id
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    Owner,

    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::FriendId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    Friend,
}

impl ActiveModelBehavior for ActiveModel {}
