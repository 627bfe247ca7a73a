//! Change ledger entity.
//!
//! One row per committed write to a relationship or block document, appended in
//! the same transaction as the write. The trigger dispatcher drains rows in id
//! order and stamps `processed_at` when a handler's side effects commit.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Collection a ledger row refers to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    #[sea_orm(string_value = "friendship")]
    Friendship,
    #[sea_orm(string_value = "blocking")]
    Blocking,
}

/// Kind of write.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    #[sea_orm(string_value = "created")]
    Created,
    #[sea_orm(string_value = "updated")]
    Updated,
    #[sea_orm(string_value = "deleted")]
    Deleted,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "change_event")]
pub struct Model {
    /// ULID; lexical order is commit order within one process
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub collection: Collection,

    pub document_id: String,

    pub kind: ChangeKind,

    /// Document state before the write
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub before: Option<Json>,

    /// Document state after the write
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub after: Option<Json>,

    #[sea_orm(default_value = 0)]
    pub attempts: i32,

    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,

    /// Processed-event marker
    #[sea_orm(nullable)]
    pub processed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
