use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Outstanding asynchronous analysis job. `(media_id, batch_id)` is unique;
/// registration enforces it with a lookup inside a transaction.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pending_callbacks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub media_id: String,
    pub batch_id: String,
    pub tenant_slug: String,
    pub status: String,
    #[sea_orm(default_value = 0)]
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTimeWithTimeZone>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub callback_payload: Option<Json>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::media_library::Entity",
        from = "Column::MediaId",
        to = "super::media_library::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    MediaLibrary,
}

impl Related<super::media_library::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MediaLibrary.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
