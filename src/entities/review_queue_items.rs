use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Human-review work item. The unique constraint on `moderation_record_id`
/// keeps at most one active queue row per record.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "review_queue_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(unique)]
    pub moderation_record_id: String,
    pub tenant_id: String,
    #[sea_orm(default_value = 0)]
    pub priority: i32,
    pub queue_type: String,
    pub status: String,
    pub flagged_at: DateTimeWithTimeZone,
    pub reviewed_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::moderation_records::Entity",
        from = "Column::ModerationRecordId",
        to = "super::moderation_records::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    ModerationRecords,
}

impl Related<super::moderation_records::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ModerationRecords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
