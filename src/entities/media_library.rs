use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Durable media reference the portfolio site serves from. Orphan
/// reclamation treats the set of `file_path` values here as the live-path
/// snapshot for a tenant.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "media_library")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub tenant_id: String,
    pub file_path: String,
    pub moderation_record_id: Option<String>,
    pub moderation_status: String,
    pub moderation_score: f64,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::pending_callbacks::Entity")]
    PendingCallbacks,
}

impl Related<super::pending_callbacks::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PendingCallbacks.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
