use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One row per analyzed image. Raw provider signals are kept verbatim for
/// audit even when the verdict is an automatic approval.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "moderation_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub tenant_id: String,
    pub context_type: String,
    pub usage_intent: String,
    pub image_path: String,
    pub original_path: String,
    pub nudity_score: f64,
    #[sea_orm(column_type = "JsonBinary")]
    pub detected_parts: Json,
    pub pose_classification: String,
    pub explicit_pose_score: f64,
    pub face_count: i32,
    pub min_detected_age: Option<i32>,
    #[sea_orm(default_value = false)]
    pub underage_detected: bool,
    pub age_risk_multiplier: f64,
    pub combined_risk_score: f64,
    pub risk_level: String,
    pub generated_description: Option<String>,
    #[sea_orm(column_type = "JsonBinary")]
    pub keywords: Json,
    #[sea_orm(column_type = "JsonBinary")]
    pub policy_violations: Json,
    #[sea_orm(column_type = "JsonBinary")]
    pub raw_signals: Json,
    pub verdict: String,
    #[sea_orm(default_value = false)]
    pub human_review_required: bool,
    #[sea_orm(default_value = false)]
    pub auto_blocked: bool,
    pub confidence_score: f64,
    pub final_location: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::review_queue_items::Entity")]
    ReviewQueueItems,
}

impl Related<super::review_queue_items::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReviewQueueItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
