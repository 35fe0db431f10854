pub mod prelude;

pub mod media_library;
pub mod moderation_records;
pub mod pending_callbacks;
pub mod review_queue_items;
