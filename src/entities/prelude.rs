pub use super::media_library::Entity as MediaLibrary;
pub use super::moderation_records::Entity as ModerationRecords;
pub use super::pending_callbacks::Entity as PendingCallbacks;
pub use super::review_queue_items::Entity as ReviewQueueItems;
