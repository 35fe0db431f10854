pub mod callbacks;
pub mod moderation;
pub mod policy;
pub mod provider;
pub mod queue;
pub mod storage;
pub mod worker;
