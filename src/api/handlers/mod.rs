pub mod callbacks;
pub mod health;
pub mod queue;
pub mod stats;
pub mod upload;
