pub mod analytics;
pub mod completion;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod preferences;
pub mod queue;
pub mod session;
pub mod storage;
pub mod summary;
pub mod tracker;
