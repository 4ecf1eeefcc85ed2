pub mod auth;
pub mod jobs;
pub mod memory;
pub mod queue;
pub mod status_store;
pub mod storage;
pub mod upscaler;
