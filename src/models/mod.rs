pub mod job;
pub mod upscale;
