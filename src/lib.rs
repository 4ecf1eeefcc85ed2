//! Image upscaling pipeline
//!
//! Core of the upscale service: an HTTP API that stages uploads in object
//! storage and publishes jobs to RabbitMQ, and a worker that consumes those
//! jobs, upscales the image and reports progress through a Redis-backed
//! status store with a retention TTL.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
pub mod shutdown;
pub mod worker;
