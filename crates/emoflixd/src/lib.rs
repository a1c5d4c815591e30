//! emoflixd — HTTP front end for the emoflix emotion pipeline.

pub mod config;
pub mod engine;
pub mod routes;
pub mod server;
pub mod telemetry;
