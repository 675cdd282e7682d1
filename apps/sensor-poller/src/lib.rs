pub mod config;
pub mod error;
pub mod export;
pub mod ingest;
pub mod pipeline;
pub mod render;
pub mod source;
pub mod telemetry;
