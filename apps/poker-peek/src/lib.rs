pub mod commands;
pub mod config;
pub mod pipeline;
pub mod socket;
pub mod telemetry;
