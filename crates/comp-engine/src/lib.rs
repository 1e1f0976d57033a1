pub mod compensation;
pub mod config;
pub mod error;
pub mod telemetry;
