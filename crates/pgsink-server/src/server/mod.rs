pub mod config;
pub mod gateway;
pub mod runtime;
pub mod service;
pub mod telemetry;
