pub mod cli;
pub mod config;
pub mod effects;
pub mod engine;
pub mod error;
pub mod host;
pub mod server;
