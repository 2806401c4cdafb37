pub mod app_state;
pub mod cli;
pub mod config;
pub mod db;
pub mod decode;
pub mod index;
pub mod recognition;
pub mod server;
pub mod tracing;
