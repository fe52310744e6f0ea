//! Device IP check-in service.
//!
//! Devices POST `{"Name": ..., "IPv4": ...}` and the service upserts one row
//! per (name, address) pair into a DynamoDB table.

pub mod agent;
pub mod config;
pub mod error;
pub mod handler;
pub mod model;
pub mod server;
pub mod store;

pub use config::Config;
pub use server::{create_router, start_server};
