pub mod channel;
pub mod codes;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;
pub mod store;
