pub mod app_state;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod providers;
pub mod reader;
pub mod scheduler;
pub mod search;
pub mod store;
pub mod sync;
pub mod transport;
