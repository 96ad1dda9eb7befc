pub mod config;
pub mod event;
pub mod kafka;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod schema;
pub mod store;
