pub mod api;
pub mod clients;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod mediums;
pub mod models;
pub mod producer;
pub mod queue;
pub mod store;
pub mod utils;
pub mod worker;
