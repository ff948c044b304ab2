//! Terminal front end over [`crate::core::service::MarketService`]

pub mod config;
pub mod history;
pub mod quotes;
pub mod setup;
pub mod ui;
pub mod watch;
