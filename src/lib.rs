//! Watches Twitter lists and replies to new original tweets, at most a
//! configured number of times per author per day.

pub mod commands;
pub mod config;
pub mod context;
pub mod datetime_utils;
pub mod dedup;
pub mod dispatcher;
pub mod error_utils;
pub mod llm;
pub mod poller;
pub mod quota;
pub mod retry_policy;
pub mod scheduler;
pub mod transport;
pub mod twitter;
