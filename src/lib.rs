//! channel-watch: translate, filter and alert on new channel posts.

pub mod bootstrap;
pub mod channels;
pub mod config;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod translate;
