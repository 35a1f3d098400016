pub mod config;
pub mod context;
pub mod keep_awake;
pub mod logging;
