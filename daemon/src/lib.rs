pub mod action_log;
pub mod app;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod event;
pub mod matcher;
pub mod paths;
pub mod platform;
pub mod startup;
pub mod status;
pub mod window_monitor;
