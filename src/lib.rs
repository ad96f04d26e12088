pub mod bridge;
pub mod camera;
pub mod cloud;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod plugin;
pub mod protocol;
