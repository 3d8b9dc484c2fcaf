//! Handy alert client library
//! A BLE central that finds the alert peripheral, subscribes to its alert
//! characteristic and turns notifications into alerts and calls.

pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod platform;
pub mod state;
pub mod utils;
