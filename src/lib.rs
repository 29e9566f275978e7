//! companionctl - Start and stop companion applications alongside a target application
//!
//! Watches the process table for a target (by default Microsoft Flight Simulator),
//! launches the configured companions when it starts and closes them when it stops.

pub mod core;
pub mod platform;

/// Application name constant
pub const APP_NAME: &str = "companionctl";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
