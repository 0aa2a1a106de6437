//! Daemon process driving the phone, plus the tooling to manage it.

pub mod adb;
pub mod client;
pub mod control;
pub mod known_actions;
pub mod paths;
pub mod server;
pub mod watchdog;

// Public API - used by main.rs
pub use client::DaemonClient;
pub use server::DaemonServer;
