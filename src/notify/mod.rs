//! Notification module for alerts and output.
//!
//! This module handles:
//! - Colored console output for scans and confirmations
//! - Telegram bot notifications when a decoy package phones home

pub mod console;
pub mod telegram;

pub use console::ConsoleOutput;
pub use telegram::TelegramNotifier;
