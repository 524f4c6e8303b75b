//! # Core Module
//!
//! Configuration, error taxonomy and text helpers shared by every feature.
//!
//! - **Version**: 1.2.0
//! - **Since**: 1.0.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.2.0: Add text module with per-channel length limits
//! - 1.1.0: Add typed error taxonomy
//! - 1.0.0: Initial creation with config module

pub mod config;
pub mod error;
pub mod text;

pub use config::Config;
pub use error::{NotifyError, QueueError, SchedulerError, StoreError};
pub use text::{chunk_text, truncate_to, with_subject, SMS_LIMIT, SUBJECT_LIMIT, TELEGRAM_LIMIT};
