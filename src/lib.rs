//! Cutover - atomic self-updater for locally installed services
//!
//! Checks a metadata endpoint for a new version, downloads and verifies the
//! binary into `versions/`, and swaps the `current` pointer around a
//! stop/start of the managed service.

pub mod engine;

pub use engine::config::UpdaterConfig;
pub use engine::updater::{UpdateError, UpdateOptions, UpdateOutcome, Updater};
