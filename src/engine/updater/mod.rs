//! Cutover Self-Update System
//!
//! Integrity-checked downloads and an atomic `current` pointer swap.
//!
//! Components:
//! - `verify` - Streaming SHA-256 digests
//! - `version_manager` - The `versions/` store
//! - `swap` - Atomic repointing of `current`
//! - `service` - Stop/start of the managed service
//! - `probe` - Version query against the active binary
//! - `transport` - Descriptor and artifact fetching
//! - `state` - Attempt state machine and `state.json`
//! - `orchestrator` - Sequences all of the above

pub mod verify;
pub mod version_manager;
pub mod swap;
pub mod service;
pub mod probe;
pub mod transport;
pub mod state;
pub mod orchestrator;

pub use orchestrator::{UpdateError, UpdateOptions, UpdateOutcome, Updater};
pub use state::{UpdateState, UpdateStatus};
pub use swap::CurrentPointer;
pub use transport::UpdateDescriptor;
pub use version_manager::VersionManager;
