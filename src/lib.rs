//! dcborg-cli: back up docker-compose folders to a remote borg repository
//!
//! The binary in `main.rs` only parses arguments and sets up logging; all of
//! the backup logic lives here so it can be driven and tested without a
//! process boundary.

pub mod core;
pub mod error;
pub mod utils;

pub use error::{BackupError, BackupResult};
