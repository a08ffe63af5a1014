//! # PlugHost Core
//! Shared types, capability traits, configuration and errors.
//!
//! Every other PlugHost crate builds on the contracts defined here:
//! - [`traits::Transport`]: the chat network the bot speaks through
//! - [`traits::Store`]: the document store plugins persist into
//! - [`clock::Clock`]: wall time and interruptible sleeps, injectable for tests

pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod traits;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::HostConfig;
pub use error::{PlugHostError, Result};
pub use traits::{Store, Transport};
