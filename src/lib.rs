//! Mod manager core for Sid Meier's Civilization VII.
//!
//! Installs mods from archives into a private storage directory, tracks
//! enabled state and file conflicts, saves named profiles, and deploys the
//! enabled set into the game's mod directory.

pub mod archive;
pub mod config;
pub mod conflicts;
pub mod deploy;
pub mod error;
mod fsops;
pub mod game;
pub mod logging;
pub mod manager;
pub mod manifest;
pub mod profiles;
pub mod progress;
pub mod registry;

pub use config::Config;
pub use error::{ModError, Result};
pub use manager::{Callbacks, ModManager};
pub use registry::{ModRecord, Registry};
