//! Mod-loader installation and launch pipeline for Minecraft launchers.
//!
//! The crate is split the same way a launch flows: [`game::installer`] gets a
//! loader onto disk, [`game::catalog`] maps user installations onto installed
//! version ids, and [`game::launcher`] turns the result into a running JVM.

pub mod error;
pub mod game;
pub mod utils;

pub use error::{AnvilError, AnvilResult};
pub use game::installer::types::{LoaderDescriptor, ModloaderType};
